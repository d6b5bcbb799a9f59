//! Game simulation modules

pub mod ticker;
pub mod world;

pub use ticker::Ticker;
pub use world::{PlayerId, WorldStore};
