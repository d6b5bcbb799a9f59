//! HTTP front door

pub mod routes;

pub use routes::build_router;
