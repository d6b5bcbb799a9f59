//! WebSocket gateway: wire protocol, sessions and liveness

pub mod handler;
pub mod liveness;
pub mod protocol;
pub mod session;
