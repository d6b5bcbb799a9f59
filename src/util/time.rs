//! Time utilities

use std::time::Instant;

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Whole milliseconds, rounded up so sub-millisecond round trips read as 1ms
pub fn ceil_millis(duration: std::time::Duration) -> u64 {
    let micros = duration.as_micros() as u64;
    micros.div_ceil(1000)
}
