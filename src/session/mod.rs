//! Per-process compositing sessions.

/// Frame configuration and composite order.
pub mod config;
/// The session object and its frame driver.
pub mod context;
/// Buffers reused across frames.
pub mod scratch;
