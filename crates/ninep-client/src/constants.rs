//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// msize requested during version negotiation.
pub const DEFAULT_MSIZE: u32 = 8192;

/// Timeout for TCP connect plus the version and attach exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued for the writer task before callers wait.
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;
