//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Default port (the registered 564, shifted out of the privileged range).
pub const DEFAULT_PORT: u16 = 5640;

/// Default bind address (localhost only for security).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Largest frame the server offers during version negotiation.
pub const DEFAULT_MSIZE: u32 = 8192;

/// Smallest msize a client may negotiate. Below this a single directory
/// entry may not fit in a read.
pub const MIN_MSIZE: u32 = 256;

/// Permission bits of the root directory.
pub const DEFAULT_ROOT_PERM: u32 = 0o775;

/// Replies buffered per connection before request tasks wait on the writer.
pub const REPLY_CHANNEL_CAPACITY: usize = 64;
