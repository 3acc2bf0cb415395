//! ninep server library
//!
//! Serves a [`ninep_kernel::Tree`] over 9P2000. [`NinepServer`] owns the
//! listener and connection loop; each connection gets a [`Session`] holding
//! its fid table.

pub mod config;
pub mod constants;
pub mod error;
pub mod server;
pub mod session;

pub use config::{ConfigError, ServerConfig};
pub use error::{DispatchError, DispatchResult};
pub use server::NinepServer;
pub use session::Session;
