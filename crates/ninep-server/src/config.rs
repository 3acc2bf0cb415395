//! Server configuration.
//!
//! Loadable from a RON file; every field is optional there and falls back
//! to [`ServerConfig::default`].
//!
//! ```ron
//! (
//!     bind_addr: "0.0.0.0:5640",
//!     msize: 65536,
//!     root_user: "glenda",
//!     root_group: "sys",
//!     root_perm: 0o775,
//! )
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_MSIZE, DEFAULT_PORT, DEFAULT_ROOT_PERM};

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Largest msize offered to clients.
    pub msize: u32,
    /// Owner of the root directory.
    pub root_user: String,
    /// Group of the root directory.
    pub root_group: String,
    /// Permission bits of the root directory.
    pub root_perm: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let ip: IpAddr = DEFAULT_BIND_ADDRESS
            .parse()
            .unwrap_or(IpAddr::from([127, 0, 0, 1]));
        let user = whoami::username();
        Self {
            bind_addr: SocketAddr::new(ip, DEFAULT_PORT),
            msize: DEFAULT_MSIZE,
            root_group: user.clone(),
            root_user: user,
            root_perm: DEFAULT_ROOT_PERM,
        }
    }
}

impl ServerConfig {
    /// Localhost on an OS-assigned port (for testing).
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }

    /// Parse a RON config string.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load a RON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }
}
