//! ninep client library
//!
//! Async 9P2000 client over any `AsyncRead + AsyncWrite` stream. One
//! [`Client`] multiplexes concurrent calls over a single connection.
//!
//! ```ignore
//! let client = Client::connect_tcp(addr, Config::default()).await?;
//! let names: Vec<String> = client.readdir("/").await?.into_iter().map(|s| s.name).collect();
//! let motd = client.read_all("/motd").await?;
//! ```

pub mod client;
pub mod constants;
pub mod error;
pub mod file;
pub mod tags;

pub use client::{Client, Config};
pub use error::{ClientError, ClientResult};
pub use file::RemoteFile;
pub use tags::{FidPool, Tag, TagPool};
