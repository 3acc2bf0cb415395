//! File body trait.
//!
//! A [`File`](super::File) node owns metadata and delegates content to a
//! body. Bodies are stateful per handle: `open` registers a handle, I/O is
//! only valid on registered handles, `close` forgets it.

use async_trait::async_trait;
use bytes::Bytes;
use ninep_proto::OpenMode;

use super::types::HandleId;
use super::VfsResult;

/// Content behind a file node.
///
/// Implementations may block (hence async); the dispatcher runs each request
/// on its own task.
#[async_trait]
pub trait FileBody: Send + Sync {
    // ========================================================================
    // Handle lifecycle
    // ========================================================================

    /// Register `handle` with the given mode. Honours the truncate flag.
    async fn open(&self, handle: HandleId, mode: OpenMode) -> VfsResult<()>;

    /// Forget `handle`. Closing an unknown handle is not an error.
    async fn close(&self, handle: HandleId) -> VfsResult<()>;

    // ========================================================================
    // I/O
    // ========================================================================

    /// Read up to `count` bytes at `offset`.
    ///
    /// Returns fewer bytes at end of data and an empty buffer past it.
    async fn read(&self, handle: HandleId, offset: u64, count: u32) -> VfsResult<Bytes>;

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, handle: HandleId, offset: u64, data: &[u8]) -> VfsResult<u32>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Current content length, reported in the node's stat.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize the content (wstat length change).
    fn set_len(&self, _len: u64) -> VfsResult<()> {
        Err(super::VfsError::unsupported("resize"))
    }
}
