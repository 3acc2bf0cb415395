//! In-memory file body.
//!
//! All data is ephemeral.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ninep_proto::OpenMode;
use parking_lot::RwLock;

use crate::vfs::ops::FileBody;
use crate::vfs::types::HandleId;
use crate::vfs::{VfsError, VfsResult};

/// Largest size a memory body will grow to.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

/// Growable byte buffer shared by every handle on the file.
///
/// Thread-safe via internal `RwLock`. Tracks open handles and their modes so
/// I/O through an unopened handle, or one opened without the needed access,
/// is rejected.
#[derive(Debug, Default)]
pub struct MemoryBody {
    data: RwLock<Vec<u8>>,
    handles: DashMap<HandleId, OpenMode>,
}

impl MemoryBody {
    /// Create an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a body with initial content.
    pub fn with_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(content.into()),
            handles: DashMap::new(),
        }
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn mode_of(&self, handle: HandleId) -> VfsResult<OpenMode> {
        self.handles
            .get(&handle)
            .map(|mode| *mode)
            .ok_or_else(|| VfsError::bad_handle(format!("{handle} is not open")))
    }
}

/// Resize `data` to `len`, refusing sizes past [`MAX_FILE_SIZE`] or that the
/// allocator cannot satisfy.
fn resize(data: &mut Vec<u8>, len: u64) -> VfsResult<()> {
    if len > MAX_FILE_SIZE {
        return Err(VfsError::no_space(format!(
            "{len} bytes exceeds the {MAX_FILE_SIZE} byte limit"
        )));
    }
    let len = usize::try_from(len).map_err(|_| VfsError::no_space("length out of range"))?;
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|e| VfsError::no_space(e.to_string()))?;
    }
    data.resize(len, 0);
    Ok(())
}

#[async_trait]
impl FileBody for MemoryBody {
    async fn open(&self, handle: HandleId, mode: OpenMode) -> VfsResult<()> {
        if mode.truncate() {
            self.data.write().clear();
        }
        self.handles.insert(handle, mode);
        Ok(())
    }

    async fn close(&self, handle: HandleId) -> VfsResult<()> {
        self.handles.remove(&handle);
        Ok(())
    }

    async fn read(&self, handle: HandleId, offset: u64, count: u32) -> VfsResult<Bytes> {
        if !self.mode_of(handle)?.can_read() {
            return Err(VfsError::bad_handle(format!("{handle} is not open for reading")));
        }

        let data = self.data.read();
        let len = data.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let start = offset as usize;
        let end = (offset + count as u64).min(len) as usize;
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn write(&self, handle: HandleId, offset: u64, buf: &[u8]) -> VfsResult<u32> {
        if !self.mode_of(handle)?.can_write() {
            return Err(VfsError::bad_handle(format!("{handle} is not open for writing")));
        }
        let count = u32::try_from(buf.len())
            .map_err(|_| VfsError::invalid_argument("write larger than 4GiB"))?;
        let end = offset
            .checked_add(u64::from(count))
            .ok_or_else(|| VfsError::invalid_argument("offset out of range"))?;

        let mut data = self.data.write();
        if end > data.len() as u64 {
            resize(&mut data, end)?;
        }
        // end fits in usize once the buffer holds it
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(count)
    }

    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn set_len(&self, len: u64) -> VfsResult<()> {
        resize(&mut self.data.write(), len)
    }
}
