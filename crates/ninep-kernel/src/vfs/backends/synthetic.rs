//! Closure-backed file body.
//!
//! Content is produced on demand: each handle that opens for reading gets a
//! snapshot from the reader closure, so a reader sees a consistent view for
//! as long as it holds the handle. Writes go to an optional writer closure.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use ninep_proto::OpenMode;

use crate::vfs::ops::FileBody;
use crate::vfs::types::HandleId;
use crate::vfs::{VfsError, VfsResult};

/// Produces the file's content.
pub type ReadFn = Arc<dyn Fn() -> VfsResult<Bytes> + Send + Sync>;

/// Consumes a write at an offset, returning bytes accepted.
pub type WriteFn = Arc<dyn Fn(u64, &[u8]) -> VfsResult<u32> + Send + Sync>;

struct Snapshot {
    mode: OpenMode,
    content: Bytes,
}

/// File whose content comes from closures rather than stored bytes.
pub struct SyntheticBody {
    reader: ReadFn,
    writer: Option<WriteFn>,
    snapshots: DashMap<HandleId, Snapshot>,
}

impl SyntheticBody {
    /// Body whose content is regenerated by `reader` on every open.
    pub fn new(reader: impl Fn() -> VfsResult<Bytes> + Send + Sync + 'static) -> Self {
        Self {
            reader: Arc::new(reader),
            writer: None,
            snapshots: DashMap::new(),
        }
    }

    /// Body with fixed content.
    pub fn fixed(content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self::new(move || Ok(content.clone()))
    }

    /// Accept writes through `writer`. Without one, opening for write fails.
    pub fn with_writer(
        mut self,
        writer: impl Fn(u64, &[u8]) -> VfsResult<u32> + Send + Sync + 'static,
    ) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    fn snapshot_mode(&self, handle: HandleId) -> VfsResult<OpenMode> {
        self.snapshots
            .get(&handle)
            .map(|s| s.mode)
            .ok_or_else(|| VfsError::bad_handle(format!("{handle} is not open")))
    }
}

#[async_trait]
impl FileBody for SyntheticBody {
    async fn open(&self, handle: HandleId, mode: OpenMode) -> VfsResult<()> {
        if mode.can_write() && self.writer.is_none() {
            return Err(VfsError::unsupported("file is read-only"));
        }
        if mode.truncate() {
            return Err(VfsError::unsupported("truncate"));
        }
        let content = if mode.can_read() {
            (self.reader)()?
        } else {
            Bytes::new()
        };
        self.snapshots.insert(handle, Snapshot { mode, content });
        Ok(())
    }

    async fn close(&self, handle: HandleId) -> VfsResult<()> {
        self.snapshots.remove(&handle);
        Ok(())
    }

    async fn read(&self, handle: HandleId, offset: u64, count: u32) -> VfsResult<Bytes> {
        let snapshot = self
            .snapshots
            .get(&handle)
            .ok_or_else(|| VfsError::bad_handle(format!("{handle} is not open")))?;
        if !snapshot.mode.can_read() {
            return Err(VfsError::bad_handle(format!("{handle} is not open for reading")));
        }

        let len = snapshot.content.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = (offset + count as u64).min(len);
        Ok(snapshot.content.slice(offset as usize..end as usize))
    }

    async fn write(&self, handle: HandleId, offset: u64, data: &[u8]) -> VfsResult<u32> {
        if !self.snapshot_mode(handle)?.can_write() {
            return Err(VfsError::bad_handle(format!("{handle} is not open for writing")));
        }
        match &self.writer {
            Some(writer) => writer(offset, data),
            None => Err(VfsError::unsupported("file is read-only")),
        }
    }

    /// Synthetic content has no stored size.
    fn len(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const H1: HandleId = HandleId { session: 1, fid: 7 };
    const H2: HandleId = HandleId { session: 1, fid: 8 };

    #[tokio::test]
    async fn test_fixed_content() {
        let body = SyntheticBody::fixed("version 1\n");
        body.open(H1, OpenMode::READ).await.unwrap();
        assert_eq!(body.read(H1, 0, 100).await.unwrap(), &b"version 1\n"[..]);
        assert_eq!(body.read(H1, 8, 100).await.unwrap(), &b"1\n"[..]);
        assert!(body.read(H1, 10, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_per_handle() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let body = SyntheticBody::new(move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(format!("tick {n}")))
        });

        body.open(H1, OpenMode::READ).await.unwrap();
        body.open(H2, OpenMode::READ).await.unwrap();
        assert_eq!(body.read(H1, 0, 64).await.unwrap(), &b"tick 0"[..]);
        assert_eq!(body.read(H2, 0, 64).await.unwrap(), &b"tick 1"[..]);
        // Re-reading the same handle does not regenerate.
        assert_eq!(body.read(H1, 0, 64).await.unwrap(), &b"tick 0"[..]);
    }

    #[tokio::test]
    async fn test_read_only_refuses_write_open() {
        let body = SyntheticBody::fixed("x");
        assert!(matches!(
            body.open(H1, OpenMode::WRITE).await,
            Err(VfsError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_receives_data() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let s = sink.clone();
        let body = SyntheticBody::fixed("").with_writer(move |offset, data| {
            s.lock().push((offset, data.to_vec()));
            Ok(data.len() as u32)
        });

        body.open(H1, OpenMode::WRITE).await.unwrap();
        assert_eq!(body.write(H1, 3, b"ctl").await.unwrap(), 3);
        assert_eq!(*sink.lock(), vec![(3, b"ctl".to_vec())]);
        assert!(body.read(H1, 0, 1).await.is_err());
    }
}
