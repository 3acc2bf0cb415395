//! Tag and fid allocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ninep_proto::{NOFID, NOTAG};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::{ClientError, ClientResult};

/// Pool of request tags.
///
/// Holds every `u16` except `NOTAG` by default. [`TagPool::acquire`] waits
/// while all tags are outstanding.
#[derive(Debug)]
pub struct TagPool {
    permits: Semaphore,
    free: Mutex<Vec<u16>>,
}

impl TagPool {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(NOTAG)
    }

    /// A pool of tags `0..size`. `size` is capped so `NOTAG` is never issued.
    pub fn with_capacity(size: u16) -> Arc<Self> {
        let size = size.min(NOTAG);
        Arc::new(Self {
            permits: Semaphore::new(size as usize),
            free: Mutex::new((0..size).rev().collect()),
        })
    }

    /// Take a tag, waiting for one to be returned if none are free.
    pub async fn acquire(self: &Arc<Self>) -> ClientResult<Tag> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        permit.forget();
        let tag = self
            .free
            .lock()
            .pop()
            .ok_or(ClientError::ConnectionClosed)?;
        Ok(Tag {
            pool: self.clone(),
            tag,
        })
    }

    /// Tags not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Fail every current and future `acquire`.
    pub fn close(&self) {
        self.permits.close();
    }

    fn release(&self, tag: u16) {
        self.free.lock().push(tag);
        self.permits.add_permits(1);
    }
}

/// A held tag. Returns to its pool on drop.
#[derive(Debug)]
pub struct Tag {
    pool: Arc<TagPool>,
    tag: u16,
}

impl Tag {
    pub fn get(&self) -> u16 {
        self.tag
    }
}

impl Drop for Tag {
    fn drop(&mut self) {
        self.pool.release(self.tag);
    }
}

/// Fid numbers for one connection. Released fids are reused first.
#[derive(Debug, Default)]
pub struct FidPool {
    next: AtomicU32,
    free: Mutex<Vec<u32>>,
}

impl FidPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self) -> u32 {
        if let Some(fid) = self.free.lock().pop() {
            return fid;
        }
        let fid = self.next.fetch_add(1, Ordering::Relaxed);
        // Skip NOFID on wraparound.
        if fid == NOFID {
            return self.next.fetch_add(1, Ordering::Relaxed);
        }
        fid
    }

    pub fn release(&self, fid: u32) {
        self.free.lock().push(fid);
    }
}
