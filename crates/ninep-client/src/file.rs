//! Open remote files.

use bytes::Bytes;
use ninep_proto::{IOHDRSZ, Qid};

use crate::client::Client;
use crate::error::ClientResult;

/// An open fid. Call [`RemoteFile::close`] when done; dropping it clunks in
/// the background if a runtime is available.
#[derive(Debug)]
pub struct RemoteFile {
    client: Client,
    fid: u32,
    qid: Qid,
    iounit: u32,
    closed: bool,
}

impl RemoteFile {
    pub(crate) fn new(client: Client, fid: u32, qid: Qid, iounit: u32) -> Self {
        // Servers may answer iounit 0, meaning "use msize".
        let iounit = if iounit == 0 {
            client.msize().saturating_sub(IOHDRSZ)
        } else {
            iounit.min(client.iounit())
        };
        Self {
            client,
            fid,
            qid,
            iounit,
            closed: false,
        }
    }

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn qid(&self) -> Qid {
        self.qid
    }

    /// Largest payload of a single read or write.
    pub fn iounit(&self) -> u32 {
        self.iounit
    }

    /// One read request of at most `count` bytes.
    pub async fn read(&self, offset: u64, count: u32) -> ClientResult<Bytes> {
        self.client
            .read_fid(self.fid, offset, count.min(self.iounit))
            .await
    }

    /// Fill `buf` from `offset`, stopping early at end of data.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> ClientResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let want = (buf.len() - filled).min(self.iounit as usize) as u32;
            let data = self.read(offset + filled as u64, want).await?;
            if data.is_empty() {
                break;
            }
            let n = data.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[..n]);
            filled += n;
        }
        Ok(filled)
    }

    /// Write all of `buf` at `offset` in iounit-sized requests. Returns the
    /// bytes written, which is short only if the server accepted less.
    pub async fn write_at(&self, buf: &[u8], offset: u64) -> ClientResult<usize> {
        let mut written = 0;
        for chunk in buf.chunks(self.iounit.max(1) as usize) {
            let n = self
                .client
                .write_fid(
                    self.fid,
                    offset + written as u64,
                    Bytes::copy_from_slice(chunk),
                )
                .await? as usize;
            written += n;
            if n < chunk.len() {
                break;
            }
        }
        Ok(written)
    }

    /// Clunk the fid.
    pub async fn close(mut self) -> ClientResult<()> {
        self.closed = true;
        self.client.clunk(self.fid).await
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let client = self.client.clone();
        let fid = self.fid;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.clunk(fid).await {
                        log::debug!("background clunk of fid {}: {}", fid, e);
                    }
                });
            }
            Err(_) => {
                log::warn!("fid {} dropped outside a runtime; not clunked", fid);
                client.release_fid(fid);
            }
        }
    }
}
