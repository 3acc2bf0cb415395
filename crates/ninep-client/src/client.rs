//! Multiplexed 9P client.
//!
//! Many calls can be in flight on one connection. Each gets a tag from the
//! [`TagPool`]; a background reader routes replies back by tag, in whatever
//! order the server sends them.
//!
//! ```text
//!   Client::rpc()  ──Frame──▶  writer task ──▶ socket
//!        ▲                                        │
//!        └──oneshot── pending[tag] ◀── reader task ◀┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use ninep_proto::{
    CodecError, Decoded, Fcall, Frame, IOHDRSZ, MAXWELEM, NOFID, NOTAG, NinepCodec, OpenMode,
    Qid, Stat, StatUpdate, VERSION, decode_stats,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_MSIZE, REQUEST_CHANNEL_CAPACITY};
use crate::error::{ClientError, ClientResult};
use crate::file::RemoteFile;
use crate::tags::{FidPool, Tag, TagPool};

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// User name presented at attach.
    pub uname: String,
    /// Tree to attach to. Most servers ignore it.
    pub aname: String,
    /// Largest frame to propose.
    pub msize: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uname: whoami::username(),
            aname: String::new(),
            msize: DEFAULT_MSIZE,
        }
    }
}

type ReplyTx = oneshot::Sender<ClientResult<Fcall>>;

/// A caller waiting on a reply. The tag is held until the reply arrives so
/// it cannot be reissued while the server may still answer on it.
struct Waiter {
    reply: ReplyTx,
    _tag: Option<Tag>,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u16, Waiter>,
}

/// State shared by the client handle and its I/O tasks.
struct Shared {
    pending: Mutex<Pending>,
    tags: Arc<TagPool>,
}

impl Shared {
    fn register(&self, tag: u16, waiter: Waiter) -> ClientResult<()> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(ClientError::ConnectionClosed);
        }
        pending.waiters.insert(tag, waiter);
        Ok(())
    }

    fn deliver(&self, tag: u16, reply: ClientResult<Fcall>) {
        let waiter = self.pending.lock().waiters.remove(&tag);
        match waiter {
            Some(waiter) => {
                let _ = waiter.reply.send(reply);
            }
            None => log::warn!("reply for unknown tag {}", tag),
        }
    }

    fn forget(&self, tag: u16) {
        self.pending.lock().waiters.remove(&tag);
    }

    /// Fail everything pending and refuse new calls.
    fn close(&self) {
        let waiters = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        if !waiters.is_empty() {
            log::debug!("failing {} pending calls", waiters.len());
        }
        // Dropping each sender wakes its caller with ConnectionClosed.
        drop(waiters);
        self.tags.close();
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }
}

struct Inner {
    shared: Arc<Shared>,
    requests: mpsc::Sender<Frame>,
    fids: FidPool,
    root: u32,
    msize: u32,
    uname: String,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.close();
        self.reader.abort();
        self.writer.abort();
    }
}

/// A connected, attached 9P client. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect over TCP and attach.
    pub async fn connect_tcp(addr: SocketAddr, config: Config) -> ClientResult<Self> {
        tokio::time::timeout(CONNECT_TIMEOUT, async {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Self::connect(stream, config).await
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Run the version and attach exchange over `stream`.
    pub async fn connect<S>(stream: S, config: Config) -> ClientResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let max_frame = config.msize as usize;
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            tags: TagPool::new(),
        });

        let (requests, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write_half, NinepCodec::new(max_frame)),
            rx,
            shared.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, NinepCodec::new(max_frame)),
            shared.clone(),
        ));

        let mut inner = Inner {
            shared,
            requests,
            fids: FidPool::new(),
            root: NOFID,
            msize: config.msize,
            uname: config.uname.clone(),
            reader,
            writer,
        };

        let reply = send(
            &inner,
            NOTAG,
            None,
            Fcall::Tversion {
                msize: config.msize,
                version: VERSION.to_string(),
            },
        )
        .await?;
        match reply {
            Fcall::Rversion { msize, version } => {
                if version != VERSION {
                    return Err(ClientError::UnsupportedVersion(version));
                }
                inner.msize = msize.min(config.msize);
            }
            other => return Err(unexpected("Tversion", &other)),
        }

        let root = inner.fids.alloc();
        let tag = inner.shared.tags.acquire().await?;
        let reply = send(
            &inner,
            tag.get(),
            Some(tag),
            Fcall::Tattach {
                fid: root,
                afid: NOFID,
                uname: config.uname.clone(),
                aname: config.aname.clone(),
            },
        )
        .await?;
        if !matches!(reply, Fcall::Rattach { .. }) {
            return Err(unexpected("Tattach", &reply));
        }
        inner.root = root;
        log::debug!(
            "attached as {} (msize {}, aname {:?})",
            config.uname,
            inner.msize,
            config.aname
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Negotiated frame size.
    pub fn msize(&self) -> u32 {
        self.inner.msize
    }

    /// Largest read or write payload.
    pub fn iounit(&self) -> u32 {
        self.inner.msize.saturating_sub(IOHDRSZ)
    }

    /// The fid bound to the attach root.
    pub fn root_fid(&self) -> u32 {
        self.inner.root
    }

    pub fn uname(&self) -> &str {
        &self.inner.uname
    }

    /// True once the connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// Send one request and wait for its reply. `Rerror` becomes
    /// [`ClientError::Server`].
    pub async fn rpc(&self, fcall: Fcall) -> ClientResult<Fcall> {
        let tag = self.inner.shared.tags.acquire().await?;
        send(&self.inner, tag.get(), Some(tag), fcall).await
    }

    // ========================================================================
    // Fid-level operations
    // ========================================================================

    /// Walk from the root to `path`, returning a fresh fid bound there.
    ///
    /// Paths longer than 16 elements take several round trips.
    pub async fn walk(&self, path: &str) -> ClientResult<u32> {
        let names = split_path(path);
        let newfid = self.inner.fids.alloc();

        let mut from = self.inner.root;
        let mut walked = 0;
        let mut chunks: Vec<&[String]> = names.chunks(MAXWELEM).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        for chunk in chunks {
            let result = self
                .rpc(Fcall::Twalk {
                    fid: from,
                    newfid,
                    wnames: chunk.to_vec(),
                })
                .await
                .and_then(|reply| match reply {
                    Fcall::Rwalk { wqids } => Ok(wqids),
                    other => Err(unexpected("Twalk", &other)),
                });
            let bound = from == newfid;
            match result {
                Ok(wqids) if wqids.len() == chunk.len() => {
                    walked += chunk.len();
                    from = newfid;
                }
                Ok(wqids) => {
                    self.abandon(newfid, bound).await;
                    return Err(ClientError::WalkIncomplete {
                        walked: walked + wqids.len(),
                        wanted: names.len(),
                    });
                }
                Err(e) => {
                    self.abandon(newfid, bound).await;
                    return Err(e);
                }
            }
        }
        Ok(newfid)
    }

    /// Give back a fid after a failed walk, clunking it if it got bound.
    async fn abandon(&self, fid: u32, bound: bool) {
        if bound {
            if let Err(e) = self.clunk(fid).await {
                log::debug!("clunk of fid {} after failed walk: {}", fid, e);
            }
        } else {
            self.inner.fids.release(fid);
        }
    }

    /// Release `fid`. The number returns to the pool even if the server
    /// reports an error, since the fid is invalid on the server afterwards.
    pub async fn clunk(&self, fid: u32) -> ClientResult<()> {
        let result = self.rpc(Fcall::Tclunk { fid }).await;
        self.inner.fids.release(fid);
        match result? {
            Fcall::Rclunk => Ok(()),
            other => Err(unexpected("Tclunk", &other)),
        }
    }

    async fn open_fid(&self, fid: u32, mode: OpenMode) -> ClientResult<(Qid, u32)> {
        match self.rpc(Fcall::Topen { fid, mode }).await? {
            Fcall::Ropen { qid, iounit } => Ok((qid, iounit)),
            other => Err(unexpected("Topen", &other)),
        }
    }

    /// Read up to `count` bytes from an open fid in a single request.
    pub async fn read_fid(&self, fid: u32, offset: u64, count: u32) -> ClientResult<Bytes> {
        match self.rpc(Fcall::Tread { fid, offset, count }).await? {
            Fcall::Rread { data } => Ok(data),
            other => Err(unexpected("Tread", &other)),
        }
    }

    /// Write `data` to an open fid in a single request.
    pub async fn write_fid(&self, fid: u32, offset: u64, data: Bytes) -> ClientResult<u32> {
        match self.rpc(Fcall::Twrite { fid, offset, data }).await? {
            Fcall::Rwrite { count } => Ok(count),
            other => Err(unexpected("Twrite", &other)),
        }
    }

    // ========================================================================
    // Path-level operations
    // ========================================================================

    /// Open the file at `path`.
    pub async fn open(&self, path: &str, mode: OpenMode) -> ClientResult<RemoteFile> {
        let fid = self.walk(path).await?;
        match self.open_fid(fid, mode).await {
            Ok((qid, iounit)) => Ok(RemoteFile::new(self.clone(), fid, qid, iounit)),
            Err(e) => {
                self.abandon(fid, true).await;
                Err(e)
            }
        }
    }

    /// Create `path` with `perm` and open it with `mode`. Include `DMDIR` in
    /// `perm` to create a directory.
    pub async fn create(&self, path: &str, perm: u32, mode: OpenMode) -> ClientResult<RemoteFile> {
        let (parent, name) = split_parent(path);
        let fid = self.walk(&parent).await?;
        let reply = self
            .rpc(Fcall::Tcreate {
                fid,
                name,
                perm,
                mode,
            })
            .await;
        match reply {
            Ok(Fcall::Rcreate { qid, iounit }) => {
                Ok(RemoteFile::new(self.clone(), fid, qid, iounit))
            }
            Ok(other) => {
                self.abandon(fid, true).await;
                Err(unexpected("Tcreate", &other))
            }
            Err(e) => {
                self.abandon(fid, true).await;
                Err(e)
            }
        }
    }

    pub async fn stat(&self, path: &str) -> ClientResult<Stat> {
        let fid = self.walk(path).await?;
        let reply = self.rpc(Fcall::Tstat { fid }).await;
        self.abandon(fid, true).await;
        match reply? {
            Fcall::Rstat { stat } => Ok(stat),
            other => Err(unexpected("Tstat", &other)),
        }
    }

    /// Apply the fields set in `update` to `path`.
    pub async fn wstat(&self, path: &str, update: &StatUpdate) -> ClientResult<()> {
        let fid = self.walk(path).await?;
        let reply = self
            .rpc(Fcall::Twstat {
                fid,
                stat: update.clone(),
            })
            .await;
        self.abandon(fid, true).await;
        match reply? {
            Fcall::Rwstat => Ok(()),
            other => Err(unexpected("Twstat", &other)),
        }
    }

    /// Stat every entry of the directory at `path`.
    pub async fn readdir(&self, path: &str) -> ClientResult<Vec<Stat>> {
        let dir = self.open(path, OpenMode::READ).await?;
        let mut entries = Vec::new();
        let mut offset = 0u64;
        let result = loop {
            match dir.read(offset, dir.iounit()).await {
                Ok(data) if data.is_empty() => break Ok(()),
                Ok(data) => {
                    offset += data.len() as u64;
                    match decode_stats(&data) {
                        Ok(stats) => entries.extend(stats),
                        Err(e) => break Err(e.into()),
                    }
                }
                Err(e) => break Err(e),
            }
        };
        dir.close().await?;
        result.map(|()| entries)
    }

    /// Remove `path`. The fid is released whether or not the server allows it.
    pub async fn remove(&self, path: &str) -> ClientResult<()> {
        let fid = self.walk(path).await?;
        let result = self.rpc(Fcall::Tremove { fid }).await;
        self.inner.fids.release(fid);
        match result? {
            Fcall::Rremove => Ok(()),
            other => Err(unexpected("Tremove", &other)),
        }
    }

    /// Read the whole file at `path`.
    pub async fn read_all(&self, path: &str) -> ClientResult<Vec<u8>> {
        let file = self.open(path, OpenMode::READ).await?;
        let mut out = Vec::new();
        let result = loop {
            match file.read(out.len() as u64, file.iounit()).await {
                Ok(data) if data.is_empty() => break Ok(()),
                Ok(data) => out.extend_from_slice(&data),
                Err(e) => break Err(e),
            }
        };
        file.close().await?;
        result.map(|()| out)
    }

    /// Replace the contents of the file at `path`, creating it with `perm`
    /// if it does not exist.
    pub async fn write_all(&self, path: &str, data: &[u8], perm: u32) -> ClientResult<()> {
        let file = match self.open(path, OpenMode::WRITE.with_truncate()).await {
            Ok(file) => file,
            Err(ClientError::Server(_)) | Err(ClientError::WalkIncomplete { .. }) => {
                self.create(path, perm, OpenMode::WRITE).await?
            }
            Err(e) => return Err(e),
        };
        let result = file.write_at(data, 0).await;
        file.close().await?;
        result.map(|_| ())
    }

    pub(crate) fn release_fid(&self, fid: u32) {
        self.inner.fids.release(fid);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uname", &self.inner.uname)
            .field("msize", &self.inner.msize)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Register a waiter for `tag`, queue the frame, and await the reply.
async fn send(inner: &Inner, tag: u16, held: Option<Tag>, fcall: Fcall) -> ClientResult<Fcall> {
    let (reply, rx) = oneshot::channel();
    inner.shared.register(tag, Waiter { reply, _tag: held })?;

    if inner.requests.send(Frame::new(tag, fcall)).await.is_err() {
        inner.shared.forget(tag);
        return Err(ClientError::ConnectionClosed);
    }
    match rx.await.map_err(|_| ClientError::ConnectionClosed)?? {
        Fcall::Rerror { ename } => Err(ClientError::Server(ename)),
        reply => Ok(reply),
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, NinepCodec>,
    mut rx: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let tag = frame.tag;
        match sink.send(frame).await {
            Ok(()) => {}
            Err(CodecError::Proto(e)) => shared.deliver(tag, Err(e.into())),
            Err(CodecError::Io(e)) => {
                log::warn!("write failed: {}", e);
                break;
            }
        }
    }
    shared.close();
}

async fn read_loop<R>(mut frames: FramedRead<R, NinepCodec>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.next().await {
            Some(Ok(Decoded::Frame(frame))) => shared.deliver(frame.tag, Ok(frame.fcall)),
            Some(Ok(Decoded::Malformed { tag, error })) => {
                log::warn!("malformed reply (tag {}): {}", tag, error);
                shared.deliver(tag, Err(error.into()));
            }
            Some(Err(e)) => {
                log::warn!("connection error: {}", e);
                break;
            }
            None => {
                log::debug!("server closed the connection");
                break;
            }
        }
    }
    shared.close();
}

fn unexpected(sent: &'static str, got: &Fcall) -> ClientError {
    ClientError::UnexpectedReply {
        sent,
        got: got.name(),
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(String::from)
        .collect()
}

/// Split `path` into its parent path and final element.
fn split_parent(path: &str) -> (String, String) {
    let mut names = split_path(path);
    let name = names.pop().unwrap_or_default();
    (names.join("/"), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::codec::Framed;

    type ServerSide = Framed<tokio::io::DuplexStream, NinepCodec>;

    async fn next_request(server: &mut ServerSide) -> Frame {
        match server.next().await.unwrap().unwrap() {
            Decoded::Frame(frame) => frame,
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Answer version and attach, returning the server end.
    async fn handshake(server: &mut ServerSide) {
        let version = next_request(server).await;
        assert_eq!(version.tag, NOTAG);
        server
            .send(Frame::new(
                NOTAG,
                Fcall::Rversion {
                    msize: 4096,
                    version: VERSION.into(),
                },
            ))
            .await
            .unwrap();
        let attach = next_request(server).await;
        assert!(matches!(attach.fcall, Fcall::Tattach { fid: 0, afid: NOFID, .. }));
        server
            .send(Frame::new(attach.tag, Fcall::Rattach { qid: Qid::default() }))
            .await
            .unwrap();
    }

    async fn connected() -> (Client, ServerSide) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut server = Framed::new(server_io, NinepCodec::default());
        let config = Config {
            uname: "glenda".into(),
            ..Config::default()
        };
        let (client, ()) = tokio::join!(
            async { Client::connect(client_io, config).await.unwrap() },
            handshake(&mut server)
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_connect_negotiates() {
        let (client, _server) = connected().await;
        assert_eq!(client.msize(), 4096);
        assert_eq!(client.iounit(), 4096 - 24);
        assert_eq!(client.root_fid(), 0);
        assert_eq!(client.uname(), "glenda");
    }

    #[tokio::test]
    async fn test_replies_in_reverse_order() {
        let (client, mut server) = connected().await;

        let calls: Vec<_> = (0..5u32)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.rpc(Fcall::Tstat { fid: 100 + i }).await })
            })
            .collect();

        let mut requests = Vec::new();
        for _ in 0..5 {
            requests.push(next_request(&mut server).await);
        }
        for req in requests.into_iter().rev() {
            let Fcall::Tstat { fid } = req.fcall else {
                panic!("unexpected {:?}", req.fcall);
            };
            let stat = Stat {
                name: format!("f{fid}"),
                ..Stat::default()
            };
            server
                .send(Frame::new(req.tag, Fcall::Rstat { stat }))
                .await
                .unwrap();
        }

        for (i, call) in calls.into_iter().enumerate() {
            match call.await.unwrap().unwrap() {
                Fcall::Rstat { stat } => assert_eq!(stat.name, format!("f{}", 100 + i)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_rerror_is_verbatim() {
        let (client, mut server) = connected().await;
        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.rpc(Fcall::Tclunk { fid: 9 }).await })
        };
        let req = next_request(&mut server).await;
        server
            .send(Frame::new(req.tag, Fcall::error("unknown fid 9")))
            .await
            .unwrap();
        match call.await.unwrap() {
            Err(ClientError::Server(ename)) => assert_eq!(ename, "unknown fid 9"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_loss_fails_pending_calls() {
        let (client, mut server) = connected().await;

        let calls: Vec<_> = (0..3u32)
            .map(|fid| {
                let client = client.clone();
                tokio::spawn(async move { client.rpc(Fcall::Tstat { fid }).await })
            })
            .collect();
        for _ in 0..3 {
            next_request(&mut server).await;
        }
        drop(server);

        for call in calls {
            assert!(matches!(
                call.await.unwrap(),
                Err(ClientError::ConnectionClosed)
            ));
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while !client.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            client.rpc(Fcall::Tstat { fid: 0 }).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_version_rejected() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let mut server = Framed::new(server_io, NinepCodec::default());
        let connect = tokio::spawn(Client::connect(client_io, Config::default()));

        let req = next_request(&mut server).await;
        server
            .send(Frame::new(
                req.tag,
                Fcall::Rversion {
                    msize: 4096,
                    version: "unknown".into(),
                },
            ))
            .await
            .unwrap();
        assert!(matches!(
            connect.await.unwrap(),
            Err(ClientError::UnsupportedVersion(v)) if v == "unknown"
        ));
    }

    #[tokio::test]
    async fn test_long_walk_is_chunked() {
        let (client, mut server) = connected().await;
        let path: Vec<String> = (0..20).map(|i| format!("d{i}")).collect();
        let path = path.join("/");

        let walk = {
            let client = client.clone();
            tokio::spawn(async move { client.walk(&path).await })
        };

        let first = next_request(&mut server).await;
        let Fcall::Twalk { fid, newfid, wnames } = first.fcall else {
            panic!("expected Twalk");
        };
        assert_eq!((fid, wnames.len()), (0, 16));
        server
            .send(Frame::new(
                first.tag,
                Fcall::Rwalk {
                    wqids: vec![Qid::default(); 16],
                },
            ))
            .await
            .unwrap();

        let second = next_request(&mut server).await;
        let Fcall::Twalk { fid, wnames, .. } = second.fcall else {
            panic!("expected Twalk");
        };
        assert_eq!((fid, wnames.len()), (newfid, 4));
        server
            .send(Frame::new(
                second.tag,
                Fcall::Rwalk {
                    wqids: vec![Qid::default(); 4],
                },
            ))
            .await
            .unwrap();

        assert_eq!(walk.await.unwrap().unwrap(), newfid);
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/a/b/c"), ("a/b".into(), "c".into()));
        assert_eq!(split_parent("top"), (String::new(), "top".into()));
        assert_eq!(split_path("//a/./b/"), ["a", "b"]);
    }
}
