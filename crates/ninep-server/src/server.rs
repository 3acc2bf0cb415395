//! TCP listener and per-connection request loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use ninep_kernel::Tree;
use ninep_proto::{CodecError, Decoded, Fcall, Frame, NinepCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::constants::REPLY_CHANNEL_CAPACITY;
use crate::error::DispatchError;
use crate::session::Session;

/// Serves one [`Tree`] to any number of connections.
pub struct NinepServer {
    config: ServerConfig,
    tree: Arc<Tree>,
    next_session: AtomicU64,
}

impl NinepServer {
    pub fn new(config: ServerConfig, tree: Arc<Tree>) -> Self {
        Self {
            config,
            tree,
            next_session: AtomicU64::new(0),
        }
    }

    /// A server over an empty in-memory tree owned by the configured user.
    pub fn with_memory_tree(config: ServerConfig) -> Self {
        let tree = Tree::builder()
            .root_owner(config.root_user.clone(), config.root_group.clone())
            .root_perm(config.root_perm)
            .memory_hooks()
            .build();
        Self::new(config, Arc::new(tree))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self: Arc<Self>) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        log::info!("Serving 9P on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                log::warn!("set_nodelay for {}: {}", peer, e);
            }
            let server = self.clone();
            tokio::spawn(async move {
                log::info!("Connection from {}", peer);
                if let Err(e) = server.serve_connection(stream).await {
                    log::warn!("Connection {} ended with error: {}", peer, e);
                }
                log::info!("Connection from {} closed", peer);
            });
        }
    }

    /// Run one connection to completion.
    ///
    /// Requests are dispatched on their own tasks and replies go out in
    /// completion order. `Tversion` is handled inline once in-flight requests
    /// drain, since it resets the fid table and the frame limit.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<(), CodecError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let max_frame = self.config.msize as usize;
        let session = Arc::new(Session::new(id, self.tree.clone(), self.config.msize));

        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, NinepCodec::new(max_frame));
        let (tx, mut rx) = mpsc::channel::<Frame>(REPLY_CHANNEL_CAPACITY);
        // Negotiated msize, shared with the writer.
        let reply_limit = Arc::new(AtomicUsize::new(max_frame));

        let writer = {
            let reply_limit = reply_limit.clone();
            tokio::spawn(async move {
                let mut sink = FramedWrite::new(write_half, NinepCodec::new(max_frame));
                while let Some(frame) = rx.recv().await {
                    sink.encoder_mut()
                        .set_max_frame(reply_limit.load(Ordering::Relaxed));
                    let tag = frame.tag;
                    let sent = match sink.send(frame).await {
                        // The reply never reached the wire; answer the tag anyway.
                        Err(CodecError::Proto(e)) => {
                            log::warn!("session {}: reply for tag {} not sendable: {}", id, tag, e);
                            sink.send(Frame::new(tag, Fcall::error(e.to_string()))).await
                        }
                        other => other,
                    };
                    match sent {
                        Ok(()) => {}
                        Err(CodecError::Proto(e)) => {
                            log::warn!("session {}: dropped reply for tag {}: {}", id, tag, e)
                        }
                        Err(CodecError::Io(e)) => {
                            log::debug!("session {}: write failed: {}", id, e);
                            break;
                        }
                    }
                }
            })
        };

        let mut tasks = JoinSet::new();
        let result = loop {
            while let Some(done) = tasks.try_join_next() {
                if let Err(e) = done {
                    log::error!("session {}: request task failed: {}", id, e);
                }
            }

            let frame = match frames.next().await {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(Decoded::Malformed { tag, error })) => {
                    log::warn!("session {}: malformed frame (tag {}): {}", id, tag, error);
                    if tx.send(Frame::new(tag, Fcall::error(error.to_string()))).await.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                Some(Ok(Decoded::Frame(frame))) => frame,
            };

            let Frame { tag, fcall } = frame;
            if !fcall.msg_type().is_request() {
                let reply = Fcall::error(DispatchError::UnexpectedMessage(fcall.name()).to_string());
                if tx.send(Frame::new(tag, reply)).await.is_err() {
                    break Ok(());
                }
                continue;
            }

            if let Fcall::Tversion { .. } = fcall {
                while tasks.join_next().await.is_some() {}
                let reply = session.handle(fcall).await;
                if let Fcall::Rversion { msize, .. } = &reply {
                    frames.decoder_mut().set_max_frame(*msize as usize);
                    reply_limit.store(*msize as usize, Ordering::Relaxed);
                }
                if tx.send(Frame::new(tag, reply)).await.is_err() {
                    break Ok(());
                }
                continue;
            }

            let span = tracing::debug_span!("fcall", session = id, tag, kind = fcall.name());
            let session = session.clone();
            let tx = tx.clone();
            tasks.spawn(
                async move {
                    let reply = session.handle(fcall).await;
                    tracing::trace!(reply = reply.name(), "done");
                    let _ = tx.send(Frame::new(tag, reply)).await;
                }
                .instrument(span),
            );
        };

        while tasks.join_next().await.is_some() {}
        session.reset().await;
        drop(tx);
        if let Err(e) = writer.await {
            log::error!("session {}: writer task failed: {}", id, e);
        }
        result
    }
}

impl std::fmt::Debug for NinepServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NinepServer")
            .field("config", &self.config)
            .field("sessions", &self.next_session.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ninep_proto::{NOFID, NOTAG, OpenMode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn server() -> NinepServer {
        let config = ServerConfig {
            root_user: "glenda".into(),
            root_group: "sys".into(),
            ..ServerConfig::ephemeral()
        };
        NinepServer::with_memory_tree(config)
    }

    async fn exchange(
        framed: &mut tokio_util::codec::Framed<tokio::io::DuplexStream, NinepCodec>,
        frame: Frame,
    ) -> Frame {
        framed.send(frame).await.unwrap();
        match framed.next().await.unwrap().unwrap() {
            Decoded::Frame(frame) => frame,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_round_trip() {
        let server = Arc::new(server());
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_connection(remote).await })
        };

        let mut framed = tokio_util::codec::Framed::new(client, NinepCodec::default());
        let reply = exchange(
            &mut framed,
            Frame::new(
                NOTAG,
                Fcall::Tversion {
                    msize: 4096,
                    version: "9P2000".into(),
                },
            ),
        )
        .await;
        assert_eq!(reply.tag, NOTAG);
        assert!(matches!(reply.fcall, Fcall::Rversion { msize: 4096, .. }));

        let reply = exchange(
            &mut framed,
            Frame::new(
                1,
                Fcall::Tattach {
                    fid: 0,
                    afid: NOFID,
                    uname: "glenda".into(),
                    aname: String::new(),
                },
            ),
        )
        .await;
        assert_eq!(reply.tag, 1);
        assert!(matches!(reply.fcall, Fcall::Rattach { .. }));

        let reply = exchange(
            &mut framed,
            Frame::new(
                2,
                Fcall::Topen {
                    fid: 0,
                    mode: OpenMode::READ,
                },
            ),
        )
        .await;
        assert!(matches!(reply.fcall, Fcall::Ropen { iounit: 4072, .. }));

        // A reply message from the client is answered with an error.
        let reply = exchange(&mut framed, Frame::new(3, Fcall::Rclunk)).await;
        assert_eq!(reply.tag, 3);
        assert!(matches!(reply.fcall, Fcall::Rerror { .. }));

        drop(framed);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_body_answered() {
        let server = Arc::new(server());
        let (mut client, remote) = tokio::io::duplex(4096);
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_connection(remote).await })
        };

        // Tclunk with tag 7 and a two-byte body where four are needed.
        let bad = [9u8, 0, 0, 0, 120, 7, 0, 1, 2];
        client.write_all(&bad).await.unwrap();

        let mut header = [0u8; 7];
        client.read_exact(&mut header).await.unwrap();
        let size = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        assert_eq!(header[4], 107, "Rerror");
        assert_eq!(u16::from_le_bytes([header[5], header[6]]), 7);
        let mut rest = vec![0u8; size - 7];
        client.read_exact(&mut rest).await.unwrap();

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_connection() {
        let server = Arc::new(server());
        let (mut client, remote) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.serve_connection(remote).await });

        let huge = (1u32 << 20).to_le_bytes();
        client.write_all(&huge).await.unwrap();
        client.write_all(&[100, 0, 0]).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(CodecError::Proto(_))));
    }
}
