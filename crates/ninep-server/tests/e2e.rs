//! End-to-end tests: the real client against the real server.
//!
//! Most tests run over `tokio::io::duplex`; one goes through TCP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ninep_client::{Client, ClientError, Config};
use ninep_kernel::{
    File, FileBody, HandleId, MemoryBody, Node, SyntheticBody, Tree, VfsError, VfsResult,
};
use ninep_proto::{DMDIR, OpenMode, StatUpdate};
use ninep_server::{NinepServer, ServerConfig};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;

// ============================================================================
// Shared test setup
// ============================================================================

fn config(msize: u32) -> ServerConfig {
    ServerConfig {
        msize,
        root_user: "glenda".into(),
        root_group: "sys".into(),
        root_perm: 0o775,
        ..ServerConfig::ephemeral()
    }
}

fn memory_server() -> Arc<NinepServer> {
    Arc::new(NinepServer::with_memory_tree(config(8192)))
}

/// Connect `user` to `server` over an in-process pipe.
async fn connect(
    server: &Arc<NinepServer>,
    user: &str,
) -> (Client, JoinHandle<Result<(), ninep_proto::CodecError>>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_connection(server_io).await })
    };
    let client = Client::connect(
        client_io,
        Config {
            uname: user.into(),
            ..Config::default()
        },
    )
    .await
    .unwrap();
    (client, task)
}

const PATIENCE: Duration = Duration::from_secs(5);

/// Body whose reads park until the gate is opened.
struct GatedBody {
    gate: Arc<Notify>,
}

#[async_trait]
impl FileBody for GatedBody {
    async fn open(&self, _handle: HandleId, _mode: OpenMode) -> VfsResult<()> {
        Ok(())
    }

    async fn close(&self, _handle: HandleId) -> VfsResult<()> {
        Ok(())
    }

    async fn read(&self, _handle: HandleId, _offset: u64, _count: u32) -> VfsResult<Bytes> {
        self.gate.notified().await;
        Ok(Bytes::from_static(b"late"))
    }

    async fn write(&self, _handle: HandleId, _offset: u64, _data: &[u8]) -> VfsResult<u32> {
        Err(VfsError::unsupported("write"))
    }

    fn len(&self) -> u64 {
        4
    }
}

fn server_error(err: ClientError) -> String {
    match err {
        ClientError::Server(ename) => ename,
        other => panic!("expected a server error, got {other:?}"),
    }
}

// ============================================================================
// File I/O
// ============================================================================

#[tokio::test]
async fn test_create_write_read() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;

    let file = client
        .create("/notes", 0o644, OpenMode::RDWR)
        .await
        .unwrap();
    assert_eq!(file.write_at(b"hello, plan 9", 0).await.unwrap(), 13);

    let mut buf = [0u8; 6];
    assert_eq!(file.read_at(&mut buf, 7).await.unwrap(), 6);
    assert_eq!(&buf, b"plan 9");
    file.close().await.unwrap();

    let stat = client.stat("/notes").await.unwrap();
    assert_eq!(stat.length, 13);
    assert_eq!(stat.uid, "glenda");
    assert_eq!(stat.gid, "sys");
    assert_eq!(stat.mode, 0o644);

    assert_eq!(client.read_all("/notes").await.unwrap(), b"hello, plan 9");
}

#[tokio::test]
async fn test_writes_span_iounits() {
    let server = Arc::new(NinepServer::with_memory_tree(config(512)));
    let (client, _task) = connect(&server, "glenda").await;
    assert_eq!(client.msize(), 512);

    let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let file = client.create("blob", 0o644, OpenMode::RDWR).await.unwrap();
    assert_eq!(file.iounit(), 512 - 24);
    assert_eq!(file.write_at(&data, 0).await.unwrap(), data.len());

    let mut back = vec![0u8; data.len() + 100];
    let n = file.read_at(&mut back, 0).await.unwrap();
    assert_eq!(n, data.len());
    assert_eq!(&back[..n], &data[..]);
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_truncate_on_open() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;

    client.write_all("/f", b"long contents", 0o644).await.unwrap();
    client.write_all("/f", b"short", 0o644).await.unwrap();
    assert_eq!(client.read_all("/f").await.unwrap(), b"short");
}

// ============================================================================
// Directories
// ============================================================================

#[tokio::test]
async fn test_readdir_lists_in_creation_order() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;

    for name in ["b", "a"] {
        client
            .create(name, 0o644, OpenMode::WRITE)
            .await
            .unwrap()
            .close()
            .await
            .unwrap();
    }
    client
        .create("c", DMDIR | 0o755, OpenMode::READ)
        .await
        .unwrap()
        .close()
        .await
        .unwrap();
    client
        .create("c/inner", 0o644, OpenMode::WRITE)
        .await
        .unwrap()
        .close()
        .await
        .unwrap();

    let names: Vec<_> = client
        .readdir("/")
        .await
        .unwrap()
        .into_iter()
        .map(|s| (s.name, s.qid.is_dir()))
        .collect();
    assert_eq!(
        names,
        [
            ("b".to_string(), false),
            ("a".to_string(), false),
            ("c".to_string(), true)
        ]
    );

    let inner = client.readdir("c").await.unwrap();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].name, "inner");
}

#[tokio::test]
async fn test_many_entries_need_several_reads() {
    let server = Arc::new(NinepServer::with_memory_tree(config(256)));
    let (client, _task) = connect(&server, "glenda").await;

    for i in 0..40 {
        client
            .create(&format!("entry-{i:02}"), 0o644, OpenMode::WRITE)
            .await
            .unwrap()
            .close()
            .await
            .unwrap();
    }
    let entries = client.readdir("/").await.unwrap();
    assert_eq!(entries.len(), 40);
    assert_eq!(entries[39].name, "entry-39");
}

#[tokio::test]
async fn test_remove() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;

    client.create("d", DMDIR | 0o755, OpenMode::READ).await.unwrap().close().await.unwrap();
    client.write_all("d/f", b"x", 0o644).await.unwrap();

    let err = server_error(client.remove("d").await.unwrap_err());
    assert!(err.starts_with("directory not empty"), "{err}");

    client.remove("d/f").await.unwrap();
    client.remove("d").await.unwrap();
    assert!(client.stat("d").await.is_err());

    let err = server_error(client.remove("/").await.unwrap_err());
    assert!(err.starts_with("permission denied"), "{err}");
}

// ============================================================================
// Walks
// ============================================================================

#[tokio::test]
async fn test_partial_walk() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;
    client.create("a", DMDIR | 0o755, OpenMode::READ).await.unwrap().close().await.unwrap();

    match client.walk("a/missing/deeper").await {
        Err(ClientError::WalkIncomplete { walked, wanted }) => {
            assert_eq!((walked, wanted), (1, 3));
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = server_error(client.walk("nothing").await.unwrap_err());
    assert!(err.contains("not found"), "{err}");

    // The root fid is still usable afterwards.
    assert_eq!(client.readdir("/").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_walk_miss_hook_synthesizes() {
    let tree = Tree::builder()
        .root_owner("glenda", "sys")
        .on_walk_miss(|tree, dir, name| {
            if !name.starts_with("echo-") {
                return Err(VfsError::not_found(name));
            }
            let content = Bytes::from(name.trim_start_matches("echo-").to_string());
            let file = File::new(
                tree.new_stat(name, "glenda", "sys", 0o444),
                SyntheticBody::fixed(content),
            );
            dir.add_child(Node::File(file.clone()))?;
            Ok(Node::File(file))
        })
        .build();
    let server = Arc::new(NinepServer::new(config(8192), Arc::new(tree)));
    let (client, _task) = connect(&server, "anyone").await;

    assert_eq!(client.read_all("echo-hi").await.unwrap(), b"hi");
    assert!(client.stat("other").await.is_err());

    // Synthesized once, then found as an ordinary child.
    let names: Vec<_> = client
        .readdir("/")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, ["echo-hi"]);
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn test_permission_denied() {
    let server = memory_server();
    let (glenda, _t1) = connect(&server, "glenda").await;
    let (bob, _t2) = connect(&server, "bob").await;

    glenda.write_all("secret", b"shh", 0o600).await.unwrap();
    glenda.write_all("public", b"hi", 0o644).await.unwrap();

    let err = server_error(bob.open("secret", OpenMode::READ).await.unwrap_err());
    assert!(err.starts_with("permission denied"), "{err}");
    assert_eq!(bob.read_all("public").await.unwrap(), b"hi");

    let err = server_error(bob.open("public", OpenMode::WRITE).await.unwrap_err());
    assert!(err.starts_with("permission denied"), "{err}");

    // Root is 0775 glenda/sys: bob cannot create or remove there.
    let err = server_error(
        bob.create("mine", 0o644, OpenMode::WRITE)
            .await
            .unwrap_err(),
    );
    assert!(err.starts_with("permission denied"), "{err}");
    let err = server_error(bob.remove("public").await.unwrap_err());
    assert!(err.starts_with("permission denied"), "{err}");
    assert!(glenda.stat("public").await.is_ok());
}

#[tokio::test]
async fn test_create_race_one_winner() {
    let server = memory_server();
    let (a, _t1) = connect(&server, "glenda").await;
    let (b, _t2) = connect(&server, "glenda").await;

    let (ra, rb) = tokio::join!(
        a.create("contested", 0o644, OpenMode::WRITE),
        b.create("contested", 0o644, OpenMode::WRITE)
    );
    let (ok, err) = match (ra, rb) {
        (Ok(f), Err(e)) | (Err(e), Ok(f)) => (f, e),
        (ra, rb) => panic!("expected one winner, got {ra:?} and {rb:?}"),
    };
    ok.close().await.unwrap();
    let err = server_error(err);
    assert!(err.starts_with("file already exists"), "{err}");
}

// ============================================================================
// Metadata
// ============================================================================

#[tokio::test]
async fn test_wstat_mode_only() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;
    client.write_all("f", b"data", 0o644).await.unwrap();

    let before = client.stat("f").await.unwrap();
    client
        .wstat("f", &StatUpdate::new().with_mode(0o600))
        .await
        .unwrap();
    let after = client.stat("f").await.unwrap();

    assert_eq!(after.mode, 0o600);
    assert_eq!(
        after,
        ninep_proto::Stat {
            mode: 0o600,
            ..before
        }
    );
}

#[tokio::test]
async fn test_wstat_rename_and_truncate() {
    let server = memory_server();
    let (client, _task) = connect(&server, "glenda").await;
    client.write_all("old", b"0123456789", 0o644).await.unwrap();
    let qid = client.stat("old").await.unwrap().qid;

    client
        .wstat("old", &StatUpdate::new().with_name("new").with_length(4))
        .await
        .unwrap();

    assert!(client.stat("old").await.is_err());
    let stat = client.stat("new").await.unwrap();
    assert_eq!(stat.qid, qid);
    assert_eq!(stat.length, 4);
    assert_eq!(client.read_all("new").await.unwrap(), b"0123");

    client.write_all("other", b"", 0o644).await.unwrap();
    let err = server_error(
        client
            .wstat("new", &StatUpdate::new().with_name("other"))
            .await
            .unwrap_err(),
    );
    assert!(err.starts_with("file already exists"), "{err}");
}

#[tokio::test]
async fn test_wstat_needs_owner() {
    let server = memory_server();
    let (glenda, _t1) = connect(&server, "glenda").await;
    let (bob, _t2) = connect(&server, "bob").await;
    glenda.write_all("f", b"", 0o666).await.unwrap();
    // Creation masks with the root's 0775; open it up afterwards.
    glenda
        .wstat("f", &StatUpdate::new().with_mode(0o666))
        .await
        .unwrap();

    let err = server_error(
        bob.wstat("f", &StatUpdate::new().with_mode(0o777))
            .await
            .unwrap_err(),
    );
    assert!(err.contains("not owner"), "{err}");
    bob.wstat("f", &StatUpdate::new().with_length(0)).await.unwrap();
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_ends_session() {
    let server = memory_server();
    let (client, task) = connect(&server, "glenda").await;

    // Leave a remove-on-close fid open when the connection drops.
    let fid = client.walk("/").await.unwrap();
    let reply = client
        .rpc(ninep_proto::Fcall::Tcreate {
            fid,
            name: "tmp".into(),
            perm: 0o644,
            mode: OpenMode::WRITE.with_remove_on_close(),
        })
        .await
        .unwrap();
    assert!(matches!(reply, ninep_proto::Fcall::Rcreate { .. }));
    drop(client);

    task.await.unwrap().unwrap();
    // Hangup clunks every fid, so remove-on-close applies.
    assert!(server.tree().root().child("tmp").is_none());
}

#[tokio::test]
async fn test_slow_read_does_not_block_other_fids() {
    let gate = Arc::new(Notify::new());
    let tree = Tree::builder().root_owner("glenda", "sys").build();
    let slow = File::new(
        tree.new_stat("slow", "glenda", "sys", 0o444),
        GatedBody { gate: gate.clone() },
    );
    let other = File::new(
        tree.new_stat("other", "glenda", "sys", 0o644),
        MemoryBody::with_content("quick"),
    );
    tree.root().add_child(Node::File(slow)).unwrap();
    tree.root().add_child(Node::File(other)).unwrap();
    let server = Arc::new(NinepServer::new(config(8192), Arc::new(tree)));
    let (client, _task) = connect(&server, "glenda").await;

    let file = client.open("/slow", OpenMode::READ).await.unwrap();
    let pending = tokio::spawn(async move { file.read(0, 16).await });

    let stat = timeout(PATIENCE, client.stat("/other"))
        .await
        .expect("stat waited behind the parked read")
        .unwrap();
    assert_eq!(stat.length, 5);
    assert_eq!(
        timeout(PATIENCE, client.read_all("/other")).await.unwrap().unwrap(),
        b"quick"
    );
    assert!(!pending.is_finished());

    gate.notify_one();
    let data = timeout(PATIENCE, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(data, &b"late"[..]);
}

#[tokio::test]
async fn test_oversized_reply_becomes_error() {
    let server = Arc::new(NinepServer::with_memory_tree(ServerConfig {
        root_perm: 0o777,
        ..config(8192)
    }));
    let long_user = "u".repeat(3000);
    let (client, _task) = connect(&server, &long_user).await;

    // name, uid and muid together push the stat record past msize.
    let path = format!("/{}", "n".repeat(3000));
    client
        .create(&path, 0o644, OpenMode::WRITE)
        .await
        .unwrap()
        .close()
        .await
        .unwrap();

    let err = timeout(PATIENCE, client.stat(&path))
        .await
        .expect("no reply for an unencodable stat")
        .unwrap_err();
    assert!(server_error(err).contains("exceeds"));

    // The connection survives.
    let root = timeout(PATIENCE, client.stat("/")).await.unwrap().unwrap();
    assert_eq!(root.uid, "glenda");
}

#[tokio::test]
async fn test_over_tcp() {
    let server = memory_server();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().serve(listener));

    let client = Client::connect_tcp(
        addr,
        Config {
            uname: "glenda".into(),
            ..Config::default()
        },
    )
    .await
    .unwrap();
    client.write_all("over-tcp", b"ok", 0o644).await.unwrap();
    assert_eq!(client.read_all("over-tcp").await.unwrap(), b"ok");
}
