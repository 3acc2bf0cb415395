//! Per-connection fid table and request dispatch.
//!
//! A fid moves through Unbound (absent from the table) → Bound (attach or
//! walk) → Open (open or create) → Closed (clunk or remove, dropped from the
//! table). Requests on one session may run concurrently; each fid's state
//! sits behind its own short-lived lock that is never held across an await.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ninep_kernel::perm::{self, can_open, has_access};
use ninep_kernel::vfs::check_name;
use ninep_kernel::{HandleId, Node, Tree, VfsError};
use ninep_proto::{
    Access, DMDIR, Fcall, IOHDRSZ, MAXWELEM, NOFID, OpenMode, StatUpdate, VERSION,
};
use parking_lot::Mutex;

use crate::constants::MIN_MSIZE;
use crate::error::{DispatchError, DispatchResult};

/// Packed stat records of one directory listing, consumed in order.
struct DirCursor {
    records: Vec<Bytes>,
    next: usize,
    offset: u64,
}

struct FidState {
    node: Node,
    mode: Option<OpenMode>,
    listing: Option<DirCursor>,
}

/// A client handle bound to a node.
struct Fid {
    user: String,
    state: Mutex<FidState>,
}

impl Fid {
    fn new(user: String, node: Node) -> Arc<Self> {
        Arc::new(Self {
            user,
            state: Mutex::new(FidState {
                node,
                mode: None,
                listing: None,
            }),
        })
    }

    /// The bound node, failing if the fid is already open.
    fn unopened_node(&self, fid: u32) -> DispatchResult<Node> {
        let state = self.state.lock();
        if state.mode.is_some() {
            return Err(DispatchError::FidOpen(fid));
        }
        Ok(state.node.clone())
    }
}

/// One client connection's view of a tree.
pub struct Session {
    id: u64,
    tree: Arc<Tree>,
    max_msize: u32,
    msize: AtomicU32,
    fids: DashMap<u32, Arc<Fid>>,
}

impl Session {
    pub fn new(id: u64, tree: Arc<Tree>, max_msize: u32) -> Self {
        Self {
            id,
            tree,
            max_msize,
            msize: AtomicU32::new(max_msize),
            fids: DashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Negotiated frame size.
    pub fn msize(&self) -> u32 {
        self.msize.load(Ordering::Relaxed)
    }

    /// Largest read/write payload.
    pub fn iounit(&self) -> u32 {
        self.msize().saturating_sub(IOHDRSZ)
    }

    /// Number of live fids.
    pub fn fid_count(&self) -> usize {
        self.fids.len()
    }

    /// Answer one request. Failures become `Rerror`.
    pub async fn handle(&self, fcall: Fcall) -> Fcall {
        let kind = fcall.name();
        match self.dispatch(fcall).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(error = %e, "{kind} failed");
                Fcall::error(e.to_string())
            }
        }
    }

    async fn dispatch(&self, fcall: Fcall) -> DispatchResult<Fcall> {
        match fcall {
            Fcall::Tversion { msize, version } => self.version(msize, &version).await,
            Fcall::Tauth { .. } => Err(DispatchError::AuthNotRequired),
            Fcall::Tattach {
                fid,
                afid,
                uname,
                aname,
            } => self.attach(fid, afid, uname, &aname),
            Fcall::Twalk {
                fid,
                newfid,
                wnames,
            } => self.walk(fid, newfid, &wnames),
            Fcall::Topen { fid, mode } => self.open(fid, mode).await,
            Fcall::Tcreate {
                fid,
                name,
                perm,
                mode,
            } => self.create(fid, &name, perm, mode).await,
            Fcall::Tread { fid, offset, count } => self.read(fid, offset, count).await,
            Fcall::Twrite { fid, offset, data } => self.write(fid, offset, &data).await,
            Fcall::Tclunk { fid } => self.clunk(fid).await,
            Fcall::Tremove { fid } => self.remove(fid).await,
            Fcall::Tstat { fid } => self.stat(fid),
            Fcall::Twstat { fid, stat } => self.wstat(fid, &stat),
            other => Err(DispatchError::UnexpectedMessage(other.name())),
        }
    }

    fn fid(&self, fid: u32) -> DispatchResult<Arc<Fid>> {
        self.fids
            .get(&fid)
            .map(|f| f.clone())
            .ok_or(DispatchError::UnknownFid(fid))
    }

    fn handle_id(&self, fid: u32) -> HandleId {
        HandleId::new(self.id, fid)
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Negotiate msize and version, dropping every fid.
    pub async fn version(&self, msize: u32, version: &str) -> DispatchResult<Fcall> {
        self.reset().await;

        let msize = msize.min(self.max_msize);
        if msize < MIN_MSIZE {
            return Err(DispatchError::MsizeTooSmall(msize));
        }
        self.msize.store(msize, Ordering::Relaxed);

        let version = if version.starts_with(VERSION) {
            VERSION
        } else {
            "unknown"
        };
        tracing::debug!(session = self.id, msize, version, "negotiated");
        Ok(Fcall::Rversion {
            msize,
            version: version.to_string(),
        })
    }

    /// Clunk every fid: close open handles, removing remove-on-close files.
    pub async fn reset(&self) {
        let fids: Vec<u32> = self.fids.iter().map(|e| *e.key()).collect();
        for fid in fids {
            if let Some((_, f)) = self.fids.remove(&fid) {
                self.release(fid, &f, true).await;
            }
        }
    }

    /// Close an open fid's handle, optionally honouring remove-on-close.
    async fn release(&self, fid: u32, f: &Fid, honour_rclose: bool) {
        let (node, mode) = {
            let mut state = f.state.lock();
            state.listing = None;
            (state.node.clone(), state.mode.take())
        };
        let Some(mode) = mode else {
            return;
        };

        if let Node::File(file) = &node {
            if let Err(e) = file.close(self.handle_id(fid)).await {
                tracing::warn!(fid, error = %e, "close failed");
            }
        }
        if honour_rclose && mode.remove_on_close() {
            if let Err(e) = self.tree.remove(&node) {
                tracing::warn!(fid, error = %e, "remove-on-close failed");
            }
        }
    }

    // ========================================================================
    // Binding
    // ========================================================================

    fn attach(&self, fid: u32, afid: u32, uname: String, aname: &str) -> DispatchResult<Fcall> {
        if afid != NOFID {
            return Err(DispatchError::AuthNotRequired);
        }
        let root = Node::Dir(self.tree.root().clone());
        let qid = root.qid();
        match self.fids.entry(fid) {
            Entry::Occupied(_) => return Err(DispatchError::FidInUse(fid)),
            Entry::Vacant(slot) => {
                tracing::info!(session = self.id, fid, user = %uname, aname, "attach");
                slot.insert(Fid::new(uname, root));
            }
        }
        Ok(Fcall::Rattach { qid })
    }

    fn walk(&self, fid: u32, newfid: u32, wnames: &[String]) -> DispatchResult<Fcall> {
        if wnames.len() > MAXWELEM {
            return Err(DispatchError::TooManyWalkElements(wnames.len()));
        }
        let source = self.fid(fid)?;
        let start = source.unopened_node(fid)?;
        if newfid != fid && self.fids.contains_key(&newfid) {
            return Err(DispatchError::FidInUse(newfid));
        }

        let mut node = start;
        let mut wqids = Vec::with_capacity(wnames.len());
        for (i, name) in wnames.iter().enumerate() {
            let step = match &node {
                Node::Dir(dir) => self.tree.walk_child(dir, name),
                Node::File(_) => Err(VfsError::not_a_directory(node.name())),
            };
            match step {
                Ok(next) => {
                    wqids.push(next.qid());
                    node = next;
                }
                Err(e) if i == 0 => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(fid, element = %name, error = %e, "partial walk");
                    break;
                }
            }
        }

        if wqids.len() == wnames.len() {
            if newfid == fid {
                let mut state = source.state.lock();
                if state.mode.is_some() {
                    return Err(DispatchError::FidOpen(fid));
                }
                state.node = node;
            } else {
                match self.fids.entry(newfid) {
                    Entry::Occupied(_) => return Err(DispatchError::FidInUse(newfid)),
                    Entry::Vacant(slot) => {
                        slot.insert(Fid::new(source.user.clone(), node));
                    }
                }
            }
        }
        Ok(Fcall::Rwalk { wqids })
    }

    // ========================================================================
    // Opening
    // ========================================================================

    async fn open(&self, fid: u32, mode: OpenMode) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let node = f.unopened_node(fid)?;
        let stat = node.stat();

        if !can_open(&f.user, &stat, mode) {
            return Err(DispatchError::denied(stat.name));
        }
        if mode.truncate() && !has_access(&f.user, &stat, perm::WRITE) {
            return Err(DispatchError::denied(stat.name));
        }
        if mode.remove_on_close() {
            self.check_parent_write(&f.user, &node)?;
        }

        match &node {
            Node::Dir(_) => {
                if !matches!(mode.access(), Access::Read | Access::Exec) || mode.truncate() {
                    return Err(DispatchError::DirOpenMode);
                }
            }
            Node::File(file) => file.open(self.handle_id(fid), mode).await?,
        }

        self.mark_open(fid, &f, mode)?;
        Ok(Fcall::Ropen {
            qid: node.qid(),
            iounit: self.iounit(),
        })
    }

    async fn create(
        &self,
        fid: u32,
        name: &str,
        perm: u32,
        mode: OpenMode,
    ) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let dir = match f.unopened_node(fid)? {
            Node::Dir(dir) => dir,
            Node::File(file) => return Err(VfsError::not_a_directory(file.stat().name).into()),
        };
        let dir_stat = dir.stat();
        if !has_access(&f.user, &dir_stat, perm::WRITE) {
            return Err(DispatchError::denied(dir_stat.name));
        }
        check_name(name)?;
        if perm::required_bits(mode).is_none() {
            return Err(VfsError::invalid_argument(format!("open mode {:#x}", mode.bits())).into());
        }

        let node = if perm & DMDIR != 0 {
            if !matches!(mode.access(), Access::Read | Access::Exec) || mode.truncate() {
                return Err(DispatchError::DirOpenMode);
            }
            let perm = perm & (!0o777 | (dir_stat.mode & 0o777));
            Node::Dir(self.tree.create_dir(&dir, &f.user, name, perm, mode)?)
        } else {
            let perm = perm & (!0o666 | (dir_stat.mode & 0o666));
            let file = self.tree.create_file(&dir, &f.user, name, perm, mode)?;
            file.open(self.handle_id(fid), mode).await?;
            Node::File(file)
        };

        {
            let mut state = f.state.lock();
            state.node = node.clone();
        }
        self.mark_open(fid, &f, mode)?;
        Ok(Fcall::Rcreate {
            qid: node.qid(),
            iounit: self.iounit(),
        })
    }

    fn mark_open(&self, fid: u32, f: &Fid, mode: OpenMode) -> DispatchResult<()> {
        let mut state = f.state.lock();
        if state.mode.is_some() {
            return Err(DispatchError::FidOpen(fid));
        }
        state.mode = Some(mode);
        state.listing = None;
        Ok(())
    }

    // ========================================================================
    // I/O
    // ========================================================================

    async fn read(&self, fid: u32, offset: u64, count: u32) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let count = count.min(self.iounit());

        let file = {
            let mut state = f.state.lock();
            let mode = state.mode.ok_or(DispatchError::NotOpen(fid))?;
            if !mode.can_read() {
                return Err(DispatchError::WrongMode {
                    fid,
                    access: "reading",
                });
            }
            match state.node.clone() {
                Node::Dir(dir) => {
                    let data = read_dir(&mut state, &dir, offset, count)?;
                    return Ok(Fcall::Rread { data });
                }
                Node::File(file) => file,
            }
        };

        let data = file.read(self.handle_id(fid), offset, count).await?;
        Ok(Fcall::Rread { data })
    }

    async fn write(&self, fid: u32, offset: u64, data: &[u8]) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let file = {
            let state = f.state.lock();
            let mode = state.mode.ok_or(DispatchError::NotOpen(fid))?;
            if !mode.can_write() {
                return Err(DispatchError::WrongMode {
                    fid,
                    access: "writing",
                });
            }
            match &state.node {
                Node::Dir(dir) => return Err(VfsError::is_a_directory(dir.stat().name).into()),
                Node::File(file) => file.clone(),
            }
        };

        let count = file.write(self.handle_id(fid), offset, data).await?;
        Ok(Fcall::Rwrite { count })
    }

    // ========================================================================
    // Release
    // ========================================================================

    async fn clunk(&self, fid: u32) -> DispatchResult<Fcall> {
        let (_, f) = self
            .fids
            .remove(&fid)
            .ok_or(DispatchError::UnknownFid(fid))?;
        self.release(fid, &f, true).await;
        Ok(Fcall::Rclunk)
    }

    /// The fid is dropped whether or not the removal succeeds.
    async fn remove(&self, fid: u32) -> DispatchResult<Fcall> {
        let (_, f) = self
            .fids
            .remove(&fid)
            .ok_or(DispatchError::UnknownFid(fid))?;
        let node = f.state.lock().node.clone();
        self.release(fid, &f, false).await;

        self.check_parent_write(&f.user, &node)?;
        self.tree.remove(&node)?;
        Ok(Fcall::Rremove)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn stat(&self, fid: u32) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let stat = f.state.lock().node.stat();
        Ok(Fcall::Rstat { stat })
    }

    fn wstat(&self, fid: u32, update: &StatUpdate) -> DispatchResult<Fcall> {
        let f = self.fid(fid)?;
        let node = f.state.lock().node.clone();
        let stat = node.stat();

        let renaming = update.name.as_ref().is_some_and(|n| *n != stat.name);
        if renaming {
            if self.tree.is_root(&node) {
                return Err(DispatchError::denied("cannot rename root"));
            }
            self.check_parent_write(&f.user, &node)?;
        }
        if update.length.is_some() && !has_access(&f.user, &stat, perm::WRITE) {
            return Err(DispatchError::denied(stat.name));
        }
        if update.touches_metadata() && f.user != stat.uid {
            return Err(DispatchError::denied(format!("{}: not owner", stat.name)));
        }

        node.write_stat(update)?;
        Ok(Fcall::Rwstat)
    }

    /// Require write permission on `node`'s parent directory.
    fn check_parent_write(&self, user: &str, node: &Node) -> DispatchResult<()> {
        if let Some(parent) = node.parent() {
            let parent_stat = parent.stat();
            if !has_access(user, &parent_stat, perm::WRITE) {
                return Err(DispatchError::denied(parent_stat.name));
            }
        }
        Ok(())
    }
}

/// Serve whole stat records from a directory listing.
///
/// Offset 0 takes a fresh snapshot; any other offset must be where the
/// previous read on this fid ended.
fn read_dir(
    state: &mut FidState,
    dir: &ninep_kernel::Directory,
    offset: u64,
    count: u32,
) -> DispatchResult<Bytes> {
    if offset == 0 {
        let mut records = Vec::new();
        for (_, child) in dir.children() {
            let mut buf = BytesMut::new();
            ninep_proto::encode_stat(&child.stat(), &mut buf)?;
            records.push(buf.freeze());
        }
        state.listing = Some(DirCursor {
            records,
            next: 0,
            offset: 0,
        });
    }

    let cursor = state
        .listing
        .as_mut()
        .ok_or(DispatchError::BadDirOffset {
            expected: 0,
            got: offset,
        })?;
    if offset != cursor.offset {
        return Err(DispatchError::BadDirOffset {
            expected: cursor.offset,
            got: offset,
        });
    }

    let mut out = BytesMut::new();
    while let Some(record) = cursor.records.get(cursor.next) {
        if out.len() + record.len() > count as usize {
            break;
        }
        out.extend_from_slice(record);
        cursor.next += 1;
    }
    if out.is_empty() && cursor.next < cursor.records.len() {
        return Err(DispatchError::DirCountTooSmall(count));
    }
    cursor.offset += out.len() as u64;
    Ok(out.freeze())
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("msize", &self.msize())
            .field("fids", &self.fids.len())
            .finish()
    }
}
