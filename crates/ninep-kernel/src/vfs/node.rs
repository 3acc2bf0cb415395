//! Tree nodes: files and directories.
//!
//! The tree owns nodes through `Arc`s held in each directory's child map.
//! Each node points back at its parent with a `Weak`, and that pointer is
//! only ever written by [`Directory::add_child`] and
//! [`Directory::remove_child`] while they hold the parent's child-map lock.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use indexmap::IndexMap;
use ninep_proto::{OpenMode, Qid, Stat, StatUpdate, DMDIR, QTDIR};
use parking_lot::{Mutex, MutexGuard, RwLock};

use super::ops::FileBody;
use super::types::{check_name, now_secs, HandleId};
use super::{VfsError, VfsResult};

/// A node in the tree.
#[derive(Debug, Clone)]
pub enum Node {
    File(Arc<File>),
    Dir(Arc<Directory>),
}

impl Node {
    /// Metadata snapshot. A file's length reflects its body.
    pub fn stat(&self) -> Stat {
        match self {
            Node::File(f) => f.stat(),
            Node::Dir(d) => d.stat(),
        }
    }

    pub fn qid(&self) -> Qid {
        self.meta().read().qid
    }

    pub fn name(&self) -> String {
        self.meta().read().name.clone()
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    /// The containing directory, if attached.
    pub fn parent(&self) -> Option<Arc<Directory>> {
        self.parent_slot().read().upgrade()
    }

    pub fn as_dir(&self) -> Option<&Arc<Directory>> {
        match self {
            Node::Dir(d) => Some(d),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Node::File(f) => Some(f),
            Node::Dir(_) => None,
        }
    }

    /// True if both refer to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::File(a), Node::File(b)) => Arc::ptr_eq(a, b),
            (Node::Dir(a), Node::Dir(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Apply a partial metadata update.
    ///
    /// Only `Some` fields change. The qid cannot change and the directory
    /// bit of the mode cannot be toggled. A rename happens under the
    /// parent's child-map lock and fails on collision. A length change
    /// resizes a file body, or fails if the body cannot be resized. Either
    /// failure leaves the node as it was.
    pub fn write_stat(&self, update: &StatUpdate) -> VfsResult<()> {
        let current = self.stat();

        if update.qid.is_some_and(|qid| qid != current.qid) {
            return Err(VfsError::invalid_argument("qid cannot be changed"));
        }
        if update.mode.is_some_and(|mode| (mode ^ current.mode) & DMDIR != 0) {
            return Err(VfsError::invalid_argument("directory bit cannot be changed"));
        }
        if let Some(name) = &update.name {
            check_name(name)?;
        }
        if self.is_dir() && update.length.is_some_and(|length| length != 0) {
            return Err(VfsError::is_a_directory(current.name.clone()));
        }

        let renamed = match update.name.as_ref().filter(|name| **name != current.name) {
            Some(name) => {
                self.rename(name)?;
                true
            }
            None => false,
        };

        if let (Some(length), Node::File(f)) = (update.length, self) {
            if let Err(e) = f.body.set_len(length) {
                if renamed {
                    if let Err(undo) = self.rename(&current.name) {
                        tracing::warn!(name = %current.name, "rename rollback failed: {}", undo);
                    }
                }
                return Err(e);
            }
        }

        let mut meta = self.meta().write();
        if let Some(kind) = update.kind {
            meta.kind = kind;
        }
        if let Some(dev) = update.dev {
            meta.dev = dev;
        }
        if let Some(mode) = update.mode {
            meta.mode = mode;
        }
        if let Some(atime) = update.atime {
            meta.atime = atime;
        }
        if let Some(mtime) = update.mtime {
            meta.mtime = mtime;
        }
        if let Some(uid) = &update.uid {
            meta.uid = uid.clone();
        }
        if let Some(gid) = &update.gid {
            meta.gid = gid.clone();
        }
        if let Some(muid) = &update.muid {
            meta.muid = muid.clone();
        }
        Ok(())
    }

    fn rename(&self, to: &str) -> VfsResult<()> {
        match self.parent() {
            Some(parent) => parent.rename_child(self, to),
            None => {
                self.meta().write().name = to.to_string();
                Ok(())
            }
        }
    }

    fn meta(&self) -> &RwLock<Stat> {
        match self {
            Node::File(f) => &f.meta,
            Node::Dir(d) => &d.meta,
        }
    }

    fn parent_slot(&self) -> &RwLock<Weak<Directory>> {
        match self {
            Node::File(f) => &f.parent,
            Node::Dir(d) => &d.parent,
        }
    }
}

impl From<Arc<File>> for Node {
    fn from(file: Arc<File>) -> Self {
        Node::File(file)
    }
}

impl From<Arc<Directory>> for Node {
    fn from(dir: Arc<Directory>) -> Self {
        Node::Dir(dir)
    }
}

// ============================================================================
// File
// ============================================================================

/// A file: metadata plus a content body.
pub struct File {
    meta: RwLock<Stat>,
    parent: RwLock<Weak<Directory>>,
    body: Box<dyn FileBody>,
}

impl File {
    /// Create a detached file. The directory bit is cleared from the mode.
    pub fn new(mut stat: Stat, body: impl FileBody + 'static) -> Arc<Self> {
        stat.mode &= !DMDIR;
        stat.qid.kind &= !QTDIR;
        Arc::new(Self {
            meta: RwLock::new(stat),
            parent: RwLock::new(Weak::new()),
            body: Box::new(body),
        })
    }

    pub fn stat(&self) -> Stat {
        let mut stat = self.meta.read().clone();
        stat.length = self.body.len();
        stat
    }

    pub fn parent(&self) -> Option<Arc<Directory>> {
        self.parent.read().upgrade()
    }

    pub fn body(&self) -> &dyn FileBody {
        self.body.as_ref()
    }

    pub async fn open(&self, handle: HandleId, mode: OpenMode) -> VfsResult<()> {
        self.body.open(handle, mode).await?;
        let now = now_secs();
        let mut meta = self.meta.write();
        meta.atime = now;
        if mode.truncate() {
            meta.mtime = now;
        }
        Ok(())
    }

    pub async fn read(&self, handle: HandleId, offset: u64, count: u32) -> VfsResult<Bytes> {
        self.body.read(handle, offset, count).await
    }

    pub async fn write(&self, handle: HandleId, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let n = self.body.write(handle, offset, data).await?;
        self.meta.write().mtime = now_secs();
        Ok(n)
    }

    pub async fn close(&self, handle: HandleId) -> VfsResult<()> {
        self.body.close(handle).await
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("stat", &*self.meta.read())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Directory
// ============================================================================

/// A directory: metadata plus an insertion-ordered child map.
#[derive(Debug)]
pub struct Directory {
    meta: RwLock<Stat>,
    parent: RwLock<Weak<Directory>>,
    children: RwLock<IndexMap<String, Node>>,
    /// Serializes create/remove/walk-miss hooks on this directory.
    mutation: Mutex<()>,
}

impl Directory {
    /// Create a detached directory. The directory bit is forced on.
    pub fn new(mut stat: Stat) -> Arc<Self> {
        stat.mode |= DMDIR;
        stat.qid.kind |= QTDIR;
        stat.length = 0;
        Arc::new(Self {
            meta: RwLock::new(stat),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(IndexMap::new()),
            mutation: Mutex::new(()),
        })
    }

    pub fn stat(&self) -> Stat {
        self.meta.read().clone()
    }

    pub fn parent(&self) -> Option<Arc<Directory>> {
        self.parent.read().upgrade()
    }

    /// Snapshot of the children in insertion order.
    pub fn children(&self) -> Vec<(String, Node)> {
        self.children
            .read()
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }

    pub fn child(&self, name: &str) -> Option<Node> {
        self.children.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.children.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.read().is_empty()
    }

    /// Attach `node` under its current name.
    ///
    /// Fails with `NameConflict` if the name is taken and `AlreadyAttached`
    /// if the node has a parent. Refuses to attach a directory beneath
    /// itself.
    pub fn add_child(self: &Arc<Self>, node: Node) -> VfsResult<()> {
        let name = node.name();
        check_name(&name)?;

        let mut children = self.children.write();
        if children.contains_key(&name) {
            return Err(VfsError::name_conflict(name));
        }
        if node.as_dir().is_some_and(|dir| self.has_ancestor(dir)) {
            return Err(VfsError::invalid_argument(format!(
                "{name} would contain itself"
            )));
        }

        let mut parent = node.parent_slot().write();
        if parent.upgrade().is_some() {
            return Err(VfsError::already_attached(name));
        }
        *parent = Arc::downgrade(self);
        drop(parent);

        children.insert(name, node);
        Ok(())
    }

    /// Detach and return the child called `name`.
    pub fn remove_child(&self, name: &str) -> VfsResult<Node> {
        let mut children = self.children.write();
        let node = children
            .shift_remove(name)
            .ok_or_else(|| VfsError::not_found(name))?;
        *node.parent_slot().write() = Weak::new();
        Ok(node)
    }

    /// Detach `node` if it is still the child called `name`.
    pub(crate) fn remove_node(&self, name: &str, node: &Node) -> VfsResult<()> {
        let mut children = self.children.write();
        match children.get(name) {
            Some(current) if current.ptr_eq(node) => {}
            _ => return Err(VfsError::not_found(name)),
        }
        children.shift_remove(name);
        *node.parent_slot().write() = Weak::new();
        Ok(())
    }

    /// Re-key `node` to `to`, keeping its position.
    fn rename_child(&self, node: &Node, to: &str) -> VfsResult<()> {
        let mut children = self.children.write();
        if children.contains_key(to) {
            return Err(VfsError::name_conflict(to));
        }
        let from = node.name();
        let index = match children.get_full(&from) {
            Some((index, _, current)) if current.ptr_eq(node) => index,
            _ => return Err(VfsError::not_found(from)),
        };
        if let Some(entry) = children.shift_remove(&from) {
            children.shift_insert(index, to.to_string(), entry);
        }
        node.meta().write().name = to.to_string();
        Ok(())
    }

    /// Hold this to serialize structural hooks on the directory.
    pub(crate) fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock()
    }

    /// True if `dir` is this directory or one of its ancestors.
    fn has_ancestor(self: &Arc<Self>, dir: &Arc<Directory>) -> bool {
        let mut cursor = Some(self.clone());
        while let Some(current) = cursor {
            if Arc::ptr_eq(&current, dir) {
                return true;
            }
            cursor = current.parent();
        }
        false
    }
}
