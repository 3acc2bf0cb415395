//! The tree: root directory, qid allocation, and structural hooks.
//!
//! Dispatch never creates or removes nodes itself. It asks the tree, and the
//! tree delegates to whichever hooks were configured:
//!
//! | Hook             | Invoked on                         | Unset        |
//! |------------------|------------------------------------|--------------|
//! | `on_create_file` | create without the directory bit   | Unsupported  |
//! | `on_create_dir`  | create with the directory bit      | Unsupported  |
//! | `on_walk_miss`   | walk to a name that does not exist | NotFound     |
//! | `on_remove`      | remove                             | Unsupported  |
//!
//! Hooks run while holding the target directory's mutation lock, so hooks on
//! one directory never overlap. Removing a directory also holds that
//! directory's own lock, taken after its parent's. A hook must not call back
//! into the tree for the same directory.

use std::sync::Arc;

use ninep_proto::{OpenMode, Qid, Stat};

use super::backends::MemoryBody;
use super::node::{Directory, File, Node};
use super::qid::QidAllocator;
use super::types::{check_name, now_secs};
use super::{VfsError, VfsResult};

/// `(tree, parent, user, name, perm, mode) -> new file`. Must attach it.
pub type CreateFileHook =
    Arc<dyn Fn(&Tree, &Arc<Directory>, &str, &str, u32, OpenMode) -> VfsResult<Arc<File>> + Send + Sync>;

/// `(tree, parent, user, name, perm, mode) -> new directory`. Must attach it.
pub type CreateDirHook = Arc<
    dyn Fn(&Tree, &Arc<Directory>, &str, &str, u32, OpenMode) -> VfsResult<Arc<Directory>>
        + Send
        + Sync,
>;

/// `(tree, parent, name) -> node`. Attaching the result is up to the hook.
pub type WalkMissHook = Arc<dyn Fn(&Tree, &Arc<Directory>, &str) -> VfsResult<Node> + Send + Sync>;

/// `(tree, node)`. Usually [`detach`].
pub type RemoveHook = Arc<dyn Fn(&Tree, &Node) -> VfsResult<()> + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    create_file: Option<CreateFileHook>,
    create_dir: Option<CreateDirHook>,
    walk_miss: Option<WalkMissHook>,
    remove: Option<RemoveHook>,
}

/// A served filesystem.
pub struct Tree {
    root: Arc<Directory>,
    qids: Arc<QidAllocator>,
    hooks: Hooks,
}

impl Tree {
    /// Start configuring a tree.
    pub fn builder() -> TreeBuilder {
        TreeBuilder::default()
    }

    pub fn root(&self) -> &Arc<Directory> {
        &self.root
    }

    pub fn qids(&self) -> &Arc<QidAllocator> {
        &self.qids
    }

    /// A fresh stat: new qid path, current times, `muid` = `uid`.
    pub fn new_stat(&self, name: &str, uid: &str, gid: &str, mode: u32) -> Stat {
        let now = now_secs();
        Stat {
            kind: 0,
            dev: 0,
            qid: Qid::for_mode(mode, self.qids.next_path()),
            mode,
            atime: now,
            mtime: now,
            length: 0,
            name: name.to_string(),
            uid: uid.to_string(),
            gid: gid.to_string(),
            muid: uid.to_string(),
        }
    }

    /// Returns true if `node` is this tree's root.
    pub fn is_root(&self, node: &Node) -> bool {
        node.as_dir().is_some_and(|d| Arc::ptr_eq(d, &self.root))
    }

    /// Fails with `NotFound` if `dir` has been removed from the tree.
    fn check_attached(&self, dir: &Arc<Directory>) -> VfsResult<()> {
        if dir.parent().is_none() && !Arc::ptr_eq(dir, &self.root) {
            return Err(VfsError::not_found(dir.stat().name));
        }
        Ok(())
    }

    /// Resolve one walk element from `dir`.
    ///
    /// `..` goes to the parent (the root is its own parent). A missing name
    /// falls back to the walk-miss hook.
    pub fn walk_child(&self, dir: &Arc<Directory>, name: &str) -> VfsResult<Node> {
        if name == ".." {
            return Ok(Node::Dir(dir.parent().unwrap_or_else(|| dir.clone())));
        }
        if let Some(node) = dir.child(name) {
            return Ok(node);
        }

        let Some(hook) = &self.hooks.walk_miss else {
            return Err(VfsError::not_found(name));
        };
        let _guard = dir.lock_mutations();
        // Another walk may have synthesized it while we waited.
        if let Some(node) = dir.child(name) {
            return Ok(node);
        }
        tracing::debug!(name, "walk miss");
        hook(self, dir, name)
    }

    /// Create a file under `parent` via the create-file hook.
    pub fn create_file(
        &self,
        parent: &Arc<Directory>,
        user: &str,
        name: &str,
        perm: u32,
        mode: OpenMode,
    ) -> VfsResult<Arc<File>> {
        check_name(name)?;
        let hook = self
            .hooks
            .create_file
            .as_ref()
            .ok_or_else(|| VfsError::unsupported("create file"))?;

        let _guard = parent.lock_mutations();
        self.check_attached(parent)?;
        if parent.child(name).is_some() {
            return Err(VfsError::name_conflict(name));
        }
        let file = hook(self, parent, user, name, perm, mode)?;
        tracing::debug!(name, user, perm = format_args!("{perm:o}"), "created file");
        Ok(file)
    }

    /// Create a directory under `parent` via the create-dir hook.
    pub fn create_dir(
        &self,
        parent: &Arc<Directory>,
        user: &str,
        name: &str,
        perm: u32,
        mode: OpenMode,
    ) -> VfsResult<Arc<Directory>> {
        check_name(name)?;
        let hook = self
            .hooks
            .create_dir
            .as_ref()
            .ok_or_else(|| VfsError::unsupported("create directory"))?;

        let _guard = parent.lock_mutations();
        self.check_attached(parent)?;
        if parent.child(name).is_some() {
            return Err(VfsError::name_conflict(name));
        }
        let dir = hook(self, parent, user, name, perm, mode)?;
        tracing::debug!(name, user, perm = format_args!("{perm:o}"), "created directory");
        Ok(dir)
    }

    /// Remove `node` via the remove hook.
    pub fn remove(&self, node: &Node) -> VfsResult<()> {
        let hook = self
            .hooks
            .remove
            .as_ref()
            .ok_or_else(|| VfsError::unsupported("remove"))?;

        let parent = node.parent();
        let _parent_guard = parent.as_ref().map(|p| p.lock_mutations());
        // Holds off creates inside a directory while it is checked and detached.
        let _guard = node.as_dir().map(|d| d.lock_mutations());
        hook(self, node)?;
        tracing::debug!(name = %node.name(), "removed");
        Ok(())
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root.stat().name)
            .field("qids_issued", &self.qids.issued())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`Tree`].
///
/// ```ignore
/// let tree = Tree::builder()
///     .root_owner("glenda", "sys")
///     .root_perm(0o775)
///     .memory_hooks()
///     .build();
/// ```
#[derive(Clone)]
pub struct TreeBuilder {
    qids: Option<Arc<QidAllocator>>,
    root_name: String,
    root_uid: String,
    root_gid: String,
    root_perm: u32,
    hooks: Hooks,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            qids: None,
            root_name: "/".to_string(),
            root_uid: "none".to_string(),
            root_gid: "none".to_string(),
            root_perm: 0o755,
            hooks: Hooks::default(),
        }
    }
}

impl TreeBuilder {
    /// Share a qid allocator with other trees.
    pub fn qids(mut self, qids: Arc<QidAllocator>) -> Self {
        self.qids = Some(qids);
        self
    }

    pub fn root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    pub fn root_owner(mut self, uid: impl Into<String>, gid: impl Into<String>) -> Self {
        self.root_uid = uid.into();
        self.root_gid = gid.into();
        self
    }

    /// Permission bits of the root directory.
    pub fn root_perm(mut self, perm: u32) -> Self {
        self.root_perm = perm & 0o777;
        self
    }

    pub fn on_create_file(
        mut self,
        hook: impl Fn(&Tree, &Arc<Directory>, &str, &str, u32, OpenMode) -> VfsResult<Arc<File>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.hooks.create_file = Some(Arc::new(hook));
        self
    }

    pub fn on_create_dir(
        mut self,
        hook: impl Fn(&Tree, &Arc<Directory>, &str, &str, u32, OpenMode) -> VfsResult<Arc<Directory>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.hooks.create_dir = Some(Arc::new(hook));
        self
    }

    pub fn on_walk_miss(
        mut self,
        hook: impl Fn(&Tree, &Arc<Directory>, &str) -> VfsResult<Node> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.walk_miss = Some(Arc::new(hook));
        self
    }

    pub fn on_remove(
        mut self,
        hook: impl Fn(&Tree, &Node) -> VfsResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.remove = Some(Arc::new(hook));
        self
    }

    /// In-memory create hooks plus [`detach`] for remove.
    pub fn memory_hooks(self) -> Self {
        self.on_create_file(create_memory_file)
            .on_create_dir(create_memory_dir)
            .on_remove(detach)
    }

    pub fn build(self) -> Tree {
        let qids = self.qids.unwrap_or_default();
        let now = now_secs();
        let mode = ninep_proto::DMDIR | self.root_perm;
        let root = Directory::new(Stat {
            kind: 0,
            dev: 0,
            qid: Qid::for_mode(mode, qids.next_path()),
            mode,
            atime: now,
            mtime: now,
            length: 0,
            name: self.root_name,
            uid: self.root_uid.clone(),
            gid: self.root_gid,
            muid: self.root_uid,
        });
        Tree {
            root,
            qids,
            hooks: self.hooks,
        }
    }
}

// ============================================================================
// Stock hooks
// ============================================================================

/// Create-file hook backed by [`MemoryBody`]. The new file takes the
/// parent's group.
pub fn create_memory_file(
    tree: &Tree,
    parent: &Arc<Directory>,
    user: &str,
    name: &str,
    perm: u32,
    _mode: OpenMode,
) -> VfsResult<Arc<File>> {
    let gid = parent.stat().gid;
    let file = File::new(tree.new_stat(name, user, &gid, perm), MemoryBody::new());
    parent.add_child(Node::File(file.clone()))?;
    Ok(file)
}

/// Create-dir hook for plain in-memory directories.
pub fn create_memory_dir(
    tree: &Tree,
    parent: &Arc<Directory>,
    user: &str,
    name: &str,
    perm: u32,
    _mode: OpenMode,
) -> VfsResult<Arc<Directory>> {
    let gid = parent.stat().gid;
    let dir = Directory::new(tree.new_stat(name, user, &gid, perm | ninep_proto::DMDIR));
    parent.add_child(Node::Dir(dir.clone()))?;
    Ok(dir)
}

/// Remove hook that detaches `node` from its parent.
///
/// Refuses the root and non-empty directories.
pub fn detach(tree: &Tree, node: &Node) -> VfsResult<()> {
    let name = node.name();
    if tree.is_root(node) {
        return Err(VfsError::permission_denied("cannot remove root"));
    }
    if node.as_dir().is_some_and(|d| !d.is_empty()) {
        return Err(VfsError::directory_not_empty(name));
    }
    let parent = node
        .parent()
        .ok_or_else(|| VfsError::not_found(name.clone()))?;
    parent.remove_node(&name, node)
}

/// Absolute path of `node`, rebuilt from its parent chain.
///
/// The root is `/`. Under a detached directory the path is relative to that
/// directory, and a node with no parent at all is `/`.
pub fn full_path(node: &Node) -> String {
    let mut parts = Vec::new();
    let mut parent = node.parent();
    if parent.is_none() {
        return "/".to_string();
    }
    parts.push(node.name());
    while let Some(dir) = parent {
        parent = dir.parent();
        if parent.is_some() {
            parts.push(dir.stat().name);
        }
    }
    parts.reverse();
    format!("/{}", parts.join("/"))
}
