//! # ninep-kernel
//!
//! The filesystem side of a 9P server: the node tree that gets served and
//! the permission rules applied to it.
//!
//! Nothing here knows about fids or connections. The server crate
//! maps protocol requests onto [`Tree`] operations and [`perm`] checks.

pub mod perm;
pub mod vfs;

pub use perm::{can_open, has_access, Relation};
pub use vfs::{
    detach, full_path, Directory, File, FileBody, HandleId, MemoryBody, Node, QidAllocator,
    SyntheticBody, Tree, TreeBuilder, VfsError, VfsResult,
};
