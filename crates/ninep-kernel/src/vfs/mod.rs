//! Virtual filesystem tree.
//!
//! This module provides the node graph served over 9P.
//! Key components:
//!
//! - [`Tree`] - Root directory, qid allocator, and structural hooks
//! - [`Node`] - A [`File`] or a [`Directory`]
//! - [`FileBody`] - Content behind a file, stateful per [`HandleId`]
//! - [`MemoryBody`] / [`SyntheticBody`] - Stock bodies
//!
//! ## Design Decisions
//!
//! - **Handle-based I/O**: bodies key open state by `(session, fid)`, so the
//!   same fid number in two sessions never collides.
//! - **Weak parents**: a node's parent pointer is a `Weak` written only by
//!   the parent's own mutators, so the graph has no reference cycles.
//! - **Hooks, not subclasses**: create, remove, and walk-miss behavior are
//!   closures on the tree.

pub mod backends;
mod error;
mod node;
mod ops;
mod qid;
mod tree;
mod types;

pub use backends::{MemoryBody, SyntheticBody};
pub use error::{VfsError, VfsResult};
pub use node::{Directory, File, Node};
pub use ops::FileBody;
pub use qid::QidAllocator;
pub use tree::{
    create_memory_dir, create_memory_file, detach, full_path, CreateDirHook, CreateFileHook,
    RemoveHook, Tree, TreeBuilder, WalkMissHook,
};
pub use types::{check_name, now_secs, HandleId};
