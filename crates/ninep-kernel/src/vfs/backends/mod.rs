//! File bodies.
//!
//! Bodies implement [`FileBody`](super::FileBody) for different content
//! sources.

mod memory;
mod synthetic;

pub use memory::{MemoryBody, MAX_FILE_SIZE};
pub use synthetic::{ReadFn, SyntheticBody, WriteFn};
