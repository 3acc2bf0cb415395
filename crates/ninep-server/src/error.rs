//! Dispatch errors.
//!
//! Every variant is answered with an `Rerror` carrying its `Display` text.
//! Only codec header failures and I/O errors end a connection, and those
//! never reach dispatch.

use ninep_kernel::VfsError;
use ninep_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown fid {0}")]
    UnknownFid(u32),

    #[error("fid {0} already in use")]
    FidInUse(u32),

    #[error("fid {0} is already open")]
    FidOpen(u32),

    #[error("fid {0} is not open")]
    NotOpen(u32),

    #[error("fid {fid} is not open for {access}")]
    WrongMode { fid: u32, access: &'static str },

    #[error("walk of {0} elements exceeds the limit of 16")]
    TooManyWalkElements(usize),

    #[error("directory read must continue at offset {expected}, not {got}")]
    BadDirOffset { expected: u64, got: u64 },

    #[error("read count {0} too small for a directory entry")]
    DirCountTooSmall(u32),

    #[error("directories can only be opened for reading")]
    DirOpenMode,

    #[error("msize {0} is too small")]
    MsizeTooSmall(u32),

    #[error("authentication not required")]
    AuthNotRequired,

    #[error("unexpected {0}")]
    UnexpectedMessage(&'static str),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl DispatchError {
    /// Shorthand for a kernel permission denial.
    pub fn denied(what: impl Into<String>) -> Self {
        Self::Vfs(VfsError::permission_denied(what))
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
