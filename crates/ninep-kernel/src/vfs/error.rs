//! VFS error types.

use thiserror::Error;

/// VFS error type.
///
/// The `Display` form is what a client sees in an error reply, so messages
/// stay short and lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("file not found: {0}")]
    NotFound(String),

    /// A sibling with this name already exists.
    #[error("file already exists: {0}")]
    NameConflict(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No hook or body supports the operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Node already has a parent.
    #[error("already attached: {0}")]
    AlreadyAttached(String),

    /// I/O on a handle that was never opened, or opened without the
    /// needed access.
    #[error("bad handle: {0}")]
    BadHandle(String),

    /// Malformed name or forbidden metadata change.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A body could not grow to the requested size.
    #[error("no space: {0}")]
    NoSpace(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a NameConflict error.
    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict(name.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(name: impl Into<String>) -> Self {
        Self::PermissionDenied(name.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(name: impl Into<String>) -> Self {
        Self::NotADirectory(name.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(name: impl Into<String>) -> Self {
        Self::IsADirectory(name.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(name: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(name.into())
    }

    /// Create an AlreadyAttached error.
    pub fn already_attached(name: impl Into<String>) -> Self {
        Self::AlreadyAttached(name.into())
    }

    /// Create a BadHandle error.
    pub fn bad_handle(msg: impl Into<String>) -> Self {
        Self::BadHandle(msg.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a NoSpace error.
    pub fn no_space(msg: impl Into<String>) -> Self {
        Self::NoSpace(msg.into())
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
