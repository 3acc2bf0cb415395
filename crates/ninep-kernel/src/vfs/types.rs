//! Small shared VFS types.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies one open handle on a file: a fid within a session.
///
/// File bodies key their per-handle state by this, so two sessions using
/// the same fid number never see each other's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    pub session: u64,
    pub fid: u32,
}

impl HandleId {
    pub fn new(session: u64, fid: u32) -> Self {
        Self { session, fid }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.fid)
    }
}

/// Current time as 9P timestamps (unix seconds, saturating at u32::MAX).
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Validate a single path element for create and rename.
pub fn check_name(name: &str) -> Result<(), super::VfsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(super::VfsError::invalid_argument(format!(
            "illegal name {name:?}"
        )));
    }
    Ok(())
}
