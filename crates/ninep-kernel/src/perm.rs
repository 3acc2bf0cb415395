//! Unix-style permission checks.
//!
//! Identity is a plain string: a user is the owner if it equals the stat's
//! uid, in the group if it equals the gid, otherwise "other". There is no
//! group membership database.

use ninep_proto::{Access, OpenMode, Stat};

/// Read bit within a permission segment.
pub const READ: u32 = 0o4;
/// Write bit within a permission segment.
pub const WRITE: u32 = 0o2;
/// Execute/search bit within a permission segment.
pub const EXEC: u32 = 0o1;

/// How a user relates to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Owner,
    Group,
    Other,
}

impl Relation {
    /// Classify `user` against a stat. Owner wins over group.
    pub fn of(user: &str, stat: &Stat) -> Self {
        if user == stat.uid {
            Relation::Owner
        } else if user == stat.gid {
            Relation::Group
        } else {
            Relation::Other
        }
    }

    /// The 3-bit permission segment that applies to this relation.
    pub fn segment(self, mode: u32) -> u32 {
        let shift = match self {
            Relation::Owner => 6,
            Relation::Group => 3,
            Relation::Other => 0,
        };
        (mode >> shift) & 0o7
    }
}

/// Bits an open mode needs, or `None` when the mode is never allowed.
pub fn required_bits(mode: OpenMode) -> Option<u32> {
    match mode.access() {
        Access::Read => Some(READ),
        Access::Write => Some(WRITE),
        Access::ReadWrite => Some(READ | WRITE),
        Access::Exec => Some(EXEC),
        Access::None | Access::Other(_) => None,
    }
}

/// True if `user` holds every bit of `need` on `stat`.
pub fn has_access(user: &str, stat: &Stat, need: u32) -> bool {
    Relation::of(user, stat).segment(stat.mode) & need == need
}

/// True if `user` may open `stat` with `mode`.
///
/// Only the access nibble matters here; callers check the truncate flag
/// separately.
pub fn can_open(user: &str, stat: &Stat, mode: OpenMode) -> bool {
    match required_bits(mode) {
        Some(need) => has_access(user, stat, need),
        None => false,
    }
}
