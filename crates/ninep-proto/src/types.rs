//! Core 9P value types.
//!
//! [`Stat`] is the full metadata record; [`StatUpdate`] is its partial form
//! used by `Twstat`, where every field is optional in memory and the "leave
//! unchanged" sentinels exist only on the wire.

/// Reserved tag used only by version negotiation.
pub const NOTAG: u16 = !0;

/// Reserved fid meaning "no fid" (e.g. `afid` in an unauthenticated attach).
pub const NOFID: u32 = !0;

/// Mode bit marking a directory.
pub const DMDIR: u32 = 0x8000_0000;

/// Qid type bit for directories.
pub const QTDIR: u8 = 0x80;

/// Qid type for plain files.
pub const QTFILE: u8 = 0x00;

/// Room for the `Tread`/`Twrite` header inside a frame:
/// size[4] type[1] tag[2] fid[4] offset[8] count[4], rounded up.
pub const IOHDRSZ: u32 = 24;

/// Maximum number of elements in one `Twalk`.
pub const MAXWELEM: usize = 16;

/// Server identity and version of a file.
///
/// Two qids with the same `path` denote the same underlying object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Qid {
    /// Type bits (high byte of the file mode).
    pub kind: u8,
    /// Version, bumped by servers that track modifications.
    pub version: u32,
    /// Unique id.
    pub path: u64,
}

impl Qid {
    /// Wire size in bytes.
    pub const LEN: usize = 13;

    /// All-ones qid that `Twstat` uses for "leave unchanged".
    pub const UNCHANGED: Qid = Qid {
        kind: u8::MAX,
        version: u32::MAX,
        path: u64::MAX,
    };

    /// Build a qid for a file with the given mode.
    pub fn for_mode(mode: u32, path: u64) -> Self {
        Self {
            kind: (mode >> 24) as u8,
            version: 0,
            path,
        }
    }

    /// Returns true if this qid names a directory.
    pub fn is_dir(&self) -> bool {
        self.kind & QTDIR != 0
    }
}

/// Full file metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Server type.
    pub kind: u16,
    /// Server subtype.
    pub dev: u32,
    /// Unique id from server.
    pub qid: Qid,
    /// Permissions and type bits.
    pub mode: u32,
    /// Last read time (unix seconds).
    pub atime: u32,
    /// Last write time (unix seconds).
    pub mtime: u32,
    /// File length in bytes.
    pub length: u64,
    /// Last element of the path.
    pub name: String,
    /// Owner name.
    pub uid: String,
    /// Group name.
    pub gid: String,
    /// Name of the user who last modified the file.
    pub muid: String,
}

impl Stat {
    /// Fixed part of the wire record, excluding the leading size[2].
    const FIXED_LEN: usize = 2 + 4 + Qid::LEN + 4 + 4 + 4 + 8;

    /// Returns true if the mode carries the directory bit.
    pub fn is_dir(&self) -> bool {
        self.mode & DMDIR != 0
    }

    /// Permission bits only (low nine bits).
    pub fn perm(&self) -> u32 {
        self.mode & 0o777
    }

    /// Encoded size on the wire, including the leading size[2].
    pub fn encoded_len(&self) -> usize {
        2 + Self::FIXED_LEN
            + 4 * 2
            + self.name.len()
            + self.uid.len()
            + self.gid.len()
            + self.muid.len()
    }
}

/// Partial metadata update carried by `Twstat`.
///
/// `None` means "leave this field unchanged". The wire encoding uses
/// all-ones integers and empty strings for the same purpose, so those values
/// cannot be set explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatUpdate {
    pub kind: Option<u16>,
    pub dev: Option<u32>,
    pub qid: Option<Qid>,
    pub mode: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub length: Option<u64>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub muid: Option<String>,
}

impl StatUpdate {
    /// An update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the length (truncate or extend).
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: u32) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Rename.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Change the group.
    pub fn with_gid(mut self, gid: impl Into<String>) -> Self {
        self.gid = Some(gid.into());
        self
    }

    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns true if any field other than name and length is set.
    pub fn touches_metadata(&self) -> bool {
        self.kind.is_some()
            || self.dev.is_some()
            || self.qid.is_some()
            || self.mode.is_some()
            || self.atime.is_some()
            || self.mtime.is_some()
            || self.uid.is_some()
            || self.gid.is_some()
            || self.muid.is_some()
    }

    /// Wire form: every `None` becomes its sentinel.
    pub fn to_wire(&self) -> Stat {
        Stat {
            kind: self.kind.unwrap_or(u16::MAX),
            dev: self.dev.unwrap_or(u32::MAX),
            qid: self.qid.unwrap_or(Qid::UNCHANGED),
            mode: self.mode.unwrap_or(u32::MAX),
            atime: self.atime.unwrap_or(u32::MAX),
            mtime: self.mtime.unwrap_or(u32::MAX),
            length: self.length.unwrap_or(u64::MAX),
            name: self.name.clone().unwrap_or_default(),
            uid: self.uid.clone().unwrap_or_default(),
            gid: self.gid.clone().unwrap_or_default(),
            muid: self.muid.clone().unwrap_or_default(),
        }
    }

    /// Inverse of [`to_wire`](Self::to_wire): sentinels become `None`.
    pub fn from_wire(stat: Stat) -> Self {
        fn keep<T: PartialEq>(value: T, sentinel: T) -> Option<T> {
            (value != sentinel).then_some(value)
        }
        fn keep_str(value: String) -> Option<String> {
            (!value.is_empty()).then_some(value)
        }
        Self {
            kind: keep(stat.kind, u16::MAX),
            dev: keep(stat.dev, u32::MAX),
            qid: keep(stat.qid, Qid::UNCHANGED),
            mode: keep(stat.mode, u32::MAX),
            atime: keep(stat.atime, u32::MAX),
            mtime: keep(stat.mtime, u32::MAX),
            length: keep(stat.length, u64::MAX),
            name: keep_str(stat.name),
            uid: keep_str(stat.uid),
            gid: keep_str(stat.gid),
            muid: keep_str(stat.muid),
        }
    }
}

/// Access requested by an open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
    Exec,
    /// The explicit "no access" mode; never permitted.
    None,
    /// Any other low-nibble value.
    Other(u8),
}

/// Mode byte of `Topen`/`Tcreate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenMode(u8);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(0);
    pub const WRITE: OpenMode = OpenMode(1);
    pub const RDWR: OpenMode = OpenMode(2);
    pub const EXEC: OpenMode = OpenMode(3);
    pub const NONE: OpenMode = OpenMode(4);

    /// Truncate the file first (or'ed in).
    pub const TRUNC: u8 = 0x10;
    /// Remove the file when the fid is clunked (or'ed in).
    pub const RCLOSE: u8 = 0x40;

    /// Wrap a raw mode byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw mode byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Access encoded in the low nibble.
    pub fn access(self) -> Access {
        match self.0 & 0x0F {
            0 => Access::Read,
            1 => Access::Write,
            2 => Access::ReadWrite,
            3 => Access::Exec,
            4 => Access::None,
            other => Access::Other(other),
        }
    }

    /// Returns true if the truncate flag is set.
    pub fn truncate(self) -> bool {
        self.0 & Self::TRUNC != 0
    }

    /// Returns true if the remove-on-close flag is set.
    pub fn remove_on_close(self) -> bool {
        self.0 & Self::RCLOSE != 0
    }

    /// Same mode with the truncate flag set.
    pub fn with_truncate(self) -> Self {
        Self(self.0 | Self::TRUNC)
    }

    /// Same mode with the remove-on-close flag set.
    pub fn with_remove_on_close(self) -> Self {
        Self(self.0 | Self::RCLOSE)
    }

    /// Returns true if reads are allowed through this mode.
    pub fn can_read(self) -> bool {
        matches!(self.access(), Access::Read | Access::ReadWrite | Access::Exec)
    }

    /// Returns true if writes are allowed through this mode.
    pub fn can_write(self) -> bool {
        matches!(self.access(), Access::Write | Access::ReadWrite)
    }
}

impl From<u8> for OpenMode {
    fn from(bits: u8) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qid_type_follows_mode() {
        let dir = Qid::for_mode(DMDIR | 0o755, 3);
        assert!(dir.is_dir());
        assert_eq!(dir.kind, QTDIR);

        let file = Qid::for_mode(0o644, 4);
        assert!(!file.is_dir());
        assert_eq!(file.kind, QTFILE);
    }

    #[test]
    fn open_mode_flags() {
        let mode = OpenMode::RDWR.with_truncate();
        assert_eq!(mode.access(), Access::ReadWrite);
        assert!(mode.truncate());
        assert!(!mode.remove_on_close());
        assert!(mode.can_read());
        assert!(mode.can_write());

        assert_eq!(OpenMode::NONE.access(), Access::None);
        assert_eq!(OpenMode::from_bits(0x0B).access(), Access::Other(0x0B));
        assert!(!OpenMode::WRITE.can_read());
        assert!(OpenMode::EXEC.can_read());
    }

    #[test]
    fn stat_update_sentinels() {
        let update = StatUpdate::new().with_mode(0o644);
        let wire = update.to_wire();
        assert_eq!(wire.kind, 0xFFFF);
        assert_eq!(wire.dev, 0xFFFF_FFFF);
        assert_eq!(wire.qid, Qid::UNCHANGED);
        assert_eq!(wire.mode, 0o644);
        assert_eq!(wire.atime, 0xFFFF_FFFF);
        assert_eq!(wire.mtime, 0xFFFF_FFFF);
        assert_eq!(wire.length, u64::MAX);
        assert!(wire.name.is_empty());

        assert_eq!(StatUpdate::from_wire(wire), update);
    }

    #[test]
    fn stat_update_builder() {
        let update = StatUpdate::new().with_length(0).with_name("renamed");
        assert_eq!(update.length, Some(0));
        assert_eq!(update.name.as_deref(), Some("renamed"));
        assert!(!update.touches_metadata());
        assert!(StatUpdate::new().is_empty());
        assert!(StatUpdate::new().with_gid("wheel").touches_metadata());
    }

    #[test]
    fn stat_encoded_len() {
        let stat = Stat {
            name: "a".into(),
            uid: "bob".into(),
            ..Default::default()
        };
        // size[2] + fixed 39 + four string prefixes + 4 bytes of text
        assert_eq!(stat.encoded_len(), 2 + 39 + 8 + 4);
    }
}
