//! 9P2000 messages.

use bytes::Bytes;

use crate::types::{OpenMode, Qid, Stat, StatUpdate};

/// One-byte message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Tversion = 100,
    Rversion = 101,
    Tauth = 102,
    Rauth = 103,
    Tattach = 104,
    Rattach = 105,
    Rerror = 107,
    Twalk = 110,
    Rwalk = 111,
    Topen = 112,
    Ropen = 113,
    Tcreate = 114,
    Rcreate = 115,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
    Tremove = 122,
    Rremove = 123,
    Tstat = 124,
    Rstat = 125,
    Twstat = 126,
    Rwstat = 127,
}

impl MsgType {
    /// Look up a type code.
    pub fn from_code(code: u8) -> Option<Self> {
        use MsgType::*;
        Some(match code {
            100 => Tversion,
            101 => Rversion,
            102 => Tauth,
            103 => Rauth,
            104 => Tattach,
            105 => Rattach,
            107 => Rerror,
            110 => Twalk,
            111 => Rwalk,
            112 => Topen,
            113 => Ropen,
            114 => Tcreate,
            115 => Rcreate,
            116 => Tread,
            117 => Rread,
            118 => Twrite,
            119 => Rwrite,
            120 => Tclunk,
            121 => Rclunk,
            122 => Tremove,
            123 => Rremove,
            124 => Tstat,
            125 => Rstat,
            126 => Twstat,
            127 => Rwstat,
            _ => return None,
        })
    }

    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Message name for logs and errors.
    pub fn name(self) -> &'static str {
        use MsgType::*;
        match self {
            Tversion => "Tversion",
            Rversion => "Rversion",
            Tauth => "Tauth",
            Rauth => "Rauth",
            Tattach => "Tattach",
            Rattach => "Rattach",
            Rerror => "Rerror",
            Twalk => "Twalk",
            Rwalk => "Rwalk",
            Topen => "Topen",
            Ropen => "Ropen",
            Tcreate => "Tcreate",
            Rcreate => "Rcreate",
            Tread => "Tread",
            Rread => "Rread",
            Twrite => "Twrite",
            Rwrite => "Rwrite",
            Tclunk => "Tclunk",
            Rclunk => "Rclunk",
            Tremove => "Tremove",
            Rremove => "Rremove",
            Tstat => "Tstat",
            Rstat => "Rstat",
            Twstat => "Twstat",
            Rwstat => "Rwstat",
        }
    }

    /// Requests have even codes.
    pub fn is_request(self) -> bool {
        self.code() % 2 == 0
    }
}

/// A 9P message body. The tag travels alongside in [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fcall {
    Tversion { msize: u32, version: String },
    Rversion { msize: u32, version: String },
    Tauth { afid: u32, uname: String, aname: String },
    Rauth { aqid: Qid },
    Tattach { fid: u32, afid: u32, uname: String, aname: String },
    Rattach { qid: Qid },
    Rerror { ename: String },
    Twalk { fid: u32, newfid: u32, wnames: Vec<String> },
    Rwalk { wqids: Vec<Qid> },
    Topen { fid: u32, mode: OpenMode },
    Ropen { qid: Qid, iounit: u32 },
    Tcreate { fid: u32, name: String, perm: u32, mode: OpenMode },
    Rcreate { qid: Qid, iounit: u32 },
    Tread { fid: u32, offset: u64, count: u32 },
    Rread { data: Bytes },
    Twrite { fid: u32, offset: u64, data: Bytes },
    Rwrite { count: u32 },
    Tclunk { fid: u32 },
    Rclunk,
    Tremove { fid: u32 },
    Rremove,
    Tstat { fid: u32 },
    Rstat { stat: Stat },
    Twstat { fid: u32, stat: StatUpdate },
    Rwstat,
}

impl Fcall {
    /// The message type of this body.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Fcall::Tversion { .. } => MsgType::Tversion,
            Fcall::Rversion { .. } => MsgType::Rversion,
            Fcall::Tauth { .. } => MsgType::Tauth,
            Fcall::Rauth { .. } => MsgType::Rauth,
            Fcall::Tattach { .. } => MsgType::Tattach,
            Fcall::Rattach { .. } => MsgType::Rattach,
            Fcall::Rerror { .. } => MsgType::Rerror,
            Fcall::Twalk { .. } => MsgType::Twalk,
            Fcall::Rwalk { .. } => MsgType::Rwalk,
            Fcall::Topen { .. } => MsgType::Topen,
            Fcall::Ropen { .. } => MsgType::Ropen,
            Fcall::Tcreate { .. } => MsgType::Tcreate,
            Fcall::Rcreate { .. } => MsgType::Rcreate,
            Fcall::Tread { .. } => MsgType::Tread,
            Fcall::Rread { .. } => MsgType::Rread,
            Fcall::Twrite { .. } => MsgType::Twrite,
            Fcall::Rwrite { .. } => MsgType::Rwrite,
            Fcall::Tclunk { .. } => MsgType::Tclunk,
            Fcall::Rclunk => MsgType::Rclunk,
            Fcall::Tremove { .. } => MsgType::Tremove,
            Fcall::Rremove => MsgType::Rremove,
            Fcall::Tstat { .. } => MsgType::Tstat,
            Fcall::Rstat { .. } => MsgType::Rstat,
            Fcall::Twstat { .. } => MsgType::Twstat,
            Fcall::Rwstat => MsgType::Rwstat,
        }
    }

    /// Message name for logs and errors.
    pub fn name(&self) -> &'static str {
        self.msg_type().name()
    }

    /// Build an error reply.
    pub fn error(ename: impl Into<String>) -> Self {
        Fcall::Rerror {
            ename: ename.into(),
        }
    }
}

/// A tagged message: what actually travels in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u16,
    pub fcall: Fcall,
}

impl Frame {
    pub fn new(tag: u16, fcall: Fcall) -> Self {
        Self { tag, fcall }
    }
}
