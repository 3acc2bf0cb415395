//! 9P2000 wire protocol.
//!
//! This crate is the leaf of the workspace: message types, the byte codec,
//! and a tokio-util framing codec. It knows nothing about files, fids, or
//! sessions.
//!
//! # Frame Layout
//!
//! ```text
//! size[4] type[1] tag[2] fields...
//!   size   little-endian, counts the whole frame including itself
//!   tag    chosen by the client, echoed by the reply (NOTAG for Tversion)
//!   string len[2] bytes[len], UTF-8, no terminator
//!   stat   size[2] type[2] dev[4] qid[13] mode[4] atime[4] mtime[4]
//!          length[8] name[s] uid[s] gid[s] muid[s]
//! ```
//!
//! # Key Types
//!
//! |----------------|--------------------------------------------------|
//! | Type           | Purpose                                          |
//! |----------------|--------------------------------------------------|
//! | [`Fcall`]      | One message body (T- or R-)                      |
//! | [`Frame`]      | A tagged message                                 |
//! | [`Qid`]        | Server-unique file identity                      |
//! | [`Stat`]       | Full metadata record                             |
//! | [`StatUpdate`] | Partial metadata carried by `Twstat`             |
//! | [`OpenMode`]   | Access nibble plus truncate/remove-on-close bits |
//! | [`NinepCodec`] | `Decoder`/`Encoder` for framed streams           |
//! |----------------|--------------------------------------------------|

pub mod codec;
pub mod error;
pub mod fcall;
pub mod types;
pub mod wire;

pub use codec::{CodecError, Decoded, NinepCodec, DEFAULT_MAX_FRAME};
pub use error::{ProtoError, ProtoResult};
pub use fcall::{Fcall, Frame, MsgType};
pub use types::{
    Access, OpenMode, Qid, Stat, StatUpdate, DMDIR, IOHDRSZ, MAXWELEM, NOFID, NOTAG, QTDIR,
    QTFILE,
};
pub use wire::{compose, compose_into, decode_stat, decode_stats, encode_stat, parse};

/// Protocol version string this crate speaks.
pub const VERSION: &str = "9P2000";
