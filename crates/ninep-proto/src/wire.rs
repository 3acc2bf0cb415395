//! Byte-level encoding of 9P frames.
//!
//! Frame layout: `size[4] type[1] tag[2] fields...`, all integers little
//! endian, `size` counting the whole frame. Strings are `len[2]` followed by
//! raw bytes with no terminator.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtoError, ProtoResult};
use crate::fcall::{Fcall, Frame, MsgType};
use crate::types::{OpenMode, Qid, Stat, StatUpdate};

/// size[4] type[1] tag[2]
pub const HEADER_LEN: usize = 7;

/// Parse one frame from the front of `buf`.
///
/// Returns the bytes following the frame and the decoded message.
pub fn parse(buf: &[u8]) -> ProtoResult<(&[u8], Frame)> {
    if buf.len() < HEADER_LEN {
        return Err(ProtoError::ShortHeader(buf.len()));
    }
    let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (declared as usize) < HEADER_LEN {
        return Err(ProtoError::BadLength(declared));
    }
    let declared = declared as usize;
    if declared > buf.len() {
        return Err(ProtoError::Incomplete {
            declared,
            available: buf.len(),
        });
    }

    let code = buf[4];
    let tag = u16::from_le_bytes([buf[5], buf[6]]);
    let ty = MsgType::from_code(code).ok_or(ProtoError::UnknownType { tag, code })?;

    let mut r = Reader {
        buf: &buf[HEADER_LEN..declared],
        tag,
        kind: ty.name(),
    };
    let fcall = parse_body(ty, &mut r)?;
    r.finish()?;

    Ok((&buf[declared..], Frame { tag, fcall }))
}

fn parse_body(ty: MsgType, r: &mut Reader<'_>) -> ProtoResult<Fcall> {
    Ok(match ty {
        MsgType::Tversion => Fcall::Tversion {
            msize: r.u32("msize")?,
            version: r.string("version")?,
        },
        MsgType::Rversion => Fcall::Rversion {
            msize: r.u32("msize")?,
            version: r.string("version")?,
        },
        MsgType::Tauth => Fcall::Tauth {
            afid: r.u32("afid")?,
            uname: r.string("uname")?,
            aname: r.string("aname")?,
        },
        MsgType::Rauth => Fcall::Rauth { aqid: r.qid("aqid")? },
        MsgType::Tattach => Fcall::Tattach {
            fid: r.u32("fid")?,
            afid: r.u32("afid")?,
            uname: r.string("uname")?,
            aname: r.string("aname")?,
        },
        MsgType::Rattach => Fcall::Rattach { qid: r.qid("qid")? },
        MsgType::Rerror => Fcall::Rerror {
            ename: r.string("ename")?,
        },
        MsgType::Twalk => {
            let fid = r.u32("fid")?;
            let newfid = r.u32("newfid")?;
            let n = r.u16("nwname")?;
            let mut wnames = Vec::with_capacity(n.min(64) as usize);
            for _ in 0..n {
                wnames.push(r.string("wname")?);
            }
            Fcall::Twalk { fid, newfid, wnames }
        }
        MsgType::Rwalk => {
            let n = r.u16("nwqid")?;
            let mut wqids = Vec::with_capacity(n.min(64) as usize);
            for _ in 0..n {
                wqids.push(r.qid("wqid")?);
            }
            Fcall::Rwalk { wqids }
        }
        MsgType::Topen => Fcall::Topen {
            fid: r.u32("fid")?,
            mode: OpenMode::from_bits(r.u8("mode")?),
        },
        MsgType::Ropen => Fcall::Ropen {
            qid: r.qid("qid")?,
            iounit: r.u32("iounit")?,
        },
        MsgType::Tcreate => Fcall::Tcreate {
            fid: r.u32("fid")?,
            name: r.string("name")?,
            perm: r.u32("perm")?,
            mode: OpenMode::from_bits(r.u8("mode")?),
        },
        MsgType::Rcreate => Fcall::Rcreate {
            qid: r.qid("qid")?,
            iounit: r.u32("iounit")?,
        },
        MsgType::Tread => Fcall::Tread {
            fid: r.u32("fid")?,
            offset: r.u64("offset")?,
            count: r.u32("count")?,
        },
        MsgType::Rread => {
            let count = r.u32("count")?;
            Fcall::Rread {
                data: r.bytes(count as usize, "data")?,
            }
        }
        MsgType::Twrite => {
            let fid = r.u32("fid")?;
            let offset = r.u64("offset")?;
            let count = r.u32("count")?;
            Fcall::Twrite {
                fid,
                offset,
                data: r.bytes(count as usize, "data")?,
            }
        }
        MsgType::Rwrite => Fcall::Rwrite {
            count: r.u32("count")?,
        },
        MsgType::Tclunk => Fcall::Tclunk { fid: r.u32("fid")? },
        MsgType::Rclunk => Fcall::Rclunk,
        MsgType::Tremove => Fcall::Tremove { fid: r.u32("fid")? },
        MsgType::Rremove => Fcall::Rremove,
        MsgType::Tstat => Fcall::Tstat { fid: r.u32("fid")? },
        MsgType::Rstat => {
            let n = r.u16("nstat")? as usize;
            let mut inner = r.sub(n, "stat")?;
            let stat = inner.stat()?;
            inner.finish()?;
            Fcall::Rstat { stat }
        }
        MsgType::Twstat => {
            let fid = r.u32("fid")?;
            let n = r.u16("nstat")? as usize;
            let mut inner = r.sub(n, "stat")?;
            let stat = inner.stat()?;
            inner.finish()?;
            Fcall::Twstat {
                fid,
                stat: StatUpdate::from_wire(stat),
            }
        }
        MsgType::Rwstat => Fcall::Rwstat,
    })
}

/// Encode one frame.
///
/// The length prefix equals the exact encoded size, prefix included.
pub fn compose(frame: &Frame) -> ProtoResult<BytesMut> {
    let mut buf = BytesMut::with_capacity(64);
    compose_into(frame, &mut buf)?;
    Ok(buf)
}

/// Encode one frame onto the end of `buf`.
pub fn compose_into(frame: &Frame, buf: &mut BytesMut) -> ProtoResult<()> {
    let start = buf.len();
    buf.put_u32_le(0); // size placeholder
    buf.put_u8(frame.fcall.msg_type().code());
    buf.put_u16_le(frame.tag);

    match &frame.fcall {
        Fcall::Tversion { msize, version } | Fcall::Rversion { msize, version } => {
            buf.put_u32_le(*msize);
            put_string(buf, version, "version")?;
        }
        Fcall::Tauth { afid, uname, aname } => {
            buf.put_u32_le(*afid);
            put_string(buf, uname, "uname")?;
            put_string(buf, aname, "aname")?;
        }
        Fcall::Rauth { aqid } => put_qid(buf, aqid),
        Fcall::Tattach {
            fid,
            afid,
            uname,
            aname,
        } => {
            buf.put_u32_le(*fid);
            buf.put_u32_le(*afid);
            put_string(buf, uname, "uname")?;
            put_string(buf, aname, "aname")?;
        }
        Fcall::Rattach { qid } => put_qid(buf, qid),
        Fcall::Rerror { ename } => put_string(buf, ename, "ename")?,
        Fcall::Twalk {
            fid,
            newfid,
            wnames,
        } => {
            buf.put_u32_le(*fid);
            buf.put_u32_le(*newfid);
            buf.put_u16_le(wire_u16(wnames.len(), "wnames")?);
            for name in wnames {
                put_string(buf, name, "wname")?;
            }
        }
        Fcall::Rwalk { wqids } => {
            buf.put_u16_le(wire_u16(wqids.len(), "wqids")?);
            for qid in wqids {
                put_qid(buf, qid);
            }
        }
        Fcall::Topen { fid, mode } => {
            buf.put_u32_le(*fid);
            buf.put_u8(mode.bits());
        }
        Fcall::Ropen { qid, iounit } | Fcall::Rcreate { qid, iounit } => {
            put_qid(buf, qid);
            buf.put_u32_le(*iounit);
        }
        Fcall::Tcreate {
            fid,
            name,
            perm,
            mode,
        } => {
            buf.put_u32_le(*fid);
            put_string(buf, name, "name")?;
            buf.put_u32_le(*perm);
            buf.put_u8(mode.bits());
        }
        Fcall::Tread { fid, offset, count } => {
            buf.put_u32_le(*fid);
            buf.put_u64_le(*offset);
            buf.put_u32_le(*count);
        }
        Fcall::Rread { data } => put_data(buf, data)?,
        Fcall::Twrite { fid, offset, data } => {
            buf.put_u32_le(*fid);
            buf.put_u64_le(*offset);
            put_data(buf, data)?;
        }
        Fcall::Rwrite { count } => buf.put_u32_le(*count),
        Fcall::Tclunk { fid } | Fcall::Tremove { fid } | Fcall::Tstat { fid } => {
            buf.put_u32_le(*fid)
        }
        Fcall::Rclunk | Fcall::Rremove | Fcall::Rwstat => {}
        Fcall::Rstat { stat } => {
            buf.put_u16_le(wire_u16(stat.encoded_len(), "stat")?);
            encode_stat(stat, buf)?;
        }
        Fcall::Twstat { fid, stat } => {
            let stat = stat.to_wire();
            buf.put_u32_le(*fid);
            buf.put_u16_le(wire_u16(stat.encoded_len(), "stat")?);
            encode_stat(&stat, buf)?;
        }
    }

    let size = buf.len() - start;
    let size = u32::try_from(size).map_err(|_| ProtoError::FieldTooLong {
        field: "frame",
        len: size,
    })?;
    buf[start..start + 4].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

/// Encode a stat record, including its leading size[2].
pub fn encode_stat(stat: &Stat, buf: &mut BytesMut) -> ProtoResult<()> {
    let body_len = wire_u16(stat.encoded_len() - 2, "stat")?;
    buf.put_u16_le(body_len);
    buf.put_u16_le(stat.kind);
    buf.put_u32_le(stat.dev);
    put_qid(buf, &stat.qid);
    buf.put_u32_le(stat.mode);
    buf.put_u32_le(stat.atime);
    buf.put_u32_le(stat.mtime);
    buf.put_u64_le(stat.length);
    put_string(buf, &stat.name, "name")?;
    put_string(buf, &stat.uid, "uid")?;
    put_string(buf, &stat.gid, "gid")?;
    put_string(buf, &stat.muid, "muid")?;
    Ok(())
}

/// Decode exactly one stat record, including its leading size[2].
pub fn decode_stat(data: &[u8]) -> ProtoResult<Stat> {
    let mut r = Reader {
        buf: data,
        tag: 0,
        kind: "stat",
    };
    let stat = r.stat()?;
    r.finish()?;
    Ok(stat)
}

/// Decode a sequence of packed stat records, as returned by directory reads.
pub fn decode_stats(data: &[u8]) -> ProtoResult<Vec<Stat>> {
    let mut r = Reader {
        buf: data,
        tag: 0,
        kind: "directory entry",
    };
    let mut stats = Vec::new();
    while r.buf.has_remaining() {
        stats.push(r.stat()?);
    }
    Ok(stats)
}

fn put_qid(buf: &mut BytesMut, qid: &Qid) {
    buf.put_u8(qid.kind);
    buf.put_u32_le(qid.version);
    buf.put_u64_le(qid.path);
}

fn put_string(buf: &mut BytesMut, s: &str, field: &'static str) -> ProtoResult<()> {
    buf.put_u16_le(wire_u16(s.len(), field)?);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_data(buf: &mut BytesMut, data: &Bytes) -> ProtoResult<()> {
    let count = u32::try_from(data.len()).map_err(|_| ProtoError::FieldTooLong {
        field: "data",
        len: data.len(),
    })?;
    buf.put_u32_le(count);
    buf.put_slice(data);
    Ok(())
}

fn wire_u16(len: usize, field: &'static str) -> ProtoResult<u16> {
    u16::try_from(len).map_err(|_| ProtoError::FieldTooLong { field, len })
}

/// Bounds-checked cursor over one frame body.
struct Reader<'a> {
    buf: &'a [u8],
    tag: u16,
    kind: &'static str,
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize, field: &'static str) -> ProtoResult<()> {
        if self.buf.remaining() < n {
            return Err(ProtoError::Truncated {
                tag: self.tag,
                kind: self.kind,
                field,
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> ProtoResult<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> ProtoResult<u16> {
        self.need(2, field)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, field: &'static str) -> ProtoResult<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self, field: &'static str) -> ProtoResult<u64> {
        self.need(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    fn take(&mut self, n: usize, field: &'static str) -> ProtoResult<&'a [u8]> {
        self.need(n, field)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn bytes(&mut self, n: usize, field: &'static str) -> ProtoResult<Bytes> {
        self.take(n, field).map(Bytes::copy_from_slice)
    }

    fn string(&mut self, field: &'static str) -> ProtoResult<String> {
        let len = self.u16(field)? as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtoError::InvalidUtf8 {
            tag: self.tag,
            kind: self.kind,
            field,
        })
    }

    fn qid(&mut self, field: &'static str) -> ProtoResult<Qid> {
        self.need(Qid::LEN, field)?;
        Ok(Qid {
            kind: self.buf.get_u8(),
            version: self.buf.get_u32_le(),
            path: self.buf.get_u64_le(),
        })
    }

    /// Split off the next `n` bytes as their own reader.
    fn sub(&mut self, n: usize, field: &'static str) -> ProtoResult<Reader<'a>> {
        let buf = self.take(n, field)?;
        Ok(Reader {
            buf,
            tag: self.tag,
            kind: self.kind,
        })
    }

    fn stat(&mut self) -> ProtoResult<Stat> {
        let size = self.u16("stat size")? as usize;
        let mut r = self.sub(size, "stat")?;
        let stat = Stat {
            kind: r.u16("stat type")?,
            dev: r.u32("stat dev")?,
            qid: r.qid("stat qid")?,
            mode: r.u32("stat mode")?,
            atime: r.u32("stat atime")?,
            mtime: r.u32("stat mtime")?,
            length: r.u64("stat length")?,
            name: r.string("stat name")?,
            uid: r.string("stat uid")?,
            gid: r.string("stat gid")?,
            muid: r.string("stat muid")?,
        };
        r.finish()?;
        Ok(stat)
    }

    fn finish(&self) -> ProtoResult<()> {
        if self.buf.has_remaining() {
            return Err(ProtoError::TrailingBytes {
                tag: self.tag,
                kind: self.kind,
                extra: self.buf.remaining(),
            });
        }
        Ok(())
    }
}
