//! Stream framing for tokio-util's `FramedRead`/`FramedWrite`.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtoError;
use crate::fcall::Frame;
use crate::wire::{self, HEADER_LEN};

/// Frames accepted before version negotiation lowers the limit.
pub const DEFAULT_MAX_FRAME: usize = 8192;

/// Errors surfaced by [`NinepCodec`]. Either ends the stream.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

/// One item off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed frame.
    Frame(Frame),
    /// The header was readable but the body was not. The stream stays in sync
    /// and the peer can be answered on `tag`.
    Malformed { tag: u16, error: ProtoError },
}

/// Length-prefixed 9P codec.
#[derive(Debug, Clone)]
pub struct NinepCodec {
    max_frame: usize,
}

impl NinepCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }

    /// Current frame size limit.
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Change the limit, e.g. after `Tversion` settles on an msize.
    pub fn set_max_frame(&mut self, max_frame: usize) {
        self.max_frame = max_frame;
    }
}

impl Default for NinepCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for NinepCodec {
    type Item = Decoded;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let declared = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if declared < HEADER_LEN {
            return Err(ProtoError::BadLength(declared as u32).into());
        }
        if declared > self.max_frame {
            return Err(ProtoError::TooLarge {
                size: declared,
                max: self.max_frame,
            }
            .into());
        }
        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let raw = src.split_to(declared);
        match wire::parse(&raw) {
            Ok((_, frame)) => Ok(Some(Decoded::Frame(frame))),
            Err(error) => match error.tag() {
                Some(tag) => Ok(Some(Decoded::Malformed { tag, error })),
                None => Err(error.into()),
            },
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, CodecError> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => {
                let available = src.remaining();
                let declared = if available >= 4 {
                    u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize
                } else {
                    HEADER_LEN
                };
                src.clear();
                Err(ProtoError::Incomplete {
                    declared,
                    available,
                }
                .into())
            }
        }
    }
}

impl Encoder<Frame> for NinepCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let start = dst.len();
        wire::compose_into(&frame, dst)?;
        let size = dst.len() - start;
        if size > self.max_frame {
            dst.truncate(start);
            return Err(ProtoError::TooLarge {
                size,
                max: self.max_frame,
            }
            .into());
        }
        Ok(())
    }
}
