//! Codec error types.

use thiserror::Error;

/// Errors produced while parsing or composing 9P frames.
///
/// Header-level variants ([`ShortHeader`](Self::ShortHeader),
/// [`BadLength`](Self::BadLength), [`Incomplete`](Self::Incomplete),
/// [`TooLarge`](Self::TooLarge)) mean the frame boundary itself is unknown.
/// The rest carry the tag of a frame whose header was readable, so a server
/// can answer them with an error reply and keep the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Fewer than the 7 header bytes are available.
    #[error("frame header truncated: only {0} bytes available")]
    ShortHeader(usize),

    /// Declared length cannot even hold the header.
    #[error("frame length {0} is smaller than the 7-byte header")]
    BadLength(u32),

    /// Declared length runs past the end of the buffer.
    #[error("frame declares {declared} bytes but only {available} are available")]
    Incomplete { declared: usize, available: usize },

    /// Frame exceeds the negotiated maximum size.
    #[error("frame of {size} bytes exceeds the limit of {max}")]
    TooLarge { size: usize, max: usize },

    /// Type code is not part of 9P2000.
    #[error("unknown message type {code}")]
    UnknownType { tag: u16, code: u8 },

    /// A fixed or variable field runs past the end of the frame.
    #[error("{kind}: truncated {field}")]
    Truncated {
        tag: u16,
        kind: &'static str,
        field: &'static str,
    },

    /// Fields were read in full but bytes are left over.
    #[error("{kind}: {extra} trailing bytes")]
    TrailingBytes {
        tag: u16,
        kind: &'static str,
        extra: usize,
    },

    /// A string field is not UTF-8.
    #[error("{kind}: {field} is not valid UTF-8")]
    InvalidUtf8 {
        tag: u16,
        kind: &'static str,
        field: &'static str,
    },

    /// A variable-length field does not fit its wire width.
    #[error("{field} is too long for the wire ({len})")]
    FieldTooLong { field: &'static str, len: usize },
}

impl ProtoError {
    /// The tag of the offending frame, when its header was readable.
    pub fn tag(&self) -> Option<u16> {
        match self {
            Self::UnknownType { tag, .. }
            | Self::Truncated { tag, .. }
            | Self::TrailingBytes { tag, .. }
            | Self::InvalidUtf8 { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    /// True when the frame boundary is unknown and the stream cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ShortHeader(_) | Self::BadLength(_) | Self::Incomplete { .. } | Self::TooLarge { .. }
        )
    }
}

/// Codec result type.
pub type ProtoResult<T> = Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_errors_carry_tag() {
        let err = ProtoError::Truncated {
            tag: 7,
            kind: "Twalk",
            field: "wname",
        };
        assert_eq!(err.tag(), Some(7));
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Twalk: truncated wname");
    }

    #[test]
    fn header_errors_are_fatal() {
        let err = ProtoError::Incomplete {
            declared: 100,
            available: 12,
        };
        assert_eq!(err.tag(), None);
        assert!(err.is_fatal());
    }
}
