//! Error types for the protocol layer.
//!
//! Every variant here means the same thing to a connection: the peer sent
//! bytes we cannot trust, so the connection is closed as malformed. The
//! variants exist for logs, never for the peer. A decrypt failure and a
//! truncated field look identical on the wire side.

/// Errors that can occur while framing, reading, or writing packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A frame declared a length above the configured maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A frame declared a length too small to hold a header and a tag.
    #[error("frame of {0} bytes is shorter than the minimum")]
    FrameTooShort(usize),

    /// A field read would run past the end of the frame.
    #[error("read of {needed} bytes past end of packet ({remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },

    /// Bytes were left over after the last declared field.
    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),

    /// The type tag is not a member of the enumeration (or is the sentinel).
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),

    /// A field value is outside its domain (bad enum value, bad UTF-8, ...).
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// A length-prefixed field is too long for its prefix.
    #[error("field of {0} bytes does not fit its length prefix")]
    FieldTooLong(usize),

    /// Authenticated decryption failed.
    #[error("frame failed authentication")]
    DecryptFailed,

    /// Encryption could not be set up or applied.
    #[error("frame encryption failed")]
    EncryptFailed,

    /// The per-direction frame counter ran out of nonces.
    #[error("frame counter exhausted")]
    NonceExhausted,
}
