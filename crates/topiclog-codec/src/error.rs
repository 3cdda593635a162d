//! Error types for the payload codec.

/// Errors produced while encoding or decoding payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input value has no encoding in the closed set of payload kinds.
    #[error("unsupported payload kind: {0}")]
    UnsupportedPayloadKind(String),

    /// The persisted format tag is not one this codec understands.
    #[error("unknown format tag: {0:?}")]
    UnknownFormatTag(String),

    /// The payload bytes do not match what the format tag promises.
    #[error("payload decode error: {0}")]
    DecodeError(String),
}
