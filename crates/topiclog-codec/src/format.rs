//! Format tags persisted in the `format_string` column.

use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Byte order of a fixed-width numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Least significant byte first. The order every encoder writes.
    Little,
    /// Most significant byte first.
    Big,
}

/// The numeric kinds a fixed-width specifier can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    /// IEEE-754 single precision (`f`).
    Float32,
    /// Two's complement 32-bit signed integer (`i`).
    Int32,
}

impl NumericKind {
    /// Width of the encoded value in bytes.
    pub fn width(self) -> usize {
        4
    }
}

/// A parsed format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Raw bytes, stored unchanged (`-`).
    Raw,
    /// UTF-8 text (`utf8`).
    Utf8,
    /// A fixed-width numeric value.
    Numeric {
        /// What the bytes represent.
        kind: NumericKind,
        /// How the bytes are ordered.
        order: ByteOrder,
    },
}

impl FormatTag {
    /// The little-endian `f32` tag written by [`encode`](crate::encode).
    pub const FLOAT32: Self = Self::Numeric {
        kind: NumericKind::Float32,
        order: ByteOrder::Little,
    };

    /// The little-endian `i32` tag written by [`encode`](crate::encode).
    pub const INT32: Self = Self::Numeric {
        kind: NumericKind::Int32,
        order: ByteOrder::Little,
    };

    /// Returns the canonical tag string.
    ///
    /// Big-endian specifiers are normalised to the `>` prefix regardless of
    /// whether they were parsed from `>` or `!`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "-",
            Self::Utf8 => "utf8",
            Self::Numeric { kind, order } => match (kind, order) {
                (NumericKind::Float32, ByteOrder::Little) => "f",
                (NumericKind::Int32, ByteOrder::Little) => "i",
                (NumericKind::Float32, ByteOrder::Big) => ">f",
                (NumericKind::Int32, ByteOrder::Big) => ">i",
            },
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "-" => return Ok(Self::Raw),
            "utf8" => return Ok(Self::Utf8),
            _ => {}
        }

        let (order, code) = match s.as_bytes().first() {
            Some(b'<' | b'=' | b'@') => (ByteOrder::Little, &s[1..]),
            Some(b'>' | b'!') => (ByteOrder::Big, &s[1..]),
            _ => (ByteOrder::Little, s),
        };

        let kind = match code {
            "f" => NumericKind::Float32,
            "i" => NumericKind::Int32,
            _ => return Err(CodecError::UnknownFormatTag(s.to_string())),
        };

        Ok(Self::Numeric { kind, order })
    }
}
