//! Payload codec for the topiclog event store.
//!
//! Every persisted event carries a `data` blob and a `format_string` tag.
//! The tag alone decides how the blob is decoded, so the mapping below is
//! the on-disk wire format and must stay bit-exact:
//!
//! | Value kind | Tag | Payload |
//! |------------|-----|---------|
//! | raw bytes | `-` | unchanged |
//! | UTF-8 text | `utf8` | UTF-8 bytes |
//! | 32-bit float | `f` | 4-byte IEEE-754, little-endian |
//! | 32-bit signed int | `i` | 4-byte two's complement, little-endian |
//!
//! On decode, any tag other than `-` and `utf8` is read as a fixed-width
//! numeric specifier: an optional byte-order prefix (`<`, `>`, `!`, `=`,
//! `@`) followed by `f` or `i`. Native order (`=`, `@`) is treated as
//! little-endian.
//!
//! # Usage
//!
//! ```rust
//! use topiclog_codec::{decode, encode, Value};
//!
//! let encoded = encode(&Value::Float(21.5));
//! assert_eq!(encoded.format.as_str(), "f");
//! assert_eq!(decode(&encoded.data, "f").unwrap(), Value::Float(21.5));
//! ```

mod error;
mod format;
mod value;

pub use error::CodecError;
pub use format::{ByteOrder, FormatTag, NumericKind};
pub use value::{decode, encode, Encoded, Value};
