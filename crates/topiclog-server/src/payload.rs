//! Turning raw broker payloads into stored values.

use serde::Deserialize;
use topiclog_codec::Value;

/// How inbound payloads are interpreted before they are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Store every payload as opaque bytes.
    Raw,
    /// Store JSON scalars as numbers or text, other UTF-8 as text, and
    /// anything else as bytes.
    #[default]
    Auto,
}

/// Interprets `payload` according to `mode`.
pub fn interpret(payload: &[u8], mode: PayloadMode) -> Value {
    match mode {
        PayloadMode::Raw => Value::Bytes(payload.to_vec()),
        PayloadMode::Auto => interpret_auto(payload),
    }
}

fn interpret_auto(payload: &[u8]) -> Value {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Value::Bytes(payload.to_vec());
    };

    match serde_json::from_str::<serde_json::Value>(text.trim()) {
        Ok(json) => match Value::try_from(json) {
            Ok(value) => value,
            Err(e) => {
                tracing::trace!(error = %e, "json payload has no scalar encoding, storing text");
                Value::Text(text.to_string())
            }
        },
        Err(_) => Value::Text(text.to_string()),
    }
}
