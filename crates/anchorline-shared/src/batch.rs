//! Batch serialization and decoding.
//!
//! Writing produces one canonical byte sequence per logical batch so that
//! independent writers and verifiers agree on the bytes that get hashed:
//! compact JSON, UTF-8, keys sorted, integer millisecond timestamps.
//!
//! Reading is lenient. Two wire shapes are accepted (a bare array of message
//! objects, or an object wrapping a `messages` array) and message fields are
//! resolved through [`FIELD_PRECEDENCE`].

use serde_json::{Map, Value};

use crate::constants::ENVELOPE_FIELD;
use crate::error::{AnchorError, Result};
use crate::message::{Message, MessageTarget};
use crate::types::{Address, ConversationKey};

/// Top-level shape of a written batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchShape {
    /// `[ {...}, ... ]`
    #[default]
    BareArray,
    /// `{"messages": [ {...}, ... ]}`
    Envelope,
}

/// Field names tried, in order, when reading a message object.
///
/// For every logical field the first candidate holding a usable value wins.
#[derive(Debug)]
pub struct FieldPrecedence {
    pub sender: &'static [&'static str],
    pub receiver: &'static [&'static str],
    pub content: &'static [&'static str],
    pub timestamp: &'static [&'static str],
}

pub const FIELD_PRECEDENCE: FieldPrecedence = FieldPrecedence {
    sender: &["sender", "from"],
    receiver: &["receiver", "to"],
    content: &["text", "content", "message"],
    timestamp: &["timestamp", "time"],
};

/// Serializes pending messages of one conversation into canonical bytes.
#[derive(Debug, Clone, Default)]
pub struct BatchBuilder {
    shape: BatchShape,
}

impl BatchBuilder {
    pub fn new(shape: BatchShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    pub fn build(&self, key: &ConversationKey, messages: &[Message]) -> Result<Vec<u8>> {
        if messages.is_empty() {
            return Err(AnchorError::InvalidBatch("batch has no messages".into()));
        }
        if let Some(i) = messages.iter().position(|m| !m.belongs_to(key)) {
            return Err(AnchorError::InvalidBatch(format!(
                "message {i} does not belong to conversation {key}"
            )));
        }

        let entries: Vec<Value> = messages.iter().map(encode_message).collect();
        let root = match self.shape {
            BatchShape::BareArray => Value::Array(entries),
            BatchShape::Envelope => {
                let mut envelope = Map::new();
                envelope.insert(ENVELOPE_FIELD.to_string(), Value::Array(entries));
                Value::Object(envelope)
            }
        };

        serde_json::to_vec(&root).map_err(|e| AnchorError::InvalidBatch(e.to_string()))
    }
}

// Keys are inserted in sorted order so the output stays canonical even if
// serde_json's `preserve_order` feature gets unified in.
fn encode_message(message: &Message) -> Value {
    let mut obj = Map::new();
    if let MessageTarget::Direct(receiver) = &message.target {
        obj.insert("receiver".into(), Value::String(receiver.to_string()));
    }
    obj.insert("sender".into(), Value::String(message.sender.to_string()));
    obj.insert("text".into(), Value::String(message.content.clone()));
    obj.insert("timestamp".into(), Value::from(message.timestamp_ms));
    Value::Object(obj)
}

/// Messages recovered from one blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// In batch order.
    pub messages: Vec<Message>,
    /// Entries that were not objects, lacked a sender or content, or named a
    /// party outside the conversation.
    pub skipped: usize,
}

/// Decode verified blob bytes into the messages of `key`.
///
/// Fails with `InvalidBatch` only when the blob as a whole is unusable (not
/// JSON, or neither of the two accepted shapes). Individual bad entries are
/// counted in [`DecodedBatch::skipped`].
pub fn decode_batch(bytes: &[u8], key: &ConversationKey) -> Result<DecodedBatch> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| AnchorError::InvalidBatch(format!("blob is not JSON: {e}")))?;

    let entries = match root {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove(ENVELOPE_FIELD) {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(AnchorError::InvalidBatch(format!(
                    "object batch without a `{ENVELOPE_FIELD}` array"
                )))
            }
        },
        other => {
            return Err(AnchorError::InvalidBatch(format!(
                "unexpected batch root: {}",
                json_kind(&other)
            )))
        }
    };

    let mut decoded = DecodedBatch::default();
    for entry in &entries {
        match decode_entry(entry, key) {
            Some(message) => decoded.messages.push(message),
            None => decoded.skipped += 1,
        }
    }
    Ok(decoded)
}

fn decode_entry(entry: &Value, key: &ConversationKey) -> Option<Message> {
    let obj = entry.as_object()?;

    let sender = first_string(obj, FIELD_PRECEDENCE.sender).and_then(|s| Address::parse(s).ok())?;
    let content = first_string(obj, FIELD_PRECEDENCE.content)?.to_string();
    let timestamp_ms = FIELD_PRECEDENCE
        .timestamp
        .iter()
        .find_map(|field| obj.get(*field).and_then(parse_timestamp))
        .unwrap_or(0);

    let target = match key {
        ConversationKey::Channel {
            server_id,
            channel_id,
        } => MessageTarget::Channel {
            server_id: *server_id,
            channel_id: *channel_id,
        },
        ConversationKey::Direct { .. } => {
            let counterpart = key.counterpart(&sender)?.clone();
            if let Some(receiver) = first_string(obj, FIELD_PRECEDENCE.receiver) {
                if Address::parse(receiver).ok()? != counterpart {
                    return None;
                }
            }
            MessageTarget::Direct(counterpart)
        }
    };

    Some(Message {
        sender,
        target,
        content,
        timestamp_ms,
    })
}

// First candidate holding a non-empty string.
fn first_string<'a>(obj: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| obj.get(*field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Integer milliseconds; floats are floored, numeric strings accepted.
fn parse_timestamp(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.floor() as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.floor() as u64)
            })
        }
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn dm_key() -> ConversationKey {
        ConversationKey::direct(addr("0xA"), addr("0xB")).unwrap()
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = BatchBuilder::default().build(&dm_key(), &[]).unwrap_err();
        assert!(matches!(err, AnchorError::InvalidBatch(_)));
    }

    #[test]
    fn test_foreign_message_rejected() {
        let msgs = vec![Message::direct(addr("0xA"), addr("0xC"), "hi", 1000)];
        let err = BatchBuilder::default().build(&dm_key(), &msgs).unwrap_err();
        assert!(matches!(err, AnchorError::InvalidBatch(_)));
    }

    #[test]
    fn test_dm_canonical_bytes() {
        let msgs = vec![Message::direct(addr("0xA"), addr("0xB"), "hi", 1000)];
        let bytes = BatchBuilder::default().build(&dm_key(), &msgs).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"[{"receiver":"0xb","sender":"0xa","text":"hi","timestamp":1000}]"#
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let key = ConversationKey::channel(1, 9);
        let msgs = vec![
            Message::channel(addr("0xA"), 1, 9, "caf\u{e9} \"quoted\"\n", 1_700_000_000_123),
            Message::channel(addr("0xB"), 1, 9, "second", 1_700_000_000_124),
        ];
        let builder = BatchBuilder::new(BatchShape::Envelope);
        let first = builder.build(&key, &msgs).unwrap();
        let second = builder.build(&key, &msgs.clone()).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with(br#"{"messages":[{"sender":"0xa","#));
    }

    #[test]
    fn test_build_then_decode_channel_envelope() {
        let key = ConversationKey::channel(3, 4);
        let msgs = vec![Message::channel(addr("0xA"), 3, 4, "gm", 42)];
        let bytes = BatchBuilder::new(BatchShape::Envelope).build(&key, &msgs).unwrap();
        let decoded = decode_batch(&bytes, &key).unwrap();
        assert_eq!(decoded.messages, msgs);
        assert_eq!(decoded.skipped, 0);
    }

    #[test]
    fn test_decode_field_precedence() {
        let key = ConversationKey::channel(1, 1);
        let blob = br#"[
            {"from":"0xA","content":"via content","time":5},
            {"sender":"0xB","from":"0xC","message":"via message","timestamp":7,"time":9},
            {"sender":"0xD","text":"","content":"empty text falls through","timestamp":"11"}
        ]"#;
        let decoded = decode_batch(blob, &key).unwrap();
        let got: Vec<_> = decoded
            .messages
            .iter()
            .map(|m| (m.sender.as_str(), m.content.as_str(), m.timestamp_ms))
            .collect();
        assert_eq!(
            got,
            vec![
                ("0xa", "via content", 5),
                ("0xb", "via message", 7),
                ("0xd", "empty text falls through", 11),
            ]
        );
    }

    #[test]
    fn test_decode_timestamp_forms() {
        let key = ConversationKey::channel(1, 1);
        let blob = br#"[
            {"from":"0xA","content":"float","timestamp":1500.9},
            {"from":"0xA","content":"missing"},
            {"from":"0xA","content":"negative","timestamp":-4},
            {"from":"0xA","content":"bad string","timestamp":"soon","time":8}
        ]"#;
        let decoded = decode_batch(blob, &key).unwrap();
        let stamps: Vec<u64> = decoded.messages.iter().map(|m| m.timestamp_ms).collect();
        assert_eq!(stamps, vec![1500, 0, 0, 8]);
    }

    #[test]
    fn test_decode_skips_bad_entries() {
        let key = ConversationKey::channel(1, 1);
        let blob = br#"[42, {"content":"no sender"}, {"from":"0xA"}, {"from":"0xA","content":"ok"}]"#;
        let decoded = decode_batch(blob, &key).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.skipped, 3);
    }

    #[test]
    fn test_decode_dm_outsider_skipped() {
        let blob = br#"[
            {"sender":"0xA","receiver":"0xB","text":"hi","timestamp":1},
            {"sender":"0xC","receiver":"0xB","text":"intruder","timestamp":2},
            {"sender":"0xB","receiver":"0xC","text":"misrouted","timestamp":3},
            {"sender":"0xB","text":"no receiver","timestamp":4}
        ]"#;
        let decoded = decode_batch(blob, &dm_key()).unwrap();
        assert_eq!(decoded.skipped, 2);
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(
            decoded.messages[1].target,
            MessageTarget::Direct(addr("0xa"))
        );
    }

    #[test]
    fn test_decode_rejects_unusable_blobs() {
        let key = ConversationKey::channel(1, 1);
        for blob in [&b"not json"[..], b"{\"batch\":[]}", b"\"text\"", b"{\"messages\":5}"] {
            assert!(matches!(
                decode_batch(blob, &key),
                Err(AnchorError::InvalidBatch(_))
            ));
        }
    }

    #[test]
    fn test_decode_empty_array_is_fine() {
        let decoded = decode_batch(b"[]", &ConversationKey::channel(1, 1)).unwrap();
        assert!(decoded.messages.is_empty());
        assert_eq!(decoded.skipped, 0);
    }
}
