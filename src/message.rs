//! In-memory representation of one AMI message and its wire grammar
//! (spec.md §3, §4.1).

use std::time::Instant;

use uuid::Uuid;

use crate::error::AmiError;

/// An ordered sequence of `(key, value)` pairs making up one AMI message.
///
/// Keys are compared case-insensitively on lookup but preserved verbatim on
/// serialization. Field order is preserved across round-trips.
///
/// Equality compares `fields` only: the creation timestamp is bookkeeping,
/// not a wire field, so two messages built from the same bytes at different
/// instants are still equal (spec.md §8, property 1).
#[derive(Clone, Debug)]
pub struct Message {
    fields: Vec<(String, String)>,
    created: Instant,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Message {}

impl Message {
    /// Builds an empty message carrying a freshly generated `ActionID`.
    pub fn new() -> Self {
        let mut msg = Self {
            fields: Vec::new(),
            created: Instant::now(),
        };
        msg.set("ActionID", Uuid::new_v4().to_string());
        msg
    }

    /// Builds a message for `action`, with an auto-generated `ActionID`.
    pub fn action(action: impl Into<String>) -> Self {
        Self::new().with("Action", action)
    }

    /// Sets `key` to `value` (replacing any prior value set by the caller,
    /// including an auto-generated `ActionID`), returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns the value of the first field matching `key`, case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the first field matching `key` (case-insensitively), or
    /// appends a new field if none matches.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// The message's `ActionID` field, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    /// The key of the first field in wire order, used for response/event
    /// discrimination (spec.md §4.6).
    pub fn first_key(&self) -> Option<&str> {
        self.fields.first().map(|(k, _)| k.as_str())
    }

    /// All fields in wire order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// When this message was constructed (in-process clock, not a wire field).
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Parses one message's worth of `Key: Value\r\n` lines, terminated by a
    /// blank line. `buf` must include the terminating CRLF-only line.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, AmiError> {
        let mut fields = Vec::new();
        let mut rest = buf;
        let mut line_no = 0usize;

        loop {
            let crlf = rest
                .windows(2)
                .position(|w| w == b"\r\n")
                .ok_or_else(|| AmiError::Malformed("unterminated message".to_string()))?;

            let line = &rest[..crlf];
            rest = &rest[crlf + 2..];
            line_no += 1;

            if line.is_empty() {
                return Ok(Self {
                    fields,
                    created: Instant::now(),
                });
            }

            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| AmiError::Malformed(format!("malformed field on line {line_no}")))?;

            let key = String::from_utf8_lossy(&line[..colon]).into_owned();
            let mut value = &line[colon + 1..];
            if value.first() == Some(&b' ') {
                value = &value[1..];
            }
            let value = String::from_utf8_lossy(value).into_owned();

            fields.push((key, value));
        }
    }

    /// Serializes this message as `key: value\r\n` lines plus a trailing
    /// blank line, with no normalization of values.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in &self.fields {
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
