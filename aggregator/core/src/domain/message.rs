// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope
//!
//! Immutable unit of work flowing through the aggregator.
//!
//! - [`Message`] — payload plus [`MessageHeaders`]; never mutated once built.
//! - [`MessageId`] — unique identifier (UUID newtype), generated once per instance.
//! - [`CorrelationKey`] — value used to group related messages.
//! - [`MessageBuilder`] — the only way to construct or derive a message.
//!
//! Deriving a message from an existing one (`MessageBuilder::from_message`)
//! always yields a new instance with a fresh id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::channel::ChannelRef;

// ============================================================================
// Value Objects
// ============================================================================

/// Unique identifier for a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation key shared by every message of one group.
///
/// Keys built from strings, integers and UUIDs compare by their textual form,
/// so `CorrelationKey::from(7)` and `CorrelationKey::from("7")` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Build a key, rejecting the empty string (an empty key is an absent key).
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for CorrelationKey {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for CorrelationKey {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<i32> for CorrelationKey {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for CorrelationKey {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Headers
// ============================================================================

/// Well-known and custom headers of a [`Message`].
///
/// `sequence_number == 0` means the message is not part of a sequence;
/// `sequence_size == 0` means the size is unknown.
#[derive(Debug, Clone)]
pub struct MessageHeaders {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<CorrelationKey>,
    pub sequence_number: u32,
    pub sequence_size: u32,
    pub reply_channel: Option<ChannelRef>,
    pub custom: BTreeMap<String, Value>,
}

impl MessageHeaders {
    fn fresh() -> Self {
        Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            correlation_id: None,
            sequence_number: 0,
            sequence_size: 0,
            reply_channel: None,
            custom: BTreeMap::new(),
        }
    }

    pub fn is_sequenced(&self) -> bool {
        self.sequence_number > 0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.custom.get(name)
    }
}

// ============================================================================
// Message
// ============================================================================

/// Immutable message: payload plus headers.
///
/// Cloning is cheap (the inner envelope is shared) and a clone is the *same*
/// message: equality is identity of the [`MessageId`].
#[derive(Clone)]
pub struct Message {
    inner: Arc<Envelope>,
}

struct Envelope {
    payload: Value,
    headers: MessageHeaders,
}

impl Message {
    pub fn payload(&self) -> &Value {
        &self.inner.payload
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.inner.headers
    }

    pub fn id(&self) -> MessageId {
        self.inner.headers.id
    }

    pub fn correlation_id(&self) -> Option<&CorrelationKey> {
        self.inner.headers.correlation_id.as_ref()
    }

    pub fn sequence_number(&self) -> u32 {
        self.inner.headers.sequence_number
    }

    pub fn sequence_size(&self) -> u32 {
        self.inner.headers.sequence_size
    }

    pub fn reply_channel(&self) -> Option<&ChannelRef> {
        self.inner.headers.reply_channel.as_ref()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", self.payload())
            .field("headers", self.headers())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Message`] instances.
pub struct MessageBuilder {
    payload: Value,
    headers: MessageHeaders,
}

impl MessageBuilder {
    pub fn with_payload(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            headers: MessageHeaders::fresh(),
        }
    }

    /// Start from an existing message's payload and headers. The built message
    /// receives a new id and timestamp.
    pub fn from_message(message: &Message) -> Self {
        let mut headers = message.headers().clone();
        headers.id = MessageId::new();
        headers.timestamp = Utc::now();
        Self {
            payload: message.payload().clone(),
            headers,
        }
    }

    pub fn correlation_id(mut self, key: impl Into<CorrelationKey>) -> Self {
        let key: CorrelationKey = key.into();
        self.headers.correlation_id = CorrelationKey::new(key.0);
        self
    }

    pub fn clear_correlation_id(mut self) -> Self {
        self.headers.correlation_id = None;
        self
    }

    pub fn sequence_number(mut self, number: u32) -> Self {
        self.headers.sequence_number = number;
        self
    }

    pub fn sequence_size(mut self, size: u32) -> Self {
        self.headers.sequence_size = size;
        self
    }

    /// Shorthand for `sequence_number(number).sequence_size(size)`.
    pub fn sequence(self, number: u32, size: u32) -> Self {
        self.sequence_number(number).sequence_size(size)
    }

    pub fn clear_sequence_details(mut self) -> Self {
        self.headers.sequence_number = 0;
        self.headers.sequence_size = 0;
        self
    }

    pub fn reply_channel(mut self, channel: ChannelRef) -> Self {
        self.headers.reply_channel = Some(channel);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.custom.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, Value>) -> Self {
        self.headers.custom.extend(headers);
        self
    }

    pub fn build(self) -> Message {
        Message {
            inner: Arc::new(Envelope {
                payload: self.payload,
                headers: self.headers,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_sets_headers() {
        let message = MessageBuilder::with_payload(3)
            .correlation_id("ABC")
            .sequence(1, 3)
            .header("region", "eu")
            .build();

        assert_eq!(message.payload(), &json!(3));
        assert_eq!(message.correlation_id(), Some(&CorrelationKey::from("ABC")));
        assert_eq!(message.sequence_number(), 1);
        assert_eq!(message.sequence_size(), 3);
        assert_eq!(message.headers().get("region"), Some(&json!("eu")));
        assert!(message.headers().is_sequenced());
    }

    #[test]
    fn test_empty_correlation_id_is_absent() {
        let message = MessageBuilder::with_payload(1).correlation_id("").build();
        assert!(message.correlation_id().is_none());
        assert!(CorrelationKey::new("").is_none());
    }

    #[test]
    fn test_derived_message_gets_new_id() {
        let original = MessageBuilder::with_payload("a").correlation_id(7).build();
        let derived = MessageBuilder::from_message(&original)
            .clear_sequence_details()
            .build();

        assert_ne!(original.id(), derived.id());
        assert_ne!(original, derived);
        assert_eq!(derived.correlation_id(), Some(&CorrelationKey::from("7")));
    }

    #[test]
    fn test_clone_is_same_message() {
        let message = MessageBuilder::with_payload(json!({"k": 1})).build();
        let copy = message.clone();
        assert_eq!(message, copy);
        assert!(!message.headers().is_sequenced());
    }
}
