// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Correlation strategies: message → correlation key.
//!
//! A strategy must be a pure function of the message. Returning `None` means
//! the message cannot be correlated; the handler turns that into
//! `AggregatorError::MissingCorrelationKey`.

use serde_json::Value;

use crate::domain::message::{CorrelationKey, Message};

pub trait CorrelationStrategy: Send + Sync {
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey>;
}

impl<F> CorrelationStrategy for F
where
    F: Fn(&Message) -> Option<CorrelationKey> + Send + Sync,
{
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey> {
        self(message)
    }
}

/// Reads the `correlation_id` header. Default strategy of the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCorrelationStrategy;

impl CorrelationStrategy for HeaderCorrelationStrategy {
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey> {
        message.correlation_id().cloned()
    }
}

/// Reads a named custom header; strings and numbers are accepted as keys.
#[derive(Debug, Clone)]
pub struct CustomHeaderCorrelationStrategy {
    header: String,
}

impl CustomHeaderCorrelationStrategy {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl CorrelationStrategy for CustomHeaderCorrelationStrategy {
    fn correlation_key(&self, message: &Message) -> Option<CorrelationKey> {
        match message.headers().get(&self.header)? {
            Value::String(s) => CorrelationKey::new(s.as_str()),
            Value::Number(n) => CorrelationKey::new(n.to_string()),
            Value::Bool(b) => CorrelationKey::new(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageBuilder;

    #[test]
    fn test_header_strategy_reads_correlation_id() {
        let message = MessageBuilder::with_payload(1).correlation_id("ABC").build();
        assert_eq!(
            HeaderCorrelationStrategy.correlation_key(&message),
            Some(CorrelationKey::from("ABC"))
        );

        let uncorrelated = MessageBuilder::with_payload(1).build();
        assert_eq!(HeaderCorrelationStrategy.correlation_key(&uncorrelated), None);
    }

    #[test]
    fn test_custom_header_strategy() {
        let strategy = CustomHeaderCorrelationStrategy::new("order");
        let by_number = MessageBuilder::with_payload(1).header("order", 42).build();
        let by_string = MessageBuilder::with_payload(1).header("order", "42").build();
        let empty = MessageBuilder::with_payload(1).header("order", "").build();
        let nested = MessageBuilder::with_payload(1)
            .header("order", serde_json::json!({"id": 42}))
            .build();

        assert_eq!(strategy.correlation_key(&by_number), Some(CorrelationKey::from(42)));
        assert_eq!(
            strategy.correlation_key(&by_number),
            strategy.correlation_key(&by_string)
        );
        assert_eq!(strategy.correlation_key(&empty), None);
        assert_eq!(strategy.correlation_key(&nested), None);
    }

    #[test]
    fn test_closure_strategy() {
        let strategy = |_: &Message| Some(CorrelationKey::from("foo"));
        let message = MessageBuilder::with_payload("x").build();
        assert_eq!(strategy.correlation_key(&message), Some(CorrelationKey::from("foo")));
    }
}
