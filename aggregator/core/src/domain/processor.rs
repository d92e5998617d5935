// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Group processors reduce a released (or partially expired) group to one
//! output payload.
//!
//! A processor runs exactly once per disposal, with the group lock held. It
//! must not mutate the group and must not perform I/O: sending the result is
//! the handler's job.

use serde_json::Value;

use crate::domain::group::MessageGroup;

/// Failure raised while reducing a group
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error("Unexpected payload in message {message_id}: {reason}")]
    InvalidPayload { message_id: String, reason: String },

    #[error("Processing failed: {0}")]
    Failed(String),
}

pub trait MessageGroupProcessor: Send + Sync {
    fn process(&self, group: &MessageGroup) -> Result<Value, ProcessorError>;
}

impl<F> MessageGroupProcessor for F
where
    F: Fn(&MessageGroup) -> Result<Value, ProcessorError> + Send + Sync,
{
    fn process(&self, group: &MessageGroup) -> Result<Value, ProcessorError> {
        self(group)
    }
}

/// Collects the payloads, in group order, into a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAggregatingProcessor;

impl MessageGroupProcessor for DefaultAggregatingProcessor {
    fn process(&self, group: &MessageGroup) -> Result<Value, ProcessorError> {
        Ok(Value::Array(
            group
                .ordered_messages()
                .into_iter()
                .map(|m| m.payload().clone())
                .collect(),
        ))
    }
}

/// Adapts a function over the ordered payloads into a processor.
pub struct PayloadFoldProcessor<F> {
    fold: F,
}

impl<F> PayloadFoldProcessor<F>
where
    F: Fn(&[&Value]) -> Result<Value, ProcessorError> + Send + Sync,
{
    pub fn new(fold: F) -> Self {
        Self { fold }
    }
}

impl<F> MessageGroupProcessor for PayloadFoldProcessor<F>
where
    F: Fn(&[&Value]) -> Result<Value, ProcessorError> + Send + Sync,
{
    fn process(&self, group: &MessageGroup) -> Result<Value, ProcessorError> {
        let payloads: Vec<&Value> = group
            .ordered_messages()
            .into_iter()
            .map(|m| m.payload())
            .collect();
        (self.fold)(&payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageBuilder;
    use serde_json::json;

    fn group_of(payloads: &[(i64, u32)]) -> MessageGroup {
        let mut group = MessageGroup::new("ABC".into());
        for (payload, number) in payloads {
            group.add(
                MessageBuilder::with_payload(*payload)
                    .correlation_id("ABC")
                    .sequence(*number, payloads.len() as u32)
                    .build(),
            );
        }
        group
    }

    #[test]
    fn test_default_processor_collects_in_sequence_order() {
        let group = group_of(&[(7, 3), (3, 1), (5, 2)]);
        let result = DefaultAggregatingProcessor.process(&group).unwrap();
        assert_eq!(result, json!([3, 5, 7]));
        assert_eq!(group.size(), 3);
    }

    #[test]
    fn test_fold_processor_sums() {
        let sum = PayloadFoldProcessor::new(|payloads: &[&Value]| {
            payloads
                .iter()
                .map(|p| p.as_i64().ok_or_else(|| ProcessorError::Failed("not a number".into())))
                .sum::<Result<i64, _>>()
                .map(Value::from)
        });
        assert_eq!(sum.process(&group_of(&[(1, 1), (2, 2)])).unwrap(), json!(3));

        let mut bad = MessageGroup::new("x".into());
        bad.add(MessageBuilder::with_payload("nope").build());
        assert!(matches!(sum.process(&bad), Err(ProcessorError::Failed(_))));
    }
}
