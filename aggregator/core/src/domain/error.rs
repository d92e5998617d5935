// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::channel::DeliveryError;
use crate::domain::message::{CorrelationKey, MessageId};
use crate::domain::processor::ProcessorError;

/// Errors surfaced synchronously by the aggregating handler and the sweep.
///
/// Duplicate sequence numbers are not errors: the message is discarded and a
/// `MessageDiscarded` event is published instead.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Message {message_id} has no correlation key")]
    MissingCorrelationKey { message_id: MessageId },

    #[error("Failed to process group '{correlation_key}': {source}")]
    Processor {
        correlation_key: CorrelationKey,
        #[source]
        source: ProcessorError,
    },

    #[error("Failed to deliver to channel '{channel}': {source}")]
    Delivery {
        channel: String,
        #[source]
        source: DeliveryError,
    },

    #[error("No output destination for group '{correlation_key}': no uniform reply channel and no output channel configured")]
    NoOutputDestination { correlation_key: CorrelationKey },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AggregatorError {
    pub(crate) fn delivery(channel: &str, source: DeliveryError) -> Self {
        Self::Delivery {
            channel: channel.to_string(),
            source,
        }
    }
}
