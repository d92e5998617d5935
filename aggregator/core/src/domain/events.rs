// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::message::{CorrelationKey, MessageId};

/// Why a message left the aggregation flow without being part of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscardReason {
    /// The group already holds a message with this sequence number
    DuplicateSequence { sequence_number: u32 },
    /// The group was released and retained; it accepts no further messages
    GroupCompleted,
    /// The group timed out without partial-result delivery
    GroupExpired,
}

/// Notifications published by an aggregating handler.
///
/// `source` is the handler name (`AggregatorConfig::name`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AggregatorEvent {
    GroupReleased {
        source: String,
        correlation_key: CorrelationKey,
        message_count: usize,
        released_at: DateTime<Utc>,
    },
    MessageDiscarded {
        source: String,
        correlation_key: CorrelationKey,
        message_id: MessageId,
        reason: DiscardReason,
        discarded_at: DateTime<Utc>,
    },
    /// Exactly one per group per sweep pass
    GroupExpired {
        source: String,
        correlation_key: CorrelationKey,
        message_count: usize,
        discarded: bool,
        expired_at: DateTime<Utc>,
    },
}

impl AggregatorEvent {
    pub fn source(&self) -> &str {
        match self {
            AggregatorEvent::GroupReleased { source, .. } => source,
            AggregatorEvent::MessageDiscarded { source, .. } => source,
            AggregatorEvent::GroupExpired { source, .. } => source,
        }
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        match self {
            AggregatorEvent::GroupReleased { correlation_key, .. } => correlation_key,
            AggregatorEvent::MessageDiscarded { correlation_key, .. } => correlation_key,
            AggregatorEvent::GroupExpired { correlation_key, .. } => correlation_key,
        }
    }
}
