// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Channel Contract
//!
//! Outbound boundary of the aggregator. Released results, partial results and
//! discarded messages all leave through [`MessageChannel::send`]; how the
//! routing layer delivers them further is not the aggregator's concern.
//!
//! Implementations live in `crate::infrastructure::channels`.

use std::fmt;
use std::sync::Arc;

use crate::domain::message::Message;

/// Synchronous send contract used for output, reply and discard destinations.
pub trait MessageChannel: Send + Sync {
    /// Channel name used in logs, errors and events
    fn name(&self) -> &str;

    /// Deliver one message. Must not block indefinitely.
    fn send(&self, message: Message) -> Result<(), DeliveryError>;
}

/// Shared handle to a channel, carried in message headers as a reply destination.
///
/// Two handles are equal when they point at the same channel instance.
#[derive(Clone)]
pub struct ChannelRef(Arc<dyn MessageChannel>);

impl ChannelRef {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self(channel)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn send(&self, message: Message) -> Result<(), DeliveryError> {
        self.0.send(message)
    }

    pub fn same_channel(&self, other: &ChannelRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<C: MessageChannel + 'static> From<Arc<C>> for ChannelRef {
    fn from(channel: Arc<C>) -> Self {
        Self(channel)
    }
}

impl PartialEq for ChannelRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_channel(other)
    }
}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChannelRef").field(&self.name()).finish()
    }
}

/// Errors raised by a downstream send
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Channel '{0}' is closed")]
    Closed(String),

    #[error("Channel '{channel}' is full (capacity {capacity})")]
    Full { channel: String, capacity: usize },

    #[error("Send failed: {0}")]
    Failed(String),
}
