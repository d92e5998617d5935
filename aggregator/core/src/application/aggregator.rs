// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Aggregating Message Handler
//!
//! Receives messages, groups them by correlation key and releases each group
//! once its release strategy says so. Also owns the timeout path used by the
//! expiry sweep.
//!
//! # Group lifecycle
//!
//! `absent → open → {released, discarded}`
//!
//! - First message for a key creates the group.
//! - A sequenced message whose number is already in the group goes to the
//!   discard channel; the group is unchanged.
//! - After every append the release strategy is asked; on release the group is
//!   reduced, the result is sent, then the group is disposed.
//! - Disposal only follows a successful send. A processor or delivery failure
//!   is returned to the caller and the group stays as it was.
//!
//! The key's lock is held from lookup to disposal, so append, decision and
//! release are atomic per key while different keys proceed in parallel.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::channel::ChannelRef;
use crate::domain::config::AggregatorConfig;
use crate::domain::correlation::{CorrelationStrategy, HeaderCorrelationStrategy};
use crate::domain::error::AggregatorError;
use crate::domain::events::{AggregatorEvent, DiscardReason};
use crate::domain::group::MessageGroup;
use crate::domain::message::{CorrelationKey, Message, MessageBuilder};
use crate::domain::processor::{DefaultAggregatingProcessor, MessageGroupProcessor};
use crate::domain::release::{ReleaseStrategy, SequenceSizeReleaseStrategy};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::group_store::{InMemoryMessageGroupStore, LockedGroup};

/// Outcome of one expiry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Groups that produced a `GroupExpired` event
    pub groups_expired: usize,
    /// Partial results sent downstream
    pub partial_results_sent: usize,
    /// Messages routed to the discard path
    pub messages_discarded: usize,
    /// Empty or closed groups cleaned out of the store
    pub groups_removed_without_event: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.groups_expired += other.groups_expired;
        self.partial_results_sent += other.partial_results_sent;
        self.messages_discarded += other.messages_discarded;
        self.groups_removed_without_event += other.groups_removed_without_event;
    }
}

pub struct AggregatingMessageHandler {
    config: AggregatorConfig,
    store: Arc<InMemoryMessageGroupStore>,
    correlation_strategy: Arc<dyn CorrelationStrategy>,
    release_strategy: Arc<dyn ReleaseStrategy>,
    processor: Arc<dyn MessageGroupProcessor>,
    output_channel: Option<ChannelRef>,
    discard_channel: Option<ChannelRef>,
    event_bus: EventBus,
}

impl AggregatingMessageHandler {
    pub fn builder(name: impl Into<String>) -> AggregatingMessageHandlerBuilder {
        AggregatingMessageHandlerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemoryMessageGroupStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Accept one inbound message.
    ///
    /// Errors: `MissingCorrelationKey` (store untouched), or a processor /
    /// delivery / destination failure while releasing (group left intact).
    pub fn handle(&self, message: Message) -> Result<(), AggregatorError> {
        let key = self
            .correlation_strategy
            .correlation_key(&message)
            .filter(|key| !key.as_str().is_empty())
            .ok_or(AggregatorError::MissingCorrelationKey {
                message_id: message.id(),
            })?;

        metrics::counter!("conflux_messages_received_total", "aggregator" => self.config.name.clone())
            .increment(1);

        let mut locked = self.lock_open_or_retained(&key);

        if locked.group().is_complete() {
            debug!(correlation_key = %key, message_id = %message.id(), "Group already completed, discarding late message");
            return self.discard(&key, message, DiscardReason::GroupCompleted);
        }

        let sequence_number = message.sequence_number();
        if locked.group().contains_sequence(sequence_number) {
            debug!(
                correlation_key = %key,
                sequence_number,
                "Duplicate sequence number, discarding message"
            );
            return self.discard(
                &key,
                message,
                DiscardReason::DuplicateSequence { sequence_number },
            );
        }

        locked.add(message);

        if self.release_strategy.can_release(locked.group()) {
            if self.release_strategy.releases_partial_sequences() {
                self.release_run(locked)?;
            } else {
                self.release(locked)?;
            }
        }
        Ok(())
    }

    /// Lock the group for `key`, replacing a retained expired group with a
    /// fresh one. Retained complete groups are returned as they are.
    fn lock_open_or_retained(&self, key: &CorrelationKey) -> LockedGroup<'_> {
        loop {
            let locked = self.store.lock_or_create(key);
            if !locked.group().is_expired() {
                return locked;
            }
            debug!(correlation_key = %key, "Replacing expired group with a fresh one");
            locked.remove();
        }
    }

    fn release(&self, locked: LockedGroup<'_>) -> Result<(), AggregatorError> {
        let key = locked.correlation_key().clone();
        let message_count = locked.group().size();

        self.send_result(locked.group())?;

        if self.config.expire_groups_upon_completion {
            locked.remove();
        } else {
            locked.mark_complete();
        }

        info!(
            aggregator = %self.config.name,
            correlation_key = %key,
            message_count,
            "Released message group"
        );
        metrics::counter!("conflux_groups_released_total", "aggregator" => self.config.name.clone())
            .increment(1);
        self.event_bus.publish(AggregatorEvent::GroupReleased {
            source: self.config.name.clone(),
            correlation_key: key,
            message_count,
            released_at: Utc::now(),
        });
        Ok(())
    }

    /// Release the contiguous run following the last released sequence
    /// number. The group stays open unless the run ends the sequence.
    fn release_run(&self, mut locked: LockedGroup<'_>) -> Result<(), AggregatorError> {
        let run: Vec<Message> = locked
            .group()
            .releasable_run()
            .into_iter()
            .cloned()
            .collect();
        let Some(last) = run.last().map(Message::sequence_number) else {
            return Ok(());
        };
        let sequence_size = locked.group().sequence_size();
        if run.len() == locked.group().size() && sequence_size > 0 && last >= sequence_size {
            return self.release(locked);
        }

        let key = locked.correlation_key().clone();
        let message_count = run.len();
        self.send_result(&locked.group().with_messages(run))?;
        locked.remove_released(last);

        info!(
            aggregator = %self.config.name,
            correlation_key = %key,
            message_count,
            last_sequence_number = last,
            "Released partial sequence"
        );
        metrics::counter!("conflux_groups_released_total", "aggregator" => self.config.name.clone())
            .increment(1);
        self.event_bus.publish(AggregatorEvent::GroupReleased {
            source: self.config.name.clone(),
            correlation_key: key,
            message_count,
            released_at: Utc::now(),
        });
        Ok(())
    }

    /// Reduce the group and deliver the result. Does not touch the group.
    fn send_result(&self, group: &MessageGroup) -> Result<(), AggregatorError> {
        let key = group.correlation_key();
        let payload = self
            .processor
            .process(group)
            .map_err(|source| AggregatorError::Processor {
                correlation_key: key.clone(),
                source,
            })?;

        let destination = group
            .reply_channel()
            .or(self.output_channel.as_ref())
            .ok_or_else(|| AggregatorError::NoOutputDestination {
                correlation_key: key.clone(),
            })?;

        let output = build_output(group, payload);
        debug!(
            correlation_key = %key,
            channel = destination.name(),
            message_id = %output.id(),
            "Sending aggregated result"
        );
        destination
            .send(output)
            .map_err(|e| AggregatorError::delivery(destination.name(), e))
    }

    fn discard(
        &self,
        key: &CorrelationKey,
        message: Message,
        reason: DiscardReason,
    ) -> Result<(), AggregatorError> {
        let message_id = message.id();
        match &self.discard_channel {
            Some(channel) => channel
                .send(message)
                .map_err(|e| AggregatorError::delivery(channel.name(), e))?,
            None => debug!(
                correlation_key = %key,
                message_id = %message_id,
                "No discard channel configured, dropping message"
            ),
        }

        metrics::counter!("conflux_messages_discarded_total", "aggregator" => self.config.name.clone())
            .increment(1);
        self.event_bus.publish(AggregatorEvent::MessageDiscarded {
            source: self.config.name.clone(),
            correlation_key: key.clone(),
            message_id,
            reason,
            discarded_at: Utc::now(),
        });
        Ok(())
    }

    /// Expire every group idle for longer than `cutoff_age`.
    ///
    /// A negative age expires every group regardless of its timestamps. The
    /// pass stops at the first processor or delivery failure; groups already
    /// handled stay handled. A failing partial result leaves its group
    /// intact; a failing discard leaves only the messages not yet discarded,
    /// and the `GroupExpired` event of the retry counts just those.
    pub fn expire_groups(&self, cutoff_age: Duration) -> Result<SweepReport, AggregatorError> {
        let cutoff = Utc::now() - cutoff_age;
        let mut report = SweepReport::default();
        self.store.for_each_older_than(cutoff, |locked| {
            report.absorb(self.expire_locked(locked)?);
            Ok(())
        })?;

        if report.groups_expired > 0 {
            info!(
                aggregator = %self.config.name,
                groups_expired = report.groups_expired,
                partial_results_sent = report.partial_results_sent,
                messages_discarded = report.messages_discarded,
                "Expired stale message groups"
            );
        }
        Ok(report)
    }

    /// Expire the group for `key` now, whatever its age.
    ///
    /// Returns `Ok(None)` when no live group exists for the key.
    pub fn expire_group(&self, key: &CorrelationKey) -> Result<Option<SweepReport>, AggregatorError> {
        match self.store.lock(key) {
            Some(locked) => self.expire_locked(locked).map(Some),
            None => Ok(None),
        }
    }

    fn expire_locked(&self, mut locked: LockedGroup<'_>) -> Result<SweepReport, AggregatorError> {
        let mut report = SweepReport::default();
        let key = locked.correlation_key().clone();

        if locked.group().is_empty() || locked.group().is_closed() {
            // Nothing left to emit; retained markers are cleaned up here.
            if self.config.expire_groups_upon_timeout && !locked.group().is_expired() {
                locked.remove();
                report.groups_removed_without_event = 1;
            }
            return Ok(report);
        }

        let message_count = locked.group().size();
        let discarded = if self.config.send_partial_result_on_expiry {
            debug!(correlation_key = %key, message_count, "Sending partial result for expired group");
            self.send_result(locked.group())?;
            report.partial_results_sent = 1;
            false
        } else {
            // A message leaves the group as soon as its discard succeeds.
            let pending: Vec<Message> = locked.group().messages().to_vec();
            for message in pending {
                let message_id = message.id();
                self.discard(&key, message, DiscardReason::GroupExpired)?;
                locked.remove_message(message_id);
                report.messages_discarded += 1;
            }
            true
        };

        if self.config.expire_groups_upon_timeout {
            locked.remove();
        } else {
            locked.mark_expired();
        }
        report.groups_expired = 1;

        if discarded {
            warn!(
                aggregator = %self.config.name,
                correlation_key = %key,
                message_count,
                "Discarded incomplete message group on expiry"
            );
        }
        metrics::counter!("conflux_groups_expired_total", "aggregator" => self.config.name.clone())
            .increment(1);
        self.event_bus.publish(AggregatorEvent::GroupExpired {
            source: self.config.name.clone(),
            correlation_key: key,
            message_count,
            discarded,
            expired_at: Utc::now(),
        });
        Ok(report)
    }
}

/// Wrap a processor result into the output message.
///
/// Carries the correlation key, the uniform reply channel and every custom
/// header whose value is the same on all grouped messages. Sequence headers
/// describe the inputs, not the result, and are dropped.
fn build_output(group: &MessageGroup, payload: Value) -> Message {
    let mut builder =
        MessageBuilder::with_payload(payload).correlation_id(group.correlation_key().clone());
    if let Some(reply) = group.reply_channel() {
        builder = builder.reply_channel(reply.clone());
    }
    builder.headers(common_headers(group)).build()
}

fn common_headers(group: &MessageGroup) -> BTreeMap<String, Value> {
    let mut messages = group.messages().iter();
    let Some(first) = messages.next() else {
        return BTreeMap::new();
    };
    let mut common = first.headers().custom.clone();
    for message in messages {
        common.retain(|name, value| {
            let same = message.headers().get(name) == Some(&*value);
            if !same {
                debug!(header = %name, correlation_key = %group.correlation_key(), "Dropping conflicting header from aggregated result");
            }
            same
        });
    }
    common
}

// ============================================================================
// Builder
// ============================================================================

pub struct AggregatingMessageHandlerBuilder {
    config: AggregatorConfig,
    store: Option<Arc<InMemoryMessageGroupStore>>,
    correlation_strategy: Arc<dyn CorrelationStrategy>,
    release_strategy: Arc<dyn ReleaseStrategy>,
    processor: Arc<dyn MessageGroupProcessor>,
    output_channel: Option<ChannelRef>,
    discard_channel: Option<ChannelRef>,
    event_bus: Option<EventBus>,
}

impl AggregatingMessageHandlerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: AggregatorConfig {
                name: name.into(),
                ..AggregatorConfig::default()
            },
            store: None,
            correlation_strategy: Arc::new(HeaderCorrelationStrategy),
            release_strategy: Arc::new(SequenceSizeReleaseStrategy::new()),
            processor: Arc::new(DefaultAggregatingProcessor),
            output_channel: None,
            discard_channel: None,
            event_bus: None,
        }
    }

    /// Replace all policy switches. The handler name given to `builder` is kept.
    pub fn config(mut self, config: AggregatorConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = AggregatorConfig { name, ..config };
        self
    }

    pub fn store(mut self, store: Arc<InMemoryMessageGroupStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn correlation_strategy(mut self, strategy: impl CorrelationStrategy + 'static) -> Self {
        self.correlation_strategy = Arc::new(strategy);
        self
    }

    pub fn release_strategy(mut self, strategy: impl ReleaseStrategy + 'static) -> Self {
        self.release_strategy = Arc::new(strategy);
        self
    }

    pub fn processor(mut self, processor: impl MessageGroupProcessor + 'static) -> Self {
        self.processor = Arc::new(processor);
        self
    }

    pub fn output_channel(mut self, channel: impl Into<ChannelRef>) -> Self {
        self.output_channel = Some(channel.into());
        self
    }

    pub fn discard_channel(mut self, channel: impl Into<ChannelRef>) -> Self {
        self.discard_channel = Some(channel.into());
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn send_partial_result_on_expiry(mut self, enabled: bool) -> Self {
        self.config.send_partial_result_on_expiry = enabled;
        self
    }

    pub fn expire_groups_upon_timeout(mut self, enabled: bool) -> Self {
        self.config.expire_groups_upon_timeout = enabled;
        self
    }

    pub fn expire_groups_upon_completion(mut self, enabled: bool) -> Self {
        self.config.expire_groups_upon_completion = enabled;
        self
    }

    pub fn build(self) -> Result<AggregatingMessageHandler, AggregatorError> {
        self.config.validate()?;
        Ok(AggregatingMessageHandler {
            config: self.config,
            store: self.store.unwrap_or_default(),
            correlation_strategy: self.correlation_strategy,
            release_strategy: self.release_strategy,
            processor: self.processor,
            output_channel: self.output_channel,
            discard_channel: self.discard_channel,
            event_bus: self.event_bus.unwrap_or_default(),
        })
    }
}
