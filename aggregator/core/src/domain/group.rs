// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Group Aggregate
//!
//! Accumulator for the messages sharing one [`CorrelationKey`].
//!
//! # Invariants
//!
//! - Every message in the group carries the group's correlation key
//!   (as resolved by the handler's correlation strategy).
//! - A sequence number (> 0) appears at most once, counting the numbers
//!   already handed over by a partial sequence release.
//! - Once `complete` or `expired` is set the group only changes by disposal,
//!   which empties it.
//!
//! Mutation happens exclusively through the group store while the group's
//! lock is held; strategies and processors only see `&MessageGroup`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::channel::ChannelRef;
use crate::domain::message::{CorrelationKey, Message, MessageId};

#[derive(Debug, Clone)]
pub struct MessageGroup {
    key: CorrelationKey,
    messages: Vec<Message>,
    sequence_numbers: HashSet<u32>,
    last_released_sequence: u32,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    complete: bool,
    expired: bool,
}

impl MessageGroup {
    pub fn new(key: CorrelationKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            messages: Vec::new(),
            sequence_numbers: HashSet::new(),
            last_released_sequence: 0,
            created_at: now,
            last_modified: now,
            complete: false,
            expired: false,
        }
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        &self.key
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// True once the group has been completed or expired and accepts no more messages.
    pub fn is_closed(&self) -> bool {
        self.complete || self.expired
    }

    /// Messages in arrival order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages in sequence order when every message is sequenced, arrival
    /// order otherwise.
    pub fn ordered_messages(&self) -> Vec<&Message> {
        let mut ordered: Vec<&Message> = self.messages.iter().collect();
        if !ordered.is_empty() && ordered.iter().all(|m| m.headers().is_sequenced()) {
            ordered.sort_by_key(|m| m.sequence_number());
        }
        ordered
    }

    pub fn one_message(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn contains_sequence(&self, sequence_number: u32) -> bool {
        sequence_number > 0
            && (sequence_number <= self.last_released_sequence
                || self.sequence_numbers.contains(&sequence_number))
    }

    /// Highest sequence number handed over by a partial release, 0 if none
    pub fn last_released_sequence(&self) -> u32 {
        self.last_released_sequence
    }

    /// Messages forming the contiguous run of sequence numbers that starts
    /// right after the last released one, in sequence order. Empty when the
    /// next expected number has not arrived.
    pub fn releasable_run(&self) -> Vec<&Message> {
        let mut next = self.last_released_sequence + 1;
        let mut run = Vec::new();
        for message in self.ordered_messages() {
            if !message.headers().is_sequenced() {
                return Vec::new();
            }
            if message.sequence_number() != next {
                break;
            }
            run.push(message);
            next += 1;
        }
        run
    }

    /// Number of distinct sequence numbers present
    pub fn distinct_sequence_count(&self) -> usize {
        self.sequence_numbers.len()
    }

    /// Sequence size agreed by the group: the first message's size wins when
    /// the messages disagree.
    pub fn sequence_size(&self) -> u32 {
        self.one_message().map(Message::sequence_size).unwrap_or(0)
    }

    /// Reply destination shared by every message, if there is exactly one.
    pub fn reply_channel(&self) -> Option<&ChannelRef> {
        let first = self.one_message()?.reply_channel()?;
        self.messages
            .iter()
            .all(|m| m.reply_channel().is_some_and(|c| c.same_channel(first)))
            .then_some(first)
    }

    pub(crate) fn add(&mut self, message: Message) {
        debug_assert!(!self.is_closed(), "closed groups are never appended to");
        let sequence_number = message.sequence_number();
        if sequence_number > 0 {
            self.sequence_numbers.insert(sequence_number);
        }
        self.messages.push(message);
        self.last_modified = Utc::now();
    }

    /// Drop one message without touching `last_modified`, so a group that
    /// is being expired stays eligible for the next sweep.
    pub(crate) fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id() == id)?;
        let message = self.messages.remove(index);
        self.sequence_numbers.remove(&message.sequence_number());
        Some(message)
    }

    /// Hand over every message numbered up to `sequence_number`
    pub(crate) fn remove_released(&mut self, sequence_number: u32) {
        self.messages
            .retain(|m| !m.headers().is_sequenced() || m.sequence_number() > sequence_number);
        self.sequence_numbers.retain(|n| *n > sequence_number);
        self.last_released_sequence = self.last_released_sequence.max(sequence_number);
        self.last_modified = Utc::now();
    }

    /// Copy of this group holding only `messages`, used to process a partial run
    pub(crate) fn with_messages(&self, messages: Vec<Message>) -> MessageGroup {
        let sequence_numbers = messages
            .iter()
            .map(Message::sequence_number)
            .filter(|n| *n > 0)
            .collect();
        MessageGroup {
            key: self.key.clone(),
            messages,
            sequence_numbers,
            last_released_sequence: self.last_released_sequence,
            created_at: self.created_at,
            last_modified: self.last_modified,
            complete: self.complete,
            expired: self.expired,
        }
    }

    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
        self.clear();
    }

    pub(crate) fn mark_expired(&mut self) {
        self.expired = true;
        self.clear();
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.sequence_numbers.clear();
        self.last_released_sequence = 0;
        self.last_modified = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_modified(&mut self, at: DateTime<Utc>) {
        self.last_modified = at;
    }
}
