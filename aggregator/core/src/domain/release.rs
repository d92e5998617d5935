// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Release Strategies
//!
//! A release strategy decides whether a group can be reduced now. It is
//! evaluated after every append while the group lock is held, so it must be
//! read-only and cheap: calling it any number of times on an unmodified group
//! yields the same answer.
//!
//! | Strategy | Releases when |
//! |----------|---------------|
//! | [`MessageCountReleaseStrategy`] | the group holds `threshold` messages |
//! | [`SequenceSizeReleaseStrategy`] | every sequence number up to the sequence size is present, or (partial mode) the next contiguous run has arrived |
//! | [`TimeoutCountSequenceSizeReleaseStrategy`] | sequence complete, count threshold reached, or group too old |
//!
//! Any `Fn(&MessageGroup) -> bool` closure is also a strategy.

use chrono::{Duration, Utc};

use crate::domain::group::MessageGroup;

pub trait ReleaseStrategy: Send + Sync {
    fn can_release(&self, group: &MessageGroup) -> bool;

    /// When true, a release hands over only [`MessageGroup::releasable_run`]
    /// and the rest of the group stays open.
    fn releases_partial_sequences(&self) -> bool {
        false
    }
}

impl<F> ReleaseStrategy for F
where
    F: Fn(&MessageGroup) -> bool + Send + Sync,
{
    fn can_release(&self, group: &MessageGroup) -> bool {
        self(group)
    }
}

/// Releases once the group holds `threshold` messages.
///
/// A larger group is still reported releasable. The handler disposes the
/// group on release, so this only happens when a release failed downstream:
/// the group keeps its messages and the next append releases `threshold + 1`
/// payloads in one result.
#[derive(Debug, Clone, Copy)]
pub struct MessageCountReleaseStrategy {
    threshold: usize,
}

impl MessageCountReleaseStrategy {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl ReleaseStrategy for MessageCountReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        group.size() >= self.threshold
    }
}

/// Releases when the number of distinct sequence numbers equals the group's
/// sequence size (taken from the first message).
///
/// With partial sequences enabled it instead releases as soon as the numbers
/// following the last released one form a contiguous run; a sequence then
/// goes out as several results, in order.
///
/// Groups of unsequenced messages never release through this strategy; pair
/// them with the expiry sweep or a count strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceSizeReleaseStrategy {
    release_partial_sequences: bool,
}

impl SequenceSizeReleaseStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partial_sequences() -> Self {
        Self {
            release_partial_sequences: true,
        }
    }
}

impl ReleaseStrategy for SequenceSizeReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        if self.release_partial_sequences {
            return !group.releasable_run().is_empty();
        }
        let size = group.sequence_size() as usize;
        size > 0 && group.distinct_sequence_count() >= size
    }

    fn releases_partial_sequences(&self) -> bool {
        self.release_partial_sequences
    }
}

/// Releases on a complete sequence, on reaching `threshold` messages, or when
/// the group was created more than `timeout` ago. The age check only runs
/// when a message arrives; idle groups still need the expiry sweep.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutCountSequenceSizeReleaseStrategy {
    threshold: usize,
    timeout: Duration,
}

impl TimeoutCountSequenceSizeReleaseStrategy {
    pub fn new(threshold: usize, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
        }
    }
}

impl Default for TimeoutCountSequenceSizeReleaseStrategy {
    fn default() -> Self {
        Self::new(usize::MAX, Duration::minutes(1))
    }
}

impl ReleaseStrategy for TimeoutCountSequenceSizeReleaseStrategy {
    fn can_release(&self, group: &MessageGroup) -> bool {
        if group.is_empty() {
            return false;
        }
        SequenceSizeReleaseStrategy::new().can_release(group)
            || group.size() >= self.threshold
            || Utc::now() - group.created_at() > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageBuilder;

    fn group_with(sequence: &[(u32, u32)]) -> MessageGroup {
        let mut group = MessageGroup::new("ABC".into());
        for (number, size) in sequence {
            group.add(
                MessageBuilder::with_payload(1)
                    .correlation_id("ABC")
                    .sequence(*number, *size)
                    .build(),
            );
        }
        group
    }

    #[test]
    fn test_count_strategy_releases_at_threshold() {
        let strategy = MessageCountReleaseStrategy::new(3);
        let mut group = MessageGroup::new("foo".into());
        for _ in 0..2 {
            group.add(MessageBuilder::with_payload("foo").build());
            assert!(!strategy.can_release(&group));
        }
        group.add(MessageBuilder::with_payload("foo").build());
        assert!(strategy.can_release(&group));
        assert!(strategy.can_release(&group));
        assert_eq!(group.size(), 3);
    }

    #[test]
    fn test_sequence_strategy_any_arrival_order() {
        let strategy = SequenceSizeReleaseStrategy::new();
        assert!(!strategy.can_release(&group_with(&[(3, 3), (1, 3)])));
        assert!(strategy.can_release(&group_with(&[(3, 3), (1, 3), (2, 3)])));
    }

    #[test]
    fn test_sequence_strategy_first_size_is_authoritative() {
        let strategy = SequenceSizeReleaseStrategy::new();
        assert!(strategy.can_release(&group_with(&[(1, 2), (2, 3)])));
        assert!(!strategy.can_release(&group_with(&[(1, 3), (2, 2)])));
    }

    #[test]
    fn test_sequence_strategy_ignores_unsequenced() {
        let mut group = MessageGroup::new("k".into());
        group.add(MessageBuilder::with_payload(1).build());
        assert!(!SequenceSizeReleaseStrategy::new().can_release(&group));
    }

    #[test]
    fn test_predicate_is_idempotent() {
        let group = group_with(&[(1, 2)]);
        let before = group.size();
        for _ in 0..5 {
            assert!(!SequenceSizeReleaseStrategy::new().can_release(&group));
        }
        assert_eq!(group.size(), before);
    }

    #[test]
    fn test_partial_sequence_strategy_needs_next_number() {
        let strategy = SequenceSizeReleaseStrategy::with_partial_sequences();
        assert!(strategy.releases_partial_sequences());
        assert!(!SequenceSizeReleaseStrategy::new().releases_partial_sequences());

        assert!(!strategy.can_release(&group_with(&[(2, 5), (3, 5)])));
        assert!(strategy.can_release(&group_with(&[(2, 5), (1, 5)])));

        let mut unsequenced = MessageGroup::new("k".into());
        unsequenced.add(MessageBuilder::with_payload(1).build());
        assert!(!strategy.can_release(&unsequenced));
    }

    #[test]
    fn test_timeout_count_strategy() {
        let by_count = TimeoutCountSequenceSizeReleaseStrategy::new(2, Duration::hours(1));
        assert!(!by_count.can_release(&group_with(&[(1, 5)])));
        assert!(by_count.can_release(&group_with(&[(1, 5), (2, 5)])));

        let by_age = TimeoutCountSequenceSizeReleaseStrategy::new(100, Duration::seconds(-1));
        assert!(by_age.can_release(&group_with(&[(1, 5)])));
        assert!(!by_age.can_release(&MessageGroup::new("empty".into())));
    }

    #[test]
    fn test_closure_strategy() {
        let strategy = |group: &MessageGroup| group.size() == 1;
        assert!(strategy.can_release(&group_with(&[(1, 3)])));
    }
}
