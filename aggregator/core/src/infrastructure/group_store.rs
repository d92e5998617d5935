// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Message Group Store
//!
//! Concurrent map of correlation key → [`MessageGroup`] with one exclusive
//! lock per live group. Unrelated keys never contend: the map itself is a
//! sharded `DashMap` and each group sits behind its own `parking_lot::Mutex`,
//! created with the group and dropped with it.
//!
//! ## Locking discipline
//!
//! - A group lock may be held while touching the map (removal on disposal).
//! - A map shard lock is never held while waiting on a group lock: lookups
//!   clone the group cell out of the map before locking it.
//! - A cell that was disposed while a caller waited for its lock is flagged;
//!   the caller retries the lookup and lands on the replacement group.
//!
//! Hence at most one live group per key, and removal/lookup of a key is
//! serialized with append and processing for that key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::domain::group::MessageGroup;
use crate::domain::message::{CorrelationKey, Message, MessageId};

struct GroupSlot {
    group: MessageGroup,
    disposed: bool,
}

type GroupCell = Arc<Mutex<GroupSlot>>;

#[derive(Default)]
pub struct InMemoryMessageGroupStore {
    groups: DashMap<CorrelationKey, GroupCell>,
}

impl InMemoryMessageGroupStore {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Lock the group for `key`, creating an empty one if none is live.
    ///
    /// Blocks while another thread holds the same key.
    pub fn lock_or_create(&self, key: &CorrelationKey) -> LockedGroup<'_> {
        loop {
            let cell = self
                .groups
                .entry(key.clone())
                .or_insert_with(|| {
                    trace!(correlation_key = %key, "Creating message group");
                    Arc::new(Mutex::new(GroupSlot {
                        group: MessageGroup::new(key.clone()),
                        disposed: false,
                    }))
                })
                .value()
                .clone();

            if let Some(locked) = self.lock_cell(cell) {
                return locked;
            }
        }
    }

    /// Lock the live group for `key`, if any.
    pub fn lock(&self, key: &CorrelationKey) -> Option<LockedGroup<'_>> {
        loop {
            let cell = self.groups.get(key)?.value().clone();
            if let Some(locked) = self.lock_cell(cell) {
                return Some(locked);
            }
        }
    }

    fn lock_cell(&self, cell: GroupCell) -> Option<LockedGroup<'_>> {
        let guard = cell.lock_arc();
        if guard.disposed {
            return None;
        }
        Some(LockedGroup { store: self, guard })
    }

    /// Lock, one at a time, every live group last modified before `cutoff`
    /// and hand it to `visit`. Stops at the first error.
    ///
    /// Returns how many groups were visited.
    pub fn for_each_older_than<E>(
        &self,
        cutoff: DateTime<Utc>,
        mut visit: impl FnMut(LockedGroup<'_>) -> Result<(), E>,
    ) -> Result<usize, E> {
        let cells: Vec<GroupCell> = self.groups.iter().map(|e| e.value().clone()).collect();
        let mut visited = 0;
        for cell in cells {
            let Some(locked) = self.lock_cell(cell) else {
                continue;
            };
            if locked.group().last_modified() >= cutoff {
                continue;
            }
            visited += 1;
            visit(locked)?;
        }
        Ok(visited)
    }

    /// Snapshot of the live group for `key`
    pub fn message_group(&self, key: &CorrelationKey) -> Option<MessageGroup> {
        self.lock(key).map(|locked| locked.group().clone())
    }

    /// Force removal of the group for `key`, returning the messages it held.
    pub fn remove_message_group(&self, key: &CorrelationKey) -> Option<Vec<Message>> {
        let locked = self.lock(key)?;
        let messages = locked.group().messages().to_vec();
        locked.remove();
        Some(messages)
    }

    /// Number of live groups (including retained complete/expired ones)
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Total number of messages held across all groups
    pub fn message_count(&self) -> usize {
        let cells: Vec<GroupCell> = self.groups.iter().map(|e| e.value().clone()).collect();
        cells
            .into_iter()
            .filter_map(|cell| self.lock_cell(cell))
            .map(|locked| locked.group().size())
            .sum()
    }

    fn detach(&self, key: &CorrelationKey, cell: &GroupCell) {
        self.groups.remove_if(key, |_, live| Arc::ptr_eq(live, cell));
    }
}

/// Exclusive access to one live group. Dropping it releases the lock.
pub struct LockedGroup<'a> {
    store: &'a InMemoryMessageGroupStore,
    guard: ArcMutexGuard<RawMutex, GroupSlot>,
}

impl LockedGroup<'_> {
    pub fn group(&self) -> &MessageGroup {
        &self.guard.group
    }

    pub fn correlation_key(&self) -> &CorrelationKey {
        self.guard.group.correlation_key()
    }

    pub fn add(&mut self, message: Message) {
        self.guard.group.add(message);
    }

    /// Take one message out, leaving the group's age unchanged
    pub fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        self.guard.group.remove_message(id)
    }

    /// Drop the messages of a partial sequence release, up to `sequence_number`
    pub fn remove_released(&mut self, sequence_number: u32) {
        self.guard.group.remove_released(sequence_number);
    }

    /// Dispose of the group: it leaves the map and any thread waiting for its
    /// lock moves on to a fresh group.
    pub fn remove(mut self) {
        self.guard.disposed = true;
        let cell = ArcMutexGuard::mutex(&self.guard).clone();
        let key = self.guard.group.correlation_key().clone();
        self.store.detach(&key, &cell);
        debug!(correlation_key = %key, "Removed message group");
    }

    /// Keep the group in the store, emptied and closed for further messages
    pub fn mark_complete(mut self) {
        self.guard.group.mark_complete();
    }

    /// Keep the group in the store, emptied and flagged as timed out
    pub fn mark_expired(mut self) {
        self.guard.group.mark_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageBuilder;
    use chrono::Duration;
    use std::sync::Barrier;

    fn message(key: &str, payload: i64) -> Message {
        MessageBuilder::with_payload(payload).correlation_id(key).build()
    }

    #[test]
    fn test_lock_or_create_reuses_live_group() {
        let store = InMemoryMessageGroupStore::new();
        let key = CorrelationKey::from("ABC");

        store.lock_or_create(&key).add(message("ABC", 1));
        store.lock_or_create(&key).add(message("ABC", 2));

        assert_eq!(store.group_count(), 1);
        assert_eq!(store.message_group(&key).unwrap().size(), 2);
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_remove_then_recreate_is_fresh() {
        let store = InMemoryMessageGroupStore::new();
        let key = CorrelationKey::from("ABC");

        let mut locked = store.lock_or_create(&key);
        locked.add(message("ABC", 1));
        locked.remove();
        assert!(store.message_group(&key).is_none());
        assert_eq!(store.group_count(), 0);

        let fresh = store.lock_or_create(&key);
        assert!(fresh.group().is_empty());
    }

    #[test]
    fn test_retained_groups_stay_but_empty() {
        let store = InMemoryMessageGroupStore::new();
        let key = CorrelationKey::from("k");
        let mut locked = store.lock_or_create(&key);
        locked.add(message("k", 1));
        locked.mark_complete();

        let group = store.message_group(&key).unwrap();
        assert!(group.is_complete());
        assert_eq!(group.size(), 0);
    }

    #[test]
    fn test_force_remove_returns_messages() {
        let store = InMemoryMessageGroupStore::new();
        let key = CorrelationKey::from("k");
        store.lock_or_create(&key).add(message("k", 1));

        let removed = store.remove_message_group(&key).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(store.remove_message_group(&key).is_none());
    }

    #[test]
    fn test_for_each_older_than_filters_by_last_modified() {
        let store = InMemoryMessageGroupStore::new();
        let stale = CorrelationKey::from("stale");
        let recent = CorrelationKey::from("recent");

        {
            let mut locked = store.lock_or_create(&stale);
            locked.add(message("stale", 1));
            locked.guard.group.set_last_modified(Utc::now() - Duration::minutes(10));
        }
        store.lock_or_create(&recent).add(message("recent", 2));

        let mut seen = Vec::new();
        let visited = store
            .for_each_older_than(Utc::now() - Duration::minutes(1), |locked| {
                seen.push(locked.correlation_key().clone());
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(visited, 1);
        assert_eq!(seen, vec![stale]);
    }

    #[test]
    fn test_for_each_may_remove_while_visiting() {
        let store = InMemoryMessageGroupStore::new();
        for key in ["a", "b", "c"] {
            store.lock_or_create(&CorrelationKey::from(key)).add(message(key, 1));
        }

        let visited = store
            .for_each_older_than(Utc::now() + Duration::seconds(10), |locked| {
                locked.remove();
                Ok::<_, ()>(())
            })
            .unwrap();

        assert_eq!(visited, 3);
        assert_eq!(store.group_count(), 0);
    }

    #[test]
    fn test_waiter_moves_to_fresh_group_after_removal() {
        let store = Arc::new(InMemoryMessageGroupStore::new());
        let key = CorrelationKey::from("race");
        let barrier = Arc::new(Barrier::new(2));

        let mut locked = store.lock_or_create(&key);
        locked.add(message("race", 1));

        let waiter = {
            let store = store.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let mut locked = store.lock_or_create(&key);
                let was_empty = locked.group().is_empty();
                locked.add(message("race", 2));
                was_empty
            })
        };

        barrier.wait();
        std::thread::sleep(std::time::Duration::from_millis(20));
        locked.remove();

        assert!(waiter.join().unwrap());
        assert_eq!(store.message_group(&key).unwrap().size(), 1);
    }
}
