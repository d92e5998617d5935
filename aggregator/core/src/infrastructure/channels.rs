// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory channel implementations
//!
//! - [`QueueChannel`] buffers messages until a consumer polls them; used as
//!   reply, output and discard destination in embedding code and tests.
//! - [`NullChannel`] accepts and drops everything.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::domain::channel::{DeliveryError, MessageChannel};
use crate::domain::message::Message;

/// Point-to-point buffer with optional capacity
pub struct QueueChannel {
    name: String,
    capacity: Option<usize>,
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    queue: VecDeque<Message>,
    closed: bool,
}

impl QueueChannel {
    /// Unbounded queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: None,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue that rejects sends with `DeliveryError::Full` beyond `capacity`
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let mut channel = Self::new(name);
        channel.capacity = Some(capacity);
        channel
    }

    /// Take the oldest message, waiting up to `timeout` for one to arrive
    pub fn receive(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(message) = state.queue.pop_front() {
                return Some(message);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.queue.pop_front();
            }
        }
    }

    pub fn try_receive(&self) -> Option<Message> {
        self.state.lock().queue.pop_front()
    }

    /// Remove and return everything buffered
    pub fn drain(&self) -> Vec<Message> {
        self.state.lock().queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further sends; buffered messages stay receivable
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: Message) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DeliveryError::Closed(self.name.clone()));
        }
        if let Some(capacity) = self.capacity {
            if state.queue.len() >= capacity {
                return Err(DeliveryError::Full {
                    channel: self.name.clone(),
                    capacity,
                });
            }
        }
        trace!(channel = %self.name, message_id = %message.id(), "Queued message");
        state.queue.push_back(message);
        drop(state);
        self.available.notify_one();
        Ok(())
    }
}

/// Channel that drops every message
#[derive(Debug, Default)]
pub struct NullChannel;

impl MessageChannel for NullChannel {
    fn name(&self) -> &str {
        "nullChannel"
    }

    fn send(&self, message: Message) -> Result<(), DeliveryError> {
        trace!(message_id = %message.id(), "Dropped message on null channel");
        Ok(())
    }
}
