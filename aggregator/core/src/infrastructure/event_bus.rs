// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Aggregator Events
//
// In-memory fan-out of `AggregatorEvent`s using a tokio broadcast channel.
// Publishing never blocks and never fails: with no subscribers the event is
// dropped, slow subscribers observe `EventBusError::Lagged`.
//
// Events are not persisted; an observer that subscribes late misses earlier ones.

use crate::domain::events::AggregatorEvent;
use crate::domain::message::CorrelationKey;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to aggregator events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AggregatorEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: AggregatorEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all aggregator events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single correlation key
    pub fn subscribe_group(&self, correlation_key: CorrelationKey) -> GroupEventReceiver {
        GroupEventReceiver {
            receiver: self.sender.subscribe(),
            correlation_key,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

fn map_try_recv_error(e: broadcast::error::TryRecvError) -> EventBusError {
    match e {
        broadcast::error::TryRecvError::Empty => EventBusError::Empty,
        broadcast::error::TryRecvError::Closed => EventBusError::Closed,
        broadcast::error::TryRecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all aggregator events
pub struct EventReceiver {
    receiver: broadcast::Receiver<AggregatorEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        self.receiver.try_recv().map_err(map_try_recv_error)
    }

    /// Everything currently buffered, oldest first
    pub fn drain(&mut self) -> Vec<AggregatorEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }
}

/// Receiver for the events of one correlation key (filtered)
pub struct GroupEventReceiver {
    receiver: broadcast::Receiver<AggregatorEvent>,
    correlation_key: CorrelationKey,
}

impl GroupEventReceiver {
    /// Receive the next event for the subscribed correlation key
    /// Filters out events of other groups
    pub async fn recv(&mut self) -> Result<AggregatorEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.correlation_key() == &self.correlation_key {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn expired(key: &str) -> AggregatorEvent {
        AggregatorEvent::GroupExpired {
            source: "test".to_string(),
            correlation_key: key.into(),
            message_count: 1,
            discarded: true,
            expired_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(expired("ABC"));

        match receiver.recv().await.unwrap() {
            AggregatorEvent::GroupExpired { correlation_key, discarded, .. } => {
                assert_eq!(correlation_key, CorrelationKey::from("ABC"));
                assert!(discarded);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_group_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_group("XYZ".into());

        event_bus.publish(expired("ABC"));
        event_bus.publish(expired("XYZ"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.correlation_key(), &CorrelationKey::from("XYZ"));
    }

    #[test]
    fn test_multiple_subscribers_and_drain() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(expired("a"));
        event_bus.publish(expired("b"));

        assert_eq!(receiver1.drain().len(), 2);
        assert!(receiver2.try_recv().is_ok());
        assert!(receiver2.try_recv().is_ok());
        assert!(matches!(receiver2.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(expired("nobody"));
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
