// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory fan-out over a tokio broadcast channel. Recovery transitions,
// health changes and checkpoint operations are published here; operators,
// the CLI and tests subscribe. Slow subscribers lag and lose the oldest
// events rather than stalling the coordinator.

use crate::domain::error_report::ErrorId;
use crate::domain::events::{CheckpointEvent, HealthEvent, RecoveryEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Recovery(RecoveryEvent),
    Health(HealthEvent),
    Checkpoint(CheckpointEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_recovery_event(&self, event: RecoveryEvent) {
        self.publish(DomainEvent::Recovery(event));
    }

    pub fn publish_health_event(&self, event: HealthEvent) {
        self.publish(DomainEvent::Health(event));
    }

    pub fn publish_checkpoint_event(&self, event: CheckpointEvent) {
        self.publish(DomainEvent::Checkpoint(event));
    }

    fn publish(&self, event: DomainEvent) {
        // send() only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Subscribe to the recovery events of a single error report
    pub fn subscribe_error(&self, error_id: ErrorId) -> RecoveryEventReceiver {
        let receiver = self.sender.subscribe();
        RecoveryEventReceiver { receiver, error_id }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one report's recovery events (filtered)
pub struct RecoveryEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    error_id: ErrorId,
}

impl RecoveryEventReceiver {
    /// Receive the next recovery event for the subscribed report, skipping
    /// everything else
    pub async fn recv(&mut self) -> Result<RecoveryEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Recovery(recovery) = event {
                if recovery.error_id() == &self.error_id {
                    return Ok(recovery);
                }
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

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::error_report::{ErrorCategory, Severity};
    use chrono::Utc;

    fn received(error_id: &ErrorId) -> RecoveryEvent {
        RecoveryEvent::ErrorReceived {
            error_id: error_id.clone(),
            agent_id: AgentId::new("runtime-1"),
            category: ErrorCategory::Runtime,
            severity: Severity::Error,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let error_id = ErrorId::new();

        event_bus.publish_recovery_event(received(&error_id));

        match receiver.recv().await.unwrap() {
            DomainEvent::Recovery(RecoveryEvent::ErrorReceived { error_id: id, .. }) => {
                assert_eq!(id, error_id);
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_event_filtering() {
        let event_bus = EventBus::new(10);
        let error_id = ErrorId::new();
        let mut receiver = event_bus.subscribe_error(error_id.clone());

        event_bus.publish_recovery_event(received(&ErrorId::new()));
        event_bus.publish_checkpoint_event(CheckpointEvent::CheckpointEvicted {
            key: "k".to_string(),
            evicted_at: Utc::now(),
        });
        event_bus.publish_recovery_event(received(&error_id));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.error_id(), &error_id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_recovery_event(received(&ErrorId::new()));

        assert!(receiver1.recv().await.is_ok());
        assert!(receiver2.recv().await.is_ok());
    }

    #[test]
    fn test_lagging_receiver_reports_dropped_events() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for _ in 0..5 {
            event_bus.publish_recovery_event(received(&ErrorId::new()));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_empty_receiver() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }
}
