//! Engine-emitted events for display collaborators.
//!
//! Events are pushed through a broadcast channel: at-least-once for live
//! subscribers, ordered per round as emitted. A lagging subscriber loses the
//! oldest events rather than blocking the engine.

use crate::ledger::Amount;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything the outside world can observe about round progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    RoundCreated {
        id: Uuid,
        channel: String,
        client_seed: String,
    },
    CountdownTick {
        id: Uuid,
        remaining: u32,
    },
    RoundStarted {
        id: Uuid,
        /// Present only when the engine is configured to reveal the crash
        /// point at start.
        #[serde(skip_serializing_if = "Option::is_none")]
        crash_centi: Option<u64>,
    },
    MultiplierTick {
        id: Uuid,
        multiplier_centi: u64,
    },
    RoundCrashed {
        id: Uuid,
        crash_centi: u64,
    },
    BetPlaced {
        id: Uuid,
        user: String,
        amount: Amount,
        total_bet: Amount,
    },
    CashedOut {
        id: Uuid,
        user: String,
        multiplier_centi: u64,
        payout: Amount,
    },
    BalanceChanged {
        user: String,
        balance: Amount,
    },
}

/// Broadcast fan-out for [`GameEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Having none is not an error.
    pub fn publish(&self, event: GameEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.publish(GameEvent::MultiplierTick {
            id,
            multiplier_centi: 105,
        });
        bus.publish(GameEvent::RoundCrashed {
            id,
            crash_centi: 110,
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            GameEvent::MultiplierTick { multiplier_centi: 105, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            GameEvent::RoundCrashed { crash_centi: 110, .. }
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(4);
        bus.publish(GameEvent::BalanceChanged {
            user: "alice".to_string(),
            balance: 0,
        });
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = GameEvent::BetPlaced {
            id: Uuid::nil(),
            user: "bob".to_string(),
            amount: 500,
            total_bet: 500,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bet_placed");
        assert_eq!(json["amount"], 500);
    }
}
