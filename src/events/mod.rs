use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::CancelReason;

/// Domain events emitted by the order lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
    },
    OrderPaid {
        order_id: Uuid,
        payment_id: String,
    },
    OrderFailed {
        order_id: Uuid,
        reason: CancelReason,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: CancelReason,
    },
    OrdersExpired {
        count: u64,
    },
    RefundInitiated {
        order_id: Uuid,
    },
    OrderRefunded {
        order_id: Uuid,
        refund_id: String,
    },
    RefundFailed {
        order_id: Uuid,
        error: String,
    },
    /// Captured money could not be returned automatically.
    ManualReviewRequired {
        order_id: Uuid,
        payment_id: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender and its receiving end with the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without failing the caller; a closed or full channel is logged.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ManualReviewRequired {
                order_id,
                payment_id,
                reason,
            } => {
                error!(
                    alert = true,
                    order_id = %order_id,
                    payment_id = payment_id.as_deref().unwrap_or(""),
                    reason = %reason,
                    "order requires manual review"
                );
            }
            Event::RefundFailed { order_id, error } => {
                warn!(order_id = %order_id, error = %error, "refund failed");
            }
            other => info!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
