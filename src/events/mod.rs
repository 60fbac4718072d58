use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Channel-backed publisher handed to every service.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Account events
    CustomerRegistered(Uuid),

    // Order events
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        coupon_code: Option<String>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Coupon events
    CouponCreated(String),
    CouponStatusChanged {
        code: String,
        is_active: bool,
    },
    CouponDeleted(String),
    CouponRedeemed {
        code: String,
        customer_id: Uuid,
    },
    LoyaltyCouponIssued {
        customer_id: Uuid,
        code: String,
        milestone: i32,
    },
}

/// Drains the event channel and logs each event. Runs until every
/// `EventSender` clone has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CustomerRegistered(customer_id) => {
                info!(%customer_id, "customer registered");
            }
            Event::OrderCreated {
                order_id,
                customer_id,
                coupon_code,
            } => {
                info!(%order_id, %customer_id, coupon = ?coupon_code, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::CouponCreated(code) => {
                info!(%code, "coupon created");
            }
            Event::CouponStatusChanged { code, is_active } => {
                info!(%code, is_active, "coupon status changed");
            }
            Event::CouponDeleted(code) => {
                info!(%code, "coupon deleted");
            }
            Event::CouponRedeemed { code, customer_id } => {
                info!(%code, %customer_id, "coupon redeemed");
            }
            Event::LoyaltyCouponIssued {
                customer_id,
                code,
                milestone,
            } => {
                info!(%customer_id, %code, milestone, "loyalty coupon issued");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::CouponCreated("VERANO2024".into()))
            .await
            .unwrap();

        match rx.recv().await {
            Some(Event::CouponCreated(code)) => assert_eq!(code, "VERANO2024"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn processing_stops_when_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let worker = tokio::spawn(process_events(rx));

        sender
            .send(Event::CustomerRegistered(Uuid::new_v4()))
            .await
            .unwrap();
        drop(sender);

        worker.await.expect("event loop exits cleanly");
    }
}
