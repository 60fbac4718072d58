//! Loyalty coupon issuance. Every fifth delivered order earns the
//! customer a personal single-use discount coupon.

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::coupon;
use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::CouponService;

pub const LOYALTY_DISCOUNT: i32 = 20;
pub const LOYALTY_VALIDITY_DAYS: i64 = 30;
pub const LOYALTY_MILESTONE_INTERVAL: u64 = 5;

const LOYALTY_CODE_PREFIX: &str = "LEALTAD";
const LOYALTY_CODE_SUFFIX_LEN: usize = 6;
const LOYALTY_CODE_ATTEMPTS: u32 = 3;

/// The milestone a delivery count lands on, if it lands on one.
fn milestone_for(delivered_count: u64) -> Option<i32> {
    if delivered_count == 0 || delivered_count % LOYALTY_MILESTONE_INTERVAL != 0 {
        return None;
    }
    i32::try_from(delivered_count).ok()
}

fn generate_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LOYALTY_CODE_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();
    format!("{LOYALTY_CODE_PREFIX}{suffix}")
}

#[derive(Clone)]
pub struct LoyaltyService {
    db_pool: Arc<DbPool>,
    coupons: Arc<CouponService>,
    event_sender: Option<Arc<EventSender>>,
}

impl LoyaltyService {
    pub fn new(
        db_pool: Arc<DbPool>,
        coupons: Arc<CouponService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            coupons,
            event_sender,
        }
    }

    /// Called after an order is marked delivered. Recounts the customer's
    /// delivered orders from the orders table and mints the milestone
    /// coupon when the count lands on a multiple of five.
    ///
    /// Issuance is idempotent: a coupon already recorded for this
    /// (customer, milestone) pair, whether found by the probe or surfaced
    /// as a unique violation from a concurrent duplicate event, is a
    /// quiet no-op. Returns the freshly minted coupon, if any.
    #[instrument(skip(self))]
    pub async fn maybe_issue_for_delivery(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let delivered_count = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .count(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!(
                    "Failed to count delivered orders for {}: {}",
                    customer_id, e
                );
                ServiceError::DatabaseError(e)
            })?;

        let Some(milestone) = milestone_for(delivered_count) else {
            return Ok(None);
        };

        if self
            .coupons
            .find_loyalty_coupon(customer_id, milestone)
            .await?
            .is_some()
        {
            debug!(%customer_id, milestone, "loyalty coupon already issued");
            return Ok(None);
        }

        let expiry_date = Utc::now() + Duration::days(LOYALTY_VALIDITY_DAYS);

        for _ in 0..LOYALTY_CODE_ATTEMPTS {
            let code = generate_code();
            match self
                .coupons
                .create_personal_coupon(
                    code.clone(),
                    LOYALTY_DISCOUNT,
                    expiry_date,
                    1,
                    customer_id,
                    milestone,
                )
                .await
            {
                Ok(minted) => {
                    info!(%customer_id, milestone, code = %minted.code, "loyalty coupon issued");
                    if let Some(sender) = &self.event_sender {
                        let event = Event::LoyaltyCouponIssued {
                            customer_id,
                            code: minted.code.clone(),
                            milestone,
                        };
                        if let Err(e) = sender.send(event).await {
                            warn!("Failed to send loyalty issued event: {}", e);
                        }
                    }
                    return Ok(Some(minted));
                }
                Err(ServiceError::ConflictError(_)) => {
                    // Either a concurrent duplicate event won the milestone,
                    // or the random code collided with an existing coupon.
                    if self
                        .coupons
                        .find_loyalty_coupon(customer_id, milestone)
                        .await?
                        .is_some()
                    {
                        debug!(%customer_id, milestone, "loyalty coupon issued concurrently");
                        return Ok(None);
                    }
                    debug!(%code, "loyalty code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::InternalError(
            "could not generate a unique loyalty code".to_string(),
        ))
    }
}
