use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::order::{self, Entity as Order, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::coupons::{normalize_code, CouponService};
use crate::services::loyalty::LoyaltyService;
use crate::services::pricing;

pub const DELIVERY_TIME_SLOTS: &[&str] = &["morning", "afternoon"];

fn validate_delivery_time(slot: &str) -> Result<(), validator::ValidationError> {
    if DELIVERY_TIME_SLOTS.contains(&slot) {
        return Ok(());
    }
    let mut err = validator::ValidationError::new("invalid_delivery_time");
    err.message = Some("delivery_time must be morning or afternoon".into());
    Err(err)
}

/// Request to place an order. The price is never taken from the client;
/// it is computed server-side from the catalog price and the coupon.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    pub coupon_code: Option<String>,
    #[validate(length(min = 1, message = "delivery_address must not be empty"))]
    pub delivery_address: String,
    pub delivery_date: NaiveDate,
    #[validate(custom = "validate_delivery_time")]
    pub delivery_time: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "status must not be empty"))]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub original_total: Decimal,
    pub discount_percentage: i32,
    pub coupon_code: Option<String>,
    pub final_total: Decimal,
    pub delivery_address: String,
    pub delivery_date: NaiveDate,
    pub delivery_time: String,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Order counters used by the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub pending_orders: u64,
    pub delivered_orders: u64,
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    coupons: Arc<CouponService>,
    loyalty: Arc<LoyaltyService>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        coupons: Arc<CouponService>,
        loyalty: Arc<LoyaltyService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            coupons,
            loyalty,
            event_sender,
        }
    }

    /// Places an order for a customer. When a coupon code is supplied, the
    /// redeem and the order insert share one transaction: a coupon that
    /// cannot be redeemed rejects the whole order, and an order that fails
    /// to insert releases the consumed use. The order row snapshots the
    /// unit price, coupon code and percentage it was priced with.
    #[instrument(skip(self, request), fields(customer_id = %customer_id, quantity = request.quantity))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let coupon_code = request
            .coupon_code
            .as_deref()
            .map(normalize_code)
            .filter(|code| !code.is_empty());

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let (discount_percentage, applied_code) = match &coupon_code {
            Some(code) => {
                let coupon = self.coupons.redeem_coupon(&txn, code, customer_id).await?;
                (coupon.discount_percentage, Some(coupon.code))
            }
            None => (0, None),
        };

        let breakdown = pricing::quote(request.quantity, discount_percentage)?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            quantity: Set(request.quantity),
            unit_price: Set(pricing::PRICE_PER_BOTTLE),
            original_total: Set(breakdown.original_total),
            discount_percentage: Set(discount_percentage),
            coupon_code: Set(applied_code.clone()),
            final_total: Set(breakdown.final_total),
            delivery_address: Set(request.delivery_address.clone()),
            delivery_date: Set(request.delivery_date),
            delivery_time: Set(request.delivery_time.clone()),
            notes: Set(request.notes.clone()),
            status: Set(OrderStatus::Pending),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!("Failed to insert order: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!("Failed to commit order transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        if let Some(sender) = &self.event_sender {
            if let Some(code) = &applied_code {
                let event = Event::CouponRedeemed {
                    code: code.clone(),
                    customer_id,
                };
                if let Err(e) = sender.send(event).await {
                    warn!("Failed to send coupon redeemed event: {}", e);
                }
            }
            let event = Event::OrderCreated {
                order_id: order.id,
                customer_id,
                coupon_code: applied_code,
            };
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send order created event: {}", e);
            }
        }

        Ok(Self::model_to_response(&order))
    }

    /// Fetches one order. A customer scope hides other customers' orders
    /// behind the same not-found answer as genuinely missing ones.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        customer_scope: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;

        if let Some(customer_id) = customer_scope {
            if order.customer_id != customer_id {
                return Err(ServiceError::NotFound(format!("Order {order_id}")));
            }
        }

        Ok(Self::model_to_response(&order))
    }

    /// Lists orders newest first, optionally scoped to one customer.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_scope: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(customer_id) = customer_scope {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }

        let paginator = query.paginate(self.db_pool.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!("Failed to count orders: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!("Failed to fetch orders page {}: {}", page, e);
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderListResponse {
            orders: orders.iter().map(Self::model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Moves an order through its lifecycle. A transition into `delivered`
    /// hands the customer to the loyalty issuer once the change is
    /// committed; issuer failures are logged and never fail the update.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let new_status = OrderStatus::from_str(status)
            .map_err(|_| ServiceError::InvalidStatus(status.to_string()))?;

        let order = self.find_order(order_id).await?;
        let old_status = order.status;
        let customer_id = order.customer_id;

        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::ConflictError(format!(
                "cannot move order from {old_status} to {new_status}"
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(self.db_pool.as_ref()).await.map_err(|e| {
            error!("Failed to update order {} status: {}", order_id, e);
            ServiceError::DatabaseError(e)
        })?;

        if let Some(sender) = &self.event_sender {
            let event = Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            };
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send order status event: {}", e);
            }
        }

        if new_status == OrderStatus::Delivered {
            if let Err(e) = self.loyalty.maybe_issue_for_delivery(customer_id).await {
                error!("Loyalty issuance failed for customer {}: {}", customer_id, e);
            }
        }

        Ok(Self::model_to_response(&updated))
    }

    /// Removes an order record entirely.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let result = Order::delete_by_id(order_id)
            .exec(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to delete order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {order_id}")));
        }

        Ok(())
    }

    /// Counters for the stats endpoint, optionally scoped to one customer.
    #[instrument(skip(self))]
    pub async fn order_stats(
        &self,
        customer_scope: Option<Uuid>,
    ) -> Result<OrderStats, ServiceError> {
        Ok(OrderStats {
            total_orders: self.count_orders(customer_scope, None).await?,
            pending_orders: self
                .count_orders(customer_scope, Some(OrderStatus::Pending))
                .await?,
            delivered_orders: self
                .count_orders(customer_scope, Some(OrderStatus::Delivered))
                .await?,
        })
    }

    async fn count_orders(
        &self,
        customer_scope: Option<Uuid>,
        status: Option<OrderStatus>,
    ) -> Result<u64, ServiceError> {
        let mut query = Order::find();
        if let Some(customer_id) = customer_scope {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        query.count(self.db_pool.as_ref()).await.map_err(|e| {
            error!("Failed to count orders: {}", e);
            ServiceError::DatabaseError(e)
        })
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to fetch order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id}")))
    }

    fn model_to_response(model: &order::Model) -> OrderResponse {
        OrderResponse {
            id: model.id,
            customer_id: model.customer_id,
            quantity: model.quantity,
            unit_price: model.unit_price,
            original_total: model.original_total,
            discount_percentage: model.discount_percentage,
            coupon_code: model.coupon_code.clone(),
            final_total: model.final_total,
            delivery_address: model.delivery_address.clone(),
            delivery_date: model.delivery_date,
            delivery_time: model.delivery_time.clone(),
            notes: model.notes.clone(),
            status: model.status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn create_request_validation_catches_bad_input() {
        let base = CreateOrderRequest {
            quantity: 2,
            coupon_code: None,
            delivery_address: "Av. Siempre Viva 742".to_string(),
            delivery_date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            delivery_time: "morning".to_string(),
            notes: None,
        };
        assert!(base.validate().is_ok());

        let mut zero_quantity = base.clone();
        zero_quantity.quantity = 0;
        assert!(zero_quantity.validate().is_err());

        let mut empty_address = base.clone();
        empty_address.delivery_address = String::new();
        assert!(empty_address.validate().is_err());

        let mut bad_slot = base.clone();
        bad_slot.delivery_time = "midnight".to_string();
        assert!(bad_slot.validate().is_err());

        let mut afternoon = base;
        afternoon.delivery_time = "afternoon".to_string();
        assert!(afternoon.validate().is_ok());
    }

    #[test]
    fn unknown_status_strings_do_not_parse() {
        assert!(OrderStatus::from_str("in_transit").is_ok());
        assert!(OrderStatus::from_str("shipped").is_err());
        assert!(OrderStatus::from_str("In_Transit").is_err());
    }

    #[test]
    fn model_to_response_copies_every_snapshot_field() {
        let model = order::Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            quantity: 3,
            unit_price: dec!(50.00),
            original_total: dec!(150.00),
            discount_percentage: 20,
            coupon_code: Some("VERANO2024".to_string()),
            final_total: dec!(120.00),
            delivery_address: "Av. Siempre Viva 742".to_string(),
            delivery_date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            delivery_time: "morning".to_string(),
            notes: Some("ring twice".to_string()),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: None,
        };

        let response = OrderService::model_to_response(&model);

        assert_eq!(response.id, model.id);
        assert_eq!(response.customer_id, model.customer_id);
        assert_eq!(response.quantity, 3);
        assert_eq!(response.unit_price, dec!(50.00));
        assert_eq!(response.original_total, dec!(150.00));
        assert_eq!(response.discount_percentage, 20);
        assert_eq!(response.coupon_code.as_deref(), Some("VERANO2024"));
        assert_eq!(response.final_total, dec!(120.00));
        assert_eq!(response.status, OrderStatus::Pending);
    }
}
