use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::coupon::{self, Entity as Coupon};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{3,32}$").expect("hardcoded pattern"));

/// Request to create a public coupon.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateCouponRequest {
    #[validate(regex(
        path = "CODE_PATTERN",
        message = "code must be 3-32 letters or digits"
    ))]
    pub code: String,
    #[validate(range(
        min = 1,
        max = 100,
        message = "discount_percentage must be between 1 and 100"
    ))]
    pub discount_percentage: i32,
    pub expiry_date: NaiveDate,
    #[validate(range(min = 1, message = "max_uses must be at least 1"))]
    pub max_uses: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponResponse {
    pub code: String,
    pub discount_percentage: i32,
    pub expiry_date: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub remaining_uses: Option<i32>,
    pub is_active: bool,
    pub owner_customer_id: Option<Uuid>,
    pub milestone: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponListResponse {
    pub coupons: Vec<CouponResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Result of checking a coupon against a customer. Always a value, never
/// an error: an unusable coupon is an answer, not a failure.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub discount_percentage: i32,
    pub message: String,
}

impl ValidationOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            discount_percentage: 0,
            message: message.into(),
        }
    }

    fn accepted(discount_percentage: i32) -> Self {
        Self {
            valid: true,
            discount_percentage,
            message: format!("coupon applied: {discount_percentage}% off"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectionReason {
    Inactive,
    Expired,
    UsageLimitReached,
    NotYourCoupon,
}

impl RejectionReason {
    fn message(self) -> &'static str {
        match self {
            RejectionReason::Inactive => "coupon inactive",
            RejectionReason::Expired => "coupon expired",
            RejectionReason::UsageLimitReached => "usage limit reached",
            RejectionReason::NotYourCoupon => "not your coupon",
        }
    }
}

/// The single ordered rejection chain. Validation messages and redeem
/// failures both come from here so the two paths can never disagree.
fn rejection_for(
    coupon: &coupon::Model,
    customer_id: Uuid,
    now: DateTime<Utc>,
) -> Option<RejectionReason> {
    if !coupon.is_active {
        return Some(RejectionReason::Inactive);
    }
    if coupon.is_expired(now) {
        return Some(RejectionReason::Expired);
    }
    if coupon.is_exhausted() {
        return Some(RejectionReason::UsageLimitReached);
    }
    match coupon.owner_customer_id {
        Some(owner) if owner != customer_id => Some(RejectionReason::NotYourCoupon),
        _ => None,
    }
}

/// Codes are stored and compared in trimmed uppercase form.
pub(crate) fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A date-only expiry means the coupon works for the whole of that day.
pub(crate) fn end_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    // 23:59:59 exists on every calendar day, so the fallback never fires.
    let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Utc.from_utc_datetime(&date.and_time(time))
}

#[derive(Clone)]
pub struct CouponService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl CouponService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a public coupon. Duplicate codes surface as a conflict via
    /// the unique-violation error, not a racy pre-read.
    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_coupon(
        &self,
        request: CreateCouponRequest,
    ) -> Result<CouponResponse, ServiceError> {
        let mut request = request;
        request.code = normalize_code(&request.code);
        request.validate()?;

        let expiry_date = end_of_day_utc(request.expiry_date);
        if expiry_date <= Utc::now() {
            return Err(ServiceError::ValidationError(
                "expiry_date must be in the future".to_string(),
            ));
        }

        let code = request.code.clone();
        let active = coupon::ActiveModel {
            code: Set(code.clone()),
            discount_percentage: Set(request.discount_percentage),
            expiry_date: Set(expiry_date),
            max_uses: Set(request.max_uses),
            current_uses: Set(0),
            is_active: Set(true),
            owner_customer_id: Set(None),
            milestone: Set(None),
            created_at: Set(Utc::now()),
        };

        let coupon = active.insert(self.db_pool.as_ref()).await.map_err(|e| {
            match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    ServiceError::ConflictError(format!("coupon code {code} already exists"))
                }
                _ => {
                    error!("Failed to create coupon {}: {}", code, e);
                    ServiceError::DatabaseError(e)
                }
            }
        })?;

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::CouponCreated(coupon.code.clone())).await {
                warn!("Failed to send coupon created event: {}", e);
            }
        }

        Ok(Self::model_to_response(&coupon))
    }

    /// Inserts a customer-owned coupon with a usage cap and milestone tag.
    /// Conflicts (code collision or an already-issued milestone) surface as
    /// `ConflictError` for the caller to disambiguate.
    pub(crate) async fn create_personal_coupon(
        &self,
        code: String,
        discount_percentage: i32,
        expiry_date: DateTime<Utc>,
        max_uses: i32,
        owner_customer_id: Uuid,
        milestone: i32,
    ) -> Result<coupon::Model, ServiceError> {
        let active = coupon::ActiveModel {
            code: Set(code.clone()),
            discount_percentage: Set(discount_percentage),
            expiry_date: Set(expiry_date),
            max_uses: Set(Some(max_uses)),
            current_uses: Set(0),
            is_active: Set(true),
            owner_customer_id: Set(Some(owner_customer_id)),
            milestone: Set(Some(milestone)),
            created_at: Set(Utc::now()),
        };

        active.insert(self.db_pool.as_ref()).await.map_err(|e| {
            match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::ConflictError(
                    format!("coupon {code} conflicts with an existing record"),
                ),
                _ => {
                    error!("Failed to create personal coupon {}: {}", code, e);
                    ServiceError::DatabaseError(e)
                }
            }
        })
    }

    /// Unfiltered listing for administrators, newest first.
    #[instrument(skip(self))]
    pub async fn list_coupons(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<CouponListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = Coupon::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(self.db_pool.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!("Failed to count coupons: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let coupons = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!("Failed to fetch coupons page {}: {}", page, e);
            ServiceError::DatabaseError(e)
        })?;

        Ok(CouponListResponse {
            coupons: coupons.iter().map(Self::model_to_response).collect(),
            total,
            page,
            per_page,
        })
    }

    /// Coupons the given customer could redeem right now: public ones plus
    /// their own, active, unexpired, with capacity left. Soonest expiry
    /// first.
    #[instrument(skip(self))]
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<CouponResponse>, ServiceError> {
        let now = Utc::now();

        let coupons = Coupon::find()
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::ExpiryDate.gt(now))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(
                        Expr::col(coupon::Column::CurrentUses)
                            .lt(Expr::col(coupon::Column::MaxUses)),
                    ),
            )
            .filter(
                Condition::any()
                    .add(coupon::Column::OwnerCustomerId.is_null())
                    .add(coupon::Column::OwnerCustomerId.eq(customer_id)),
            )
            .order_by_asc(coupon::Column::ExpiryDate)
            .all(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to list coupons for customer {}: {}", customer_id, e);
                ServiceError::DatabaseError(e)
            })?;

        Ok(coupons.iter().map(Self::model_to_response).collect())
    }

    /// Activates or deactivates a coupon without deleting its record.
    #[instrument(skip(self))]
    pub async fn set_coupon_status(
        &self,
        code: &str,
        is_active: bool,
    ) -> Result<CouponResponse, ServiceError> {
        let code = normalize_code(code);
        let coupon = self
            .find_by_code(&code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {code}")))?;

        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(is_active);

        let updated = active.update(self.db_pool.as_ref()).await.map_err(|e| {
            error!("Failed to update coupon {}: {}", code, e);
            ServiceError::DatabaseError(e)
        })?;

        if let Some(sender) = &self.event_sender {
            let event = Event::CouponStatusChanged {
                code: updated.code.clone(),
                is_active,
            };
            if let Err(e) = sender.send(event).await {
                warn!("Failed to send coupon status event: {}", e);
            }
        }

        Ok(Self::model_to_response(&updated))
    }

    /// Removes a coupon permanently. Orders keep their snapshots.
    #[instrument(skip(self))]
    pub async fn delete_coupon(&self, code: &str) -> Result<(), ServiceError> {
        let code = normalize_code(code);

        let result = Coupon::delete_by_id(code.clone())
            .exec(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to delete coupon {}: {}", code, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {code}")));
        }

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::CouponDeleted(code.clone())).await {
                warn!("Failed to send coupon deleted event: {}", e);
            }
        }

        Ok(())
    }

    /// Read-only check of a coupon for a customer. Never touches
    /// `current_uses`; unusable coupons come back as a rejected outcome
    /// with the reason message, not as an error.
    #[instrument(skip(self), fields(code = %code, customer_id = %customer_id))]
    pub async fn validate_coupon(
        &self,
        code: &str,
        customer_id: Uuid,
    ) -> Result<ValidationOutcome, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(ValidationOutcome::rejected("coupon not found or invalid"));
        }

        let Some(coupon) = self.find_by_code(&code).await? else {
            return Ok(ValidationOutcome::rejected("coupon not found or invalid"));
        };

        Ok(match rejection_for(&coupon, customer_id, Utc::now()) {
            Some(reason) => ValidationOutcome::rejected(reason.message()),
            None => ValidationOutcome::accepted(coupon.discount_percentage),
        })
    }

    /// Consumes one use of a coupon in a single conditional UPDATE carrying
    /// the full redeemability guard, so concurrent redemptions can never
    /// push `current_uses` past the cap. Runs on the caller's connection,
    /// which is a transaction when an order insert rides on the result.
    ///
    /// When no row matches, the coupon is re-read to say why: unknown code,
    /// someone else's coupon, or no capacity left at increment time.
    pub async fn redeem_coupon<C>(
        &self,
        conn: &C,
        code: &str,
        customer_id: Uuid,
    ) -> Result<coupon::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        let code = normalize_code(code);
        let now = Utc::now();

        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::CurrentUses,
                Expr::col(coupon::Column::CurrentUses).add(1),
            )
            .filter(coupon::Column::Code.eq(code.clone()))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::ExpiryDate.gt(now))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(
                        Expr::col(coupon::Column::CurrentUses)
                            .lt(Expr::col(coupon::Column::MaxUses)),
                    ),
            )
            .filter(
                Condition::any()
                    .add(coupon::Column::OwnerCustomerId.is_null())
                    .add(coupon::Column::OwnerCustomerId.eq(customer_id)),
            )
            .exec(conn)
            .await
            .map_err(|e| {
                error!("Failed to redeem coupon {}: {}", code, e);
                ServiceError::DatabaseError(e)
            })?;

        let fetched = Coupon::find_by_id(code.clone())
            .one(conn)
            .await
            .map_err(|e| {
                error!("Failed to re-read coupon {}: {}", code, e);
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            let Some(coupon) = fetched else {
                return Err(ServiceError::NotFound(format!("Coupon {code}")));
            };
            return Err(match rejection_for(&coupon, customer_id, now) {
                Some(RejectionReason::NotYourCoupon) => {
                    ServiceError::Forbidden("not your coupon".to_string())
                }
                Some(reason) => ServiceError::ConflictError(reason.message().to_string()),
                None => ServiceError::ConflictError("coupon could not be redeemed".to_string()),
            });
        }

        fetched.ok_or_else(|| ServiceError::NotFound(format!("Coupon {code}")))
    }

    /// Existence probe for an issued loyalty coupon.
    pub async fn find_loyalty_coupon(
        &self,
        customer_id: Uuid,
        milestone: i32,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Coupon::find()
            .filter(coupon::Column::OwnerCustomerId.eq(customer_id))
            .filter(coupon::Column::Milestone.eq(milestone))
            .one(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!(
                    "Failed to look up loyalty coupon for {} milestone {}: {}",
                    customer_id, milestone, e
                );
                ServiceError::DatabaseError(e)
            })
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        Coupon::find_by_id(code.to_string())
            .one(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to fetch coupon {}: {}", code, e);
                ServiceError::DatabaseError(e)
            })
    }

    pub(crate) fn model_to_response(model: &coupon::Model) -> CouponResponse {
        CouponResponse {
            code: model.code.clone(),
            discount_percentage: model.discount_percentage,
            expiry_date: model.expiry_date,
            max_uses: model.max_uses,
            current_uses: model.current_uses,
            remaining_uses: model.remaining_uses(),
            is_active: model.is_active,
            owner_customer_id: model.owner_customer_id,
            milestone: model.milestone,
            created_at: model.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DatabaseConnection;

    fn usable_coupon() -> coupon::Model {
        coupon::Model {
            code: "VERANO2024".to_string(),
            discount_percentage: 20,
            expiry_date: Utc::now() + chrono::Duration::days(7),
            max_uses: Some(1),
            current_uses: 0,
            is_active: true,
            owner_customer_id: None,
            milestone: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rejection_checks_run_in_a_fixed_order() {
        let customer = Uuid::new_v4();
        let now = Utc::now();

        let mut coupon = usable_coupon();
        coupon.is_active = false;
        coupon.expiry_date = now - chrono::Duration::days(1);
        coupon.current_uses = 1;
        coupon.owner_customer_id = Some(Uuid::new_v4());
        assert_eq!(
            rejection_for(&coupon, customer, now),
            Some(RejectionReason::Inactive)
        );

        coupon.is_active = true;
        assert_eq!(
            rejection_for(&coupon, customer, now),
            Some(RejectionReason::Expired)
        );

        coupon.expiry_date = now + chrono::Duration::days(1);
        assert_eq!(
            rejection_for(&coupon, customer, now),
            Some(RejectionReason::UsageLimitReached)
        );

        coupon.current_uses = 0;
        assert_eq!(
            rejection_for(&coupon, customer, now),
            Some(RejectionReason::NotYourCoupon)
        );

        coupon.owner_customer_id = Some(customer);
        assert_eq!(rejection_for(&coupon, customer, now), None);
    }

    #[test]
    fn accepted_outcome_quotes_the_percentage() {
        let outcome = ValidationOutcome::accepted(20);
        assert!(outcome.valid);
        assert_eq!(outcome.discount_percentage, 20);
        assert_eq!(outcome.message, "coupon applied: 20% off");
    }

    #[test]
    fn rejected_outcome_carries_no_discount() {
        let outcome = ValidationOutcome::rejected("coupon expired");
        assert!(!outcome.valid);
        assert_eq!(outcome.discount_percentage, 0);
        assert_eq!(outcome.message, "coupon expired");
    }

    #[test]
    fn codes_normalize_to_trimmed_uppercase() {
        assert_eq!(normalize_code("  verano2024  "), "VERANO2024");
        assert_eq!(normalize_code("LEALTAD9X"), "LEALTAD9X");
        assert_eq!(normalize_code("   "), "");
    }

    #[test]
    fn date_only_expiry_covers_the_whole_final_day() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 31).unwrap();
        let expiry = end_of_day_utc(date);
        assert_eq!(expiry.to_rfc3339(), "2024-08-31T23:59:59+00:00");
    }

    #[test]
    fn create_request_rejects_out_of_range_input() {
        let base = CreateCouponRequest {
            code: "VERANO2024".to_string(),
            discount_percentage: 20,
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            max_uses: Some(10),
        };
        assert!(base.validate().is_ok());

        let mut zero_percent = base.clone();
        zero_percent.discount_percentage = 0;
        assert!(zero_percent.validate().is_err());

        let mut over_percent = base.clone();
        over_percent.discount_percentage = 101;
        assert!(over_percent.validate().is_err());

        let mut short_code = base.clone();
        short_code.code = "AB".to_string();
        assert!(short_code.validate().is_err());

        let mut bad_chars = base.clone();
        bad_chars.code = "HELLO WORLD".to_string();
        assert!(bad_chars.validate().is_err());

        let mut zero_cap = base;
        zero_cap.max_uses = Some(0);
        assert!(zero_cap.validate().is_err());
    }

    #[tokio::test]
    async fn blank_codes_short_circuit_validation() {
        let service = CouponService::new(Arc::new(DatabaseConnection::default()), None);

        let outcome = service
            .validate_coupon("   ", Uuid::new_v4())
            .await
            .unwrap();

        assert!(!outcome.valid);
        assert_eq!(outcome.message, "coupon not found or invalid");
    }
}
