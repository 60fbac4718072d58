use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The `coupons` table. The uppercase code is the natural primary key.
///
/// A coupon with `owner_customer_id` set is personal: only that customer may
/// redeem it. `milestone` is populated for loyalty-issued coupons and backs
/// the unique (owner, milestone) index that makes issuance idempotent.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,

    pub discount_percentage: i32,
    pub expiry_date: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub is_active: bool,
    pub owner_customer_id: Option<Uuid>,
    pub milestone: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerCustomerId",
        to = "super::user::Column::Id"
    )]
    Owner,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A coupon is usable strictly before its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }

    /// True when a usage cap exists and has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_uses
            .map(|cap| self.current_uses >= cap)
            .unwrap_or(false)
    }

    /// Personal coupons are bound to a single customer account.
    pub fn is_personal(&self) -> bool {
        self.owner_customer_id.is_some()
    }

    /// Uses left before the cap, `None` for uncapped coupons.
    pub fn remaining_uses(&self) -> Option<i32> {
        self.max_uses.map(|cap| (cap - self.current_uses).max(0))
    }

    /// Full redeemability predicate: active, unexpired, not exhausted,
    /// and either public or owned by the requesting customer.
    pub fn is_redeemable_by(&self, customer_id: Uuid, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.is_expired(now)
            && !self.is_exhausted()
            && self
                .owner_customer_id
                .map(|owner| owner == customer_id)
                .unwrap_or(true)
    }
}
