pub mod coupon;
pub mod order;
pub mod user;
