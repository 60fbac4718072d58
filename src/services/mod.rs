/*!
 * Business logic, one service per aggregate. Handlers stay thin and
 * translate HTTP into calls here; services own validation, persistence
 * and event publication.
 */

// Accounts and authentication
pub mod customers;

// Coupon engine
pub mod coupons;
pub mod loyalty;
pub mod pricing;

// Order intake and lifecycle
pub mod orders;

pub use coupons::CouponService;
pub use customers::CustomerService;
pub use loyalty::LoyaltyService;
pub use orders::OrderService;
