pub mod auth;
pub mod coupons;
pub mod customers;
pub mod orders;
pub mod stats;

use std::sync::Arc;

use crate::auth::AuthService;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{CouponService, CustomerService, LoyaltyService, OrderService};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub auth: Arc<AuthService>,
    pub coupons: Arc<CouponService>,
    pub customers: Arc<CustomerService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Wires the service graph: loyalty sits between coupons and orders,
    /// and is reached only through order delivery, so it is not exposed
    /// as a field.
    pub fn new(
        db_pool: Arc<DbPool>,
        auth: Arc<AuthService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let coupons = Arc::new(CouponService::new(db_pool.clone(), event_sender.clone()));
        let loyalty = Arc::new(LoyaltyService::new(
            db_pool.clone(),
            coupons.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            coupons.clone(),
            loyalty,
            event_sender.clone(),
        ));
        let customers = Arc::new(CustomerService::new(db_pool, auth.clone(), event_sender));

        Self {
            auth,
            coupons,
            customers,
            orders,
        }
    }
}
