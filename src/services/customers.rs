use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthService;
use crate::db::DbPool;
use crate::entities::order::{self, Entity as Order};
use crate::entities::user::{self, Entity as User, UserRole};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A token plus the profile it belongs to, returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Admin view of a customer account, including how many orders they have
/// placed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub total_orders: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerListResponse {
    pub customers: Vec<CustomerSummary>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(FromQueryResult)]
struct OrderCountRow {
    customer_id: Uuid,
    order_count: i64,
}

/// Emails are stored lowercased so lookups are case-insensitive.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub struct CustomerService {
    db_pool: Arc<DbPool>,
    auth: Arc<AuthService>,
    event_sender: Option<Arc<EventSender>>,
}

impl CustomerService {
    pub fn new(
        db_pool: Arc<DbPool>,
        auth: Arc<AuthService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            auth,
            event_sender,
        }
    }

    /// Registers a customer account and logs it in, returning a token with
    /// the profile. Duplicate emails surface as a conflict.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;

        let email = normalize_email(&request.email);
        let password_hash = self.auth.hash_password(&request.password)?;

        let active = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.clone()),
            name: Set(request.name.trim().to_string()),
            password_hash: Set(password_hash),
            role: Set(UserRole::Customer),
            phone: Set(request.phone.clone()),
            address: Set(request.address.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        let account = active.insert(self.db_pool.as_ref()).await.map_err(|e| {
            match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    ServiceError::ConflictError("email already registered".to_string())
                }
                _ => {
                    error!("Failed to register {}: {}", email, e);
                    ServiceError::DatabaseError(e)
                }
            }
        })?;

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::CustomerRegistered(account.id)).await {
                warn!("Failed to send customer registered event: {}", e);
            }
        }

        let token = self.auth.generate_token(&account)?;
        Ok(AuthResponse {
            token,
            user: Self::model_to_response(&account),
        })
    }

    /// Verifies credentials and mints a token. Unknown emails and wrong
    /// passwords share one generic answer.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;

        let email = normalize_email(&request.email);
        let account = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("invalid email or password".to_string()))?;

        if !self
            .auth
            .verify_password(&request.password, &account.password_hash)?
        {
            return Err(ServiceError::Unauthorized(
                "invalid email or password".to_string(),
            ));
        }

        let token = self.auth.generate_token(&account)?;
        Ok(AuthResponse {
            token,
            user: Self::model_to_response(&account),
        })
    }

    /// Profile of the authenticated account.
    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserResponse, ServiceError> {
        let account = User::find_by_id(user_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to fetch user {}: {}", user_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("User {user_id}")))?;

        Ok(Self::model_to_response(&account))
    }

    /// Customer accounts with their order counts, newest first. The counts
    /// come from one grouped query over the page, not a query per row.
    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<CustomerListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = User::find()
            .filter(user::Column::Role.eq(UserRole::Customer))
            .order_by_desc(user::Column::CreatedAt)
            .paginate(self.db_pool.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!("Failed to count customers: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let accounts = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!("Failed to fetch customers page {}: {}", page, e);
            ServiceError::DatabaseError(e)
        })?;

        let ids: Vec<Uuid> = accounts.iter().map(|a| a.id).collect();
        let counts = self.order_counts_for(&ids).await?;

        let customers = accounts
            .iter()
            .map(|account| CustomerSummary {
                id: account.id,
                email: account.email.clone(),
                name: account.name.clone(),
                phone: account.phone.clone(),
                address: account.address.clone(),
                created_at: account.created_at,
                total_orders: counts.get(&account.id).copied().unwrap_or(0),
            })
            .collect();

        Ok(CustomerListResponse {
            customers,
            total,
            page,
            per_page,
        })
    }

    /// Number of customer accounts, for the admin stats payload.
    #[instrument(skip(self))]
    pub async fn count_customers(&self) -> Result<u64, ServiceError> {
        User::find()
            .filter(user::Column::Role.eq(UserRole::Customer))
            .count(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to count customers: {}", e);
                ServiceError::DatabaseError(e)
            })
    }

    /// Creates the bootstrap admin account unless an admin already exists.
    /// Returns the created profile, or `None` when seeding was skipped.
    #[instrument(skip(self, password))]
    pub async fn ensure_admin(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Option<UserResponse>, ServiceError> {
        let admins = User::find()
            .filter(user::Column::Role.eq(UserRole::Admin))
            .count(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to count admin accounts: {}", e);
                ServiceError::DatabaseError(e)
            })?;

        if admins > 0 {
            return Ok(None);
        }

        let email = normalize_email(email);
        let password_hash = self.auth.hash_password(password)?;

        let active = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.clone()),
            name: Set(name.to_string()),
            password_hash: Set(password_hash),
            role: Set(UserRole::Admin),
            phone: Set(None),
            address: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        match active.insert(self.db_pool.as_ref()).await {
            Ok(account) => {
                info!(%email, "seeded default admin account");
                Ok(Some(Self::model_to_response(&account)))
            }
            Err(e) => match e.sql_err() {
                // Another instance seeded the same email first.
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    warn!(%email, "admin seed skipped, email already taken");
                    Ok(None)
                }
                _ => {
                    error!("Failed to seed admin account: {}", e);
                    Err(ServiceError::DatabaseError(e))
                }
            },
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, ServiceError> {
        User::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to fetch user by email: {}", e);
                ServiceError::DatabaseError(e)
            })
    }

    async fn order_counts_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<OrderCountRow> = Order::find()
            .select_only()
            .column(order::Column::CustomerId)
            .column_as(Expr::col(order::Column::Id).count(), "order_count")
            .filter(order::Column::CustomerId.is_in(ids.to_vec()))
            .group_by(order::Column::CustomerId)
            .into_model()
            .all(self.db_pool.as_ref())
            .await
            .map_err(|e| {
                error!("Failed to count orders per customer: {}", e);
                ServiceError::DatabaseError(e)
            })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.customer_id, row.order_count.max(0) as u64))
            .collect())
    }

    fn model_to_response(model: &user::Model) -> UserResponse {
        UserResponse {
            id: model.id,
            email: model.email.clone(),
            name: model.name.clone(),
            role: model.role.clone(),
            phone: model.phone.clone(),
            address: model.address.clone(),
            created_at: model.created_at,
        }
    }
}
