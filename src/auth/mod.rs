/*!
 * # Authentication and Authorization Module
 *
 * JWT-based authentication for the ACQUA API. Login issues an HS256 access
 * token; protected handlers receive an [`AuthUser`] extracted from the
 * `Authorization: Bearer` header. Role checks (admin vs customer) happen in
 * the handlers themselves.
 */

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::user::{self, UserRole};
use crate::errors::ServiceError;
use crate::AppState;

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Subject (user ID)
    pub role: String, // "admin" or "customer"
    pub iat: i64,     // Issued at time
    pub exp: i64,     // Expiration time
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthUser {
    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = ServiceError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))?;
        let role = match claims.role.as_str() {
            "admin" => UserRole::Admin,
            "customer" => UserRole::Customer,
            other => {
                return Err(ServiceError::Unauthorized(format!(
                    "unknown role in token: {}",
                    other
                )))
            }
        };
        Ok(AuthUser { user_id, role })
    }
}

/// Issues and validates tokens, and hashes account passwords.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    token_expiration_secs: usize,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, token_expiration_secs: usize) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_expiration_secs,
        }
    }

    /// Hash a plaintext password with Argon2id and a fresh random salt.
    pub fn hash_password(&self, password: &str) -> Result<String, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::HashError(e.to_string()))
    }

    /// Check a plaintext password against a stored PHC-format hash.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, ServiceError> {
        let parsed = PasswordHash::new(hash).map_err(|e| ServiceError::HashError(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Generate a signed access token for the given account.
    pub fn generate_token(&self, account: &user::Model) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account.id.to_string(),
            role: account.role.to_string(),
            iat: now,
            exp: now + self.token_expiration_secs as i64,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::AuthError(format!("failed to sign token: {}", e)))
    }

    /// Decode and validate a token, returning its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::Unauthorized("token expired".to_string())
            }
            _ => ServiceError::Unauthorized("invalid token".to_string()),
        })
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ServiceError> {
    let header_value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".to_string()))?;

    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("expected bearer token".to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(parts)?;
        let claims = state.services.auth.validate_token(token)?;
        AuthUser::try_from(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn test_account(role: UserRole) -> user::Model {
        user::Model {
            id: Uuid::new_v4(),
            email: "cliente@example.com".into(),
            name: "Cliente".into(),
            password_hash: String::new(),
            role,
            phone: None,
            address: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn token_round_trip_preserves_identity() {
        let service = AuthService::new("test-secret", 3600);
        let account = test_account(UserRole::Customer);

        let token = service.generate_token(&account).unwrap();
        let claims = service.validate_token(&token).unwrap();

        assert_eq!(claims.sub, account.id.to_string());
        assert_eq!(claims.role, "customer");

        let auth_user = AuthUser::try_from(claims).unwrap();
        assert_eq!(auth_user.user_id, account.id);
        assert!(!auth_user.is_admin());
    }

    #[test]
    fn admin_role_survives_the_round_trip() {
        let service = AuthService::new("test-secret", 3600);
        let token = service.generate_token(&test_account(UserRole::Admin)).unwrap();
        let auth_user = AuthUser::try_from(service.validate_token(&token).unwrap()).unwrap();
        assert!(auth_user.is_admin());
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let issuer = AuthService::new("secret-a", 3600);
        let verifier = AuthService::new("secret-b", 3600);

        let token = issuer.generate_token(&test_account(UserRole::Customer)).unwrap();
        assert_matches!(
            verifier.validate_token(&token),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let service = AuthService::new("test-secret", 3600);
        let past = Utc::now().timestamp() - 7200;
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "customer".into(),
            iat: past,
            exp: past + 60,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret("test-secret".as_bytes()),
        )
        .unwrap();

        let err = service.validate_token(&token).unwrap_err();
        assert_matches!(err, ServiceError::Unauthorized(msg) if msg.contains("expired"));
    }

    #[test]
    fn unknown_claim_roles_do_not_authenticate() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "superuser".into(),
            iat: 0,
            exp: 0,
        };
        assert_matches!(
            AuthUser::try_from(claims),
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[test]
    fn password_hashing_round_trip() {
        let service = AuthService::new("test-secret", 3600);
        let hash = service.hash_password("agua-pura-123").unwrap();

        assert_ne!(hash, "agua-pura-123");
        assert!(service.verify_password("agua-pura-123", &hash).unwrap());
        assert!(!service.verify_password("otra-clave", &hash).unwrap());
    }
}
