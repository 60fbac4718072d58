use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const CONFIG_DIR: &str = "config";
const FALLBACK_ENVIRONMENT: &str = "development";

/// Signing secret baked into development checkouts. Cross-field
/// validation rejects it in any other environment.
const DEV_JWT_SECRET: &str =
    "acqua-local-development-signing-secret-not-for-deployment-9281736450-qwzx";

/// Exact strings that are never acceptable as a signing secret, even
/// when long enough.
const PLACEHOLDER_SECRETS: [&str; 3] = [
    "replace-with-a-real-secret-before-deploying",
    "your-secret-key",
    "acqua-api-secret",
];

/// Substrings that mark a secret as human-chosen rather than generated.
const WEAK_FRAGMENTS: [&str; 5] = ["password", "changeme", "letmein", "qwerty", "111111"];

/// Runtime settings, deserialized from layered sources and validated
/// before the server starts.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,

    /// HS256 signing secret; 64+ characters, entropy-checked
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in seconds, between 5 minutes and 24 hours
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    /// Listen address
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment name; `development` relaxes CORS rules
    pub environment: String,

    /// Base log filter level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit log lines as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations during startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow any origin when no explicit list is configured
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Send credentials-allowed CORS headers
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Connection pool ceiling
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Connections kept open while idle
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Pool timeouts, in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Buffer size of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Bootstrap admin email; takes effect only together with
    /// `admin_password`
    #[serde(default)]
    pub admin_email: Option<String>,

    /// Bootstrap admin password, hashed before it reaches the database
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Display name for the bootstrap admin account
    #[serde(default = "default_admin_name")]
    pub admin_name: String,
}

impl AppConfig {
    /// Builds a configuration from the required settings, filling every
    /// optional knob with its default. Used by tests and tooling; the
    /// server itself goes through [`load_config`].
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            admin_email: None,
            admin_password: None,
            admin_name: default_admin_name(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// True when at least one non-blank origin is configured.
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Permissive CORS is allowed in development, or anywhere on explicit
    /// opt-in.
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Credentials for the admin account seeded at startup. Development
    /// falls back to a well-known local account so a fresh checkout works
    /// without any configuration.
    pub fn admin_bootstrap(&self) -> Option<(String, String, String)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => {
                Some((email.clone(), password.clone(), self.admin_name.clone()))
            }
            _ if self.is_development() => Some((
                "admin@acqua.local".to_string(),
                "acqua-dev-admin".to_string(),
                self.admin_name.clone(),
            )),
            _ => None,
        }
    }

    /// Rules that span more than one field, applied after the derive-based
    /// validation.
    fn cross_field_checks(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            errors.add(
                "cors_allowed_origins",
                field_error(
                    "cors_origins_missing",
                    "set APP__CORS_ALLOWED_ORIGINS outside development, or opt out with APP__CORS_ALLOW_ANY_ORIGIN=true",
                ),
            );
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_JWT_SECRET {
            errors.add(
                "jwt_secret",
                field_error(
                    "jwt_secret_dev_value",
                    "the development signing secret cannot be used here; set APP__JWT_SECRET",
                ),
            );
        }

        if self.admin_email.is_some() != self.admin_password.is_some() {
            errors.add(
                "admin_email",
                field_error(
                    "admin_bootstrap_partial",
                    "APP__ADMIN_EMAIL and APP__ADMIN_PASSWORD only take effect together",
                ),
            );
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration could not be loaded: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration rejected: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_event_channel_capacity() -> usize {
    256
}
fn default_admin_name() -> String {
    "Administrador".to_string()
}

fn field_error(code: &'static str, message: &str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.to_string().into());
    err
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(field_error(
            "log_level",
            "log_level must be one of trace, debug, info, warn, error",
        )),
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let secret = secret.trim();

    if secret.len() < 64 {
        return Err(field_error(
            "jwt_secret_short",
            "jwt_secret needs at least 64 characters",
        ));
    }

    if PLACEHOLDER_SECRETS
        .iter()
        .any(|placeholder| secret.eq_ignore_ascii_case(placeholder))
    {
        return Err(field_error(
            "jwt_secret_placeholder",
            "jwt_secret is a placeholder value; generate a real one",
        ));
    }

    let lowered = secret.to_ascii_lowercase();
    if WEAK_FRAGMENTS.iter().any(|frag| lowered.contains(frag)) {
        return Err(field_error(
            "jwt_secret_guessable",
            "jwt_secret contains a guessable fragment",
        ));
    }

    // Also catches single-character runs.
    let distinct: std::collections::HashSet<char> = secret.chars().collect();
    if distinct.len() < 10 {
        return Err(field_error(
            "jwt_secret_low_entropy",
            "jwt_secret needs at least 10 distinct characters",
        ));
    }

    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        return Err(field_error(
            "event_channel_capacity",
            "event_channel_capacity cannot be zero",
        ));
    }
    Ok(())
}

/// Installs the global tracing subscriber. RUST_LOG wins when set;
/// otherwise the configured level drives the service's own spans.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("acqua_api={level},tower_http=info")));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads configuration by layering, in order of increasing precedence:
/// built-in defaults, `config/default.toml`, `config/{profile}.toml`,
/// and `APP__*` environment variables. The profile comes from RUN_ENV
/// or APP_ENV.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let profile = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| FALLBACK_ENVIRONMENT.to_string());
    info!(profile = %profile, "loading configuration");

    if !Path::new(CONFIG_DIR).exists() {
        info!("no {CONFIG_DIR}/ directory; using built-in defaults plus APP__* variables");
    }

    // jwt_secret deliberately has no default so a deployment can never
    // start on a secret it did not choose.
    let sources = Config::builder()
        .set_default("database_url", "sqlite://acqua.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("environment", FALLBACK_ENVIRONMENT)?
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{profile}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if sources.get_string("jwt_secret").is_err() {
        error!("APP__JWT_SECRET is not set; generate one with `openssl rand -base64 64`");
        return Err(AppConfigError::Load(ConfigError::Message(
            "jwt_secret missing: set APP__JWT_SECRET (64+ characters)".to_string(),
        )));
    }

    let cfg: AppConfig = sources.try_deserialize()?;

    if let Err(errors) = cfg.validate() {
        error!(?errors, "configuration rejected by field validation");
        return Err(errors.into());
    }
    if let Err(errors) = cfg.cross_field_checks() {
        error!(?errors, "configuration rejected by cross-field validation");
        return Err(errors.into());
    }

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

#[cfg(test)]
mod cross_field_tests {
    use super::*;

    fn production_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "k2J9mQ4vX7pL1wR8nT3zB6yF0cD5gH2sW9eV4uA7iO1kM8xN3qP6rS0tZ5jE2hG!".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn production_without_cors_origins_is_rejected() {
        assert!(production_config().cross_field_checks().is_err());
    }

    #[test]
    fn explicit_any_origin_opt_out_is_accepted() {
        let mut cfg = production_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.cross_field_checks().is_ok());
    }

    #[test]
    fn configured_origins_satisfy_the_check() {
        let mut cfg = production_config();
        cfg.cors_allowed_origins = Some("https://app.acqua-delivery.com".into());
        assert!(cfg.cross_field_checks().is_ok());
    }

    #[test]
    fn blank_origin_entries_do_not_count() {
        let mut cfg = production_config();
        cfg.cors_allowed_origins = Some(" , ,".into());
        assert!(cfg.cross_field_checks().is_err());
    }

    #[test]
    fn development_skips_the_cors_requirement() {
        let mut cfg = production_config();
        cfg.environment = "development".into();
        assert!(cfg.cross_field_checks().is_ok());
    }

    #[test]
    fn admin_credentials_only_work_as_a_pair() {
        let mut cfg = production_config();
        cfg.cors_allow_any_origin = true;
        cfg.admin_email = Some("ops@acqua-delivery.com".into());
        assert!(cfg.cross_field_checks().is_err());

        cfg.admin_password = Some("a-strong-bootstrap-password".into());
        assert!(cfg.cross_field_checks().is_ok());
    }

    #[test]
    fn dev_signing_secret_cannot_leave_development() {
        let mut cfg = production_config();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_JWT_SECRET.to_string();
        assert!(cfg.cross_field_checks().is_err());
    }
}
