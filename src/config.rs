//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;
use std::str::FromStr;

use bigdecimal::BigDecimal;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub paychangu: PaychanguConfig,
    pub wallet: WalletConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub enable_tracing: bool,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// PayChangu gateway configuration
///
/// Loaded once at startup and injected into the gateway and the signature
/// verifier. Nothing reads PAYCHANGU_* variables at request time.
#[derive(Debug, Clone)]
pub struct PaychanguConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
    pub callback_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub allow_unsigned_webhooks: bool,
}

/// Wallet ledger configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub currency: String,
    pub deposit_fee_percent: String,
    pub withdrawal_fee_percent: String,
    pub stuck_withdrawal_hours: i32,
    pub wallet_page_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            paychangu: PaychanguConfig::from_env()?,
            wallet: WalletConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.paychangu.validate()?;
        self.wallet.validate()?;

        if self.environment.is_production() && self.paychangu.allow_unsigned_webhooks {
            return Err(ConfigError::ValidationFailed(
                "PAYCHANGU_ALLOW_UNSIGNED_WEBHOOKS cannot be enabled in production".to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost,http://127.0.0.1".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_ttl: env::var("CACHE_DEFAULT_TTL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_DEFAULT_TTL".to_string()))?,
            max_connections: env::var("CACHE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CACHE_MAX_CONNECTIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        // Basic validation of Redis URL format
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
            enable_tracing: env::var("ENABLE_TRACING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("ENABLE_TRACING".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl PaychanguConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaychanguConfig {
            secret_key: env::var("PAYCHANGU_SECRET_KEY")
                .map_err(|_| ConfigError::MissingVariable("PAYCHANGU_SECRET_KEY".to_string()))?,
            webhook_secret: env::var("PAYCHANGU_WEBHOOK_SECRET").ok(),
            api_base: env::var("PAYCHANGU_API_BASE")
                .unwrap_or_else(|_| "https://api.paychangu.com".to_string()),
            callback_url: env::var("PAYCHANGU_CALLBACK_URL")
                .unwrap_or_else(|_| "http://localhost:8000/api/paychangu/callback".to_string()),
            return_url: env::var("PAYCHANGU_RETURN_URL")
                .unwrap_or_else(|_| "http://localhost:3000/wallet".to_string()),
            timeout_secs: env::var("PAYCHANGU_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYCHANGU_TIMEOUT_SECS".to_string()))?,
            max_retries: env::var("PAYCHANGU_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYCHANGU_MAX_RETRIES".to_string()))?,
            allow_unsigned_webhooks: env::var("PAYCHANGU_ALLOW_UNSIGNED_WEBHOOKS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("PAYCHANGU_ALLOW_UNSIGNED_WEBHOOKS".to_string())
                })?,
        })
    }

    /// Secret used for webhook signature verification.
    ///
    /// PayChangu signs webhooks with the API secret unless a dedicated
    /// webhook secret was provisioned for the integration.
    pub fn signing_secret(&self) -> &str {
        self.webhook_secret.as_deref().unwrap_or(&self.secret_key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::InvalidValue("PAYCHANGU_SECRET_KEY".to_string()));
        }

        // PayChangu secrets are issued as sec-live-... / sec-test-...
        if !self.secret_key.starts_with("sec-") {
            return Err(ConfigError::InvalidValue(
                "PAYCHANGU_SECRET_KEY must start with 'sec-'".to_string(),
            ));
        }

        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PAYCHANGU_API_BASE must be a valid URL".to_string(),
            ));
        }

        if !self.callback_url.starts_with("http://") && !self.callback_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "PAYCHANGU_CALLBACK_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYCHANGU_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WalletConfig {
            currency: env::var("WALLET_CURRENCY").unwrap_or_else(|_| "MWK".to_string()),
            deposit_fee_percent: env::var("DEPOSIT_FEE_PERCENT")
                .unwrap_or_else(|_| "2.5".to_string()),
            withdrawal_fee_percent: env::var("WITHDRAWAL_FEE_PERCENT")
                .unwrap_or_else(|_| "2.5".to_string()),
            stuck_withdrawal_hours: env::var("STUCK_WITHDRAWAL_HOURS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("STUCK_WITHDRAWAL_HOURS".to_string()))?,
            wallet_page_url: env::var("WALLET_PAGE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/wallet".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::InvalidValue(
                "WALLET_CURRENCY must be a 3-letter ISO code".to_string(),
            ));
        }

        for (name, value) in [
            ("DEPOSIT_FEE_PERCENT", &self.deposit_fee_percent),
            ("WITHDRAWAL_FEE_PERCENT", &self.withdrawal_fee_percent),
        ] {
            let percent = BigDecimal::from_str(value)
                .map_err(|_| ConfigError::InvalidValue(name.to_string()))?;
            if percent < BigDecimal::from(0) || percent >= BigDecimal::from(100) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be between 0 and 100",
                    name
                )));
            }
        }

        if self.stuck_withdrawal_hours < 1 {
            return Err(ConfigError::InvalidValue(
                "STUCK_WITHDRAWAL_HOURS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

impl From<std::num::ParseFloatError> for ConfigError {
    fn from(_: std::num::ParseFloatError) -> Self {
        ConfigError::InvalidValue("Failed to parse float value".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paychangu_config() -> PaychanguConfig {
        PaychanguConfig {
            secret_key: "sec-test-abc123".to_string(),
            webhook_secret: None,
            api_base: "https://api.paychangu.com".to_string(),
            callback_url: "https://example.com/api/paychangu/callback".to_string(),
            return_url: "https://example.com/wallet".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            allow_unsigned_webhooks: false,
        }
    }

    fn wallet_config() -> WalletConfig {
        WalletConfig {
            currency: "MWK".to_string(),
            deposit_fee_percent: "2.5".to_string(),
            withdrawal_fee_percent: "2.5".to_string(),
            stuck_withdrawal_hours: 1,
            wallet_page_url: "https://example.com/wallet".to_string(),
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: vec!["http://localhost".to_string()],
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
            cors_allowed_origins: vec![],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_host_validation() {
        let config = ServerConfig {
            host: "".to_string(),
            port: 8000,
            cors_allowed_origins: vec![],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paychangu_config_validation() {
        let config = paychangu_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.signing_secret(), "sec-test-abc123");
    }

    #[test]
    fn test_paychangu_secret_prefix_required() {
        let config = PaychanguConfig {
            secret_key: "live-abc123".to_string(),
            ..paychangu_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_secret_preferred_for_signing() {
        let config = PaychanguConfig {
            webhook_secret: Some("sec-test-webhook".to_string()),
            ..paychangu_config()
        };

        assert_eq!(config.signing_secret(), "sec-test-webhook");
    }

    #[test]
    fn test_unsigned_webhooks_rejected_in_production() {
        let config = AppConfig {
            environment: Environment::Production,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                cors_allowed_origins: vec![],
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/chikwama".to_string(),
                max_connections: 20,
                min_connections: 5,
                connection_timeout: 30,
                idle_timeout: None,
            },
            cache: CacheConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                default_ttl: 3600,
                max_connections: 10,
            },
            logging: LoggingConfig {
                level: "INFO".to_string(),
                format: LogFormat::Plain,
                enable_tracing: false,
            },
            paychangu: PaychanguConfig {
                allow_unsigned_webhooks: true,
                ..paychangu_config()
            },
            wallet: wallet_config(),
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wallet_fee_percent_validation() {
        let config = WalletConfig {
            deposit_fee_percent: "150".to_string(),
            ..wallet_config()
        };
        assert!(config.validate().is_err());

        let config = WalletConfig {
            withdrawal_fee_percent: "abc".to_string(),
            ..wallet_config()
        };
        assert!(config.validate().is_err());

        assert!(wallet_config().validate().is_ok());
    }

    #[test]
    fn test_wallet_currency_validation() {
        let config = WalletConfig {
            currency: "mwk".to_string(),
            ..wallet_config()
        };

        assert!(config.validate().is_err());
    }
}
