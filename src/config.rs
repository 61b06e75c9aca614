//! Configuration management with validation and defaults
//!
//! Values come from an optional TOML file, then `BETGAMMON_*` environment
//! variables, then validation.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Root configuration for the betting service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BetgammonConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub matching: MatchingConfig,
    pub sessions: SessionConfig,
    pub payments: PaymentConfig,
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Shared secret expected in `X-API-Key` on the payment callback and the
    /// game adjudication routes. Unset means open (development).
    pub callback_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            callback_api_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Balance granted to an account on first contact
    pub starting_balance: u64,
    /// Upper bound for an account's available plus escrowed balance
    pub max_balance: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000,
            max_balance: 1_000_000_000_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub max_wait_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: 120,
            sweep_interval_secs: 5,
        }
    }
}

impl MatchingConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions without a winner after this long are abandoned; 0 disables
    pub session_timeout_secs: u64,
    /// How long terminal sessions stay queryable. A repeated winner report
    /// gets `AlreadySettled` inside this window and `UnknownSession` after it.
    pub archive_retention_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 1_800,
            archive_retention_secs: 3_600,
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_secs > 0).then(|| Duration::from_secs(self.session_timeout_secs))
    }

    pub fn archive_retention(&self) -> Duration {
        Duration::from_secs(self.archive_retention_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Base URL the invoice links are built from
    pub invoice_base_url: String,
    pub currency: String,
    /// Pending bets untouched for this long are forgotten by the sweeper
    pub invoice_ttl_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            invoice_base_url: "https://t.me/$".to_string(),
            currency: "XTR".to_string(),
            invoice_ttl_secs: 3_600,
        }
    }
}

impl PaymentConfig {
    pub fn invoice_ttl(&self) -> Duration {
        Duration::from_secs(self.invoice_ttl_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "betgammon=info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and process environment
    pub fn load(&self) -> Result<BetgammonConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment
    pub fn load_with<F>(&self, lookup: F) -> Result<BetgammonConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => BetgammonConfig::default(),
        };

        apply_overrides(&mut config, lookup)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<BetgammonConfig, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self, config: &BetgammonConfig, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to write to {}: {}", path, e)))
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String, reason: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: key.to_string(),
        value,
        reason: reason.to_string(),
    })
}

fn apply_overrides<F>(config: &mut BetgammonConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("BETGAMMON_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("BETGAMMON_PORT") {
        config.server.port = parse_var("BETGAMMON_PORT", port, "Invalid port number")?;
    }
    if let Some(origins) = lookup("BETGAMMON_ALLOWED_ORIGINS") {
        config.server.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(key) = lookup("BETGAMMON_CALLBACK_API_KEY") {
        config.server.callback_api_key = Some(key);
    }
    if let Some(balance) = lookup("BETGAMMON_STARTING_BALANCE") {
        config.ledger.starting_balance =
            parse_var("BETGAMMON_STARTING_BALANCE", balance, "Invalid balance")?;
    }
    if let Some(wait) = lookup("BETGAMMON_MAX_WAIT_SECS") {
        config.matching.max_wait_secs = parse_var("BETGAMMON_MAX_WAIT_SECS", wait, "Invalid duration")?;
    }
    if let Some(timeout) = lookup("BETGAMMON_SESSION_TIMEOUT_SECS") {
        config.sessions.session_timeout_secs =
            parse_var("BETGAMMON_SESSION_TIMEOUT_SECS", timeout, "Invalid duration")?;
    }
    if let Some(ttl) = lookup("BETGAMMON_INVOICE_TTL_SECS") {
        config.payments.invoice_ttl_secs =
            parse_var("BETGAMMON_INVOICE_TTL_SECS", ttl, "Invalid duration")?;
    }
    if let Some(filter) = lookup("BETGAMMON_LOG") {
        config.logging.filter = filter;
    }

    Ok(())
}

/// Validate configuration values
pub fn validate(config: &BetgammonConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: "server.port".to_string(),
            value: "0".to_string(),
            reason: "Port cannot be zero".to_string(),
        });
    }

    if config.server.host.is_empty() {
        return Err(ConfigError::MissingRequired("server.host".to_string()));
    }

    if config.ledger.max_balance < config.ledger.starting_balance {
        return Err(ConfigError::InvalidValue {
            field: "ledger.max_balance".to_string(),
            value: config.ledger.max_balance.to_string(),
            reason: "Maximum balance is below the starting balance".to_string(),
        });
    }

    if config.matching.max_wait_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "matching.max_wait_secs".to_string(),
            value: "0".to_string(),
            reason: "Queue wait bound cannot be zero".to_string(),
        });
    }

    if config.matching.sweep_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "matching.sweep_interval_secs".to_string(),
            value: "0".to_string(),
            reason: "Sweep interval cannot be zero".to_string(),
        });
    }

    if config.payments.invoice_ttl_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "payments.invoice_ttl_secs".to_string(),
            value: "0".to_string(),
            reason: "Invoice TTL cannot be zero".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = BetgammonConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ledger.starting_balance, 1_000);
        assert_eq!(config.matching.max_wait(), Duration::from_secs(120));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BetgammonConfig::default();
        config.server.port = 0;
        assert!(validate(&config).is_err());

        let mut config = BetgammonConfig::default();
        config.ledger.max_balance = 10;
        assert!(validate(&config).is_err());

        let mut config = BetgammonConfig::default();
        config.matching.max_wait_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = BetgammonConfig::default();
        config.payments.invoice_ttl_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BETGAMMON_PORT", "8088"),
            ("BETGAMMON_MAX_WAIT_SECS", "30"),
            ("BETGAMMON_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::new()
            .load_with(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 8088);
        assert_eq!(config.matching.max_wait_secs, 30);
        assert_eq!(config.server.allowed_origins.len(), 2);
    }

    #[test]
    fn test_invalid_env_override() {
        let result = ConfigLoader::new().load_with(|key| {
            (key == "BETGAMMON_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_session_timeout_disabled_by_zero() {
        let mut config = SessionConfig::default();
        assert!(config.session_timeout().is_some());
        config.session_timeout_secs = 0;
        assert!(config.session_timeout().is_none());
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = BetgammonConfig::default();
        original.ledger.starting_balance = 500;
        original.server.callback_api_key = Some("secret".to_string());

        let loader = ConfigLoader::new();
        loader.save(&original, path).unwrap();

        let loaded = ConfigLoader::new().with_path(path).load_with(no_env).unwrap();
        assert_eq!(loaded.ledger.starting_balance, 500);
        assert_eq!(loaded.server.callback_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[matching]\nmax_wait_secs = 60\n").unwrap();

        let loaded = ConfigLoader::new()
            .with_path(temp_file.path())
            .load_with(no_env)
            .unwrap();
        assert_eq!(loaded.matching.max_wait_secs, 60);
        assert_eq!(loaded.matching.sweep_interval_secs, 5);
        assert_eq!(loaded.server.port, 3000);
    }
}
