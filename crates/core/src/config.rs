use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expense::{
    ExpensePolicy, DEFAULT_APPROVAL_THRESHOLD, DEFAULT_MAX_AMOUNT, DEFAULT_MIN_AMOUNT,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub settlement: SettlementConfig,
    pub expense: ExpenseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct SettlementConfig {
    pub queue_capacity: usize,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ExpenseConfig {
    pub approval_threshold: i64,
    pub min_amount: i64,
    pub max_amount: i64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub settlement_retry_count: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://reimburse.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            gateway: GatewayConfig {
                base_url: "http://localhost:8081".to_string(),
                timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
                api_key: None,
            },
            settlement: SettlementConfig {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                retry_count: DEFAULT_RETRY_COUNT,
                retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
                attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            },
            expense: ExpenseConfig {
                approval_threshold: DEFAULT_APPROVAL_THRESHOLD,
                min_amount: DEFAULT_MIN_AMOUNT,
                max_amount: DEFAULT_MAX_AMOUNT,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl ExpenseConfig {
    pub fn policy(&self) -> ExpensePolicy {
        ExpensePolicy {
            approval_threshold: self.approval_threshold,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
        }
    }
}

impl SettlementConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reimburse.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = base_url;
            }
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
            if let Some(api_key) = gateway.api_key {
                self.gateway.api_key = Some(secret_value(api_key));
            }
        }

        if let Some(settlement) = patch.settlement {
            if let Some(queue_capacity) = settlement.queue_capacity {
                self.settlement.queue_capacity = queue_capacity;
            }
            if let Some(retry_count) = settlement.retry_count {
                self.settlement.retry_count = retry_count;
            }
            if let Some(retry_delay_ms) = settlement.retry_delay_ms {
                self.settlement.retry_delay_ms = retry_delay_ms;
            }
            if let Some(attempt_timeout_secs) = settlement.attempt_timeout_secs {
                self.settlement.attempt_timeout_secs = attempt_timeout_secs;
            }
        }

        if let Some(expense) = patch.expense {
            if let Some(approval_threshold) = expense.approval_threshold {
                self.expense.approval_threshold = approval_threshold;
            }
            if let Some(min_amount) = expense.min_amount {
                self.expense.min_amount = min_amount;
            }
            if let Some(max_amount) = expense.max_amount {
                self.expense.max_amount = max_amount;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REIMBURSE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REIMBURSE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("REIMBURSE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("REIMBURSE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REIMBURSE_GATEWAY_BASE_URL") {
            self.gateway.base_url = value;
        }
        if let Some(value) = read_env("REIMBURSE_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_env("REIMBURSE_GATEWAY_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("REIMBURSE_SETTLEMENT_QUEUE_CAPACITY") {
            self.settlement.queue_capacity =
                parse_env("REIMBURSE_SETTLEMENT_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_SETTLEMENT_RETRY_COUNT") {
            self.settlement.retry_count = parse_env("REIMBURSE_SETTLEMENT_RETRY_COUNT", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_SETTLEMENT_RETRY_DELAY_MS") {
            self.settlement.retry_delay_ms =
                parse_env("REIMBURSE_SETTLEMENT_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_SETTLEMENT_ATTEMPT_TIMEOUT_SECS") {
            self.settlement.attempt_timeout_secs =
                parse_env("REIMBURSE_SETTLEMENT_ATTEMPT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REIMBURSE_EXPENSE_APPROVAL_THRESHOLD") {
            self.expense.approval_threshold =
                parse_env("REIMBURSE_EXPENSE_APPROVAL_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_EXPENSE_MIN_AMOUNT") {
            self.expense.min_amount = parse_env("REIMBURSE_EXPENSE_MIN_AMOUNT", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_EXPENSE_MAX_AMOUNT") {
            self.expense.max_amount = parse_env("REIMBURSE_EXPENSE_MAX_AMOUNT", &value)?;
        }

        if let Some(value) = read_env("REIMBURSE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REIMBURSE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_env("REIMBURSE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("REIMBURSE_LOGGING_LEVEL").or_else(|| read_env("REIMBURSE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REIMBURSE_LOGGING_FORMAT").or_else(|| read_env("REIMBURSE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(base_url) = overrides.gateway_base_url {
            self.gateway.base_url = base_url;
        }
        if let Some(api_key) = overrides.gateway_api_key {
            self.gateway.api_key = Some(secret_value(api_key));
        }
        if let Some(retry_count) = overrides.settlement_retry_count {
            self.settlement.retry_count = retry_count;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_gateway(&self.gateway)?;
        validate_settlement(&self.settlement)?;
        validate_expense(&self.expense)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reimburse.toml"), PathBuf::from("config/reimburse.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    let base_url = gateway.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "gateway.base_url must start with http:// or https://".to_string(),
        ));
    }

    if gateway.timeout_secs == 0 || gateway.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let blank_key =
        gateway.api_key.as_ref().map(|key| key.expose_secret().trim().is_empty()).unwrap_or(false);
    if blank_key {
        return Err(ConfigError::Validation(
            "gateway.api_key must not be blank when provided".to_string(),
        ));
    }

    Ok(())
}

const MAX_QUEUE_CAPACITY: usize = 100_000;

// Zero values are allowed here; the worker substitutes its defaults for them.
fn validate_settlement(settlement: &SettlementConfig) -> Result<(), ConfigError> {
    if settlement.queue_capacity > MAX_QUEUE_CAPACITY {
        return Err(ConfigError::Validation(format!(
            "settlement.queue_capacity must be at most {MAX_QUEUE_CAPACITY}"
        )));
    }

    if settlement.attempt_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "settlement.attempt_timeout_secs must be at most 300".to_string(),
        ));
    }

    if settlement.retry_count > 20 {
        return Err(ConfigError::Validation(
            "settlement.retry_count must be at most 20".to_string(),
        ));
    }

    Ok(())
}

fn validate_expense(expense: &ExpenseConfig) -> Result<(), ConfigError> {
    let ordered = 0 < expense.min_amount
        && expense.min_amount <= expense.approval_threshold
        && expense.approval_threshold <= expense.max_amount;
    if !ordered {
        return Err(ConfigError::Validation(format!(
            "expense bounds must satisfy 0 < min_amount <= approval_threshold <= max_amount \
             (got min={}, threshold={}, max={})",
            expense.min_amount, expense.approval_threshold, expense.max_amount
        )));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    gateway: Option<GatewayPatch>,
    settlement: Option<SettlementPatch>,
    expense: Option<ExpensePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SettlementPatch {
    queue_capacity: Option<usize>,
    retry_count: Option<u32>,
    retry_delay_ms: Option<u64>,
    attempt_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExpensePatch {
    approval_threshold: Option<i64>,
    min_amount: Option<i64>,
    max_amount: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_settlement_and_expense_policy() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.settlement.queue_capacity == 100, "default queue capacity is 100")?;
        ensure(config.settlement.retry_count == 3, "default retry count is 3")?;
        ensure(config.settlement.retry_delay_ms == 1_000, "default retry delay is 1s")?;
        ensure(config.settlement.attempt_timeout_secs == 10, "default attempt timeout is 10s")?;

        let policy = config.expense.policy();
        ensure(policy.approval_threshold == 1_000_000, "default threshold is 1,000,000")?;
        ensure(policy.min_amount == 10_000, "default minimum is 10,000")?;
        ensure(policy.max_amount == 50_000_000, "default maximum is 50,000,000")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_API_KEY", "gw-key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reimburse.toml");
            fs::write(
                &path,
                r#"
[gateway]
base_url = "https://payments.internal"
api_key = "${TEST_GATEWAY_API_KEY}"

[settlement]
retry_count = 5
retry_delay_ms = 250
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .gateway
                    .api_key
                    .as_ref()
                    .map(|key| key.expose_secret() == "gw-key-from-env")
                    .unwrap_or(false),
                "api key should be interpolated from environment",
            )?;
            ensure(config.gateway.base_url == "https://payments.internal", "base url from file")?;
            ensure(config.settlement.retry_count == 5, "retry count from file")?;
            ensure(
                config.settlement.retry_delay().as_millis() == 250,
                "retry delay from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GATEWAY_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_LOG_LEVEL", "warn");
        env::set_var("REIMBURSE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["REIMBURSE_LOG_LEVEL", "REIMBURSE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("REIMBURSE_SETTLEMENT_RETRY_COUNT", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reimburse.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[settlement]
retry_count = 2

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.settlement.retry_count == 4,
                "env retry count should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["REIMBURSE_DATABASE_URL", "REIMBURSE_SETTLEMENT_RETRY_COUNT"]);
        result
    }

    #[test]
    fn validation_rejects_inverted_expense_bounds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_EXPENSE_MIN_AMOUNT", "2000000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("min_amount")
            );
            ensure(has_message, "validation failure should mention min_amount")
        })();

        clear_vars(&["REIMBURSE_EXPENSE_MIN_AMOUNT"]);
        result
    }

    #[test]
    fn validation_rejects_oversized_queue_capacity() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            for capacity in ["100001".to_string(), usize::MAX.to_string()] {
                env::set_var("REIMBURSE_SETTLEMENT_QUEUE_CAPACITY", &capacity);
                let rejected = matches!(
                    AppConfig::load(LoadOptions::default()),
                    Err(ConfigError::Validation(ref message)) if message.contains("queue_capacity")
                );
                ensure(rejected, "oversized queue capacity should fail validation")?;
            }

            env::set_var("REIMBURSE_SETTLEMENT_QUEUE_CAPACITY", "100000");
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.settlement.queue_capacity == 100_000, "ceiling itself is accepted")
        })();

        clear_vars(&["REIMBURSE_SETTLEMENT_QUEUE_CAPACITY"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_SETTLEMENT_QUEUE_CAPACITY", "lots");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "REIMBURSE_SETTLEMENT_QUEUE_CAPACITY",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected an invalid override error".to_string()),
        };

        clear_vars(&["REIMBURSE_SETTLEMENT_QUEUE_CAPACITY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REIMBURSE_GATEWAY_API_KEY", "gw-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("gw-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["REIMBURSE_GATEWAY_API_KEY"]);
        result
    }
}
