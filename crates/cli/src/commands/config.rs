use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use reimburse_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = match &config.gateway.api_key {
        Some(secret) => redact_token(secret.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "REIMBURSE_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "REIMBURSE_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "REIMBURSE_DATABASE_TIMEOUT_SECS",
        ),
        ("gateway.base_url", config.gateway.base_url.clone(), "REIMBURSE_GATEWAY_BASE_URL"),
        (
            "gateway.timeout_secs",
            config.gateway.timeout_secs.to_string(),
            "REIMBURSE_GATEWAY_TIMEOUT_SECS",
        ),
        ("gateway.api_key", api_key, "REIMBURSE_GATEWAY_API_KEY"),
        (
            "settlement.queue_capacity",
            config.settlement.queue_capacity.to_string(),
            "REIMBURSE_SETTLEMENT_QUEUE_CAPACITY",
        ),
        (
            "settlement.retry_count",
            config.settlement.retry_count.to_string(),
            "REIMBURSE_SETTLEMENT_RETRY_COUNT",
        ),
        (
            "settlement.retry_delay_ms",
            config.settlement.retry_delay_ms.to_string(),
            "REIMBURSE_SETTLEMENT_RETRY_DELAY_MS",
        ),
        (
            "settlement.attempt_timeout_secs",
            config.settlement.attempt_timeout_secs.to_string(),
            "REIMBURSE_SETTLEMENT_ATTEMPT_TIMEOUT_SECS",
        ),
        (
            "expense.approval_threshold",
            config.expense.approval_threshold.to_string(),
            "REIMBURSE_EXPENSE_APPROVAL_THRESHOLD",
        ),
        (
            "expense.min_amount",
            config.expense.min_amount.to_string(),
            "REIMBURSE_EXPENSE_MIN_AMOUNT",
        ),
        (
            "expense.max_amount",
            config.expense.max_amount.to_string(),
            "REIMBURSE_EXPENSE_MAX_AMOUNT",
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            "REIMBURSE_SERVER_BIND_ADDRESS",
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "REIMBURSE_SERVER_HEALTH_CHECK_PORT",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "REIMBURSE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "REIMBURSE_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "REIMBURSE_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in &fields {
        let source = field_source(
            key_path,
            Some(*env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("reimburse.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/reimburse.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps only a key's prefix (`sk-live-abc` becomes `sk-***`).
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
