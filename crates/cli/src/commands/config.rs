use std::env;
use std::fs;
use std::path::Path;

use kickoff_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = match &config.upstream.api_key {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields: [(&str, String, &[&str]); 19] = [
        ("upstream.base_url", config.upstream.base_url.clone(), &["KICKOFF_UPSTREAM_BASE_URL"]),
        ("upstream.api_key", api_key, &["KICKOFF_UPSTREAM_API_KEY"]),
        ("upstream.timeout_secs", config.upstream.timeout_secs.to_string(), &["KICKOFF_UPSTREAM_TIMEOUT_SECS"]),
        ("engine.max_retries", config.engine.max_retries.to_string(), &["KICKOFF_ENGINE_MAX_RETRIES"]),
        ("engine.retry_delay_ms", config.engine.retry_delay_ms.to_string(), &["KICKOFF_ENGINE_RETRY_DELAY_MS"]),
        ("engine.backoff", format!("{:?}", config.engine.backoff), &["KICKOFF_ENGINE_BACKOFF"]),
        (
            "engine.batch_timeout_secs",
            config.engine.batch_timeout_secs.to_string(),
            &["KICKOFF_ENGINE_BATCH_TIMEOUT_SECS"],
        ),
        (
            "breaker.failure_threshold",
            config.breaker.failure_threshold.to_string(),
            &["KICKOFF_BREAKER_FAILURE_THRESHOLD"],
        ),
        ("breaker.cooldown_secs", config.breaker.cooldown_secs.to_string(), &["KICKOFF_BREAKER_COOLDOWN_SECS"]),
        ("breaker.scope", format!("{:?}", config.breaker.scope), &["KICKOFF_BREAKER_SCOPE"]),
        ("cache.backend", format!("{:?}", config.cache.backend), &["KICKOFF_CACHE_BACKEND"]),
        ("cache.database_url", config.cache.database_url.clone(), &["KICKOFF_CACHE_DATABASE_URL"]),
        ("cache.key_prefix", config.cache.key_prefix.clone(), &["KICKOFF_CACHE_KEY_PREFIX"]),
        ("cache.long_ttl_secs", config.cache.long_ttl_secs.to_string(), &["KICKOFF_CACHE_LONG_TTL_SECS"]),
        ("cache.short_ttl_secs", config.cache.short_ttl_secs.to_string(), &["KICKOFF_CACHE_SHORT_TTL_SECS"]),
        ("cache.live_ttl_secs", config.cache.live_ttl_secs.to_string(), &["KICKOFF_CACHE_LIVE_TTL_SECS"]),
        (
            "cache.memory_max_entries",
            config.cache.memory_max_entries.to_string(),
            &["KICKOFF_CACHE_MEMORY_MAX_ENTRIES"],
        ),
        ("logging.level", config.logging.level.clone(), &["KICKOFF_LOGGING_LEVEL", "KICKOFF_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["KICKOFF_LOGGING_FORMAT", "KICKOFF_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|env_key| env::var_os(env_key).is_some()) {
        return format!("env ({env_key})");
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

fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let chars = trimmed.chars().collect::<Vec<_>>();
    if chars.len() <= 8 {
        return "<redacted>".to_string();
    }
    let tail = chars[chars.len() - 4..].iter().collect::<String>();
    format!("***{tail}")
}
