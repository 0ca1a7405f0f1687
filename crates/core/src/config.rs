use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::store::DEFAULT_MEMORY_MAX_ENTRIES;
use crate::cache::TtlPolicy;
use crate::engine::breaker::{BreakerScope, BreakerSettings};
use crate::engine::executor::{Backoff, RetryPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub engine: EngineConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    /// Zero disables the batch deadline.
    pub batch_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub scope: BreakerScope,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub database_url: String,
    pub key_prefix: String,
    pub long_ttl_secs: u64,
    pub short_ttl_secs: u64,
    pub live_ttl_secs: u64,
    /// Entry bound for the in-process backend; least recently used entries go first.
    pub memory_max_entries: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Sqlite,
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
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub cache_backend: Option<CacheBackend>,
    pub database_url: Option<String>,
    pub max_retries: Option<u32>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
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

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["kickoff.toml", "config/kickoff.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "https://v3.football.api-sports.io".to_string(),
                api_key: None,
                timeout_secs: 10,
            },
            engine: EngineConfig {
                max_retries: 3,
                retry_delay_ms: 500,
                backoff: Backoff::Linear,
                batch_timeout_secs: 0,
            },
            breaker: BreakerConfig {
                failure_threshold: 5,
                cooldown_secs: 60,
                scope: BreakerScope::Shared,
            },
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                database_url: "sqlite://kickoff-cache.db".to_string(),
                key_prefix: "kickoff:v1".to_string(),
                long_ttl_secs: 24 * 60 * 60,
                short_ttl_secs: 5 * 60,
                live_ttl_secs: 15,
                memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
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

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unsupported cache backend `{other}` (expected memory|sqlite)"
            ))),
        }
    }
}

fn parse_backoff(value: &str) -> Result<Backoff, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "linear" => Ok(Backoff::Linear),
        "exponential" => Ok(Backoff::Exponential),
        other => Err(ConfigError::Validation(format!(
            "unsupported backoff `{other}` (expected linear|exponential)"
        ))),
    }
}

fn parse_scope(value: &str) -> Result<BreakerScope, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "shared" => Ok(BreakerScope::Shared),
        "per_endpoint" | "per-endpoint" => Ok(BreakerScope::PerEndpoint),
        other => Err(ConfigError::Validation(format!(
            "unsupported breaker scope `{other}` (expected shared|per_endpoint)"
        ))),
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.engine.max_retries,
            delay: Duration::from_millis(self.engine.retry_delay_ms),
            backoff: self.engine.backoff,
        }
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker.failure_threshold,
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            long: Duration::from_secs(self.cache.long_ttl_secs),
            short: Duration::from_secs(self.cache.short_ttl_secs),
            live: Duration::from_secs(self.cache.live_ttl_secs),
        }
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        (self.engine.batch_timeout_secs > 0).then(|| Duration::from_secs(self.engine.batch_timeout_secs))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(upstream) = patch.upstream {
            if let Some(base_url) = upstream.base_url {
                self.upstream.base_url = base_url;
            }
            if let Some(api_key_value) = upstream.api_key {
                self.upstream.api_key = Some(secret_value(api_key_value));
            }
            if let Some(timeout_secs) = upstream.timeout_secs {
                self.upstream.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_retries) = engine.max_retries {
                self.engine.max_retries = max_retries;
            }
            if let Some(retry_delay_ms) = engine.retry_delay_ms {
                self.engine.retry_delay_ms = retry_delay_ms;
            }
            if let Some(backoff) = engine.backoff {
                self.engine.backoff = backoff;
            }
            if let Some(batch_timeout_secs) = engine.batch_timeout_secs {
                self.engine.batch_timeout_secs = batch_timeout_secs;
            }
        }

        if let Some(breaker) = patch.breaker {
            if let Some(failure_threshold) = breaker.failure_threshold {
                self.breaker.failure_threshold = failure_threshold;
            }
            if let Some(cooldown_secs) = breaker.cooldown_secs {
                self.breaker.cooldown_secs = cooldown_secs;
            }
            if let Some(scope) = breaker.scope {
                self.breaker.scope = scope;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(backend) = cache.backend {
                self.cache.backend = backend;
            }
            if let Some(database_url) = cache.database_url {
                self.cache.database_url = database_url;
            }
            if let Some(key_prefix) = cache.key_prefix {
                self.cache.key_prefix = key_prefix;
            }
            if let Some(long_ttl_secs) = cache.long_ttl_secs {
                self.cache.long_ttl_secs = long_ttl_secs;
            }
            if let Some(short_ttl_secs) = cache.short_ttl_secs {
                self.cache.short_ttl_secs = short_ttl_secs;
            }
            if let Some(live_ttl_secs) = cache.live_ttl_secs {
                self.cache.live_ttl_secs = live_ttl_secs;
            }
            if let Some(memory_max_entries) = cache.memory_max_entries {
                self.cache.memory_max_entries = memory_max_entries;
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
        if let Some(value) = read_env("KICKOFF_UPSTREAM_BASE_URL") {
            self.upstream.base_url = value;
        }
        if let Some(value) = read_env("KICKOFF_UPSTREAM_API_KEY") {
            self.upstream.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("KICKOFF_UPSTREAM_TIMEOUT_SECS") {
            self.upstream.timeout_secs = parse_u64("KICKOFF_UPSTREAM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KICKOFF_ENGINE_MAX_RETRIES") {
            self.engine.max_retries = parse_u32("KICKOFF_ENGINE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_ENGINE_RETRY_DELAY_MS") {
            self.engine.retry_delay_ms = parse_u64("KICKOFF_ENGINE_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_ENGINE_BACKOFF") {
            self.engine.backoff = parse_backoff(&value)?;
        }
        if let Some(value) = read_env("KICKOFF_ENGINE_BATCH_TIMEOUT_SECS") {
            self.engine.batch_timeout_secs =
                parse_u64("KICKOFF_ENGINE_BATCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("KICKOFF_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold =
                parse_u32("KICKOFF_BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_BREAKER_COOLDOWN_SECS") {
            self.breaker.cooldown_secs = parse_u64("KICKOFF_BREAKER_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_BREAKER_SCOPE") {
            self.breaker.scope = parse_scope(&value)?;
        }

        if let Some(value) = read_env("KICKOFF_CACHE_BACKEND") {
            self.cache.backend = value.parse()?;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_DATABASE_URL") {
            self.cache.database_url = value;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_KEY_PREFIX") {
            self.cache.key_prefix = value;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_LONG_TTL_SECS") {
            self.cache.long_ttl_secs = parse_u64("KICKOFF_CACHE_LONG_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_SHORT_TTL_SECS") {
            self.cache.short_ttl_secs = parse_u64("KICKOFF_CACHE_SHORT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_LIVE_TTL_SECS") {
            self.cache.live_ttl_secs = parse_u64("KICKOFF_CACHE_LIVE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("KICKOFF_CACHE_MEMORY_MAX_ENTRIES") {
            self.cache.memory_max_entries = parse_usize("KICKOFF_CACHE_MEMORY_MAX_ENTRIES", &value)?;
        }

        let log_level =
            read_env("KICKOFF_LOGGING_LEVEL").or_else(|| read_env("KICKOFF_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("KICKOFF_LOGGING_FORMAT").or_else(|| read_env("KICKOFF_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_url) = overrides.base_url {
            self.upstream.base_url = base_url;
        }
        if let Some(api_key) = overrides.api_key {
            self.upstream.api_key = Some(secret_value(api_key));
        }
        if let Some(cache_backend) = overrides.cache_backend {
            self.cache.backend = cache_backend;
        }
        if let Some(database_url) = overrides.database_url {
            self.cache.database_url = database_url;
        }
        if let Some(max_retries) = overrides.max_retries {
            self.engine.max_retries = max_retries;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_upstream(&self.upstream)?;
        validate_engine(&self.engine)?;
        validate_breaker(&self.breaker)?;
        validate_cache(&self.cache)?;
        validate_logging(&self.logging)?;
        Ok(())
    }

    /// The provider key, or an actionable error when it is missing.
    pub fn require_api_key(&self) -> Result<&SecretString, ConfigError> {
        self.upstream
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Validation(
                    "upstream.api_key is required to call the provider; set KICKOFF_UPSTREAM_API_KEY"
                        .to_string(),
                )
            })
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_upstream(upstream: &UpstreamConfig) -> Result<(), ConfigError> {
    let base_url = upstream.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "upstream.base_url must start with http:// or https://".to_string(),
        ));
    }

    if upstream.timeout_secs == 0 || upstream.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "upstream.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_retries == 0 || engine.max_retries > 10 {
        return Err(ConfigError::Validation(
            "engine.max_retries must be in range 1..=10 (it counts the first attempt)".to_string(),
        ));
    }

    Ok(())
}

fn validate_breaker(breaker: &BreakerConfig) -> Result<(), ConfigError> {
    if breaker.failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "breaker.failure_threshold must be greater than zero".to_string(),
        ));
    }

    if breaker.cooldown_secs == 0 {
        return Err(ConfigError::Validation(
            "breaker.cooldown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    let prefix = cache.key_prefix.trim();
    if prefix.is_empty() || prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "cache.key_prefix must be non-empty and contain no whitespace".to_string(),
        ));
    }

    if cache.backend == CacheBackend::Sqlite {
        let url = cache.database_url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "cache.database_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`) when cache.backend is sqlite"
                    .to_string(),
            ));
        }
    }

    if cache.live_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "cache.live_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if cache.memory_max_entries == 0 {
        return Err(ConfigError::Validation(
            "cache.memory_max_entries must be greater than zero".to_string(),
        ));
    }

    if cache.live_ttl_secs > cache.short_ttl_secs || cache.short_ttl_secs > cache.long_ttl_secs {
        return Err(ConfigError::Validation(format!(
            "cache TTLs must satisfy live <= short <= long (got live={}, short={}, long={})",
            cache.live_ttl_secs, cache.short_ttl_secs, cache.long_ttl_secs
        )));
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

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    upstream: Option<UpstreamPatch>,
    engine: Option<EnginePatch>,
    breaker: Option<BreakerPatch>,
    cache: Option<CachePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    backoff: Option<Backoff>,
    batch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BreakerPatch {
    failure_threshold: Option<u32>,
    cooldown_secs: Option<u64>,
    scope: Option<BreakerScope>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    backend: Option<CacheBackend>,
    database_url: Option<String>,
    key_prefix: Option<String>,
    long_ttl_secs: Option<u64>,
    short_ttl_secs: Option<u64>,
    live_ttl_secs: Option<u64>,
    memory_max_entries: Option<usize>,
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
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use crate::engine::breaker::BreakerScope;
    use crate::engine::executor::Backoff;

    use super::{AppConfig, CacheBackend, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

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
    fn defaults_are_valid_and_match_engine_defaults() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;

        let retry = config.retry_policy();
        ensure(retry.max_retries == 3, "default retry budget should be three attempts")?;
        ensure(retry.backoff == Backoff::Linear, "default backoff should be linear")?;

        let breaker = config.breaker_settings();
        ensure(breaker.failure_threshold == 5, "default breaker threshold should be five")?;
        ensure(breaker.cooldown == Duration::from_secs(60), "default cool-down should be 60s")?;
        ensure(config.batch_timeout().is_none(), "batch deadline should be disabled by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_KICKOFF_API_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("kickoff.toml");
            fs::write(
                &path,
                r#"
[upstream]
api_key = "${TEST_KICKOFF_API_KEY}"

[breaker]
scope = "per_endpoint"

[engine]
backoff = "exponential"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.upstream.api_key.as_ref().map(|key| key.expose_secret() == "key-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.breaker.scope == BreakerScope::PerEndpoint, "scope should come from file")?;
            ensure(config.engine.backoff == Backoff::Exponential, "backoff should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_KICKOFF_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_CACHE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("KICKOFF_ENGINE_MAX_RETRIES", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("kickoff.toml");
            fs::write(
                &path,
                r#"
[cache]
backend = "sqlite"
database_url = "sqlite://from-file.db"

[engine]
max_retries = 2
retry_delay_ms = 250

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
                config.cache.database_url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.cache.backend == CacheBackend::Sqlite, "file backend should apply")?;
            ensure(config.engine.max_retries == 5, "env retry budget should win over file")?;
            ensure(config.engine.retry_delay_ms == 250, "file retry delay should win over default")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["KICKOFF_CACHE_DATABASE_URL", "KICKOFF_ENGINE_MAX_RETRIES"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_LOG_LEVEL", "warn");
        env::set_var("KICKOFF_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env alias")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env alias",
            )?;
            Ok(())
        })();

        clear_vars(&["KICKOFF_LOG_LEVEL", "KICKOFF_LOG_FORMAT"]);
        result
    }

    #[test]
    fn ttl_ordering_is_enforced() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_CACHE_LIVE_TTL_SECS", "900");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("live <= short <= long")
            );
            ensure(has_message, "validation failure should explain the TTL ordering")
        })();

        clear_vars(&["KICKOFF_CACHE_LIVE_TTL_SECS"]);
        result
    }

    #[test]
    fn memory_cache_bound_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_CACHE_MEMORY_MAX_ENTRIES", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("cache.memory_max_entries")
            );
            ensure(has_message, "validation failure should name the memory cache bound")
        })();

        clear_vars(&["KICKOFF_CACHE_MEMORY_MAX_ENTRIES"]);
        result
    }

    #[test]
    fn malformed_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_BREAKER_FAILURE_THRESHOLD", "several");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "KICKOFF_BREAKER_FAILURE_THRESHOLD"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["KICKOFF_BREAKER_FAILURE_THRESHOLD"]);
        result
    }

    #[test]
    fn api_key_is_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("KICKOFF_UPSTREAM_API_KEY", "super-secret-provider-key");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-provider-key"),
                "debug output should not contain the api key",
            )?;
            ensure(config.require_api_key().is_ok(), "api key should be present")?;
            Ok(())
        })();

        clear_vars(&["KICKOFF_UPSTREAM_API_KEY"]);
        result
    }

    #[test]
    fn missing_api_key_is_actionable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["KICKOFF_UPSTREAM_API_KEY"]);

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let error = match config.require_api_key() {
            Ok(_) => return Err("expected missing api key".to_string()),
            Err(error) => error.to_string(),
        };
        ensure(error.contains("KICKOFF_UPSTREAM_API_KEY"), "error should name the env var")
    }
}
