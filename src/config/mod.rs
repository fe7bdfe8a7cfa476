//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::Path, str::FromStr, time::Duration};

use clap::{Args, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "query-sync";
const ENV_PREFIX: &str = "QUERY_SYNC";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Command-line overrides; these win over files and environment.
#[derive(Debug, Args, Default, Clone)]
pub struct SettingsOverrides {
    /// Override the backend base URL.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Override the client request timeout.
    #[arg(long = "timeout-seconds", value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the staleness window in milliseconds.
    #[arg(long = "cache-stale-after-ms", value_name = "MS")]
    pub stale_after_ms: Option<u64>,

    /// Override the prefetch cool-down in milliseconds.
    #[arg(long = "cache-prefetch-cooldown-ms", value_name = "MS")]
    pub prefetch_cooldown_ms: Option<u64>,

    /// Override how many prefetches may run at once.
    #[arg(long = "cache-prefetch-max-concurrent", value_name = "COUNT")]
    pub prefetch_max_concurrent: Option<usize>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub transport: TransportSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Unset means the caller must supply its own transport or URL.
    pub base_url: Option<Url>,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
///
/// `config/default.*` and `query-sync.*` in the working directory are read if
/// present; `config_file` must exist when given. Environment variables look
/// like `QUERY_SYNC__CACHE__STALE_AFTER_MS`.
pub fn load(
    config_file: Option<&Path>,
    overrides: &SettingsOverrides,
) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    transport: RawTransportSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(url) = overrides.base_url.as_ref() {
            self.transport.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.timeout_secs {
            self.transport.timeout_secs = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(ms) = overrides.stale_after_ms {
            self.cache.stale_after_ms = Some(ms);
        }
        if let Some(ms) = overrides.prefetch_cooldown_ms {
            self.cache.prefetch_cooldown_ms = Some(ms);
        }
        if let Some(count) = overrides.prefetch_max_concurrent {
            self.cache.prefetch_max_concurrent = Some(count);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            transport,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_config(cache)?,
            transport: build_transport_settings(transport)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let prefetch_max_concurrent = cache
        .prefetch_max_concurrent
        .unwrap_or(defaults.prefetch_max_concurrent);
    if prefetch_max_concurrent == 0 {
        return Err(LoadError::invalid(
            "cache.prefetch_max_concurrent",
            "must be greater than zero",
        ));
    }

    let cursor_param = non_empty(cache.cursor_param, defaults.cursor_param, "cache.cursor_param")?;
    let page_param = non_empty(cache.page_param, defaults.page_param, "cache.page_param")?;
    if cursor_param == page_param {
        return Err(LoadError::invalid(
            "cache.page_param",
            format!("must differ from cache.cursor_param (`{cursor_param}`)"),
        ));
    }

    Ok(CacheConfig {
        stale_after_ms: cache.stale_after_ms.unwrap_or(defaults.stale_after_ms),
        prefetch_cooldown_ms: cache
            .prefetch_cooldown_ms
            .unwrap_or(defaults.prefetch_cooldown_ms),
        prefetch_max_concurrent,
        cursor_param,
        page_param,
    })
}

fn build_transport_settings(
    transport: RawTransportSettings,
) -> Result<TransportSettings, LoadError> {
    let base_url = match transport.base_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => {
            let url = Url::parse(value).map_err(|err| {
                LoadError::invalid("transport.base_url", format!("`{value}`: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "transport.base_url",
                    format!("unsupported scheme `{}`", url.scheme()),
                ));
            }
            Some(url)
        }
    };

    let timeout_secs = transport.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "transport.timeout_secs",
            "must be greater than zero",
        ));
    }

    Ok(TransportSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn non_empty(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    match value {
        None => Ok(default),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(key, "must not be empty"));
            }
            Ok(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    stale_after_ms: Option<u64>,
    prefetch_cooldown_ms: Option<u64>,
    prefetch_max_concurrent: Option<usize>,
    cursor_param: Option<String>,
    page_param: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransportSettings {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}
