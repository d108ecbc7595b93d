//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{path::PathBuf, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, RefetchFailurePolicy, StoreKind};

pub use cli::{
    CliArgs, Command, FeedArgs, GlobalOverrides, ListToggleArgs, ListsArgs, ProfileArg,
    VehicleArg, VinArg,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pitlane";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
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

/// Credentials to start the session with, if any were configured.
#[derive(Clone, Default)]
pub struct SessionSettings {
    pub token: Option<String>,
    pub identity: Option<String>,
}

impl SessionSettings {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.token.as_deref()?, self.identity.as_deref()?))
    }
}

impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .finish()
    }
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
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PITLANE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
    session: RawSessionSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(store) = overrides.cache_store.as_ref() {
            self.cache.store = Some(store.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(policy) = overrides.cache_refetch_failure.as_ref() {
            self.cache.refetch_failure = Some(policy.clone());
        }
        if let Some(token) = overrides.token.as_ref() {
            self.session.token = Some(token.clone());
        }
        if let Some(identity) = overrides.identity.as_ref() {
            self.session.identity = Some(identity.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            cache,
            logging,
            session,
        } = raw;

        let api = build_api_settings(api)?;
        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;
        let session = build_session_settings(session)?;

        Ok(Self {
            api,
            cache,
            logging,
            session,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;

    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }
    if base_url.cannot_be_a_base() || base_url.host().is_none() {
        return Err(LoadError::invalid("api.base_url", "must be an absolute URL"));
    }

    Ok(ApiSettings { base_url })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let store = match cache.store.as_deref().map(str::trim) {
        None | Some("") => defaults.store,
        Some("memory") => StoreKind::Memory,
        Some("file") => StoreKind::File,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.store",
                format!("unknown store `{other}` (expected memory or file)"),
            ));
        }
    };

    let directory = cache.directory.unwrap_or(defaults.directory);
    if store == StoreKind::File && directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "must not be empty when the file store is selected",
        ));
    }

    let quota_bytes = match cache.quota_bytes {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.quota_bytes",
                "must be greater than zero",
            ));
        }
        Some(bytes) => Some(usize::try_from(bytes).map_err(|_| {
            LoadError::invalid("cache.quota_bytes", "value exceeds supported range")
        })?),
        None => None,
    };

    let refetch_failure = match cache.refetch_failure.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("demote") => Some(RefetchFailurePolicy::Demote),
        Some("keep_stale") => Some(RefetchFailurePolicy::KeepStale),
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.refetch_failure",
                format!("unknown policy `{other}` (expected demote or keep_stale)"),
            ));
        }
    };

    Ok(CacheConfig {
        store,
        directory,
        quota_bytes,
        refetch_failure,
    })
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

fn build_session_settings(session: RawSessionSettings) -> Result<SessionSettings, LoadError> {
    let token = non_blank(session.token);
    let identity = non_blank(session.identity);

    if token.is_some() != identity.is_some() {
        return Err(LoadError::invalid(
            "session",
            "token and identity must be supplied together",
        ));
    }

    Ok(SessionSettings { token, identity })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    store: Option<String>,
    directory: Option<PathBuf>,
    quota_bytes: Option<u64>,
    refetch_failure: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawSessionSettings {
    token: Option<String>,
    identity: Option<String>,
}

impl std::fmt::Debug for RawSessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSessionSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .finish()
    }
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
