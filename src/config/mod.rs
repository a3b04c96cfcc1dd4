//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::config::{
    DEFAULT_FAST_RETRY_ATTEMPTS, DEFAULT_LOAD_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_GRACE_SECS, DEFAULT_RETRY_TICK_MS,
    DEFAULT_SLOW_LOAD_TIMEOUT_MS, DEFAULT_WORKERS,
};

pub use cli::{CliArgs, Command, PurgeArgs, ServeArgs, ServeOverrides, StoreOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "contentproxy";
const ENV_PREFIX: &str = "CONTENTPROXY";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CMS_URL: &str = "http://cms/";
pub const DEFAULT_WORKSPACE: &str = "live";
const DEFAULT_CACHE_DIRECTORY: &str = "var/cache";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cms: CmsSettings,
    pub proxy: ProxySettings,
    pub cache: CacheSettings,
    pub database: DatabaseSettings,
    pub observers: Vec<ObserverSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub url: Url,
    /// Known workspaces; always contains the default workspace.
    pub workspaces: Vec<String>,
    /// Lower-cased content dimensions served by the CMS.
    pub dimensions: Vec<String>,
    pub default_workspace: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    /// Token required by the administrative endpoints. `None` leaves them open.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Filesystem,
    Memory,
    Postgres,
}

impl CacheBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!(
                "unknown backend `{other}`, expected filesystem, memory or postgres"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub directory: PathBuf,
    pub lifetime: Duration,
    pub queue_capacity: NonZeroUsize,
    pub workers: NonZeroUsize,
    pub retry_tick: Duration,
    pub retry_grace: Duration,
    pub fast_retry_attempts: u32,
    pub max_attempts: NonZeroU32,
    pub load_timeout: Duration,
    pub slow_load_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

/// A webhook notified after every successful invalidation.
#[derive(Debug, Clone)]
pub struct ObserverSettings {
    pub name: String,
    pub url: Url,
    pub token: Option<String>,
    /// Only notify for this workspace when set.
    pub workspace: Option<String>,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_store_overrides(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cms: RawCmsSettings,
    proxy: RawProxySettings,
    cache: RawCacheSettings,
    database: RawDatabaseSettings,
    observers: Vec<RawObserverSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.cms_url.as_ref() {
            self.cms.url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(format) = overrides.log_format.as_ref() {
            self.logging.format = Some(format.clone());
        }

        self.apply_store_overrides(&overrides.store);
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cms,
            proxy,
            cache,
            database,
            observers,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cms = build_cms_settings(cms)?;
        let proxy = build_proxy_settings(proxy);
        let cache = build_cache_settings(cache)?;
        let database = build_database_settings(database)?;
        let observers = observers
            .into_iter()
            .enumerate()
            .map(|(index, observer)| build_observer_settings(index, observer))
            .collect::<Result<Vec<_>, _>>()?;

        if cache.backend == CacheBackend::Postgres && database.url.is_none() {
            return Err(LoadError::invalid(
                "database.url",
                "required when cache.backend is postgres",
            ));
        }

        Ok(Self {
            server,
            logging,
            cms,
            proxy,
            cache,
            database,
            observers,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = match logging.format.as_deref().map(str::trim) {
        None | Some("") | Some("compact") => LogFormat::Compact,
        Some("json") => LogFormat::Json,
        Some(other) => {
            return Err(LoadError::invalid(
                "logging.format",
                format!("unknown format `{other}`, expected compact or json"),
            ));
        }
    };

    Ok(LoggingSettings { level, format })
}

fn build_cms_settings(cms: RawCmsSettings) -> Result<CmsSettings, LoadError> {
    let raw_url = cms.url.unwrap_or_else(|| DEFAULT_CMS_URL.to_string());
    let url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("cms.url", format!("invalid url: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(LoadError::invalid("cms.url", "must be an absolute base url"));
    }

    let default_workspace = cms
        .default_workspace
        .map(|value| normalize(&value))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());

    let mut workspaces = normalize_list(cms.workspaces.unwrap_or_default());
    if !workspaces.contains(&default_workspace) {
        workspaces.insert(0, default_workspace.clone());
    }

    let dimensions = normalize_list(cms.dimensions.unwrap_or_default());

    Ok(CmsSettings {
        url,
        workspaces,
        dimensions,
        default_workspace,
    })
}

fn build_proxy_settings(proxy: RawProxySettings) -> ProxySettings {
    let token = proxy.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    ProxySettings { token }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::Filesystem,
    };

    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIRECTORY));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let queue_capacity = NonZeroUsize::new(cache.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY))
        .ok_or_else(|| LoadError::invalid("cache.queue_capacity", "must be greater than zero"))?;
    let workers = NonZeroUsize::new(cache.workers.unwrap_or(DEFAULT_WORKERS))
        .ok_or_else(|| LoadError::invalid("cache.workers", "must be greater than zero"))?;

    let retry_tick_ms = cache.retry_tick_ms.unwrap_or(DEFAULT_RETRY_TICK_MS);
    if retry_tick_ms == 0 {
        return Err(LoadError::invalid(
            "cache.retry_tick_ms",
            "must be greater than zero",
        ));
    }

    let max_attempts = non_zero_u32(
        cache.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).into(),
        "cache.max_attempts",
    )?;

    let load_timeout_ms = cache.load_timeout_ms.unwrap_or(DEFAULT_LOAD_TIMEOUT_MS);
    let slow_load_timeout_ms = cache
        .slow_load_timeout_ms
        .unwrap_or(DEFAULT_SLOW_LOAD_TIMEOUT_MS);
    if load_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.load_timeout_ms",
            "must be greater than zero",
        ));
    }
    if slow_load_timeout_ms < load_timeout_ms {
        return Err(LoadError::invalid(
            "cache.slow_load_timeout_ms",
            "must not be shorter than cache.load_timeout_ms",
        ));
    }

    Ok(CacheSettings {
        backend,
        directory,
        lifetime: Duration::from_secs(cache.lifetime_seconds.unwrap_or(0)),
        queue_capacity,
        workers,
        retry_tick: Duration::from_millis(retry_tick_ms),
        retry_grace: Duration::from_secs(
            cache.retry_grace_seconds.unwrap_or(DEFAULT_RETRY_GRACE_SECS),
        ),
        fast_retry_attempts: cache
            .fast_retry_attempts
            .unwrap_or(DEFAULT_FAST_RETRY_ATTEMPTS),
        max_attempts,
        load_timeout: Duration::from_millis(load_timeout_ms),
        slow_load_timeout: Duration::from_millis(slow_load_timeout_ms),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_observer_settings(
    index: usize,
    observer: RawObserverSettings,
) -> Result<ObserverSettings, LoadError> {
    let raw_url = observer
        .url
        .ok_or_else(|| LoadError::invalid("observers.url", format!("missing for entry {index}")))?;
    let url = Url::parse(raw_url.trim()).map_err(|err| {
        LoadError::invalid("observers.url", format!("entry {index}: invalid url: {err}"))
    })?;

    let name = observer
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("webhook-{index}"));

    Ok(ObserverSettings {
        name,
        url,
        token: observer.token.filter(|token| !token.trim().is_empty()),
        workspace: observer
            .workspace
            .map(|value| normalize(&value))
            .filter(|value| !value.is_empty()),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCmsSettings {
    url: Option<String>,
    workspaces: Option<Vec<String>>,
    dimensions: Option<Vec<String>>,
    default_workspace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProxySettings {
    token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    lifetime_seconds: Option<u64>,
    queue_capacity: Option<usize>,
    workers: Option<usize>,
    retry_tick_ms: Option<u64>,
    retry_grace_seconds: Option<u64>,
    fast_retry_attempts: Option<u32>,
    max_attempts: Option<u32>,
    load_timeout_ms: Option<u64>,
    slow_load_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawObserverSettings {
    name: Option<String>,
    url: Option<String>,
    token: Option<String>,
    workspace: Option<String>,
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Trim, lower-case and drop empty or repeated entries, keeping first-seen order.
fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .map(|value| normalize(value))
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
