//! Configuration Module
//!
//! Configuration for the period definition and for each tier's and the
//! generator's connection settings. Everything is loaded from `TALLY_*`
//! environment variables with development defaults, except the generator
//! base URL which has no sensible default.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Weekday;

use crate::error::ConfigError;
use crate::period::{PeriodCalculator, PeriodKind};

/// Default namespace for durable keys; the full key is `{prefix}{userId}`.
pub const DEFAULT_DURABLE_KEY_PREFIX: &str = "tally:result:";

/// Default remote store table.
pub const DEFAULT_REMOTE_TABLE: &str = "periodic_results";

/// Default generator resource path segment.
pub const DEFAULT_GENERATOR_RESOURCE: &str = "resource";

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: "could not be parsed".to_string(),
        }),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

// ============================================================================
// PERIOD CONFIGURATION
// ============================================================================

/// Definition of the scoring period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodConfig {
    pub kind: PeriodKind,
}

impl PeriodConfig {
    /// Environment variables:
    /// - `TALLY_PERIOD`: `daily`, `weekly` or `monthly` (default: weekly)
    /// - `TALLY_WEEK_STARTS_ON`: weekday name for weekly periods (default: mon)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut kind = parse_var::<PeriodKind>(&lookup, "TALLY_PERIOD")?.unwrap_or_default();
        if let PeriodKind::Weekly { .. } = kind {
            if let Some(starts_on) = parse_var::<Weekday>(&lookup, "TALLY_WEEK_STARTS_ON")? {
                kind = PeriodKind::Weekly { starts_on };
            }
        }
        Ok(Self { kind })
    }

    pub fn calculator(&self) -> PeriodCalculator {
        PeriodCalculator::new(self.kind)
    }
}

// ============================================================================
// DURABLE TIER CONFIGURATION
// ============================================================================

/// Local LMDB environment backing the durable tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableConfig {
    /// Directory holding the LMDB files.
    pub path: PathBuf,
    /// Maximum map size in megabytes.
    pub max_size_mb: usize,
    /// Namespace prepended to every user id.
    pub key_prefix: String,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".tally/durable"),
            max_size_mb: 64,
            key_prefix: DEFAULT_DURABLE_KEY_PREFIX.to_string(),
        }
    }
}

impl DurableConfig {
    /// Environment variables:
    /// - `TALLY_DURABLE_PATH` (default: `.tally/durable`)
    /// - `TALLY_DURABLE_MAX_SIZE_MB` (default: 64)
    /// - `TALLY_DURABLE_KEY_PREFIX` (default: `tally:result:`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            path: lookup("TALLY_DURABLE_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: parse_var(&lookup, "TALLY_DURABLE_MAX_SIZE_MB")?
                .unwrap_or(defaults.max_size_mb),
            key_prefix: lookup("TALLY_DURABLE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_max_size_mb(mut self, max_size_mb: usize) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_DURABLE_MAX_SIZE_MB".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        // An empty prefix would claim every key in a shared environment.
        if self.key_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_DURABLE_KEY_PREFIX".to_string(),
                value: self.key_prefix.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// REMOTE STORE CONFIGURATION
// ============================================================================

/// PostgreSQL connection settings for the shared results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStoreConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
    /// Table holding one row per user.
    pub table: String,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tally".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
            table: DEFAULT_REMOTE_TABLE.to_string(),
        }
    }
}

impl RemoteStoreConfig {
    /// Environment variables: `TALLY_DB_HOST`, `TALLY_DB_PORT`, `TALLY_DB_NAME`,
    /// `TALLY_DB_USER`, `TALLY_DB_PASSWORD`, `TALLY_DB_POOL_SIZE`,
    /// `TALLY_DB_TIMEOUT` (seconds) and `TALLY_DB_TABLE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: lookup("TALLY_DB_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "TALLY_DB_PORT")?.unwrap_or(defaults.port),
            dbname: lookup("TALLY_DB_NAME").unwrap_or(defaults.dbname),
            user: lookup("TALLY_DB_USER").unwrap_or(defaults.user),
            password: lookup("TALLY_DB_PASSWORD").unwrap_or_default(),
            max_size: parse_var(&lookup, "TALLY_DB_POOL_SIZE")?.unwrap_or(defaults.max_size),
            timeout: parse_var::<u64>(&lookup, "TALLY_DB_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            table: lookup("TALLY_DB_TABLE").unwrap_or(defaults.table),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// The table name is interpolated into SQL, so it must be a plain identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_sql_identifier(&self.table) {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_DB_TABLE".to_string(),
                value: self.table.clone(),
                reason: "must be a plain SQL identifier".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_DB_POOL_SIZE".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// GENERATOR CONFIGURATION
// ============================================================================

/// Remote generator endpoint settings.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Service root, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path segment before the user id: `{base_url}/{resource}/{userId}`.
    pub resource: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl GeneratorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            resource: DEFAULT_GENERATOR_RESOURCE.to_string(),
            api_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Environment variables:
    /// - `TALLY_GENERATOR_BASE_URL` (required)
    /// - `TALLY_GENERATOR_RESOURCE` (default: `resource`)
    /// - `TALLY_GENERATOR_TOKEN` (optional)
    /// - `TALLY_GENERATOR_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("TALLY_GENERATOR_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "TALLY_GENERATOR_BASE_URL".to_string(),
            })?;
        let mut config = Self::new(base_url);
        if let Some(resource) =
            lookup("TALLY_GENERATOR_RESOURCE").filter(|v| !v.trim().is_empty())
        {
            config.resource = resource;
        }
        config.api_token = lookup("TALLY_GENERATOR_TOKEN").filter(|v| !v.is_empty());
        if let Some(secs) = parse_var::<u64>(&lookup, "TALLY_GENERATOR_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_GENERATOR_BASE_URL".to_string(),
                value: self.base_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.resource.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "TALLY_GENERATOR_RESOURCE".to_string(),
                value: self.resource.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("resource", &self.resource)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Everything needed to assemble a cache against real infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyConfig {
    pub period: PeriodConfig,
    pub durable: DurableConfig,
    pub remote_store: RemoteStoreConfig,
    pub generator: GeneratorConfig,
}

impl TallyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            period: PeriodConfig::from_vars(&lookup)?,
            durable: DurableConfig::from_vars(&lookup)?,
            remote_store: RemoteStoreConfig::from_vars(&lookup)?,
            generator: GeneratorConfig::from_vars(&lookup)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.durable.validate()?;
        self.remote_store.validate()?;
        self.generator.validate()
    }
}
