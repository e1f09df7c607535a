//! Configuration for the rendezvous service and its revocation cache.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RvError;

/// Default published location of on-die CA revocation lists.
pub const DEFAULT_CRL_SOURCE: &str = "https://tsci.intel.com/content/OnDieCA/crls/";

/// Configuration for the rendezvous core.
#[derive(Debug, Clone)]
pub struct RvConfig {
    /// Local directory holding cached revocation lists.
    pub crl_cache_dir: Option<PathBuf>,
    /// Source listing URLs that refresh downloads from.
    pub crl_sources: Vec<String>,
    /// Refresh the cache once when it is opened.
    pub crl_auto_update: bool,
    /// Check device certificate chains against cached revocation lists.
    pub revocation_enabled: bool,
    /// HTTP timeout for refresh.
    pub timeout: Duration,
    /// Longest lease the in-memory backend grants.
    pub max_wait_seconds: u32,
    /// Age after which an abandoned session binding may be purged.
    pub session_ttl: Duration,
}

impl Default for RvConfig {
    fn default() -> Self {
        Self {
            crl_cache_dir: None,
            crl_sources: vec![DEFAULT_CRL_SOURCE.into()],
            crl_auto_update: false,
            revocation_enabled: true,
            timeout: Duration::from_secs(30),
            max_wait_seconds: 24 * 60 * 60, // 24 hours
            session_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl RvConfig {
    /// Build a configuration from `FDO_RV_*` environment variables over
    /// the defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FDO_RV_CRL_CACHE_DIR` | `crl_cache_dir` |
    /// | `FDO_RV_CRL_SOURCES` | `crl_sources` (comma separated) |
    /// | `FDO_RV_CRL_AUTO_UPDATE` | `crl_auto_update` |
    /// | `FDO_RV_REVOCATION_ENABLED` | `revocation_enabled` |
    /// | `FDO_RV_TIMEOUT_SECS` | `timeout` |
    /// | `FDO_RV_MAX_WAIT_SECONDS` | `max_wait_seconds` |
    /// | `FDO_RV_SESSION_TTL_SECS` | `session_ttl` |
    pub fn from_env() -> Result<Self, RvError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RvError> {
        let mut config = Self::default();

        if let Some(dir) = lookup("FDO_RV_CRL_CACHE_DIR") {
            config.crl_cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(sources) = lookup("FDO_RV_CRL_SOURCES") {
            config.crl_sources = parse_source_list(&sources);
        }
        if let Some(value) = lookup("FDO_RV_CRL_AUTO_UPDATE") {
            config.crl_auto_update = parse_flag("FDO_RV_CRL_AUTO_UPDATE", &value)?;
        }
        if let Some(value) = lookup("FDO_RV_REVOCATION_ENABLED") {
            config.revocation_enabled = parse_flag("FDO_RV_REVOCATION_ENABLED", &value)?;
        }
        if let Some(value) = lookup("FDO_RV_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_number("FDO_RV_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("FDO_RV_MAX_WAIT_SECONDS") {
            config.max_wait_seconds = parse_number("FDO_RV_MAX_WAIT_SECONDS", &value)?;
        }
        if let Some(value) = lookup("FDO_RV_SESSION_TTL_SECS") {
            config.session_ttl =
                Duration::from_secs(parse_number("FDO_RV_SESSION_TTL_SECS", &value)?);
        }

        Ok(config)
    }
}

/// Split a comma-separated source list, trimming entries and dropping
/// empty ones.
pub fn parse_source_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(key: &str, value: &str) -> Result<bool, RvError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RvError::ConfigError {
            message: format!("{key}: expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, RvError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| RvError::ConfigError {
        message: format!("{key}: {e}"),
    })
}
