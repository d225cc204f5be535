//! Connection, pool and session configuration.
//!
//! Layering follows the rest of the workspace: serialized defaults, then an optional
//! YAML file, then `UOW_`-prefixed environment variables (`__` separates nested keys).
//!
//! ```yaml
//! database:
//!   dsn: "sqlite://app.db?mode=rwc"
//!   pool:
//!     max_conns: 8
//!     acquire_timeout: "5s"
//!   session:
//!     autoflush: false
//! ```

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key under which [`UowConfig`] lives in a layered configuration.
pub const CONFIG_KEY: &str = "database";

/// Environment prefix for [`UowConfig::load`].
pub const ENV_PREFIX: &str = "UOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid unit-of-work configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Invalid(Box::new(e))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UowConfig {
    /// Database URL understood by `SeaORM`.
    pub dsn: String,
    pub pool: PoolCfg,
    pub session: SessionConfig,
    /// Let sqlx log every statement.
    pub sqlx_logging: bool,
}

impl Default for UowConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite::memory:".to_owned(),
            pool: PoolCfg::default(),
            session: SessionConfig::default(),
            sqlx_logging: false,
        }
    }
}

/// Pool knobs; each is left to sqlx when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolCfg {
    pub max_conns: Option<u32>,
    pub min_conns: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Option<Duration>,
}

/// Defaults applied to every session opened by a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Flush staged writes before every read.
    pub autoflush: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { autoflush: true }
    }
}

impl UowConfig {
    /// Extract the `database` section of an existing figment.
    ///
    /// A missing section yields the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` when the section does not deserialize.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        if !figment.contains(CONFIG_KEY) {
            return Ok(Self::default());
        }
        Ok(figment.extract_inner(CONFIG_KEY)?)
    }

    /// Defaults, then the `database` section of `path` (YAML) if given, then `UOW_*`
    /// environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError` on a malformed file, unknown keys or bad values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Figment::from(Yaml::file(path)).focus(CONFIG_KEY));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }
}
