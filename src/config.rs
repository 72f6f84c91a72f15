//! Configuration management for devops-pacer.
//!
//! Values are layered from several sources, highest precedence first:
//! - Command line flags
//! - `DEVOPS_PACER_*` environment variables
//! - A TOML file following the XDG Base Directory specification
//! - Built-in defaults
//!
//! Every value is a [`ParsedProperty`] so diagnostics can show where it came from.
//!
//! ## Example
//!
//! ```rust,no_run
//! use devops_pacer::Config;
//!
//! let config = Config::load_from_file()
//!     .unwrap()
//!     .merge(Config::load_from_env());
//! let resolved = config.resolve().unwrap();
//! println!("{}", resolved.organization_url);
//! ```

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::api::{DEFAULT_API_VERSION, TransportSettings};
use crate::core::RateLimitConfig;
use crate::error::ConfigError;
use crate::models::SharedArgs;
use crate::parsed_property::ParsedProperty;

const ENV_PREFIX: &str = "DEVOPS_PACER_";
const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

/// The on-disk shape of `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub organization: Option<String>,
    pub base_url: Option<String>,
    pub pat: Option<String>,
    pub api_version: Option<String>,
    pub requests_per_second: Option<f64>,
    pub burst_capacity: Option<u32>,
    pub max_retries: Option<u32>,
    pub backoff_factor: Option<f64>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub max_in_flight: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub page_size: Option<u32>,
}

/// Layered configuration. `None` means no source set the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub organization: Option<ParsedProperty<String>>,
    pub base_url: Option<ParsedProperty<String>>,
    pub pat: Option<ParsedProperty<String>>,
    pub api_version: Option<ParsedProperty<String>>,
    pub requests_per_second: Option<ParsedProperty<f64>>,
    pub burst_capacity: Option<ParsedProperty<u32>>,
    pub max_retries: Option<ParsedProperty<u32>>,
    pub backoff_factor: Option<ParsedProperty<f64>>,
    pub base_delay_ms: Option<ParsedProperty<u64>>,
    pub max_delay_ms: Option<ParsedProperty<u64>>,
    pub jitter: Option<ParsedProperty<bool>>,
    pub max_in_flight: Option<ParsedProperty<usize>>,
    pub timeout_secs: Option<ParsedProperty<u64>>,
    pub page_size: Option<ParsedProperty<u32>>,
}

impl Default for Config {
    fn default() -> Self {
        let limits = RateLimitConfig::default();
        Self {
            organization: None,
            base_url: Some(ParsedProperty::Default(DEFAULT_BASE_URL.to_string())),
            pat: None,
            api_version: Some(ParsedProperty::Default(DEFAULT_API_VERSION.to_string())),
            requests_per_second: Some(ParsedProperty::Default(limits.requests_per_second())),
            burst_capacity: Some(ParsedProperty::Default(limits.burst_capacity())),
            max_retries: Some(ParsedProperty::Default(limits.max_retries())),
            backoff_factor: Some(ParsedProperty::Default(limits.backoff_factor())),
            base_delay_ms: Some(ParsedProperty::Default(
                limits.base_delay().as_millis() as u64,
            )),
            max_delay_ms: None,
            jitter: Some(ParsedProperty::Default(limits.jitter())),
            max_in_flight: Some(ParsedProperty::Default(10)),
            timeout_secs: Some(ParsedProperty::Default(30)),
            page_size: None,
        }
    }
}

/// Everything needed to build a client, validated.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub organization: String,
    /// `base_url` joined with the organization, always ending in `/`.
    pub organization_url: Url,
    pub rate_limit: RateLimitConfig,
    pub transport: TransportSettings,
    pub page_size: Option<u32>,
}

fn file_value<T: Clone + Display>(value: Option<T>, path: &Path) -> Option<ParsedProperty<T>> {
    value.map(|v| ParsedProperty::File(v.clone(), path.to_path_buf(), v.to_string()))
}

fn cli_value<T: Clone + Display>(value: Option<&T>) -> Option<ParsedProperty<T>> {
    value.map(|v| ParsedProperty::Cli(v.clone(), v.to_string()))
}

/// Reads `DEVOPS_PACER_<name>`. Unparseable values are ignored with a warning.
fn env_value<T: FromStr>(name: &str) -> Option<ParsedProperty<T>> {
    let var = format!("{ENV_PREFIX}{name}");
    let raw = std::env::var(&var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(ParsedProperty::Env(value, raw)),
        Err(_) => {
            warn!(variable = %var, "ignoring unparseable environment value");
            None
        }
    }
}

impl Config {
    /// Config with no value set from any source; the identity for [`merge`](Self::merge).
    pub fn empty() -> Self {
        Self {
            organization: None,
            base_url: None,
            pat: None,
            api_version: None,
            requests_per_second: None,
            burst_capacity: None,
            max_retries: None,
            backoff_factor: None,
            base_delay_ms: None,
            max_delay_ms: None,
            jitter: None,
            max_in_flight: None,
            timeout_secs: None,
            page_size: None,
        }
    }

    /// Loads the XDG config file, or defaults when it does not exist.
    pub fn load_from_file() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::get_config_path()?)
    }

    /// Loads a specific config file, or defaults when it does not exist.
    pub fn load_from_path(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::FileReadError {
            path: config_path.to_path_buf(),
            message: e.to_string(),
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: config_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let from_file = Self {
            organization: file_value(file.organization, config_path),
            base_url: file_value(file.base_url, config_path),
            pat: file
                .pat
                .map(|v| ParsedProperty::File(v, config_path.to_path_buf(), "***".to_string())),
            api_version: file_value(file.api_version, config_path),
            requests_per_second: file_value(file.requests_per_second, config_path),
            burst_capacity: file_value(file.burst_capacity, config_path),
            max_retries: file_value(file.max_retries, config_path),
            backoff_factor: file_value(file.backoff_factor, config_path),
            base_delay_ms: file_value(file.base_delay_ms, config_path),
            max_delay_ms: file_value(file.max_delay_ms, config_path),
            jitter: file_value(file.jitter, config_path),
            max_in_flight: file_value(file.max_in_flight, config_path),
            timeout_secs: file_value(file.timeout_secs, config_path),
            page_size: file_value(file.page_size, config_path),
        };
        Ok(Self::default().merge(from_file))
    }

    /// Loads `DEVOPS_PACER_*` environment variables.
    pub fn load_from_env() -> Self {
        Self {
            organization: env_value("ORGANIZATION"),
            base_url: env_value("BASE_URL"),
            pat: std::env::var(format!("{ENV_PREFIX}PAT"))
                .ok()
                .map(|v| ParsedProperty::Env(v, "***".to_string())),
            api_version: env_value("API_VERSION"),
            requests_per_second: env_value("REQUESTS_PER_SECOND"),
            burst_capacity: env_value("BURST_CAPACITY"),
            max_retries: env_value("MAX_RETRIES"),
            backoff_factor: env_value("BACKOFF_FACTOR"),
            base_delay_ms: env_value("BASE_DELAY_MS"),
            max_delay_ms: env_value("MAX_DELAY_MS"),
            jitter: env_value("JITTER"),
            max_in_flight: env_value("MAX_IN_FLIGHT"),
            timeout_secs: env_value("TIMEOUT_SECS"),
            page_size: env_value("PAGE_SIZE"),
        }
    }

    /// Builds a Config from command line flags.
    pub fn from_shared_args(shared: &SharedArgs) -> Self {
        Self {
            organization: cli_value(shared.organization.as_ref()),
            base_url: cli_value(shared.base_url.as_ref()),
            pat: shared
                .pat
                .as_ref()
                .map(|v| ParsedProperty::Cli(v.clone(), "***".to_string())),
            api_version: cli_value(shared.api_version.as_ref()),
            requests_per_second: cli_value(shared.requests_per_second.as_ref()),
            burst_capacity: cli_value(shared.burst_capacity.as_ref()),
            max_retries: cli_value(shared.max_retries.as_ref()),
            backoff_factor: cli_value(shared.backoff_factor.as_ref()),
            base_delay_ms: cli_value(shared.base_delay_ms.as_ref()),
            max_delay_ms: cli_value(shared.max_delay_ms.as_ref()),
            jitter: shared
                .no_jitter
                .then(|| ParsedProperty::Cli(false, "--no-jitter".to_string())),
            max_in_flight: cli_value(shared.max_in_flight.as_ref()),
            timeout_secs: cli_value(shared.timeout_secs.as_ref()),
            page_size: cli_value(shared.page_size.as_ref()),
        }
    }

    /// Full precedence chain for a command: flags > env > file > defaults.
    pub fn load(shared: &SharedArgs) -> Result<Self, ConfigError> {
        Ok(Self::load_from_file()?
            .merge(Self::load_from_env())
            .merge(Self::from_shared_args(shared)))
    }

    /// `$XDG_CONFIG_HOME/devops-pacer/config.toml`, falling back to `~/.config`.
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .map(|home| home.join(".config"))
                .ok_or_else(|| {
                    ConfigError::invalid("config_path", "could not determine home directory")
                })?,
        };
        Ok(config_dir.join("devops-pacer").join("config.toml"))
    }

    /// Merge this config with another, preferring values from other when they exist
    pub fn merge(self, other: Self) -> Self {
        Self {
            organization: other.organization.or(self.organization),
            base_url: other.base_url.or(self.base_url),
            pat: other.pat.or(self.pat),
            api_version: other.api_version.or(self.api_version),
            requests_per_second: other.requests_per_second.or(self.requests_per_second),
            burst_capacity: other.burst_capacity.or(self.burst_capacity),
            max_retries: other.max_retries.or(self.max_retries),
            backoff_factor: other.backoff_factor.or(self.backoff_factor),
            base_delay_ms: other.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            jitter: other.jitter.or(self.jitter),
            max_in_flight: other.max_in_flight.or(self.max_in_flight),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            page_size: other.page_size.or(self.page_size),
        }
    }

    /// Validates the merged values and builds the client settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingRequired`] when the organization or PAT is unset,
    /// [`ConfigError::InvalidValue`] for anything out of range.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let organization = required(&self.organization, "organization", "organization")?;
        let organization = organization.trim().trim_matches('/');
        if organization.is_empty() || organization.contains('/') {
            return Err(ConfigError::invalid(
                "organization",
                format!("'{organization}' is not an organization name"),
            ));
        }
        let pat = required(&self.pat, "pat", "PAT")?;

        let base_url = value_or(&self.base_url, DEFAULT_BASE_URL.to_string());
        let mut base = Url::parse(&base_url)
            .map_err(|e| ConfigError::invalid("base_url", format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::invalid(
                "base_url",
                format!("{base_url} cannot be used as a base URL"),
            ));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let organization_url = base
            .join(&format!("{organization}/"))
            .map_err(|e| ConfigError::invalid("organization", e.to_string()))?;

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig::new(
            value_or(&self.requests_per_second, defaults.requests_per_second()),
            value_or(&self.burst_capacity, defaults.burst_capacity()),
            value_or(&self.max_retries, defaults.max_retries()),
            value_or(&self.backoff_factor, defaults.backoff_factor()),
        )?
        .with_base_delay(
            self.base_delay_ms
                .as_deref()
                .map_or(defaults.base_delay(), |ms| Duration::from_millis(*ms)),
        )
        .with_max_delay(self.max_delay_ms.as_deref().map(|ms| Duration::from_millis(*ms)))
        .with_jitter(value_or(&self.jitter, defaults.jitter()));

        let timeout_secs = value_or(&self.timeout_secs, 30);
        if timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout_secs", "must be at least 1"));
        }
        let page_size = self.page_size.as_deref().copied();
        if page_size == Some(0) {
            return Err(ConfigError::invalid("page_size", "must be at least 1"));
        }

        let mut transport = TransportSettings::new(organization_url.clone());
        transport.pat = Some(SecretString::from(pat.to_string()));
        transport.timeout = Duration::from_secs(timeout_secs);
        transport.max_in_flight = value_or(&self.max_in_flight, 10);
        transport.api_version = value_or(&self.api_version, DEFAULT_API_VERSION.to_string());

        Ok(ResolvedConfig {
            organization: organization.to_string(),
            organization_url,
            rate_limit,
            transport,
            page_size,
        })
    }

    /// `(name, value, source)` rows for display; the PAT is masked.
    pub fn describe(&self) -> Vec<(&'static str, String, String)> {
        fn row<T: Display>(
            name: &'static str,
            prop: &Option<ParsedProperty<T>>,
        ) -> (&'static str, String, String) {
            match prop {
                Some(p) => (name, p.to_string(), p.describe_source()),
                None => (name, "-".to_string(), "unset".to_string()),
            }
        }

        let pat = match &self.pat {
            Some(p) => ("pat", "***".to_string(), p.describe_source()),
            None => ("pat", "-".to_string(), "unset".to_string()),
        };
        vec![
            row("organization", &self.organization),
            row("base_url", &self.base_url),
            pat,
            row("api_version", &self.api_version),
            row("requests_per_second", &self.requests_per_second),
            row("burst_capacity", &self.burst_capacity),
            row("max_retries", &self.max_retries),
            row("backoff_factor", &self.backoff_factor),
            row("base_delay_ms", &self.base_delay_ms),
            row("max_delay_ms", &self.max_delay_ms),
            row("jitter", &self.jitter),
            row("max_in_flight", &self.max_in_flight),
            row("timeout_secs", &self.timeout_secs),
            row("page_size", &self.page_size),
        ]
    }

    /// Create a sample config file for user reference.
    ///
    /// Returns the path and whether a file was written; an existing file is
    /// never overwritten.
    #[must_use = "this operation can fail and the result should be checked"]
    pub fn create_sample_config() -> Result<(PathBuf, bool)> {
        let config_path = Self::get_config_path()?;
        if config_path.exists() {
            return Ok((config_path, false));
        }

        if let Some(dir) = config_path.parent() {
            fs::create_dir_all(dir).map_err(|e| ConfigError::DirectoryCreationError {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let sample_config = r#"# devops-pacer configuration
# Location: ~/.config/devops-pacer/config.toml (or $XDG_CONFIG_HOME/devops-pacer/config.toml)
# Every value can be overridden by a DEVOPS_PACER_* environment variable or a CLI flag.

# Azure DevOps organization (required)
# organization = "your-organization"

# Personal Access Token (required, but consider DEVOPS_PACER_PAT instead)
# pat = "your-pat-token"

# Service root and REST API version
base_url = "https://dev.azure.com"
api_version = "7.1"

# Token bucket: sustained rate and burst size
requests_per_second = 10.0
burst_capacity = 50

# Retries for throttling, 5xx, timeouts and connection failures
max_retries = 3
backoff_factor = 2.0
base_delay_ms = 1000
# max_delay_ms = 60000
jitter = true

# Transport
max_in_flight = 10
timeout_secs = 30

# Records per page for listings (sent as $top)
# page_size = 100
"#;

        fs::write(&config_path, sample_config).with_context(|| {
            format!(
                "Failed to write sample config to: {}",
                config_path.display()
            )
        })?;
        Ok((config_path, true))
    }
}

fn required<'a>(
    prop: &'a Option<ParsedProperty<String>>,
    field: &str,
    flag_suffix: &str,
) -> Result<&'a str, ConfigError> {
    prop.as_deref()
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            field: field.to_string(),
            flag: field.replace('_', "-"),
            env_var: format!("{ENV_PREFIX}{}", flag_suffix.to_uppercase()),
        })
}

fn value_or<T: Clone>(prop: &Option<ParsedProperty<T>>, default: T) -> T {
    prop.as_deref().cloned().unwrap_or(default)
}
