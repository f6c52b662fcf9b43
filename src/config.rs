//! Evaluation run configuration.
//!
//! Loaded once from a TOML file (`floeval.toml` by default) and passed
//! explicitly to every stage. `.env` / environment variables can override
//! the store endpoint and supply the Postgres connection string.

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogLevel;
use crate::model::{Attribute, CMS_TO_CFS, EvalError, Frequency};
use crate::stations::RetryPolicy;

pub const DEFAULT_BUCKET_URL: &str = "https://streamflow-app-data.s3.amazonaws.com";

/// Environment variable overriding `store.bucket_url`.
pub const ENV_BUCKET_URL: &str = "FLOEVAL_BUCKET_URL";

/// Environment variable holding the Postgres connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

// ============================================================================
// Configuration sections
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EvalConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Model name as it appears in store keys, e.g. "NWM_v2.1".
    pub model: String,
    /// State partition, e.g. "al". Lower-cased on load.
    pub region: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,
    /// Convert to running within-year volumetric totals after resampling.
    #[serde(default)]
    pub cumulative_supply: bool,
    /// Attribute to partition sites by, as a column name or characteristic code.
    #[serde(default)]
    pub classify_by: Option<String>,
    /// Explicit candidate station ids. Empty means every station in the region.
    #[serde(default)]
    pub stations: Vec<String>,
    #[serde(default)]
    pub model_flow_units: FlowUnits,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowUnits {
    #[default]
    Cfs,
    Cms,
}

impl FlowUnits {
    /// Multiplier bringing values in these units to cfs.
    pub fn to_cfs_factor(self) -> f64 {
        match self {
            FlowUnits::Cfs => 1.0,
            FlowUnits::Cms => CMS_TO_CFS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Bucket,
    Local,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedBackend {
    #[default]
    Store,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub bucket_url: String,
    pub local_root: Option<PathBuf>,
    pub streamstats_key: String,
    pub crosswalk_key: String,
    pub observed_backend: ObservedBackend,
    /// Column holding discharge in observed CSVs.
    pub observed_flow_column: String,
    pub request_timeout_secs: u64,
    /// Only ever taken from the environment.
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Bucket,
            bucket_url: DEFAULT_BUCKET_URL.to_string(),
            local_root: None,
            streamstats_key: "Streamstats/Streamstats.csv".to_string(),
            crosswalk_key: "Crosswalk/usgs_nwm_crosswalk.csv".to_string(),
            observed_backend: ObservedBackend::Store,
            observed_flow_column: "USGS_flow".to_string(),
            request_timeout_secs: 30,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub cooldown_secs: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        // three-minute break keeps the public statistics service from blocking us
        Self {
            cooldown_secs: 181,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            console_timestamps: false,
        }
    }
}

fn default_frequency() -> Frequency {
    Frequency::Daily
}

// ============================================================================
// Loading
// ============================================================================

/// Reads, overrides from the environment, and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EvalConfig, EvalError> {
    let path = path.as_ref();
    dotenv::dotenv().ok();

    let text = std::fs::read_to_string(path)
        .map_err(|e| EvalError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let mut config = parse_config(&text)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parses configuration text without touching the environment.
pub fn parse_config(text: &str) -> Result<EvalConfig, EvalError> {
    let mut config: EvalConfig =
        toml::from_str(text).map_err(|e| EvalError::Config(format!("invalid configuration: {}", e)))?;
    config.run.region = config.run.region.trim().to_ascii_lowercase();
    Ok(config)
}

impl EvalConfig {
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BUCKET_URL).filter(|u| !u.trim().is_empty()) {
            self.store.bucket_url = url;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()) {
            self.store.database_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), EvalError> {
        if self.run.model.trim().is_empty() {
            return Err(EvalError::Config("run.model must not be empty".into()));
        }
        if self.run.region.is_empty() {
            return Err(EvalError::Config("run.region must not be empty".into()));
        }
        if self.run.start_date > self.run.end_date {
            return Err(EvalError::Config(format!(
                "run.start_date {} is after run.end_date {}",
                self.run.start_date, self.run.end_date
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(EvalError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.store.backend == StoreBackend::Local && self.store.local_root.is_none() {
            return Err(EvalError::Config("store.local_root is required for the local backend".into()));
        }
        if self.store.observed_backend == ObservedBackend::Postgres && self.store.database_url.is_none() {
            return Err(EvalError::Config(format!(
                "{} must be set for the postgres observed backend",
                ENV_DATABASE_URL
            )));
        }
        self.classify_attribute()?;
        Ok(())
    }

    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        (self.run.start_date, self.run.end_date)
    }

    pub fn classify_attribute(&self) -> Result<Option<Attribute>, EvalError> {
        self.run.classify_by.as_deref().map(str::parse).transpose()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            cooldown: Duration::from_secs(self.retry.cooldown_secs),
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.store.request_timeout_secs)
    }
}
