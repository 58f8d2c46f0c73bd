use crate::errors::ConfigError;
use crate::schedule::Cadence;
use crate::scrapers::fetcher::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "stock_pipeline.toml";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Top-level settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    /// 数据窗口（天）
    pub lookback_days: u32,
    pub data_dir: String,
    pub output_dir: String,
    pub sources: Vec<SourceConfig>,
    pub fetch: FetchConfig,
    pub cleaning: CleaningConfig,
    pub analysis: AnalysisConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Daily OHLCV history from the chart JSON endpoint
    YahooChart,
    /// Current quote snapshot scraped from the HTML quote page
    YahooQuote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Minimum delay between two requests to this source.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Multiplier turning the source's price unit into the dataset unit.
    #[serde(default = "default_price_scale")]
    pub price_scale: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn new(id: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            base_url: None,
            min_delay_ms: default_min_delay_ms(),
            price_scale: default_price_scale(),
            enabled: true,
        }
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_concurrency: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            max_concurrency: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Copy the value from the nearest-in-time record of the same symbol
    Nearest,
    /// Use the mean of the symbol's present values
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Drop when more than this fraction of required fields is missing.
    pub max_missing_fraction: f64,
    pub outlier_std_threshold: f64,
    pub impute: ImputeStrategy,
    pub price_precision: u32,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            max_missing_fraction: 0.5,
            outlier_std_threshold: 3.0,
            impute: ImputeStrategy::Nearest,
            price_precision: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum number of returns for descriptive return statistics.
    pub min_history: usize,
    /// Minimum number of returns for volatility / drawdown / VaR.
    pub risk_window: usize,
    /// Minimum overlapping returns for a correlation pair.
    pub correlation_min_overlap: usize,
    pub var_confidence: f64,
    pub clusters: usize,
    pub cluster_seed: u64,
    pub cluster_restarts: usize,
    pub cluster_max_iterations: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_history: 2,
            risk_window: 20,
            correlation_min_overlap: 10,
            var_confidence: 0.95,
            clusters: 3,
            cluster_seed: 42,
            cluster_restarts: 10,
            cluster_max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cadence: Cadence,
    /// Attempts per tick when the run fails at pipeline level.
    pub run_attempts: u32,
    pub retry_delay_secs: u64,
    pub delivery_attempts: u32,
    pub delivery_backoff_ms: u64,
    pub notify_on_failure: bool,
    pub notifications: Vec<NotificationTarget>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            run_attempts: 2,
            retry_delay_secs: 60,
            delivery_attempts: 3,
            delivery_backoff_ms: 2000,
            notify_on_failure: true,
            notifications: Vec::new(),
        }
    }
}

impl ScheduleConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn delivery_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationTarget {
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        username: String,
        /// Name of the environment variable holding the SMTP password.
        #[serde(default = "default_password_env")]
        password_env: String,
        from: String,
        to: Vec<String>,
        #[serde(default = "default_true")]
        attach_artifacts: bool,
    },
    Webhook {
        url: String,
        #[serde(default)]
        bearer_token_env: Option<String>,
    },
}

impl NotificationTarget {
    pub fn describe(&self) -> String {
        match self {
            NotificationTarget::Email { to, .. } => format!("email:{}", to.join(",")),
            NotificationTarget::Webhook { url, .. } => format!("webhook:{}", url),
        }
    }
}

fn default_min_delay_ms() -> u64 {
    2000
}

fn default_price_scale() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    587
}

fn default_password_env() -> String {
    "SMTP_PASSWORD".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "META", "NFLX", "NVDA", "AMD", "INTC"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            lookback_days: 180,
            data_dir: "data".to_string(),
            output_dir: "output".to_string(),
            sources: vec![SourceConfig::new("yahoo", SourceKind::YahooChart)],
            fetch: FetchConfig::default(),
            cleaning: CleaningConfig::default(),
            analysis: AnalysisConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, parse and validate a TOML settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Invalid("symbol list is empty".to_string()));
        }
        if let Some(blank) = self.symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("blank symbol in list: {:?}", blank)));
        }
        if self.lookback_days == 0 {
            return Err(ConfigError::Invalid("lookback_days must be positive".to_string()));
        }
        if !self.sources.iter().any(|s| s.enabled) {
            return Err(ConfigError::Invalid("no enabled source".to_string()));
        }
        for source in &self.sources {
            if !(source.price_scale.is_finite() && source.price_scale > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "source {} has invalid price_scale {}", source.id, source.price_scale
                )));
            }
        }
        let frac = self.cleaning.max_missing_fraction;
        if !(0.0..=1.0).contains(&frac) {
            return Err(ConfigError::Invalid(format!("max_missing_fraction {} outside [0, 1]", frac)));
        }
        if self.cleaning.outlier_std_threshold <= 0.0 {
            return Err(ConfigError::Invalid("outlier_std_threshold must be positive".to_string()));
        }
        let conf = self.analysis.var_confidence;
        if !(conf > 0.0 && conf < 1.0) {
            return Err(ConfigError::Invalid(format!("var_confidence {} outside (0, 1)", conf)));
        }
        if self.analysis.clusters == 0 {
            return Err(ConfigError::Invalid("clusters must be at least 1".to_string()));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".to_string()));
        }
        self.schedule.cadence.validate()?;
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_data_dir(mut self, dir: &str) -> Self {
        self.data_dir = dir.to_string();
        self
    }

    pub fn with_output_dir(mut self, dir: &str) -> Self {
        self.output_dir = dir.to_string();
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceConfig>) -> Self {
        self.sources = sources;
        self
    }
}

/// Where the scheduler reads its settings from before each run.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Fixed(PipelineConfig),
}

impl ConfigSource {
    pub fn load(&self) -> Result<PipelineConfig, ConfigError> {
        match self {
            ConfigSource::File(path) => PipelineConfig::load(path),
            ConfigSource::Fixed(config) => {
                config.validate()?;
                Ok(config.clone())
            }
        }
    }
}
