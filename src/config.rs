use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::RetryPolicy;
use crate::error::{AppError, Result};
use crate::schedule::Cadence;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory the external fetch/crawl stage drops message files into.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,

    pub claude_api_key: Option<String>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub digest: DigestConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_frequency")]
    pub frequency: String,
    #[serde(default = "default_weekly_day")]
    pub weekly_day: String,
    #[serde(default = "default_monthly_day")]
    pub monthly_day: u32,
    #[serde(default = "default_delivery_time")]
    pub delivery_time: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_minutes: u32,
    #[serde(default = "default_wake_threshold")]
    pub wake_threshold_minutes: u32,
    #[serde(default = "default_network_wait")]
    pub network_wait_secs: u64,
    #[serde(default = "default_network_check_host")]
    pub network_check_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_similarity_threshold")]
    pub title_threshold: f64,
    #[serde(default = "default_similarity_threshold")]
    pub body_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_min_substantive")]
    pub min_substantive_content_length: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub lock_retries: u32,
    #[serde(default = "default_lock_base_delay")]
    pub lock_base_delay_ms: u64,
    #[serde(default = "default_lock_jitter")]
    pub lock_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_ad_keywords")]
    pub ad_keywords: Vec<String>,
}

fn data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsletter-digest");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
}

fn default_db_path() -> String {
    data_dir().join("digest.db").to_string_lossy().to_string()
}

fn default_spool_dir() -> String {
    data_dir().join("spool").to_string_lossy().to_string()
}

fn default_outbox_dir() -> String {
    data_dir().join("outbox").to_string_lossy().to_string()
}

fn default_frequency() -> String {
    "weekly".to_string()
}

fn default_weekly_day() -> String {
    "monday".to_string()
}

fn default_monthly_day() -> u32 {
    1
}

fn default_delivery_time() -> String {
    "08:00".to_string()
}

fn default_poll_interval() -> u32 {
    15
}

fn default_fetch_interval() -> u32 {
    60
}

fn default_wake_threshold() -> u32 {
    3
}

fn default_network_wait() -> u64 {
    30
}

fn default_network_check_host() -> String {
    "api.anthropic.com:443".to_string()
}

fn default_lookback_days() -> u32 {
    14
}

fn default_similarity_threshold() -> f64 {
    0.95
}

fn default_token_budget() -> usize {
    // 180K context minus room for the instruction and the response
    160_000
}

fn default_min_substantive() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_busy_timeout() -> u64 {
    1000
}

fn default_lock_base_delay() -> u64 {
    500
}

fn default_lock_jitter() -> u64 {
    500
}

fn default_ad_keywords() -> Vec<String> {
    ["sponsored", "advertisement", "promoted", "partner content"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            weekly_day: default_weekly_day(),
            monthly_day: default_monthly_day(),
            delivery_time: default_delivery_time(),
            poll_interval_minutes: default_poll_interval(),
            fetch_interval_minutes: default_fetch_interval(),
            wake_threshold_minutes: default_wake_threshold(),
            network_wait_secs: default_network_wait(),
            network_check_host: default_network_check_host(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            title_threshold: default_similarity_threshold(),
            body_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            min_substantive_content_length: default_min_substantive(),
            max_retries: default_max_retries(),
            model: default_model(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout(),
            lock_retries: default_max_retries(),
            lock_base_delay_ms: default_lock_base_delay(),
            lock_jitter_ms: default_lock_jitter(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_token: None,
            outbox_dir: default_outbox_dir(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            ad_keywords: default_ad_keywords(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            spool_dir: default_spool_dir(),
            claude_api_key: None,
            schedule: ScheduleConfig::default(),
            dedup: DedupConfig::default(),
            digest: DigestConfig::default(),
            database: DatabaseConfig::default(),
            delivery: DeliveryConfig::default(),
            content: ContentConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), writing a default file
    /// when none exists yet. Invalid settings are fatal here rather than at
    /// the first scheduler tick.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsletter-digest")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        self.schedule.cadence()?;
        self.schedule.delivery_time()?;

        if self.schedule.poll_interval_minutes == 0 {
            return Err(AppError::Config(
                "schedule.poll_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.schedule.fetch_interval_minutes == 0 {
            return Err(AppError::Config(
                "schedule.fetch_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.digest.token_budget == 0 {
            return Err(AppError::Config("digest.token_budget must be > 0".to_string()));
        }
        for (name, value) in [
            ("dedup.title_threshold", self.dedup.title_threshold),
            ("dedup.body_threshold", self.dedup.body_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!("{} must be in [0.0, 1.0]", name)));
            }
        }
        Ok(())
    }
}

impl ScheduleConfig {
    pub fn cadence(&self) -> Result<Cadence> {
        match self.frequency.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Cadence::Daily),
            "weekly" => {
                let day = self.weekly_day.trim().parse::<Weekday>().map_err(|_| {
                    AppError::Config(format!(
                        "schedule.weekly_day '{}' is not a weekday",
                        self.weekly_day
                    ))
                })?;
                Ok(Cadence::Weekly(day))
            }
            "monthly" => {
                if !(1..=31).contains(&self.monthly_day) {
                    return Err(AppError::Config(format!(
                        "schedule.monthly_day must be 1-31, got {}",
                        self.monthly_day
                    )));
                }
                Ok(Cadence::Monthly(self.monthly_day))
            }
            other => Err(AppError::Config(format!(
                "Unknown schedule.frequency '{}'. Must be daily, weekly, or monthly.",
                other
            ))),
        }
    }

    pub fn delivery_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.delivery_time.trim(), "%H:%M").map_err(|_| {
            AppError::Config(format!(
                "schedule.delivery_time '{}' must be HH:MM",
                self.delivery_time
            ))
        })
    }
}

impl DatabaseConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.lock_retries,
            base_delay: Duration::from_millis(self.lock_base_delay_ms),
            max_jitter: Duration::from_millis(self.lock_jitter_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule.cadence().unwrap(), Cadence::Weekly(Weekday::Mon));
        assert_eq!(config.dedup.lookback_days, 14);
        assert_eq!(config.digest.max_retries, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"

            [schedule]
            frequency = "monthly"
            monthly_day = 15
            delivery_time = "07:30"
            "#,
        )
        .unwrap();
        assert_eq!(config.schedule.cadence().unwrap(), Cadence::Monthly(15));
        assert_eq!(
            config.schedule.delivery_time().unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert_eq!(config.schedule.poll_interval_minutes, 15);
        assert_eq!(config.digest.token_budget, 160_000);
    }

    #[test]
    fn test_bad_cadence_is_rejected() {
        let mut config = Config::default();
        config.schedule.frequency = "fortnightly".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        config.schedule.weekly_day = "someday".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        let mut config = Config::default();
        config.schedule.frequency = "monthly".to_string();
        config.schedule.monthly_day = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_bad_delivery_time_is_rejected() {
        let mut config = Config::default();
        config.schedule.delivery_time = "8 o'clock".to_string();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_load_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(config.schedule.frequency, reloaded.schedule.frequency);
    }
}
