//! Configuration types for podcast-backup

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for an archive run
///
/// Every field has a default, so an empty JSON object (`{}`) is a valid config.
/// The binary layers command-line flags on top of an optional config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the archive (default: current directory)
    #[serde(default = "default_destination")]
    pub destination: PathBuf,

    /// Maximum number of simultaneous HTTP requests, feed pages and files combined (default: 8)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Maximum number of feeds traversed at the same time (default: 4)
    #[serde(default = "default_max_concurrent_feeds")]
    pub max_concurrent_feeds: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Total timeout for fetching one feed page (default: 60 seconds)
    ///
    /// Media downloads have no total timeout since episodes can be hundreds of megabytes.
    #[serde(default = "default_feed_timeout", with = "duration_serde")]
    pub feed_timeout: Duration,

    /// Longest wait for response headers or the next body chunk of a download (default: 60 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Maximum filename length in bytes, temp suffix excluded (default: 240)
    #[serde(default = "default_max_filename_bytes")]
    pub max_filename_bytes: usize,

    /// Write `{episode}.json` next to each episode and the feed's `meta.json` (default: true)
    #[serde(default = "default_true")]
    pub write_episode_metadata: bool,

    /// Write shownotes as `{episode}.html` / `{episode}.txt` (default: true)
    #[serde(default = "default_true")]
    pub write_shownotes: bool,

    /// Retry policy for feed pages and file downloads
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_concurrent_feeds: default_max_concurrent_feeds(),
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            feed_timeout: default_feed_timeout(),
            idle_timeout: default_idle_timeout(),
            max_filename_bytes: default_max_filename_bytes(),
            write_episode_metadata: true,
            write_shownotes: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load a config from a JSON file
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            Error::config(
                "config",
                format!("cannot read config file {}: {}", path.display(), e),
            )
        })?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break a run
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "max_concurrent_downloads",
                "max_concurrent_downloads must be at least 1",
            ));
        }
        if self.max_concurrent_feeds == 0 {
            return Err(Error::config(
                "max_concurrent_feeds",
                "max_concurrent_feeds must be at least 1",
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::config(
                "idle_timeout",
                "idle_timeout must be greater than zero",
            ));
        }
        // date prefix, separator, a hash marker and an extension must still fit
        if self.max_filename_bytes < 64 {
            return Err(Error::config(
                "max_filename_bytes",
                "max_filename_bytes must be at least 64",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "retry.backoff_multiplier must be >= 1.0",
            ));
        }
        Ok(())
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

// Default value functions
fn default_destination() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_concurrent_downloads() -> usize {
    8
}

fn default_max_concurrent_feeds() -> usize {
    4
}

fn default_user_agent() -> String {
    format!("podcast-backup/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_filename_bytes() -> usize {
    240
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
