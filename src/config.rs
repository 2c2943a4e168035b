use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CrawlError, Result};

const CONFIG_ENV: &str = "PINK_SPIDER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    pub youtube_api_key: Option<String>,
    pub soundcloud_client_id: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub apple_music_developer_token: Option<String>,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_run_deadline")]
    pub run_deadline_secs: u64,

    #[serde(default = "default_concurrency")]
    pub crawl_concurrency: usize,

    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_enrich_batch_size")]
    pub enrich_batch_size: usize,

    #[serde(default = "default_velocity_alpha")]
    pub velocity_alpha: f64,

    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_database_url() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pink-spider")
        .join("pink-spider.db")
        .to_string_lossy()
        .to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

// Leaves headroom before the next hourly run starts.
fn default_run_deadline() -> u64 {
    50 * 60
}

fn default_concurrency() -> usize {
    5
}

fn default_max_failures() -> u32 {
    5
}

fn default_enrich_batch_size() -> usize {
    200
}

fn default_velocity_alpha() -> f64 {
    0.3
}

fn default_max_velocity() -> f64 {
    100.0
}

fn default_user_agent() -> String {
    format!("pink-spider/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            youtube_api_key: None,
            soundcloud_client_id: None,
            spotify_client_id: None,
            spotify_client_secret: None,
            apple_music_developer_token: None,
            fetch_timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            run_deadline_secs: default_run_deadline(),
            crawl_concurrency: default_concurrency(),
            max_consecutive_failures: default_max_failures(),
            enrich_batch_size: default_enrich_batch_size(),
            velocity_alpha: default_velocity_alpha(),
            max_velocity: default_max_velocity(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Reads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pink-spider")
            .join("config.toml")
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("YOUTUBE_API_KEY") {
            self.youtube_api_key = Some(v);
        }
        if let Some(v) = lookup("SOUNDCLOUD_API_KEY") {
            self.soundcloud_client_id = Some(v);
        }
        if let Some(v) = lookup("SPOTIFY_CLIENT_ID") {
            self.spotify_client_id = Some(v);
        }
        if let Some(v) = lookup("SPOTIFY_CLIENT_SECRET") {
            self.spotify_client_secret = Some(v);
        }
        if let Some(v) = lookup("APPLE_MUSIC_DEVELOPER_TOKEN") {
            self.apple_music_developer_token = Some(v);
        }
        if let Some(v) = lookup("FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = parse_var("FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RUN_DEADLINE_SECS") {
            self.run_deadline_secs = parse_var("RUN_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("CRAWL_CONCURRENCY") {
            self.crawl_concurrency = parse_var("CRAWL_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("MAX_CONSECUTIVE_FAILURES") {
            self.max_consecutive_failures = parse_var("MAX_CONSECUTIVE_FAILURES", &v)?;
        }
        if let Some(v) = lookup("ENRICH_BATCH_SIZE") {
            self.enrich_batch_size = parse_var("ENRICH_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("VELOCITY_ALPHA") {
            self.velocity_alpha = parse_var("VELOCITY_ALPHA", &v)?;
        }
        if let Some(v) = lookup("MAX_VELOCITY") {
            self.max_velocity = parse_var("MAX_VELOCITY", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.crawl_concurrency == 0 {
            return Err(CrawlError::Config("crawl_concurrency must be at least 1".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(CrawlError::Config(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if !(self.velocity_alpha > 0.0 && self.velocity_alpha <= 1.0) {
            return Err(CrawlError::Config("velocity_alpha must be in (0, 1]".to_string()));
        }
        if self.max_velocity.is_nan() || self.max_velocity <= 0.0 {
            return Err(CrawlError::Config("max_velocity must be positive".to_string()));
        }
        Ok(())
    }

    /// The SQLite path, with any `sqlite://` scheme removed.
    pub fn database_path(&self) -> &str {
        self.database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))
            .unwrap_or(&self.database_url)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CrawlError::Config(format!("invalid value for {key}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = toml::from_str(r#"youtube_api_key = "yt""#).unwrap();
        assert_eq!(config.youtube_api_key.as_deref(), Some("yt"));
        assert_eq!(config.crawl_concurrency, 5);
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.enrich_batch_size, 200);
        assert!((config.velocity_alpha - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let mut config: Config = toml::from_str("crawl_concurrency = 2").unwrap();
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite:///tmp/spider.db"),
            ("CRAWL_CONCURRENCY", "8"),
            ("SOUNDCLOUD_API_KEY", "sc-key"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.crawl_concurrency, 8);
        assert_eq!(config.soundcloud_client_id.as_deref(), Some("sc-key"));
        assert_eq!(config.database_path(), "/tmp/spider.db");
    }

    #[test]
    fn test_bad_number_is_a_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "FETCH_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = Config {
            crawl_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plain_path_is_used_as_is() {
        let config = Config {
            database_url: "/var/lib/spider.db".to_string(),
            ..Config::default()
        };
        assert_eq!(config.database_path(), "/var/lib/spider.db");
    }
}
