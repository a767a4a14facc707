use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

/// Remote APIs never accept more than this many ids in one batch request.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Remote Web API endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Market used for artist top-track queries.
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Recommendation synthesis knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// How many top tracks feed the seed-artist extraction.
    #[serde(default = "default_seed_tracks")]
    pub seed_tracks: usize,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
    /// Ids per membership query.  Clamped to `MAX_BATCH_SIZE`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Hand the track's web link to the desktop browser when remote
    /// playback cannot be controlled.
    #[serde(default = "default_open_browser")]
    pub open_browser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on how long the initial loading flag stays raised.
    #[serde(default = "default_loading_timeout_secs")]
    pub loading_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// File holding the bearer token, used when `TASTEFEED_TOKEN` is unset.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

impl FeedConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            market: default_market(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            seed_tracks: default_seed_tracks(),
            pool_capacity: default_pool_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            open_browser: default_open_browser(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loading_timeout_secs: default_loading_timeout_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_market() -> String {
    "US".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_seed_tracks() -> usize {
    5
}

fn default_pool_capacity() -> usize {
    50
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_open_browser() -> bool {
    true
}

fn default_loading_timeout_secs() -> u64 {
    10
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_token_file() -> PathBuf {
    platform::data_dir().join("token")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.api.market, "US");
        assert!(config.api.base_url.starts_with("https://"));
        assert_eq!(config.playback.poll_interval_secs, 3);
        assert_eq!(config.session.loading_timeout_secs, 10);
        assert_eq!(config.feed.seed_tracks, 5);
        assert_eq!(config.feed.pool_capacity, 50);
        assert!(config.auth.token_file.ends_with("tastefeed/token"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [api]
            market = "SE"

            [playback]
            poll_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.api.market, "SE");
        assert_eq!(config.api.base_url, "https://api.spotify.com/v1");
        assert_eq!(config.playback.poll_interval_secs, 5);
        assert!(config.playback.open_browser);
        assert_eq!(config.feed.batch_size, 50);
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let mut feed = FeedConfig::default();
        feed.batch_size = 500;
        assert_eq!(feed.effective_batch_size(), MAX_BATCH_SIZE);
        feed.batch_size = 0;
        assert_eq!(feed.effective_batch_size(), 1);
    }
}
