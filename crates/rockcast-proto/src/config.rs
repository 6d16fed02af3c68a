use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
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

/// Everything one streaming session needs: where to connect, where to read
/// now-playing metadata from, and how patient to be.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Stream endpoints in retry-priority order (first = preferred).
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    /// JSON status document polled while playing.
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long one candidate may take to report prepared/error.
    #[serde(default = "default_per_candidate_timeout_ms")]
    pub per_candidate_timeout_ms: u64,
    /// Fixed pause between two candidates.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Connect and total timeout for one status request.
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    /// Volume (0-100) used when no persisted value exists.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn per_candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.per_candidate_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
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

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            status_url: default_status_url(),
            poll_interval_ms: default_poll_interval_ms(),
            per_candidate_timeout_ms: default_per_candidate_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            default_volume: default_volume(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_candidates() -> Vec<String> {
    vec![
        "https://myradio24.org/25968".to_string(),
        "http://stream.radioparadise.com/rock-128".to_string(),
        "https://stream.live.vc.bbcmedia.co.uk/bbc_radio_one".to_string(),
    ]
}

fn default_status_url() -> String {
    "https://myradio24.com/users/25968/status.json".to_string()
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_per_candidate_timeout_ms() -> u64 {
    15_000
}

fn default_backoff_ms() -> u64 {
    1_000
}

fn default_status_timeout_ms() -> u64 {
    10_000
}

fn default_volume() -> u8 {
    70
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
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session.candidates.is_empty() {
            anyhow::bail!("[session] candidates must list at least one stream URL");
        }
        if self.session.candidates.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("[session] candidates must not contain empty entries");
        }
        if self.session.default_volume > 100 {
            anyhow::bail!(
                "[session] default_volume must be 0-100, got {}",
                self.session.default_volume
            );
        }
        let timings = [
            ("poll_interval_ms", self.session.poll_interval_ms),
            ("per_candidate_timeout_ms", self.session.per_candidate_timeout_ms),
            ("status_timeout_ms", self.session.status_timeout_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                anyhow::bail!("[session] {} must be greater than 0", name);
            }
        }
        Ok(())
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
