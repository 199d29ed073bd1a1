use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::SyncError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_url: String,
    pub refresh: RefreshConfig,
    pub push: PushConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u8,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub hub_path: String,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// `None` keeps retrying forever.
    pub max_attempts: Option<u32>,
    /// How often the client pings an idle hub connection.
    pub keep_alive_secs: u64,
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub max_entries: usize,
    pub toast_duration_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            refresh: RefreshConfig::default(),
            push: PushConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 45,
            request_timeout_secs: 10,
            max_retries: 1,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            hub_path: "/hubs/notifications".to_string(),
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_attempts: None,
            keep_alive_secs: 15,
            handshake_timeout_secs: 15,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            toast_duration_ms: 5_000,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PushConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

impl NotificationConfig {
    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.toast_duration_ms)
    }
}

impl ClientConfig {
    /// Path of the configuration file, creating its directory if needed.
    pub fn config_file_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = dirs::config_dir().ok_or("could not locate the configuration directory")?;

        let app_config_dir = config_dir.join("matchwatch");
        std::fs::create_dir_all(&app_config_dir)?;

        Ok(app_config_dir.join("config.json"))
    }

    /// Loads the configuration file, or falls back to (and writes) the defaults.
    pub fn load() -> Self {
        match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "could not load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "could not write default configuration");
                }
                default_config
            }
        }
    }

    fn load_from_file() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = Self::config_file_path()?;
        let config_content = std::fs::read_to_string(config_path)?;
        let config: ClientConfig = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = Self::config_file_path()?;
        let config_json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, config_json)?;
        Ok(())
    }

    /// REST resource under the API root, e.g. `endpoint("matches/live")`.
    pub fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        endpoint(&self.api_url, path)
    }

    /// Push hub address: the API root with its `api` segment stripped and
    /// the hub path appended.
    pub fn hub_url(&self) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.api_url)?;
        let kept: Vec<String> = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("api"))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let hub = self.push.hub_path.trim_matches('/');

        let mut path = String::new();
        for segment in kept.iter().map(String::as_str).chain(hub.split('/')) {
            if segment.is_empty() {
                continue;
            }
            path.push('/');
            path.push_str(segment);
        }
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}

pub(crate) fn endpoint(api_url: &str, path: &str) -> Result<Url, SyncError> {
    let base = format!("{}/", api_url.trim_end_matches('/'));
    Ok(Url::parse(&base)?.join(path.trim_start_matches('/'))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_strips_api_segment() {
        let config = ClientConfig {
            api_url: "https://example.com/api".into(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.hub_url().unwrap().as_str(),
            "https://example.com/hubs/notifications"
        );
    }

    #[test]
    fn hub_url_keeps_other_prefix_segments() {
        let config = ClientConfig {
            api_url: "http://localhost:5000/backend/api/".into(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.hub_url().unwrap().as_str(),
            "http://localhost:5000/backend/hubs/notifications"
        );
    }

    #[test]
    fn endpoint_joins_under_api_root() {
        let config = ClientConfig::default();
        assert_eq!(
            config.endpoint("matches/live").unwrap().as_str(),
            "http://localhost:5000/api/matches/live"
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"refresh":{"interval_secs":10}}"#).unwrap();
        assert_eq!(config.refresh.interval_secs, 10);
        assert_eq!(config.refresh.request_timeout_secs, 10);
        assert_eq!(config.notifications.max_entries, 50);
    }
}
