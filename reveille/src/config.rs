//! Daemon configuration.
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! environment variables, each layer overriding the one before.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::alarm::{DEFAULT_STEP_DELAY_SECS, DEFAULT_VOLUME_STEPS};
use crate::tracing::prelude::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the automation hub.
    pub hub_url: String,

    /// Long-lived access token for the hub.
    pub hub_token: String,

    /// Per-request timeout for hub calls, in seconds.
    pub hub_timeout_secs: u64,

    /// Media player that plays the alarm and speaks the briefing.
    pub media_player_entity: String,

    /// Weather entity read for the briefing.
    pub weather_entity: String,

    /// Presence subject given to seeded alarms.
    pub person_entity: String,

    pub gotify_url: Option<String>,
    pub gotify_token: Option<String>,

    /// Ramp given to seeded alarms.
    pub volume_steps: Vec<f32>,
    pub volume_step_delay_secs: u64,

    /// How long the alarm plays before the morning briefing.
    pub briefing_wait_secs: u64,

    /// Alarm store file.
    pub alarms_path: PathBuf,

    pub log_level: String,

    /// Listen address of the control API.
    pub api_listen: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_url: "http://homeassistant:8123".to_string(),
            hub_token: String::new(),
            hub_timeout_secs: 10,
            media_player_entity: "media_player.home_assistant_voice_pe".to_string(),
            weather_entity: "weather.forecast_home".to_string(),
            person_entity: "person.user".to_string(),
            gotify_url: None,
            gotify_token: None,
            volume_steps: DEFAULT_VOLUME_STEPS.to_vec(),
            volume_step_delay_secs: DEFAULT_STEP_DELAY_SECS,
            briefing_wait_secs: 60,
            alarms_path: PathBuf::from("alarms.json"),
            log_level: "info".to_string(),
            api_listen: SocketAddr::from(([127, 0, 0, 1], 7786)),
        }
    }
}

impl Config {
    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment variables. Empty values are
    /// ignored, as are numbers that fail to parse (with a warning).
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("HA_URL") {
            self.hub_url = v;
        }
        if let Some(v) = var("HA_TOKEN") {
            self.hub_token = v;
        }
        if let Some(v) = var("MEDIA_PLAYER_ENTITY") {
            self.media_player_entity = v;
        }
        if let Some(v) = var("WEATHER_ENTITY") {
            self.weather_entity = v;
        }
        if let Some(v) = var("PERSON_ENTITY") {
            self.person_entity = v;
        }
        if let Some(v) = var("GOTIFY_URL") {
            self.gotify_url = Some(v);
        }
        if let Some(v) = var("GOTIFY_TOKEN") {
            self.gotify_token = Some(v);
        }
        if let Some(v) = var("ALARMS_PATH") {
            self.alarms_path = PathBuf::from(v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }

        if let Some(v) = var("VOLUME_STEPS") {
            match v
                .split(',')
                .map(|s| s.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(steps) => self.volume_steps = steps,
                Err(_) => warn!(value = %v, "Invalid VOLUME_STEPS, keeping {:?}", self.volume_steps),
            }
        }
        if let Some(v) = var("VOLUME_STEP_DELAY") {
            match v.trim().parse() {
                Ok(secs) => self.volume_step_delay_secs = secs,
                Err(_) => warn!(value = %v, "Invalid VOLUME_STEP_DELAY, ignoring"),
            }
        }
        if let Some(v) = var("API_LISTEN") {
            match v.trim().parse() {
                Ok(addr) => self.api_listen = addr,
                Err(_) => warn!(value = %v, "Invalid API_LISTEN, ignoring"),
            }
        }
    }

    pub fn hub_timeout(&self) -> Duration {
        Duration::from_secs(self.hub_timeout_secs)
    }

    pub fn briefing_wait(&self) -> Duration {
        Duration::from_secs(self.briefing_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_reference_service() {
        let config = Config::default();
        assert_eq!(config.volume_steps, vec![0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert_eq!(config.volume_step_delay_secs, 20);
        assert_eq!(config.briefing_wait(), Duration::from_secs(60));
        assert_eq!(config.hub_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides_fields() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("HA_URL", "http://hub.local:8123"),
            ("VOLUME_STEPS", "0.1, 0.4,0.9"),
            ("VOLUME_STEP_DELAY", "5"),
            ("GOTIFY_URL", "https://push.example"),
            ("LOG_LEVEL", "DEBUG"),
        ]));

        assert_eq!(config.hub_url, "http://hub.local:8123");
        assert_eq!(config.volume_steps, vec![0.1, 0.4, 0.9]);
        assert_eq!(config.volume_step_delay_secs, 5);
        assert_eq!(config.gotify_url.as_deref(), Some("https://push.example"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn invalid_numbers_are_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("VOLUME_STEPS", "loud,louder"),
            ("VOLUME_STEP_DELAY", "soon"),
            ("API_LISTEN", "nowhere"),
            ("HA_TOKEN", "  "),
        ]));

        let defaults = Config::default();
        assert_eq!(config.volume_steps, defaults.volume_steps);
        assert_eq!(config.volume_step_delay_secs, defaults.volume_step_delay_secs);
        assert_eq!(config.api_listen, defaults.api_listen);
        assert_eq!(config.hub_token, "");
    }

    #[test]
    #[serial_test::serial]
    fn file_values_are_layered_under_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"hub_url": "http://from-file:8123", "briefing_wait_secs": 30}}"#
        )
        .unwrap();

        // SAFETY: serialized with other environment-touching tests.
        unsafe { std::env::set_var("HA_URL", "http://from-env:8123") };
        let config = Config::load(Some(file.path())).unwrap();
        unsafe { std::env::remove_var("HA_URL") };

        assert_eq!(config.hub_url, "http://from-env:8123");
        assert_eq!(config.briefing_wait_secs, 30);
        assert_eq!(config.media_player_entity, Config::default().media_player_entity);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/reveille.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
