//! Konfiguration
//!
//! `TalkyConfig` wird aus Umgebungsvariablen gelesen:
//!
//! | Variable                  | Default                          |
//! |---------------------------|----------------------------------|
//! | `TALKY_SIGNALING_URL`     | `https://signal.talky.app`       |
//! | `TALKY_USERNAME`          | `$USER` bzw. `talky-user`        |
//! | `TALKY_LANGUAGE`          | `en`                             |
//! | `TALKY_DATA_DIR`          | Plattform-Datenverzeichnis       |
//! | `TALKY_TURN_URL`          | -                                |
//! | `TALKY_TURN_USERNAME`     | -                                |
//! | `TALKY_TURN_CREDENTIAL`   | -                                |
//! | `TALKY_RING_TIMEOUT_SECS` | `30`                             |

use crate::translation::is_valid_language_code;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "https://signal.talky.app";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {reason}")]
    InvalidUrl { var: &'static str, reason: String },

    #[error("{var} must be a positive number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} is not a valid language code")]
    InvalidLanguage(String),

    #[error("TALKY_TURN_URL requires TALKY_TURN_USERNAME and TALKY_TURN_CREDENTIAL")]
    IncompleteTurn,

    #[error("Could not determine app data directory")]
    NoDataDir,
}

// ============================================================================
// CONTROLLER CONFIG
// ============================================================================

/// Kapazitäten und Timer eines CallControllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Kapazität der Kommando-Queue
    pub command_capacity: usize,
    /// Kapazität des `CallEvent`-Broadcasts
    pub event_capacity: usize,
    /// Ausgehender Anruf ohne Antwort wird danach `failed`
    pub ring_timeout: Duration,
    /// Gültigkeit ausgehender Einladungen
    pub invitation_ttl: Duration,
    /// Intervall für Ablauf-Prüfungen
    pub tick_interval: Duration,
    /// `None` deaktiviert das Abfragen der Netzwerkstatistik
    pub stats_interval: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            event_capacity: 256,
            ring_timeout: Duration::from_secs(30),
            invitation_ttl: Duration::from_secs(60),
            tick_interval: Duration::from_secs(1),
            stats_interval: Some(Duration::from_secs(2)),
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkyConfig {
    pub signaling_url: Url,
    pub username: String,
    pub language: String,
    pub data_dir: PathBuf,
    pub turn: Option<TurnServer>,
    pub controller: ControllerConfig,
}

impl TalkyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Konfiguration über eine beliebige Lookup-Funktion
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get("TALKY_SIGNALING_URL").unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        let signaling_url = parse_url("TALKY_SIGNALING_URL", &raw_url)?;

        let username = get("TALKY_USERNAME")
            .or_else(|| get("USER"))
            .unwrap_or_else(|| "talky-user".to_string());

        let language = get("TALKY_LANGUAGE").unwrap_or_else(|| "en".to_string());
        if !is_valid_language_code(&language) {
            return Err(ConfigError::InvalidLanguage(language));
        }

        let data_dir = match get("TALKY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let turn = match (
            get("TALKY_TURN_URL"),
            get("TALKY_TURN_USERNAME"),
            get("TALKY_TURN_CREDENTIAL"),
        ) {
            (None, _, _) => None,
            (Some(url), Some(username), Some(credential)) => {
                parse_url("TALKY_TURN_URL", &url)?;
                Some(TurnServer {
                    url,
                    username,
                    credential,
                })
            }
            _ => return Err(ConfigError::IncompleteTurn),
        };

        let mut controller = ControllerConfig::default();
        if let Some(raw) = get("TALKY_RING_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidNumber {
                    var: "TALKY_RING_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
            controller.ring_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            signaling_url,
            username,
            language,
            data_dir,
            turn,
            controller,
        })
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("keys").join("identity.key")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        var,
        reason: e.to_string(),
    })
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("app", "talky", "talky")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<TalkyConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TalkyConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("TALKY_DATA_DIR", "/tmp/talky")]).unwrap();

        assert_eq!(config.signaling_url.as_str(), "https://signal.talky.app/");
        assert_eq!(config.username, "talky-user");
        assert_eq!(config.language, "en");
        assert!(config.turn.is_none());
        assert_eq!(config.controller, ControllerConfig::default());
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/tmp/talky/keys/identity.key")
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TALKY_SIGNALING_URL", "http://localhost:8787"),
            ("TALKY_USERNAME", "alice"),
            ("TALKY_LANGUAGE", "de"),
            ("TALKY_DATA_DIR", "/tmp/talky"),
            ("TALKY_TURN_URL", "turn:turn.talky.app:3478"),
            ("TALKY_TURN_USERNAME", "alice"),
            ("TALKY_TURN_CREDENTIAL", "secret"),
            ("TALKY_RING_TIMEOUT_SECS", "45"),
        ])
        .unwrap();

        assert_eq!(config.signaling_url.host_str(), Some("localhost"));
        assert_eq!(config.username, "alice");
        assert_eq!(config.language, "de");
        assert_eq!(config.turn.unwrap().credential, "secret");
        assert_eq!(config.controller.ring_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("TALKY_SIGNALING_URL", "not a url"), ("TALKY_DATA_DIR", "/tmp")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert_eq!(
            config_from(&[("TALKY_RING_TIMEOUT_SECS", "0"), ("TALKY_DATA_DIR", "/tmp")]),
            Err(ConfigError::InvalidNumber {
                var: "TALKY_RING_TIMEOUT_SECS",
                value: "0".to_string()
            })
        );
        assert_eq!(
            config_from(&[("TALKY_TURN_URL", "turn:x"), ("TALKY_DATA_DIR", "/tmp")]),
            Err(ConfigError::IncompleteTurn)
        );
        assert_eq!(
            config_from(&[("TALKY_LANGUAGE", "Deutsch"), ("TALKY_DATA_DIR", "/tmp")]),
            Err(ConfigError::InvalidLanguage("Deutsch".to_string()))
        );
    }
}
