//! Configuration loading and persistence.
//!
//! Handles reading and writing the querybot configuration file.
//! The API key is never written to disk; it comes from the
//! `QUERYBOT_APIKEY` environment variable (or is injected by tests).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::listener::ListenerConfig;
use crate::router::{ModuleId, RoutingTable};
use crate::session::SessionConfig;

/// Configuration for the querybot daemon.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Query host.
    pub host: String,
    /// Query port.
    pub port: u16,
    /// API key - NOT serialized to disk (env var only).
    #[serde(skip)]
    pub apikey: String,
    /// Server connection handle to register events on (0 = all tabs).
    pub schandlerid: i64,
    /// Seconds of event-stream silence before a keep-alive.
    pub idle_timeout_secs: u64,
    /// Seconds allowed for transport open and each handshake line.
    pub connect_timeout_secs: u64,
    /// Connect attempts per cycle before giving up.
    pub connect_attempts: u32,
    /// Fixed delay in seconds between connect attempts.
    pub connect_retry_delay_secs: u64,
    /// First write-retry delay in seconds; doubles per retry.
    pub send_retry_base_secs: u64,
    /// Write retries after the initial attempt.
    pub send_retry_limit: u32,
    /// Seconds allowed per expected command-response line.
    pub response_timeout_secs: u64,
    /// Capacity of each module queue and the outbound queue.
    pub queue_capacity: usize,
    /// Prefix marking a chat message as a command.
    pub command_prefix: String,
    /// Event names to register for.
    pub events: Vec<String>,
    /// Event name to destination module(s).
    pub event_routes: HashMap<String, Vec<ModuleId>>,
    /// Chat command word to owning module.
    pub command_routes: HashMap<String, ModuleId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25639,
            apikey: String::new(),
            schandlerid: 0,
            idle_timeout_secs: 120,
            connect_timeout_secs: 5,
            connect_attempts: 3,
            connect_retry_delay_secs: 3,
            send_retry_base_secs: 5,
            send_retry_limit: 3,
            response_timeout_secs: 2,
            queue_capacity: 64,
            command_prefix: "!".to_string(),
            events: vec![
                "notifytextmessage".to_string(),
                "notifycliententerview".to_string(),
                "notifyclientleftview".to_string(),
            ],
            event_routes: HashMap::from([
                (
                    "notifycliententerview".to_string(),
                    vec![ModuleId::Presence],
                ),
                (
                    "notifyclientleftview".to_string(),
                    vec![ModuleId::Presence],
                ),
            ]),
            command_routes: HashMap::from([
                ("ping".to_string(), ModuleId::Chat),
                ("move".to_string(), ModuleId::Control),
            ]),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `QUERYBOT_CONFIG_DIR` overrides the platform default
    /// (e.g. `~/.config/querybot` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("QUERYBOT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("querybot")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Reads `path` if given, otherwise `config.json` in the config
    /// directory; falls back to defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => {
                let default_path = Self::config_dir()?.join("config.json");
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("QUERYBOT_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("QUERYBOT_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.port = port;
            }
        }
        if let Ok(apikey) = std::env::var("QUERYBOT_APIKEY") {
            self.apikey = apikey;
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the API key is never saved.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        // Restrictive permissions (owner read/write only).
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Sanity-check values that would otherwise fail deep inside the
    /// bridge at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.is_empty() {
            anyhow::bail!("command_prefix must not be empty");
        }
        if self.events.is_empty() {
            anyhow::bail!("events must name at least one notification to register");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.connect_attempts == 0 {
            anyhow::bail!("connect_attempts must be at least 1");
        }
        for word in self.command_routes.keys() {
            let well_formed =
                !word.is_empty() && word.chars().all(|c| c.is_alphanumeric() || c == '_');
            if !well_formed {
                anyhow::bail!("command {word:?} is not a bare word");
            }
        }
        Ok(())
    }

    /// Session parameters derived from this config.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            port: self.port,
            apikey: self.apikey.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            send_retry_base: Duration::from_secs(self.send_retry_base_secs),
            send_retry_limit: self.send_retry_limit,
        }
    }

    /// Listener parameters derived from this config.
    #[must_use]
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            events: self.events.clone(),
            schandlerid: self.schandlerid,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    /// Routing table derived from this config.
    #[must_use]
    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable {
            command_prefix: self.command_prefix.clone(),
            event_routes: self.event_routes.clone(),
            command_routes: self.command_routes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Tests that read or mutate `QUERYBOT_*` variables must not
    /// interleave; `Config::load` always applies env overrides.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 25639);
        assert_eq!(config.idle_timeout_secs, 120);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.command_prefix, "!");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization_excludes_apikey() {
        let mut config = Config::default();
        config.apikey = "secret_key".to_string();
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("secret_key"));
        assert!(!json.contains("apikey"));
    }

    #[test]
    fn test_load_from_file_round_trip() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.host = "ts.example.net".to_string();
        config.port = 10011;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.host, "ts.example.net");
        assert_eq!(loaded.port, 10011);
        // Unset fields fall back to defaults.
        assert_eq!(loaded.queue_capacity, 64);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"host": "10.0.0.2"}"#).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.host, "10.0.0.2");
        assert_eq!(loaded.port, 25639);
        assert_eq!(loaded.command_prefix, "!");
    }

    #[test]
    fn test_unknown_module_name_is_rejected() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"command_routes": {"ping": "dancefloor"}}"#,
        )
        .unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_module_names_deserialize_lowercase() {
        let _env = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"event_routes": {"notifyclientmoved": ["control", "presence"]}}"#,
        )
        .unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(
            loaded.event_routes.get("notifyclientmoved"),
            Some(&vec![ModuleId::Control, ModuleId::Presence])
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.command_prefix = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .command_routes
            .insert("not a word".to_string(), ModuleId::Chat);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("QUERYBOT_HOST", "override.example.net");
        std::env::set_var("QUERYBOT_PORT", "10022");
        std::env::set_var("QUERYBOT_APIKEY", "from-env");

        let mut config = Config::default();
        config.apply_env_overrides();

        std::env::remove_var("QUERYBOT_HOST");
        std::env::remove_var("QUERYBOT_PORT");
        std::env::remove_var("QUERYBOT_APIKEY");

        assert_eq!(config.host, "override.example.net");
        assert_eq!(config.port, 10022);
        assert_eq!(config.apikey, "from-env");
    }

    #[test]
    fn test_session_config_derivation() {
        let mut config = Config::default();
        config.apikey = "k".to_string();
        let session = config.session_config();
        assert_eq!(session.connect_timeout, Duration::from_secs(5));
        assert_eq!(session.send_retry_base, Duration::from_secs(5));
        assert_eq!(session.send_retry_limit, 3);
        assert_eq!(session.apikey, "k");
    }
}
