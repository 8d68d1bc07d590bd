use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the chat front-end token.
pub const TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";
/// Environment variable holding the remote console password.
pub const RCON_PASSWORD_ENV: &str = "RCON_PASSWORD";
/// Environment variable overriding the registry location.
pub const SERVERS_FILE_ENV: &str = "CNP_SERVERS_FILE";
/// Environment variable overriding the tunnel executable.
pub const TUNNEL_PATH_ENV: &str = "PLAYIT_PATH";

fn default_tunnel_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/Program Files/playit_gg/bin/playit.exe")
    } else {
        PathBuf::from("/usr/local/bin/playit")
    }
}

/// Serializes a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Bounded waits applied by the runner.
///
/// Every network operation and every grace period has an explicit upper
/// bound here; in JSON each value is given in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Raw TCP reachability probe of the console port
    #[serde(with = "duration_ms")]
    pub probe: Duration,
    /// Whole authenticated console session
    #[serde(with = "duration_ms")]
    pub console: Duration,
    /// Status-protocol query
    #[serde(with = "duration_ms")]
    pub status: Duration,
    /// Player-list console query made while reporting status
    #[serde(with = "duration_ms")]
    pub player_list: Duration,
    /// Time a server is given to exit after a graceful shutdown command
    #[serde(with = "duration_ms")]
    pub graceful_exit: Duration,
    /// Time to wait for exit confirmation after a forced kill
    #[serde(with = "duration_ms")]
    pub kill: Duration,
    /// Time given to a freshly launched tunnel to connect
    #[serde(with = "duration_ms")]
    pub tunnel_grace: Duration,
    /// Pause between the stop and start halves of a restart
    #[serde(with = "duration_ms")]
    pub restart_settle: Duration,
    /// How long a warm-up run is left alone before it is shut down
    #[serde(with = "duration_ms")]
    pub warm_up: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(3),
            console: Duration::from_secs(6),
            status: Duration::from_secs(5),
            player_list: Duration::from_secs(5),
            graceful_exit: Duration::from_secs(30),
            kill: Duration::from_secs(10),
            tunnel_grace: Duration::from_secs(5),
            restart_settle: Duration::from_secs(5),
            warm_up: Duration::from_secs(60),
        }
    }
}

/// How to launch the shared tunnel process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Path of the tunnel executable; it must exist.
    pub executable: PathBuf,
    /// Arguments passed to the tunnel.
    pub args: Vec<String>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            executable: default_tunnel_executable(),
            args: Vec::new(),
        }
    }
}

/// Process-wide settings for the runner.
///
/// Secrets are process-wide rather than per server: one console password is
/// used for every registered server.
///
/// # Examples
///
/// ```
/// use mc_runner::config::Settings;
///
/// let settings = Settings::parse_from_str(r#"{
///     "rcon_password": "hunter2",
///     "timeouts": { "graceful_exit": 15000 }
/// }"#).unwrap();
///
/// assert_eq!(settings.console_password(), Some("hunter2"));
/// assert_eq!(settings.timeouts.graceful_exit.as_secs(), 15);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Chat front-end token; carried for the front-end, unused by the core.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Remote console password shared by every server.
    #[serde(skip_serializing)]
    pub rcon_password: Option<String>,
    /// Location of `servers.json`.
    pub registry_path: PathBuf,
    /// Tunnel launch settings.
    pub tunnel: TunnelSettings,
    /// Bounded waits.
    pub timeouts: Timeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: None,
            rcon_password: None,
            registry_path: PathBuf::from("servers.json"),
            tunnel: TunnelSettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Settings {
    /// Default settings overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// settings document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read settings file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses settings from a JSON string; missing fields take defaults.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON settings: {}", e)))
    }

    /// Override fields from the environment variables that are set.
    pub fn apply_env(mut self) -> Self {
        if let Some(token) = read_env(TOKEN_ENV) {
            self.token = Some(token);
        }
        if let Some(password) = read_env(RCON_PASSWORD_ENV) {
            self.rcon_password = Some(password);
        }
        if let Some(path) = read_env(SERVERS_FILE_ENV) {
            self.registry_path = PathBuf::from(path);
        }
        if let Some(path) = read_env(TUNNEL_PATH_ENV) {
            self.tunnel.executable = PathBuf::from(path);
        }
        self
    }

    /// The console password, if one is configured and non-empty.
    pub fn console_password(&self) -> Option<&str> {
        self.rcon_password.as_deref().filter(|p| !p.is_empty())
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings = Settings::parse_from_str("{}").unwrap();

        assert_eq!(settings.registry_path, PathBuf::from("servers.json"));
        assert_eq!(settings.timeouts, Timeouts::default());
        assert_eq!(settings.console_password(), None);
    }

    #[test]
    fn test_empty_password_is_absent() {
        let settings = Settings {
            rcon_password: Some(String::new()),
            ..Settings::default()
        };

        assert_eq!(settings.console_password(), None);
    }

    #[test]
    fn test_timeouts_are_milliseconds() {
        let settings = Settings::parse_from_str(
            r#"{"timeouts": {"probe": 250, "restart_settle": 0}}"#,
        )
        .unwrap();

        assert_eq!(settings.timeouts.probe, Duration::from_millis(250));
        assert_eq!(settings.timeouts.restart_settle, Duration::ZERO);
        assert_eq!(settings.timeouts.graceful_exit, Duration::from_secs(30));
    }
}
