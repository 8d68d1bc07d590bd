/// Remote console module for MC Runner.
///
/// This module provides the authenticated administrative channel to a
/// running server. It allows the runner to:
/// - Check that a console port accepts connections at all, quickly
/// - Send exactly one command per session and read the reply
/// - Diagnose a misconfigured console from the server's `server.properties`
///
/// The runner talks to the console through the [`RemoteConsole`] trait so
/// the stop and status paths can be exercised without a real server.
use crate::config::{ServerRecord, Timeouts};
use crate::error::ConsoleError;
use crate::protocol::{self, PACKET_AUTH_RESPONSE, RconPacket};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

/// Command asking a server to save and exit.
pub const SHUTDOWN_COMMAND: &str = "stop";
/// Command asking a server for its online players.
pub const LIST_COMMAND: &str = "list";

/// Host and port of a remote console.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsoleEndpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ConsoleEndpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ConsoleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Administrative access to a server's remote console.
///
/// Implementations must honour the caller's timeout on every call and must
/// release the connection on every exit path.
#[async_trait]
pub trait RemoteConsole: Send + Sync {
    /// Open and immediately close a raw connection.
    async fn probe_reachable(&self, endpoint: &ConsoleEndpoint, timeout: Duration) -> bool;

    /// Authenticate, send one command and return the reply text.
    async fn run_command(
        &self,
        endpoint: &ConsoleEndpoint,
        password: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError>;
}

/// Remote console client speaking the RCON protocol over TCP.
///
/// # Examples
///
/// ```no_run
/// use mc_runner::console::{ConsoleEndpoint, RconClient, RemoteConsole};
/// use std::time::Duration;
///
/// # async fn example() {
/// let client = RconClient::new();
/// let endpoint = ConsoleEndpoint::new("localhost", 25575);
///
/// if client.probe_reachable(&endpoint, Duration::from_secs(3)).await {
///     match client.run_command(&endpoint, "secret", "list", Duration::from_secs(6)).await {
///         Ok(reply) => println!("{}", reply),
///         Err(e) => println!("console failed: {}", e),
///     }
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct RconClient {
    next_id: AtomicI32,
}

impl RconClient {
    /// Create a new client
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
        }
    }

    fn request_id(&self) -> i32 {
        // ids stay positive; -1 is reserved for auth failure
        self.next_id.fetch_add(1, Ordering::Relaxed) & 0x3fff_ffff
    }

    async fn session(
        &self,
        endpoint: &ConsoleEndpoint,
        password: &str,
        command: &str,
    ) -> Result<String, ConsoleError> {
        let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| ConsoleError::Unreachable(format!("{}: {}", endpoint, e)))?;

        let login_id = self.request_id();
        protocol::write_packet(&mut stream, &RconPacket::login(login_id, password)).await?;

        // Some servers send an empty command reply ahead of the auth reply.
        let auth = loop {
            let packet = protocol::read_packet(&mut stream).await?;
            if packet.packet_type == PACKET_AUTH_RESPONSE {
                break packet;
            }
            tracing::trace!(packet_type = packet.packet_type, "Skipping packet before auth reply");
        };

        if auth.is_auth_failure() {
            return Err(ConsoleError::AuthFailed);
        }
        if auth.request_id != login_id {
            return Err(ConsoleError::Protocol(format!(
                "auth reply id {} does not match request {}",
                auth.request_id, login_id
            )));
        }
        tracing::debug!("Console authenticated");

        let command_id = self.request_id();
        protocol::write_packet(&mut stream, &RconPacket::command(command_id, command)).await?;

        let reply = protocol::read_packet(&mut stream).await?;
        if reply.request_id != command_id {
            return Err(ConsoleError::Protocol(format!(
                "reply id {} does not match request {}",
                reply.request_id, command_id
            )));
        }

        Ok(reply.body)
    }
}

impl Default for RconClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteConsole for RconClient {
    #[tracing::instrument(skip(self), fields(endpoint = %endpoint))]
    async fn probe_reachable(&self, endpoint: &ConsoleEndpoint, timeout: Duration) -> bool {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(_stream)) => {
                tracing::debug!("Console port reachable");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Console port refused connection");
                false
            }
            Err(_) => {
                tracing::debug!("Console probe timed out");
                false
            }
        }
    }

    #[tracing::instrument(skip(self, password), fields(endpoint = %endpoint))]
    async fn run_command(
        &self,
        endpoint: &ConsoleEndpoint,
        password: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        // The stream lives inside the session future, so it is closed when
        // the session returns, fails, or is cancelled by the timeout.
        let result = tokio::time::timeout(timeout, self.session(endpoint, password, command))
            .await
            .unwrap_or(Err(ConsoleError::Timeout(timeout)));

        match &result {
            Ok(reply) => tracing::debug!(reply_len = reply.len(), "Console command answered"),
            Err(e) => tracing::debug!(error = %e, "Console command failed"),
        }
        result
    }
}

/// What `server.properties` says about the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertiesHint {
    /// The install path has no `server.properties`
    Missing,
    /// The file exists but could not be read
    Unreadable(String),
    /// Console-related keys found in the file
    Found {
        /// Value of `enable-rcon`
        enable_rcon: Option<String>,
        /// Whether `rcon.password` is set to a non-empty value
        password_set: bool,
        /// Value of `rcon.port`
        port: Option<String>,
    },
}

/// Result of a console health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleDiagnosis {
    /// Endpoint that was checked
    pub endpoint: ConsoleEndpoint,
    /// Whether the port accepted a connection
    pub reachable: bool,
    /// Outcome of the authenticated `list` command; `None` when it was not
    /// attempted
    pub auth: Option<Result<(), ConsoleError>>,
    /// Hints read from `server.properties` when the check failed
    pub properties: Option<PropertiesHint>,
}

impl ConsoleDiagnosis {
    /// Whether the console is reachable and accepted the password.
    pub fn is_healthy(&self) -> bool {
        self.reachable && matches!(self.auth, Some(Ok(())))
    }
}

/// Check a server's console: socket first, then authentication.
///
/// On any failure the server's `server.properties` is read so the reply can
/// point at the likely misconfiguration.
#[tracing::instrument(skip(console, record, password, timeouts), fields(server = %record.name))]
pub async fn diagnose(
    console: &dyn RemoteConsole,
    record: &ServerRecord,
    password: Option<&str>,
    timeouts: &Timeouts,
) -> ConsoleDiagnosis {
    let endpoint = record.console_endpoint();
    let reachable = console.probe_reachable(&endpoint, timeouts.probe).await;

    let auth = match (reachable, password) {
        (true, Some(password)) => Some(
            console
                .run_command(&endpoint, password, LIST_COMMAND, timeouts.console)
                .await
                .map(|_| ()),
        ),
        _ => None,
    };

    let healthy = reachable && matches!(auth, Some(Ok(())));
    let properties = (!healthy).then(|| read_properties_hint(&record.install_path));

    ConsoleDiagnosis {
        endpoint,
        reachable,
        auth,
        properties,
    }
}

/// Read the console keys of `server.properties` in `install_path`.
pub fn read_properties_hint(install_path: &Path) -> PropertiesHint {
    let path = install_path.join("server.properties");
    if !path.exists() {
        return PropertiesHint::Missing;
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let props = parse_properties(&content);
            PropertiesHint::Found {
                enable_rcon: props.get("enable-rcon").cloned(),
                password_set: props
                    .get("rcon.password")
                    .is_some_and(|p| !p.is_empty()),
                port: props.get("rcon.port").cloned(),
            }
        }
        Err(e) => PropertiesHint::Unreadable(e.to_string()),
    }
}

/// Parse `key=value` lines, skipping blanks and `#` comments.
pub fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_properties_file() {
        let props = parse_properties(
            "# generated\nenable-rcon=true\nrcon.port = 25575\n\nrcon.password=\nmotd=a=b\n",
        );

        assert_eq!(props.get("enable-rcon").map(String::as_str), Some("true"));
        assert_eq!(props.get("rcon.port").map(String::as_str), Some("25575"));
        assert_eq!(props.get("rcon.password").map(String::as_str), Some(""));
        assert_eq!(props.get("motd").map(String::as_str), Some("a=b"));
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn request_ids_stay_positive() {
        let client = RconClient {
            next_id: AtomicI32::new(i32::MAX),
        };

        assert!(client.request_id() >= 0);
        assert!(client.request_id() >= 0);
    }
}
