//! Status module for MC Runner.
//!
//! Reports whether a server is up, using two independent channels:
//!
//! * the unauthenticated status protocol (version, player counts, latency),
//!   queried through a [`StatusSource`];
//! * the remote console, used best-effort for the names of online players.
//!
//! A console failure never hides what the status protocol already
//! established; it only turns the player list into
//! [`PlayerList::Unavailable`].
use crate::config::{ServerRecord, Timeouts};
use crate::console::{ConsoleEndpoint, LIST_COMMAND, RemoteConsole};
use crate::error::{ConsoleError, QueryError};
use crate::protocol::{self, StatusResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Server metadata returned by the status protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusInfo {
    /// Version name announced by the server
    pub version_name: String,
    /// Players currently online
    pub online_players: u32,
    /// Player slots
    pub max_players: u32,
    /// Round-trip latency in milliseconds
    pub latency_ms: f64,
}

/// Source of status-protocol data.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Query the server at `address` (`host[:port]`).
    async fn query_status(&self, address: &str, timeout: Duration)
    -> Result<StatusInfo, QueryError>;
}

/// Status client speaking the server-list-ping protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlpStatusClient;

impl SlpStatusClient {
    /// Create a new client
    pub fn new() -> Self {
        Self
    }

    async fn exchange(&self, address: &str) -> Result<StatusInfo, QueryError> {
        let (host, port) = protocol::parse_address(address)?;

        let mut stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| QueryError::Unreachable(format!("{}: {}", address, e)))?;

        let mut request = protocol::handshake_packet(&host, port);
        request.extend_from_slice(&protocol::status_request_packet());

        let started = Instant::now();
        write_all(&mut stream, &request).await?;

        let (packet_id, body) = protocol::read_frame(&mut stream).await?;
        if packet_id != 0x00 {
            return Err(QueryError::Protocol(format!(
                "expected status response, got packet {:#04x}",
                packet_id
            )));
        }
        let status_rtt = started.elapsed();

        let json = protocol::read_string(&body)?;
        let response: StatusResponse = serde_json::from_str(&json)
            .map_err(|e| QueryError::Protocol(format!("malformed status JSON: {}", e)))?;

        let latency = match self.ping(&mut stream).await {
            Ok(latency) => latency,
            Err(e) => {
                tracing::debug!(error = %e, "Ping failed, using status round trip");
                status_rtt
            }
        };

        Ok(StatusInfo {
            version_name: response.version.name,
            online_players: response.players.online,
            max_players: response.players.max,
            latency_ms: latency.as_secs_f64() * 1000.0,
        })
    }

    async fn ping(&self, stream: &mut TcpStream) -> Result<Duration, QueryError> {
        let payload = uuid::Uuid::new_v4().as_u64_pair().0 as i64;

        let started = Instant::now();
        write_all(stream, &protocol::ping_packet(payload)).await?;
        let (packet_id, body) = protocol::read_frame(stream).await?;
        let elapsed = started.elapsed();

        if packet_id != 0x01 || body.len() != 8 || body[..] != payload.to_be_bytes() {
            return Err(QueryError::Protocol("pong does not echo the ping".to_string()));
        }
        Ok(elapsed)
    }
}

async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), QueryError> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| QueryError::Unreachable(format!("write failed: {}", e)))
}

#[async_trait]
impl StatusSource for SlpStatusClient {
    #[tracing::instrument(skip(self))]
    async fn query_status(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<StatusInfo, QueryError> {
        let result = tokio::time::timeout(timeout, self.exchange(address))
            .await
            .unwrap_or(Err(QueryError::Timeout(timeout)));

        match &result {
            Ok(info) => tracing::debug!(online = info.online_players, "Status query answered"),
            Err(e) => tracing::debug!(error = %e, "Status query failed"),
        }
        result
    }
}

/// Why the names of online players are not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The status query failed, so nobody was asked
    ServerOffline,
    /// The server reports zero players online
    NoPlayersOnline,
    /// No console password is configured
    NoConsolePassword,
    /// The console reply did not contain a player list
    Unparseable,
    /// The console could not be used
    Console(ConsoleError),
}

/// Names of online players, best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerList {
    /// Names in the order the server listed them
    Players(Vec<String>),
    /// The list could not be obtained
    Unavailable(Unavailable),
}

/// Aggregate status of one registered server.
#[derive(Debug, Clone)]
pub struct ServerReport {
    /// Server name
    pub name: String,
    /// Whether this runner holds a live process for it
    pub managed: bool,
    /// Status-protocol result, reported unconditionally
    pub status: Result<StatusInfo, QueryError>,
    /// Console-derived player names, best-effort
    pub players: PlayerList,
}

impl ServerReport {
    /// Whether the status protocol answered.
    pub fn is_online(&self) -> bool {
        self.status.is_ok()
    }
}

/// Parse the reply of the player-list command.
///
/// The reply has the shape `<prefix>: name1, name2, ...`; `None` means the
/// reply holds no names.
pub fn parse_player_list(reply: &str) -> Option<Vec<String>> {
    let (_, names) = reply.split_once(':')?;
    let names: Vec<String> = names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    (!names.is_empty()).then_some(names)
}

/// Combines a status source with the remote console.
#[derive(Clone)]
pub struct StatusProber {
    status: Arc<dyn StatusSource>,
    console: Arc<dyn RemoteConsole>,
}

impl StatusProber {
    /// Create a prober over the given channels
    pub fn new(status: Arc<dyn StatusSource>, console: Arc<dyn RemoteConsole>) -> Self {
        Self { status, console }
    }

    /// Query the status protocol.
    pub async fn query_status(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<StatusInfo, QueryError> {
        self.status.query_status(address, timeout).await
    }

    /// Ask the console for online player names.
    ///
    /// Only attempted when players are online and a password is set; every
    /// failure is folded into [`PlayerList::Unavailable`].
    pub async fn list_online_players(
        &self,
        endpoint: &ConsoleEndpoint,
        password: Option<&str>,
        online_players: u32,
        timeouts: &Timeouts,
    ) -> PlayerList {
        if online_players == 0 {
            return PlayerList::Unavailable(Unavailable::NoPlayersOnline);
        }
        let Some(password) = password else {
            return PlayerList::Unavailable(Unavailable::NoConsolePassword);
        };

        // Fail fast on a closed port instead of waiting out the session.
        if !self.console.probe_reachable(endpoint, timeouts.probe).await {
            return PlayerList::Unavailable(Unavailable::Console(ConsoleError::Unreachable(
                endpoint.to_string(),
            )));
        }

        match self
            .console
            .run_command(endpoint, password, LIST_COMMAND, timeouts.player_list)
            .await
        {
            Ok(reply) => match parse_player_list(&reply) {
                Some(names) => PlayerList::Players(names),
                None => PlayerList::Unavailable(Unavailable::Unparseable),
            },
            Err(e) => {
                tracing::debug!(error = %e, "Player list unavailable");
                PlayerList::Unavailable(Unavailable::Console(e))
            }
        }
    }

    /// Build the aggregate report for one server.
    #[tracing::instrument(skip(self, record, password, timeouts), fields(server = %record.name))]
    pub async fn report(
        &self,
        record: &ServerRecord,
        managed: bool,
        password: Option<&str>,
        timeouts: &Timeouts,
    ) -> ServerReport {
        let status = self
            .query_status(&record.query_address, timeouts.status)
            .await;

        let players = match &status {
            Ok(info) => {
                self.list_online_players(
                    &record.console_endpoint(),
                    password,
                    info.online_players,
                    timeouts,
                )
                .await
            }
            Err(_) => PlayerList::Unavailable(Unavailable::ServerOffline),
        };

        ServerReport {
            name: record.name.clone(),
            managed,
            status,
            players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vanilla_list_reply() {
        let names = parse_player_list("There are 2 of a max of 20 players online: Alex, Steve");
        assert_eq!(names, Some(vec!["Alex".to_string(), "Steve".to_string()]));
    }

    #[test]
    fn empty_or_unexpected_replies_yield_none() {
        assert_eq!(parse_player_list("There are 0 of a max of 20 players online: "), None);
        assert_eq!(parse_player_list("Unknown command"), None);
        assert_eq!(parse_player_list(""), None);
    }

    #[test]
    fn keeps_server_order() {
        let names = parse_player_list("players: zed,  amy ,bob").unwrap();
        assert_eq!(names, vec!["zed", "amy", "bob"]);
    }
}
