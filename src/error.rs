/// Error handling module for MC Runner.
///
/// This module defines the error types used throughout the library.
/// `Error` covers failures that end an operation; `ConsoleError` and
/// `QueryError` are the typed outcomes returned at the remote-console and
/// status-protocol boundaries, which callers are expected to branch on
/// rather than propagate.
///
/// Lifecycle conflicts (already running, not running) are not errors at
/// all: they are reported through [`StartOutcome`](crate::StartOutcome) and
/// [`StopOutcome`](crate::StopOutcome).
///
/// # Example
///
/// ```
/// use mc_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServerNotFound(name)) => println!("Server '{}' is not registered", name),
///         Err(Error::Busy(name)) => println!("Server '{}' is already changing state", name),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the mc-runner library.
///
/// Each variant includes enough context to be rendered directly as a
/// human-readable reply.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse a settings document or the registry file.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// A settings value or server record is well-formed but invalid.
    ///
    /// This error occurs when:
    /// - A record has an empty path, script or console host
    /// - A console port is zero
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No server with that name exists in the registry.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// A name was omitted and the registry is empty.
    #[error("No servers are registered")]
    NoServersRegistered,

    /// A name was omitted, there is no default server and more than one
    /// server is registered.
    #[error("Several servers are registered and no default is set; a server name is required")]
    NameRequired,

    /// A start, stop, restart or warm-up is already in flight for this
    /// server.
    #[error("Server '{0}' is already starting or stopping")]
    Busy(String),

    /// A command line could not be parsed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The operating system refused to spawn a process.
    ///
    /// `tunnel_started` records partial progress: the tunnel may have been
    /// launched for this request before the server itself failed.
    #[error("Failed to launch '{name}': {reason}")]
    LaunchFailed {
        /// Server (or tunnel) that could not be launched
        name: String,
        /// Underlying cause
        reason: String,
        /// Whether the tunnel was launched by this request before failing
        tunnel_started: bool,
    },

    /// Error while signalling or waiting on a managed process.
    #[error("Server process error: {0}")]
    Process(String),

    /// The registry could not be written.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for mc-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed remote-console exchange.
///
/// These are expected, handled branches: the stop path falls back to a
/// forced kill on any of them, and the status path reports the player list
/// as unavailable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// The console port did not accept a connection.
    #[error("remote console unreachable: {0}")]
    Unreachable(String),

    /// The server rejected the console password.
    #[error("remote console rejected the password")]
    AuthFailed,

    /// The session did not complete within the caller's deadline.
    #[error("remote console timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with something that is not a console packet.
    #[error("remote console protocol error: {0}")]
    Protocol(String),
}

/// Outcome of a failed status-protocol query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Nothing is listening on the status address (server off or booting).
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The query did not complete within the caller's deadline.
    #[error("status query timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with something that is not a status response.
    #[error("status protocol error: {0}")]
    Protocol(String),
}
