//! Command surface: text commands in, one human-readable reply out.
//!
//! A chat front-end hands each message line to [`Command::from_str`] and
//! sends back the [`Reply`] produced by
//! [`ServerRunner::execute`](crate::ServerRunner::execute). The grammar is
//! a clap subcommand parsed without a binary name, so `help` and
//! `<command> --help` work from chat too.
//!
//! ```
//! use mc_runner::Command;
//!
//! let command: Command = "!stop survival --keep-tunnel".parse().unwrap();
//! assert_eq!(
//!     command,
//!     Command::Stop { name: Some("survival".to_string()), release_tunnel: false }
//! );
//! ```
use crate::console::{ConsoleDiagnosis, PropertiesHint};
use crate::error::{Error, QueryError};
use crate::server::{StartOutcome, StopOutcome};
use crate::status::{PlayerList, ServerReport, Unavailable};
use crate::{RestartOutcome, ServerSummary, WarmUpOutcome};
use clap::{ArgAction, Parser, Subcommand};
use std::fmt;
use std::str::FromStr;

/// A parsed user intent.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start a server and, if needed, the tunnel
    Start {
        /// Server name
        name: String,
    },
    /// Stop a server
    Stop {
        /// Server name, resolved if omitted
        name: Option<String>,
        /// Tear the tunnel down even if other servers are running
        #[arg(
            long = "keep-tunnel",
            action = ArgAction::SetFalse,
            help = "Keep the tunnel up for other servers"
        )]
        release_tunnel: bool,
    },
    /// Restart a server, keeping the tunnel
    Restart {
        /// Server name, resolved if omitted
        name: Option<String>,
    },
    /// Report status and online players
    Status {
        /// Server name, resolved if omitted
        name: Option<String>,
    },
    /// List registered servers
    #[command(visible_alias = "servers")]
    List,
    /// Diagnose the remote console of a server
    #[command(visible_aliases = ["console", "rcon"])]
    CheckConsole {
        /// Server name, resolved if omitted
        name: Option<String>,
    },
    /// Run a server once to generate its files
    #[command(visible_alias = "warmup")]
    WarmUp {
        /// Server name
        name: String,
    },
    /// Set the default server
    #[command(visible_alias = "default")]
    SetDefault {
        /// Server name
        name: String,
    },
}

/// One chat line: a command with no binary name in front.
#[derive(Debug, Parser)]
#[command(name = "mc-runner", no_binary_name = true, disable_version_flag = true)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

impl FromStr for Command {
    type Err = Error;

    /// Parse a chat line. A leading `!` or `/` is ignored and the command
    /// word is case-insensitive.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if let Some(verb) = words.first_mut() {
            *verb = verb.trim_start_matches(['!', '/']).to_ascii_lowercase();
        }

        CommandLine::try_parse_from(words)
            .map(|parsed| parsed.command)
            .map_err(|e| Error::InvalidCommand(e.to_string().trim_end().to_string()))
    }
}

/// The single human-readable outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Whether the operation succeeded; handled fallbacks count as success
    pub success: bool,
    /// Message text, possibly several lines
    pub text: String,
}

impl Reply {
    /// Successful reply
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    /// Failed reply
    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }

    /// Reply for an operation that ended in an error
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::LaunchFailed {
                name,
                reason,
                tunnel_started: true,
            } => Self::failed(format!(
                "Tunnel started, but '{}' failed to launch: {}",
                name, reason
            )),
            Error::NameRequired => Self::failed(
                "Several servers are registered and none is the default; name one.",
            ),
            other => Self::failed(other.to_string()),
        }
    }

    /// Reply for a start
    pub fn started(name: &str, outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started {
                pid,
                tunnel_started: true,
            } => Self::ok(format!("Started '{}' (pid {}) and the tunnel.", name, pid)),
            StartOutcome::Started { pid, .. } => {
                Self::ok(format!("Started '{}' (pid {}).", name, pid))
            }
            StartOutcome::AlreadyRunning => Self::ok(format!("'{}' is already running.", name)),
        }
    }

    /// Reply for a stop
    pub fn stopped(name: &str, outcome: StopOutcome) -> Self {
        Self::ok(describe_stop(name, outcome))
    }

    /// Reply for a restart
    pub fn restarted(name: &str, outcome: RestartOutcome) -> Self {
        let started = Self::started(name, outcome.started);
        Self::ok(format!("{}\n{}", describe_stop(name, outcome.stopped), started.text))
    }

    /// Reply for a warm-up run
    pub fn warmed_up(name: &str, outcome: WarmUpOutcome) -> Self {
        match outcome {
            WarmUpOutcome::Completed { forced: false } => {
                Self::ok(format!("'{}' generated its files and shut down.", name))
            }
            WarmUpOutcome::Completed { forced: true } => Self::ok(format!(
                "'{}' generated its files; the process was killed afterwards.",
                name
            )),
            WarmUpOutcome::AlreadyRunning => {
                Self::failed(format!("'{}' is running; stop it before a warm-up run.", name))
            }
        }
    }

    /// Reply for a status report
    pub fn status(report: &ServerReport) -> Self {
        let managed = if report.managed { "managed" } else { "not managed" };
        let mut text = match &report.status {
            Ok(info) => format!(
                "'{}' is online ({}): {}, {}/{} players, {:.0} ms",
                report.name,
                managed,
                info.version_name,
                info.online_players,
                info.max_players,
                info.latency_ms
            ),
            Err(QueryError::Timeout(after)) => format!(
                "'{}' is offline ({}): no status reply within {:?}",
                report.name, managed, after
            ),
            Err(e) => format!("'{}' is offline ({}): {}", report.name, managed, e),
        };

        match &report.players {
            PlayerList::Players(names) => {
                text.push_str(&format!("\nPlayers: {}", names.join(", ")));
            }
            PlayerList::Unavailable(Unavailable::Console(e)) => {
                text.push_str(&format!("\nPlayer names unavailable: {}", e));
            }
            PlayerList::Unavailable(Unavailable::NoConsolePassword) => {
                text.push_str("\nPlayer names unavailable: no console password configured");
            }
            PlayerList::Unavailable(Unavailable::Unparseable) => {
                text.push_str("\nPlayer names unavailable: unexpected console reply");
            }
            PlayerList::Unavailable(Unavailable::ServerOffline | Unavailable::NoPlayersOnline) => {}
        }

        Self::ok(text)
    }

    /// Reply for the server list
    pub fn list(servers: &[ServerSummary]) -> Self {
        if servers.is_empty() {
            return Self::ok("No servers are registered.");
        }

        let lines: Vec<String> = servers
            .iter()
            .map(|server| {
                format!(
                    "{} {}{} [{}]",
                    if server.running { "*" } else { "-" },
                    server.name,
                    if server.is_default { " (default)" } else { "" },
                    server.status
                )
            })
            .collect();
        Self::ok(lines.join("\n"))
    }

    /// Reply for a console check
    pub fn console(name: &str, diagnosis: &ConsoleDiagnosis) -> Self {
        if diagnosis.is_healthy() {
            return Self::ok(format!(
                "Console of '{}' at {} is working.",
                name, diagnosis.endpoint
            ));
        }

        let mut lines = vec![match (&diagnosis.auth, diagnosis.reachable) {
            (_, false) => format!(
                "Console of '{}' at {} is unreachable.",
                name, diagnosis.endpoint
            ),
            (None, true) => format!(
                "Console of '{}' at {} is reachable, but no console password is configured.",
                name, diagnosis.endpoint
            ),
            (Some(Err(e)), true) => format!(
                "Console of '{}' at {} is reachable, but the command failed: {}",
                name, diagnosis.endpoint, e
            ),
            (Some(Ok(())), true) => format!("Console of '{}' is working.", name),
        }];

        match &diagnosis.properties {
            Some(PropertiesHint::Missing) => {
                lines.push("server.properties not found in the install path.".to_string());
            }
            Some(PropertiesHint::Unreadable(e)) => {
                lines.push(format!("server.properties could not be read: {}", e));
            }
            Some(PropertiesHint::Found {
                enable_rcon,
                password_set,
                port,
            }) => {
                lines.push(format!(
                    "server.properties: enable-rcon={}, rcon.password {}, rcon.port={}",
                    enable_rcon.as_deref().unwrap_or("(unset)"),
                    if *password_set { "set" } else { "empty" },
                    port.as_deref().unwrap_or("(unset)")
                ));
            }
            None => {}
        }

        Self::failed(lines.join("\n"))
    }
}

fn describe_stop(name: &str, outcome: StopOutcome) -> String {
    match outcome {
        StopOutcome::StoppedSafely => format!("'{}' saved and stopped.", name),
        StopOutcome::StoppedForcibly => format!("'{}' was stopped forcibly.", name),
        StopOutcome::NotRunning => format!("'{}' was not running.", name),
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            "start survival".parse::<Command>().unwrap(),
            Command::Start {
                name: "survival".to_string()
            }
        );
        assert_eq!(
            "!STOP".parse::<Command>().unwrap(),
            Command::Stop {
                name: None,
                release_tunnel: true
            }
        );
        assert_eq!(
            "stop creative --keep-tunnel".parse::<Command>().unwrap(),
            Command::Stop {
                name: Some("creative".to_string()),
                release_tunnel: false
            }
        );
        assert_eq!(
            "/rcon creative".parse::<Command>().unwrap(),
            Command::CheckConsole {
                name: Some("creative".to_string())
            }
        );
        assert_eq!(
            "warm-up survival".parse::<Command>().unwrap(),
            Command::WarmUp {
                name: "survival".to_string()
            }
        );
        assert_eq!("servers".parse::<Command>().unwrap(), Command::List);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<Command>().is_err());
        assert!("start".parse::<Command>().is_err());
        assert!("status a b".parse::<Command>().is_err());
        assert!("restart a --keep-tunnel".parse::<Command>().is_err());
        assert!("list extra".parse::<Command>().is_err());
        assert!("teleport".parse::<Command>().is_err());
    }

    #[test]
    fn help_is_returned_as_text() {
        let err = "help".parse::<Command>().unwrap_err();
        assert!(matches!(&err, Error::InvalidCommand(text) if text.contains("set-default")));
    }

    #[test]
    fn launch_failure_reports_partial_progress() {
        let reply = Reply::from_error(&Error::LaunchFailed {
            name: "survival".to_string(),
            reason: "no such file".to_string(),
            tunnel_started: true,
        });

        assert!(!reply.success);
        assert!(reply.text.starts_with("Tunnel started"));
    }
}
