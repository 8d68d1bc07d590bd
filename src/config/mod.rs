//! Configuration module for MC Runner.
//!
//! This module owns the two durable inputs of the runner:
//!
//! * [`Registry`] - the `servers.json` store mapping a server name to its
//!   install path, launch script and console/status endpoints.
//! * [`Settings`] - process-wide settings and secrets (console password,
//!   tunnel executable, timeouts), read from the environment or a JSON
//!   document.
//!
//! Records are validated once, when the registry is loaded, so the rest of
//! the crate works with a fully defaulted [`ServerRecord`].
//!
//! # Examples
//!
//! Opening a registry and resolving a server name:
//!
//! ```no_run
//! use mc_runner::config::Registry;
//!
//! let registry = Registry::open("servers.json");
//! let name = registry.resolve(None).unwrap();
//! println!("Using server {}", name);
//! ```
//!
//! Registering a server programmatically:
//!
//! ```no_run
//! use mc_runner::config::{Registry, ServerRecord};
//!
//! let mut registry = Registry::open("servers.json");
//! let record = ServerRecord::new("survival", "/srv/minecraft/survival");
//! registry.add(record).unwrap();
//! ```
mod registry;
mod settings;
pub mod validator;

pub use registry::{
    DEFAULT_QUERY_ADDRESS, DEFAULT_RCON_HOST, DEFAULT_RCON_PORT, Registry, ServerEntry,
    ServerRecord, default_script,
};
pub use settings::{Settings, Timeouts, TunnelSettings};
pub use validator::validate_entry;
