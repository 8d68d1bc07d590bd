use crate::config::validator::{validate_entry, validate_name};
use crate::console::ConsoleEndpoint;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Console host used when a record does not name one.
pub const DEFAULT_RCON_HOST: &str = "localhost";
/// Console port used when a record does not name one.
pub const DEFAULT_RCON_PORT: u16 = 25575;
/// Status address used when a record does not name one.
pub const DEFAULT_QUERY_ADDRESS: &str = "localhost:25565";

/// Launch script used when a record does not name one.
pub fn default_script() -> String {
    if cfg!(windows) {
        "start.bat".to_string()
    } else {
        "start.sh".to_string()
    }
}

fn default_rcon_port() -> u16 {
    DEFAULT_RCON_PORT
}

/// One server as it is stored in `servers.json`.
///
/// This is the loosely-typed persisted form; optional fields are filled in
/// when it is converted to a [`ServerRecord`].
///
/// # JSON Schema
///
/// ```json
/// {
///   "path": "/srv/minecraft/survival",
///   "script": "run.sh",
///   "rcon_port": 25575,
///   "rcon_host": "localhost",
///   "address": "localhost:25565"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Working directory of the server.
    pub path: String,

    /// Launch script, relative to `path`.
    #[serde(default = "default_script")]
    pub script: String,

    /// Remote console port.
    #[serde(default = "default_rcon_port")]
    pub rcon_port: u16,

    /// Remote console host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rcon_host: Option<String>,

    /// `host:port` answering the status protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A validated, fully defaulted server record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Unique server name
    pub name: String,
    /// Working directory the server is launched from
    pub install_path: PathBuf,
    /// Launch script, relative to `install_path`
    pub launch_script: PathBuf,
    /// Remote console host
    pub rcon_host: String,
    /// Remote console port
    pub rcon_port: u16,
    /// `host:port` answering the status protocol
    pub query_address: String,
}

impl ServerRecord {
    /// Create a record with default script, console and status endpoints.
    pub fn new(name: impl Into<String>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            install_path: install_path.into(),
            launch_script: PathBuf::from(default_script()),
            rcon_host: DEFAULT_RCON_HOST.to_string(),
            rcon_port: DEFAULT_RCON_PORT,
            query_address: DEFAULT_QUERY_ADDRESS.to_string(),
        }
    }

    /// Set the launch script.
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.launch_script = script.into();
        self
    }

    /// Set the remote console endpoint.
    pub fn with_console(mut self, host: impl Into<String>, port: u16) -> Self {
        self.rcon_host = host.into();
        self.rcon_port = port;
        self
    }

    /// Set the status address.
    pub fn with_query_address(mut self, address: impl Into<String>) -> Self {
        self.query_address = address.into();
        self
    }

    /// Full path of the launch script.
    pub fn script_path(&self) -> PathBuf {
        self.install_path.join(&self.launch_script)
    }

    /// Remote console endpoint of this server.
    pub fn console_endpoint(&self) -> ConsoleEndpoint {
        ConsoleEndpoint::new(self.rcon_host.clone(), self.rcon_port)
    }

    fn from_entry(name: &str, entry: ServerEntry) -> Result<Self> {
        validate_entry(name, &entry)?;

        Ok(Self {
            name: name.to_string(),
            install_path: PathBuf::from(entry.path),
            launch_script: PathBuf::from(entry.script),
            rcon_host: entry
                .rcon_host
                .unwrap_or_else(|| DEFAULT_RCON_HOST.to_string()),
            rcon_port: entry.rcon_port,
            query_address: entry
                .address
                .unwrap_or_else(|| DEFAULT_QUERY_ADDRESS.to_string()),
        })
    }

    fn to_entry(&self) -> ServerEntry {
        ServerEntry {
            path: self.install_path.to_string_lossy().into_owned(),
            script: self.launch_script.to_string_lossy().into_owned(),
            rcon_port: self.rcon_port,
            rcon_host: (self.rcon_host != DEFAULT_RCON_HOST).then(|| self.rcon_host.clone()),
            address: (self.query_address != DEFAULT_QUERY_ADDRESS)
                .then(|| self.query_address.clone()),
        }
    }
}

#[derive(Serialize)]
struct RegistryDocument<'a> {
    servers: BTreeMap<&'a str, ServerEntry>,
    default_server: Option<&'a str>,
}

/// Parsed contents of a registry file.
#[derive(Debug, Default)]
struct Contents {
    servers: BTreeMap<String, ServerRecord>,
    default_server: Option<String>,
}

/// Durable store of named server records.
///
/// The registry is backed by a JSON file of the form
///
/// ```json
/// { "servers": { "survival": { "path": "...", "script": "run.sh", "rcon_port": 25575 } },
///   "default_server": "survival" }
/// ```
///
/// A file holding only a bare `name -> record` map is accepted as the server
/// map with no default. An unreadable file is moved aside to
/// `<file>.corrupt` and replaced with an empty registry; opening never fails.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    servers: BTreeMap<String, ServerRecord>,
    default_server: Option<String>,
}

impl Registry {
    /// Open the registry at `path`, creating or recovering it as needed.
    #[tracing::instrument(skip(path), fields(registry_path = ?path.as_ref()))]
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut registry = Self {
            path,
            servers: BTreeMap::new(),
            default_server: None,
        };

        if !registry.path.exists() {
            tracing::info!("Registry file missing, creating an empty one");
            if let Err(e) = registry.save() {
                tracing::warn!(error = %e, "Could not create registry file, continuing in memory");
            }
            return registry;
        }

        let loaded = std::fs::read_to_string(&registry.path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read registry file: {}", e)))
            .and_then(|content| Self::parse_contents(&content));

        match loaded {
            Ok(contents) => {
                tracing::info!(num_servers = contents.servers.len(), "Loaded registry");
                registry.servers = contents.servers;
                registry.default_server = contents.default_server;
            }
            Err(e) => {
                tracing::error!(error = %e, "Registry file is corrupt, starting with empty state");
                registry.quarantine();
            }
        }

        registry
    }

    /// Parse registry contents from a JSON string.
    ///
    /// Invalid individual records are skipped; only a malformed document is
    /// an error.
    fn parse_contents(content: &str) -> Result<Contents> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse registry JSON: {}", e)))?;

        let Value::Object(mut root) = value else {
            return Err(Error::ConfigParse(
                "Registry root must be a JSON object".to_string(),
            ));
        };

        let (raw_servers, default_server) = if root.contains_key("servers") {
            let servers = match root.remove("servers") {
                Some(Value::Object(map)) => map,
                Some(Value::Null) | None => Map::new(),
                Some(_) => {
                    return Err(Error::ConfigParse(
                        "'servers' must be a JSON object".to_string(),
                    ));
                }
            };
            let default_server = match root.remove("default_server") {
                Some(Value::String(name)) => Some(name),
                _ => None,
            };
            (servers, default_server)
        } else {
            tracing::debug!("Registry uses the legacy bare-map layout");
            (root, None)
        };

        let mut servers = BTreeMap::new();
        for (name, raw) in raw_servers {
            let record = serde_json::from_value::<ServerEntry>(raw)
                .map_err(|e| Error::ConfigInvalid(format!("Server '{}': {}", name, e)))
                .and_then(|entry| ServerRecord::from_entry(&name, entry));

            match record {
                Ok(record) => {
                    servers.insert(name, record);
                }
                Err(e) => tracing::warn!(server = %name, error = %e, "Skipping invalid record"),
            }
        }

        let default_server = default_server.filter(|name| {
            let known = servers.contains_key(name);
            if !known {
                tracing::warn!(server = %name, "Default server is not registered, ignoring it");
            }
            known
        });

        Ok(Contents {
            servers,
            default_server,
        })
    }

    fn quarantine(&self) {
        let mut bad_path = self.path.clone().into_os_string();
        bad_path.push(".corrupt");

        if let Err(e) = std::fs::rename(&self.path, &bad_path) {
            tracing::warn!(error = %e, "Could not move corrupt registry aside");
        } else {
            tracing::warn!(backup = ?bad_path, "Moved corrupt registry aside");
        }

        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Could not recreate registry file");
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a record by name.
    pub fn get(&self, name: &str) -> Option<&ServerRecord> {
        self.servers.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// All records in name order.
    pub fn records(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    /// Number of registered servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no server is registered.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// The configured default server, if any.
    pub fn default_server(&self) -> Option<&str> {
        self.default_server.as_deref()
    }

    /// Add or replace a record and persist the registry.
    ///
    /// Returns `true` if an existing record with the same name was replaced.
    /// Nothing changes in memory unless the write succeeds.
    #[tracing::instrument(skip(self, record), fields(server = %record.name))]
    pub fn add(&mut self, record: ServerRecord) -> Result<bool> {
        validate_entry(&record.name, &record.to_entry())?;

        let mut servers = self.servers.clone();
        let replaced = servers.insert(record.name.clone(), record).is_some();
        if replaced {
            tracing::info!("Replacing existing record");
        }
        self.write(&servers, self.default_server.as_deref())?;
        self.servers = servers;
        Ok(replaced)
    }

    /// Remove a record and persist the registry.
    ///
    /// Returns `false` if no such server was registered.
    #[tracing::instrument(skip(self))]
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if !self.servers.contains_key(name) {
            return Ok(false);
        }

        let mut servers = self.servers.clone();
        servers.remove(name);
        let default_server = self
            .default_server
            .clone()
            .filter(|default| default != name);

        self.write(&servers, default_server.as_deref())?;
        self.servers = servers;
        self.default_server = default_server;
        Ok(true)
    }

    /// Make `name` the default server and persist the registry.
    ///
    /// Returns `false` if no such server is registered.
    #[tracing::instrument(skip(self))]
    pub fn set_default(&mut self, name: &str) -> Result<bool> {
        if !self.servers.contains_key(name) {
            return Ok(false);
        }

        self.write(&self.servers, Some(name))?;
        self.default_server = Some(name.to_string());
        Ok(true)
    }

    /// Resolve an optional server name.
    ///
    /// Resolution order: explicit name, configured default, sole registered
    /// server. An explicit name is returned as given, even if unregistered,
    /// so the caller can report it.
    pub fn resolve(&self, name: Option<&str>) -> Result<String> {
        if let Some(name) = name {
            validate_name(name)?;
            return Ok(name.to_string());
        }

        if let Some(default) = &self.default_server {
            return Ok(default.clone());
        }

        let mut names = self.servers.keys();
        match (names.next(), names.next()) {
            (None, _) => Err(Error::NoServersRegistered),
            (Some(only), None) => Ok(only.clone()),
            (Some(_), Some(_)) => Err(Error::NameRequired),
        }
    }

    /// Write the registry to disk atomically.
    pub fn save(&self) -> Result<()> {
        self.write(&self.servers, self.default_server.as_deref())
    }

    /// Write `servers` and `default_server` to the backing file atomically.
    fn write(
        &self,
        servers: &BTreeMap<String, ServerRecord>,
        default_server: Option<&str>,
    ) -> Result<()> {
        let document = RegistryDocument {
            servers: servers
                .iter()
                .map(|(name, record)| (name.as_str(), record.to_entry()))
                .collect(),
            default_server,
        };

        let content = serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::Registry(format!("Failed to serialize registry: {}", e)))?;

        atomic_write(&self.path, &content)
            .map_err(|e| Error::Registry(format!("Failed to write {:?}: {}", self.path, e)))
    }
}

/// Writes the bytes to a temporary file beside `path`, then renames it into
/// place so readers never observe a partially written registry.
fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("servers"),
    );
    builder.suffix(".tmp");

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_registry() {
        let content = r#"{
            "servers": {
                "survival": {"path": "/srv/survival", "script": "run.sh", "rcon_port": 25576},
                "creative": {"path": "/srv/creative", "rcon_port": 25575, "address": "mc.example.org:25570"}
            },
            "default_server": "survival"
        }"#;

        let contents = Registry::parse_contents(content).unwrap();

        assert_eq!(contents.servers.len(), 2);
        assert_eq!(contents.default_server.as_deref(), Some("survival"));

        let survival = &contents.servers["survival"];
        assert_eq!(survival.launch_script, PathBuf::from("run.sh"));
        assert_eq!(survival.rcon_port, 25576);
        assert_eq!(survival.rcon_host, DEFAULT_RCON_HOST);
        assert_eq!(survival.query_address, DEFAULT_QUERY_ADDRESS);

        let creative = &contents.servers["creative"];
        assert_eq!(creative.launch_script, PathBuf::from(default_script()));
        assert_eq!(creative.query_address, "mc.example.org:25570");
    }

    #[test]
    fn test_parse_skips_invalid_records() {
        let content = r#"{
            "servers": {
                "good": {"path": "/srv/good", "rcon_port": 25575},
                "no_path": {"script": "run.sh", "rcon_port": 25575},
                "bad_port": {"path": "/srv/bad", "rcon_port": 70000}
            },
            "default_server": "bad_port"
        }"#;

        let contents = Registry::parse_contents(content).unwrap();

        assert_eq!(contents.servers.len(), 1);
        assert!(contents.servers.contains_key("good"));
        assert_eq!(contents.default_server, None);
    }

    #[test]
    fn test_parse_rejects_non_object_root() {
        assert!(Registry::parse_contents("[1, 2, 3]").is_err());
        assert!(Registry::parse_contents(r#"{"servers": 5}"#).is_err());
        assert!(Registry::parse_contents("{not json").is_err());
    }
}
