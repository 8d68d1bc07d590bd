use crate::config::ServerEntry;
use crate::error::{Error, Result};

/// Validates a server name
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server name must not be empty".to_string()));
    }

    Ok(())
}

/// Validates a single registry entry
pub fn validate_entry(name: &str, entry: &ServerEntry) -> Result<()> {
    validate_name(name)?;

    if entry.path.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("Server '{}' has empty path", name)));
    }

    if entry.script.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("Server '{}' has empty script", name)));
    }

    if entry.rcon_port == 0 {
        return Err(Error::ConfigInvalid(format!("Server '{}' has console port 0", name)));
    }

    if let Some(host) = &entry.rcon_host {
        if host.trim().is_empty() {
            return Err(Error::ConfigInvalid(format!("Server '{}' has empty rcon_host", name)));
        }
    }

    if let Some(address) = &entry.address {
        if address.trim().is_empty() {
            return Err(Error::ConfigInvalid(format!("Server '{}' has empty address", name)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, script: &str, port: u16) -> ServerEntry {
        ServerEntry {
            path: path.to_string(),
            script: script.to_string(),
            rcon_port: port,
            rcon_host: None,
            address: None,
        }
    }

    #[test]
    fn accepts_minimal_entry() {
        assert!(validate_entry("survival", &entry("/srv/survival", "run.sh", 25575)).is_ok());
    }

    #[test]
    fn rejects_blank_fields() {
        assert!(validate_entry("", &entry("/srv/survival", "run.sh", 25575)).is_err());
        assert!(validate_entry("survival", &entry("  ", "run.sh", 25575)).is_err());
        assert!(validate_entry("survival", &entry("/srv/survival", "", 25575)).is_err());
        assert!(validate_entry("survival", &entry("/srv/survival", "run.sh", 0)).is_err());

        let mut blank_host = entry("/srv/survival", "run.sh", 25575);
        blank_host.rcon_host = Some(String::new());
        assert!(validate_entry("survival", &blank_host).is_err());
    }
}
