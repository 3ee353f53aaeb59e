use std::fs;
use tracing::warn;

pub fn hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => Some(hostname.to_string_lossy().into_owned()),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname");
            None
        }
    }
}

pub fn machine_id() -> Option<String> {
    fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Identity of the current host: machine id and host/ processor name when available
pub fn host_identity(processor_name: Option<String>) -> String {
    let parts = [machine_id(), processor_name.or_else(hostname)]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    if parts.is_empty() {
        "unknown-host".to_string()
    } else {
        parts.join("/")
    }
}

/// First 8 bytes of the blake3 digest of the full identity.
/// Unlike extracting the digits of a hostname, `andes12` and `login12` stay apart.
pub fn host_key(identity: &str) -> u64 {
    let mut key = [0u8; 8];
    key.copy_from_slice(&blake3::hash(identity.as_bytes()).as_bytes()[..8]);

    u64::from_le_bytes(key)
}
