// Bootstrap host-file loader. Reads a JSON array of
// `"host:port"` strings used to seed the admin joiner's fan-out pool.
// What the caller does with the returned addresses -- retry policy,
// rediscovery cadence -- is outside this crate.

use crate::error::{Error, Result};

/// Load and validate the bootstrap host list at `path`.
///
/// The file must contain a JSON array of non-empty strings. Each entry
/// is taken as an opaque `"host:port"` address; no DNS resolution or
/// socket-address parsing happens here; the embedding transport owns
/// that.
pub async fn load_hosts(path: &str) -> Result<Vec<String>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let hosts: Vec<String> = serde_json::from_str(&raw)
        .map_err(|err| Error::InvalidHostFile(format!("{path}: {err}")))?;

    if hosts.is_empty() {
        return Err(Error::InvalidHostFile(format!(
            "{path}: bootstrap host list is empty"
        )));
    }
    if hosts.iter().any(|host| host.trim().is_empty()) {
        return Err(Error::InvalidHostFile(format!(
            "{path}: bootstrap host list contains an empty entry"
        )));
    }

    Ok(hosts)
}
