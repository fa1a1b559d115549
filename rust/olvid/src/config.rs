//! Client key and server target resolution.

use std::path::Path;

use crate::{OlvidError, Result};

pub(crate) const KEY_ENV_VAR: &str = "OLVID_CLIENT_KEY";
pub(crate) const KEY_FILE_PATH: &str = ".client_key";

pub(crate) const HOSTNAME_ENV_VAR: &str = "DAEMON_HOSTNAME";
pub(crate) const PORT_ENV_VAR: &str = "DAEMON_PORT";

const DEFAULT_HOSTNAME: &str = "localhost";
const DEFAULT_PORT: &str = "50051";

/// Explicit connection settings for an [`crate::OlvidClient`].
///
/// Every field is optional; unset fields fall back to the parent client's
/// value (for child clients), then the environment, then the `.client_key`
/// file (key) or `localhost:50051` (target).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub(crate) client_key: Option<String>,
    pub(crate) server_target: Option<String>,
}

impl ClientConfig {
    /// Creates an empty configuration; resolution falls through to the
    /// environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client key used to authenticate on the daemon.
    ///
    /// Prefer the `OLVID_CLIENT_KEY` environment variable or the
    /// `.client_key` file over embedding the key in code.
    #[must_use]
    pub fn client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }

    /// Sets the full daemon address, including hostname and port
    /// (for example `"localhost:50051"`).
    #[must_use]
    pub fn server_target(mut self, server_target: impl Into<String>) -> Self {
        self.server_target = Some(server_target.into());
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolves the client key: explicit argument > parent > env > key file.
pub(crate) fn resolve_client_key(
    explicit: Option<String>,
    parent: Option<&str>,
) -> Result<String> {
    resolve_client_key_from(explicit, parent, |name| std::env::var(name).ok(), Path::new(KEY_FILE_PATH))
}

pub(crate) fn resolve_client_key_from(
    explicit: Option<String>,
    parent: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    key_file: &Path,
) -> Result<String> {
    if let Some(key) = non_empty(explicit) {
        return Ok(key);
    }
    if let Some(parent_key) = parent {
        return Ok(parent_key.to_string());
    }
    if let Some(key) = non_empty(env(KEY_ENV_VAR)) {
        return Ok(key);
    }
    if let Some(key) = std::fs::read_to_string(key_file)
        .ok()
        .and_then(|contents| non_empty(Some(contents)))
    {
        return Ok(key);
    }
    Err(OlvidError::ClientKeyNotFound)
}

/// Resolves the server target: explicit argument > parent > env > default.
pub(crate) fn resolve_server_target(explicit: Option<String>, parent: Option<&str>) -> String {
    resolve_server_target_from(explicit, parent, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_server_target_from(
    explicit: Option<String>,
    parent: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> String {
    if let Some(target) = non_empty(explicit) {
        return target;
    }
    if let Some(parent_target) = parent {
        return parent_target.to_string();
    }
    let hostname = non_empty(env(HOSTNAME_ENV_VAR)).unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
    let port = non_empty(env(PORT_ENV_VAR)).unwrap_or_else(|| DEFAULT_PORT.to_string());
    format!("{hostname}:{port}")
}
