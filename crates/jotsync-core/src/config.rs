//! Remote and sync settings supplied by the host application.

use std::time::Duration;

/// Where and how to reach the remote repository.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Clone URL (https, ssh or a local path).
    pub url: String,
    /// Branch to pull from and push to.
    pub branch: String,
    /// Username sent with the token; hosting services accept any.
    pub username: Option<String>,
    /// Bearer token (personal access token).
    pub token: Option<String>,
    pub author_name: String,
    pub author_email: String,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            username: None,
            token: None,
            author_name: "jotsync".to_string(),
            author_email: "jotsync@localhost".to_string(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Source of remote settings, read once per transport initialization.
pub trait CredentialSupplier: Send + Sync {
    fn remote_config(&self) -> Option<RemoteConfig>;
}

impl CredentialSupplier for RemoteConfig {
    fn remote_config(&self) -> Option<RemoteConfig> {
        Some(self.clone())
    }
}

/// Tuning knobs for the sync orchestrator.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Minimum time between two non-manual passes.
    pub cooldown: Duration,
    /// Push attempts after the first rejection.
    pub max_push_retries: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
            max_push_retries: 1,
        }
    }
}
