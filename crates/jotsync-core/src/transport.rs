//! RepoTransport trait: clone, pull, commit-and-push against a remote.
//!
//! Implementations:
//! - `GitTransport` (git.rs) - libgit2 over HTTPS with a bearer token
//! - scripted doubles in the orchestrator tests
//!
//! Every implementation serializes its operations: the working tree has no
//! safe concurrent access.

use async_trait::async_trait;
use thiserror::Error;

/// Broad failure class. Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Credentials missing or refused.
    Auth,
    /// Remote unreachable, TLS or HTTP failure.
    Network,
    /// Push refused because the remote has moved on.
    Rejected,
    /// Local repository missing or damaged.
    Corrupt,
    /// Merge or checkout would clobber files / left conflicts.
    Conflict,
    Other,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Push rejected: {0}")]
    Rejected(String),

    #[error("Local repository is corrupt: {0}")]
    Corrupt(String),

    #[error("Merge/checkout conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Auth(_) => TransportErrorKind::Auth,
            TransportError::Network(_) => TransportErrorKind::Network,
            TransportError::Rejected(_) => TransportErrorKind::Rejected,
            TransportError::Corrupt(_) => TransportErrorKind::Corrupt,
            TransportError::Conflict(_) => TransportErrorKind::Conflict,
            TransportError::Other(_) => TransportErrorKind::Other,
        }
    }

    /// Whether pulling and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            TransportErrorKind::Rejected | TransportErrorKind::Network
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Result of a fetch + merge.
#[derive(Debug)]
pub enum PullOutcome {
    /// Nothing new, fast-forwarded, or merged without conflicts.
    UpToDateOrMerged,
    /// Merge stopped with markers written into these paths.
    Conflicting(Vec<String>),
    Failed(TransportError),
}

/// Result of a commit + push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Nothing staged and nothing unpushed.
    NothingToCommit,
}

/// Version-control operations the orchestrator needs.
#[async_trait]
pub trait RepoTransport: Send + Sync {
    /// Whether a local repository exists yet.
    async fn is_initialized(&self) -> bool;

    /// Clone the configured remote into the working directory.
    async fn clone_repo(&self) -> Result<()>;

    /// Fetch the configured branch and merge it into the working tree.
    async fn pull(&self) -> PullOutcome;

    /// Stage `paths` (glob patterns), commit if anything is staged, push.
    async fn commit_and_push(&self, message: &str, paths: &[String]) -> Result<PushOutcome>;

    /// Stage deletion of `path`, commit and push.
    async fn remove_file(&self, path: &str, message: &str) -> Result<PushOutcome>;

    /// Hard-reset the working tree to HEAD.
    async fn force_checkout_head(&self) -> Result<()>;

    /// Files recorded in the HEAD commit.
    async fn tracked_paths(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TransportError::Rejected("x".into()).is_retryable());
        assert!(TransportError::Network("x".into()).is_retryable());
        assert!(!TransportError::Auth("x".into()).is_retryable());
        assert!(!TransportError::Corrupt("x".into()).is_retryable());
        assert_eq!(
            TransportError::Conflict("x".into()).kind(),
            TransportErrorKind::Conflict
        );
    }
}
