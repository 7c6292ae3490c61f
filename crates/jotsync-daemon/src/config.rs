use clap::Parser;
use jotsync_core::RemoteConfig;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BRANCH: &str = "main";

#[derive(Parser, Debug, Default)]
#[command(name = "jotsync-daemon")]
#[command(about = "Keeps a task and note repository in sync with its git remote")]
pub struct Args {
    /// Path to the local repository (or JOTSYNC_REPO_PATH)
    #[arg(short, long)]
    pub repo: Option<String>,

    /// Remote URL (or JOTSYNC_REMOTE_URL)
    #[arg(long)]
    pub remote: Option<String>,

    /// Branch to sync (or JOTSYNC_BRANCH, default main)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Seconds between automatic sync passes
    #[arg(short, long, default_value_t = 300)]
    pub interval: u64,

    /// Run a single sync pass and exit
    #[arg(long)]
    pub once: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Daemon configuration merged from command line and environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_path: PathBuf,
    pub remote: RemoteConfig,
    pub interval: Duration,
    pub once: bool,
    pub verbose: bool,
}

impl Config {
    /// Merge `args` with environment variables. Arguments win.
    ///
    /// Environment variables:
    /// - `JOTSYNC_REPO_PATH`: local repository (supports ~ for home directory)
    /// - `JOTSYNC_REMOTE_URL`: remote to clone from and push to
    /// - `JOTSYNC_BRANCH`: branch name, default `main`
    /// - `JOTSYNC_TOKEN`: access token for HTTPS remotes
    /// - `JOTSYNC_USERNAME`: username sent with the token
    pub fn from_env_and_args(args: Args) -> Result<Self, ConfigError> {
        Self::from_lookup(args, |key| std::env::var(key).ok())
    }

    fn from_lookup(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let repo = args
            .repo
            .or_else(|| env("JOTSYNC_REPO_PATH"))
            .ok_or(ConfigError::MissingRepoPath)?;
        let url = args
            .remote
            .or_else(|| env("JOTSYNC_REMOTE_URL"))
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingRemoteUrl)?;
        let branch = args
            .branch
            .or_else(|| env("JOTSYNC_BRANCH"))
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        if args.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        let mut remote = RemoteConfig::new(url, branch);
        remote.token = env("JOTSYNC_TOKEN").filter(|t| !t.is_empty());
        remote.username = env("JOTSYNC_USERNAME").filter(|u| !u.is_empty());

        Ok(Self {
            repo_path: expand_tilde(&repo),
            remote,
            interval: Duration::from_secs(args.interval),
            once: args.once,
            verbose: args.verbose,
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No repository path: pass --repo or set JOTSYNC_REPO_PATH")]
    MissingRepoPath,

    #[error("No remote URL: pass --remote or set JOTSYNC_REMOTE_URL")]
    MissingRemoteUrl,

    #[error("Sync interval must be at least one second")]
    InvalidInterval,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args() -> Args {
        Args {
            interval: 60,
            ..Args::default()
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_environment_fills_in_missing_args() {
        let config = Config::from_lookup(
            args(),
            lookup(&[
                ("JOTSYNC_REPO_PATH", "/data/notes"),
                ("JOTSYNC_REMOTE_URL", "https://git.example.com/me/notes.git"),
                ("JOTSYNC_TOKEN", "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(config.repo_path, PathBuf::from("/data/notes"));
        assert_eq!(config.remote.url, "https://git.example.com/me/notes.git");
        assert_eq!(config.remote.branch, "main");
        assert_eq!(config.remote.token.as_deref(), Some("secret"));
        assert_eq!(config.remote.username, None);
        assert_eq!(config.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_args_override_environment() {
        let config = Config::from_lookup(
            Args {
                repo: Some("/tmp/repo".into()),
                remote: Some("/srv/git/notes.git".into()),
                branch: Some("devices".into()),
                ..args()
            },
            lookup(&[
                ("JOTSYNC_REPO_PATH", "/elsewhere"),
                ("JOTSYNC_BRANCH", "main"),
            ]),
        )
        .unwrap();

        assert_eq!(config.repo_path, PathBuf::from("/tmp/repo"));
        assert_eq!(config.remote.url, "/srv/git/notes.git");
        assert_eq!(config.remote.branch, "devices");
    }

    #[test]
    fn test_missing_remote_is_an_error() {
        let result = Config::from_lookup(args(), lookup(&[("JOTSYNC_REPO_PATH", "/r")]));
        assert!(matches!(result, Err(ConfigError::MissingRemoteUrl)));

        let result = Config::from_lookup(args(), lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingRepoPath)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let result = Config::from_lookup(
            Args {
                interval: 0,
                ..args()
            },
            lookup(&[("JOTSYNC_REPO_PATH", "/r"), ("JOTSYNC_REMOTE_URL", "/u")]),
        );
        assert!(matches!(result, Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/notes"), home.join("notes"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
