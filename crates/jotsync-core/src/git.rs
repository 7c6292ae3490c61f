//! GitTransport: `RepoTransport` over libgit2.
//!
//! libgit2 repository handles are not safe to share between threads, so
//! each operation opens its own handle on the blocking pool while holding
//! the transport lock. At most one operation touches the working tree at a
//! time.

use crate::config::{CredentialSupplier, RemoteConfig};
use crate::transport::{PullOutcome, PushOutcome, RepoTransport, Result, TransportError};

use async_trait::async_trait;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    AutotagOption, Commit, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, Index,
    IndexAddOption, ObjectType, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryState,
    Signature, TreeWalkMode, TreeWalkResult,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REMOTE_NAME: &str = "origin";
/// Username paired with a bare token when none is configured.
const TOKEN_USER: &str = "x-access-token";

impl From<git2::Error> for TransportError {
    fn from(e: git2::Error) -> Self {
        let message = e.message().to_string();
        match e.code() {
            ErrorCode::Auth | ErrorCode::Certificate => return TransportError::Auth(message),
            ErrorCode::NotFastForward => return TransportError::Rejected(message),
            ErrorCode::Conflict
            | ErrorCode::MergeConflict
            | ErrorCode::Unmerged
            | ErrorCode::Uncommitted => return TransportError::Conflict(message),
            _ => {}
        }
        match e.class() {
            ErrorClass::Net | ErrorClass::Ssl | ErrorClass::Ssh | ErrorClass::Http => {
                TransportError::Network(message)
            }
            ErrorClass::Repository
            | ErrorClass::Odb
            | ErrorClass::Index
            | ErrorClass::Object
            | ErrorClass::Reference
            | ErrorClass::Tree
            | ErrorClass::Zlib => TransportError::Corrupt(message),
            ErrorClass::Checkout | ErrorClass::Merge => TransportError::Conflict(message),
            _ => TransportError::Other(message),
        }
    }
}

/// Repository location plus remote settings; everything a blocking
/// operation needs.
struct GitRepo {
    workdir: PathBuf,
    config: RemoteConfig,
}

/// Git-backed transport for one working directory.
pub struct GitTransport {
    repo: Arc<GitRepo>,
    lock: Mutex<()>,
}

impl GitTransport {
    pub fn new(workdir: impl Into<PathBuf>, config: RemoteConfig) -> Self {
        Self {
            repo: Arc::new(GitRepo {
                workdir: workdir.into(),
                config,
            }),
            lock: Mutex::new(()),
        }
    }

    /// Build a transport from whatever the supplier currently holds.
    pub fn initialize(
        workdir: impl Into<PathBuf>,
        supplier: &dyn CredentialSupplier,
    ) -> Result<Self> {
        let config = supplier
            .remote_config()
            .ok_or_else(|| TransportError::Other("No remote configured".to_string()))?;
        info!("Git transport for {} (branch {})", config.url, config.branch);
        Ok(Self::new(workdir, config))
    }

    pub fn workdir(&self) -> &Path {
        &self.repo.workdir
    }

    /// Run a blocking git operation under the transport lock.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&GitRepo) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let repo = Arc::clone(&self.repo);
        debug!("git {}", op);
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| TransportError::Other(format!("git {} task failed: {}", op, e)))?
    }
}

impl GitRepo {
    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.config.branch)
    }

    fn remote_ref(&self) -> String {
        format!("refs/remotes/{}/{}", REMOTE_NAME, self.config.branch)
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.workdir).map_err(|e| {
            TransportError::Corrupt(format!("{}: {}", self.workdir.display(), e.message()))
        })
    }

    fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = 0;
        callbacks.credentials(move |_url, username_from_url, allowed| {
            attempts += 1;
            if attempts > 1 {
                // libgit2 keeps asking while the server answers 401.
                return Err(git2::Error::new(
                    ErrorCode::Auth,
                    ErrorClass::Http,
                    "credentials rejected by remote",
                ));
            }
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
                && let Some(token) = &self.config.token
            {
                let user = self.config.username.as_deref().unwrap_or(TOKEN_USER);
                return Cred::userpass_plaintext(user, token);
            }
            if allowed.contains(CredentialType::SSH_KEY)
                && let Some(user) = username_from_url
            {
                return Cred::ssh_key_from_agent(user);
            }
            Cred::default()
        });
        callbacks
    }

    fn clone_repo(&self) -> Result<()> {
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.callbacks());

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        let repo = builder.clone(&self.config.url, &self.workdir)?;
        self.ensure_branch(&repo)?;
        info!("Cloned {} into {}", self.config.url, self.workdir.display());
        Ok(())
    }

    /// Point HEAD at the configured branch, creating it from the
    /// remote-tracking branch when needed. An empty remote leaves HEAD on
    /// an unborn branch.
    fn ensure_branch(&self, repo: &Repository) -> Result<()> {
        let local_ref = self.local_ref();
        let head_target = repo
            .find_reference("HEAD")?
            .symbolic_target()
            .map(str::to_string);
        if head_target.as_deref() == Some(local_ref.as_str()) {
            return Ok(());
        }

        if repo.find_reference(&local_ref).is_err()
            && let Ok(remote) = repo.find_reference(&self.remote_ref())
            && let Some(oid) = remote.target()
        {
            repo.reference(&local_ref, oid, true, "jotsync: track remote branch")?;
        }
        repo.set_head(&local_ref)?;
        if repo.find_reference(&local_ref).is_ok() {
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        }
        Ok(())
    }

    fn fetch(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.callbacks());
        fetch_options.download_tags(AutotagOption::None);
        let refspec = format!(
            "+refs/heads/{0}:refs/remotes/{1}/{0}",
            self.config.branch, REMOTE_NAME
        );
        remote.fetch(&[refspec.as_str()], Some(&mut fetch_options), None)?;
        Ok(())
    }

    fn pull(&self) -> Result<PullOutcome> {
        let repo = self.open()?;
        self.ensure_branch(&repo)?;

        if repo.state() == RepositoryState::Merge {
            // A previous pass stopped mid-merge; finish that one first.
            let index = repo.index()?;
            let paths = conflicted_paths(&index)?;
            warn!("Merge already in progress ({} conflicted paths)", paths.len());
            return Ok(PullOutcome::Conflicting(paths));
        }

        self.fetch(&repo)?;

        let Ok(remote_ref) = repo.find_reference(&self.remote_ref()) else {
            debug!("Remote branch {} does not exist yet", self.config.branch);
            return Ok(PullOutcome::UpToDateOrMerged);
        };
        let theirs = repo.reference_to_annotated_commit(&remote_ref)?;
        let (analysis, _) = repo.merge_analysis(&[&theirs])?;

        if analysis.is_up_to_date() {
            return Ok(PullOutcome::UpToDateOrMerged);
        }
        if analysis.is_unborn() || analysis.is_fast_forward() {
            self.fast_forward(&repo, theirs.id(), analysis.is_unborn())?;
            return Ok(PullOutcome::UpToDateOrMerged);
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.safe().allow_conflicts(true).conflict_style_merge(true);
        repo.merge(&[&theirs], None, Some(&mut checkout))?;

        let mut index = repo.index()?;
        if index.has_conflicts() {
            let paths = conflicted_paths(&index)?;
            info!("Merge stopped with {} conflicted paths", paths.len());
            return Ok(PullOutcome::Conflicting(paths));
        }

        self.commit(&repo, &mut index, "Merge remote changes")?;
        Ok(PullOutcome::UpToDateOrMerged)
    }

    fn fast_forward(&self, repo: &Repository, target: Oid, unborn: bool) -> Result<()> {
        let commit = repo.find_commit(target)?;
        let mut checkout = CheckoutBuilder::new();
        if unborn {
            checkout.force();
        } else {
            checkout.safe();
        }
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;

        let local_ref = self.local_ref();
        match repo.find_reference(&local_ref) {
            Ok(mut reference) => {
                reference.set_target(target, "jotsync: fast-forward")?;
            }
            Err(_) => {
                repo.reference(&local_ref, target, true, "jotsync: fast-forward")?;
            }
        }
        repo.set_head(&local_ref)?;
        debug!("Fast-forwarded {} to {}", self.config.branch, target);
        Ok(())
    }

    fn commit_and_push(&self, message: &str, paths: &[String]) -> Result<PushOutcome> {
        let repo = self.open()?;
        self.ensure_branch(&repo)?;

        let mut index = repo.index()?;
        index.add_all(paths.iter().map(String::as_str), IndexAddOption::DEFAULT, None)?;
        index.update_all(paths.iter().map(String::as_str), None)?;

        let merging = repo.state() == RepositoryState::Merge;
        if merging {
            self.settle_conflicts(&mut index)?;
        }
        index.write()?;

        if merging || has_staged_changes(&repo, &index)? {
            self.commit(&repo, &mut index, message)?;
        } else if !self.is_ahead(&repo)? {
            return Ok(PushOutcome::NothingToCommit);
        }

        self.push(&repo)?;
        Ok(PushOutcome::Pushed)
    }

    fn remove_file(&self, path: &str, message: &str) -> Result<PushOutcome> {
        let repo = self.open()?;
        self.ensure_branch(&repo)?;

        let full_path = self.workdir.join(path);
        if full_path.is_file() {
            std::fs::remove_file(&full_path)
                .map_err(|e| TransportError::Other(format!("{}: {}", path, e)))?;
        }

        let mut index = repo.index()?;
        index.remove_all([path], None)?;
        index.write()?;

        if has_staged_changes(&repo, &index)? {
            self.commit(&repo, &mut index, message)?;
        } else if !self.is_ahead(&repo)? {
            return Ok(PushOutcome::NothingToCommit);
        }
        self.push(&repo)?;
        Ok(PushOutcome::Pushed)
    }

    /// Stage whatever the working tree now holds for each conflicted path.
    fn settle_conflicts(&self, index: &mut Index) -> Result<()> {
        for path in conflicted_paths(index)? {
            if self.workdir.join(&path).exists() {
                index.add_path(Path::new(&path))?;
            } else {
                index.remove_path(Path::new(&path))?;
            }
        }
        if index.has_conflicts() {
            return Err(TransportError::Conflict(
                "conflicts remain after staging".to_string(),
            ));
        }
        Ok(())
    }

    /// Commit the index on top of HEAD (and MERGE_HEAD during a merge).
    fn commit(&self, repo: &Repository, index: &mut Index, message: &str) -> Result<Oid> {
        let tree = repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now(&self.config.author_name, &self.config.author_email)?;

        let mut parents: Vec<Commit<'_>> = Vec::new();
        if let Ok(head) = repo.head() {
            parents.push(head.peel_to_commit()?);
        }
        let merging = repo.state() == RepositoryState::Merge;
        if merging {
            // Only ever one head merged in: the remote-tracking branch.
            let merge_head = repo.refname_to_id("MERGE_HEAD")?;
            parents.push(repo.find_commit(merge_head)?);
        }

        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?;
        if merging {
            repo.cleanup_state()?;
        }
        debug!("Committed {} ({} parents): {}", oid, parent_refs.len(), message);
        Ok(oid)
    }

    fn is_ahead(&self, repo: &Repository) -> Result<bool> {
        let Ok(local) = repo.refname_to_id(&self.local_ref()) else {
            return Ok(false);
        };
        match repo.refname_to_id(&self.remote_ref()) {
            Ok(upstream) => Ok(repo.graph_ahead_behind(local, upstream)?.0 > 0),
            Err(_) => Ok(true),
        }
    }

    fn push(&self, repo: &Repository) -> Result<()> {
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let refspec = format!("{0}:{0}", self.local_ref());
        let rejection: RefCell<Option<String>> = RefCell::new(None);

        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|_refname, status| {
                if let Some(message) = status {
                    *rejection.borrow_mut() = Some(message.to_string());
                }
                Ok(())
            });
            let mut push_options = PushOptions::new();
            push_options.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut push_options))?;
        }

        // The server's per-ref status is free text; any status is a refusal.
        if let Some(message) = rejection.into_inner() {
            return Err(TransportError::Rejected(message));
        }
        info!("Pushed {}", self.config.branch);
        Ok(())
    }

    fn force_checkout_head(&self) -> Result<()> {
        let repo = self.open()?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        warn!("Working tree reset to HEAD");
        Ok(())
    }

    fn tracked_paths(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let tree = head.peel_to_tree()?;

        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob)
                && let Some(name) = entry.name()
            {
                paths.push(format!("{}{}", root, name));
            }
            TreeWalkResult::Ok
        })?;
        Ok(paths)
    }
}

fn conflicted_paths(index: &Index) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
            paths.push(String::from_utf8_lossy(&entry.path).into_owned());
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn has_staged_changes(repo: &Repository, index: &Index) -> Result<bool> {
    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree()?),
        Err(_) => None,
    };
    let diff = repo.diff_tree_to_index(head_tree.as_ref(), Some(index), None)?;
    Ok(diff.deltas().len() > 0)
}

#[async_trait]
impl RepoTransport for GitTransport {
    async fn is_initialized(&self) -> bool {
        self.run("open", |repo| Ok(repo.open().is_ok()))
            .await
            .unwrap_or(false)
    }

    async fn clone_repo(&self) -> Result<()> {
        self.run("clone", |repo| repo.clone_repo()).await
    }

    async fn pull(&self) -> PullOutcome {
        match self.run("pull", |repo| repo.pull()).await {
            Ok(outcome) => outcome,
            Err(e) => PullOutcome::Failed(e),
        }
    }

    async fn commit_and_push(&self, message: &str, paths: &[String]) -> Result<PushOutcome> {
        let message = message.to_string();
        let paths = paths.to_vec();
        self.run("commit_and_push", move |repo| repo.commit_and_push(&message, &paths))
            .await
    }

    async fn remove_file(&self, path: &str, message: &str) -> Result<PushOutcome> {
        let path = path.to_string();
        let message = message.to_string();
        self.run("remove_file", move |repo| repo.remove_file(&path, &message))
            .await
    }

    async fn force_checkout_head(&self) -> Result<()> {
        self.run("force_checkout_head", |repo| repo.force_checkout_head())
            .await
    }

    async fn tracked_paths(&self) -> Result<Vec<String>> {
        self.run("tracked_paths", |repo| repo.tracked_paths()).await
    }
}
