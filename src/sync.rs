//! Mirroring the vault to a git remote.
//!
//! Sync is best effort: callers spawn it in the background and failures are
//! only logged, so the local vault stays the source of truth.

use std::{
    path::{Path, PathBuf},
    process::Output,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::{process::Command, task::JoinHandle};

use crate::{Config, JournalError, Result};

/// What a sync run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Changes were committed and pushed
    Pushed,
    /// The working tree had no changes
    NothingToCommit,
    /// Sync is turned off
    Disabled,
}

#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn sync(&self, message: &str) -> Result<SyncOutcome>;
}

/// Sync used when mirroring is turned off.
#[derive(Debug, Default, Clone)]
pub struct NoopSync;

#[async_trait]
impl RemoteSync for NoopSync {
    async fn sync(&self, _message: &str) -> Result<SyncOutcome> {
        Ok(SyncOutcome::Disabled)
    }
}

/// Stages, commits and pushes the vault with the `git` binary.
#[derive(Debug, Clone)]
pub struct GitSync {
    git: PathBuf,
    repo_dir: PathBuf,
    remote: String,
    branch: Option<String>,
}

impl GitSync {
    /// Locates `git` on the `PATH`.
    pub fn new(repo_dir: impl Into<PathBuf>, remote: impl Into<String>, branch: Option<String>) -> Result<Self> {
        let git = which::which("git").map_err(|e| {
            error!("git executable not found: {}", e);
            JournalError::SyncFailed {
                message: format!("git executable not found: {}", e),
            }
        })?;
        Ok(Self {
            git,
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            branch,
        })
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        debug!("Running git {:?} in {}", args, self.repo_dir.display());
        Command::new(&self.git)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| JournalError::SyncFailed {
                message: format!("failed to run git {}: {}", args.join(" "), e),
            })
    }

    async fn git_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.git(args).await?;
        if !output.status.success() {
            let message = format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            error!("{}", message);
            return Err(JournalError::SyncFailed { message });
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteSync for GitSync {
    async fn sync(&self, message: &str) -> Result<SyncOutcome> {
        self.git_checked(&["add", "-A"]).await?;

        let commit = self.git(&["commit", "-m", message]).await?;
        if !commit.status.success() {
            let stdout = String::from_utf8_lossy(&commit.stdout);
            if stdout.contains("nothing to commit") || stdout.contains("nothing added to commit") {
                debug!("Vault unchanged, skipping push");
                return Ok(SyncOutcome::NothingToCommit);
            }
            let message = format!(
                "git commit failed: {}",
                String::from_utf8_lossy(&commit.stderr).trim()
            );
            error!("{}", message);
            return Err(JournalError::SyncFailed { message });
        }

        let mut push = vec!["push", self.remote.as_str()];
        if let Some(branch) = &self.branch {
            push.push(branch.as_str());
        }
        self.git_checked(&push).await?;
        info!("Vault pushed to {}", self.remote);
        Ok(SyncOutcome::Pushed)
    }
}

/// Builds the sync backend for `config`. A missing `git` binary disables
/// sync with a warning instead of failing startup.
pub fn sync_from_config(config: &Config) -> Arc<dyn RemoteSync> {
    if !config.sync_enabled {
        return Arc::new(NoopSync);
    }
    match GitSync::new(&config.vault_dir, config.git_remote.clone(), config.git_branch.clone()) {
        Ok(git) => Arc::new(git),
        Err(e) => {
            warn!("Remote sync disabled: {}", e);
            Arc::new(NoopSync)
        }
    }
}

/// Runs a sync on its own task; the result is logged and dropped.
pub fn spawn_sync(sync: Arc<dyn RemoteSync>, message: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        match sync.sync(&message).await {
            Ok(outcome) => debug!("Sync finished: {:?}", outcome),
            Err(e) => warn!("Remote sync failed, local vault unchanged: {}", e),
        }
    })
}

/// Fire-and-forget syncs that a short-lived process can still wait for
/// before exiting.
pub struct BackgroundSync {
    sync: Arc<dyn RemoteSync>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundSync {
    pub fn new(sync: Arc<dyn RemoteSync>) -> Self {
        Self {
            sync,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Starts a sync without waiting for it.
    pub fn trigger(&self, message: String) {
        let handle = spawn_sync(Arc::clone(&self.sync), message);
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => warn!("Failed to track sync task: {}", e),
        }
    }

    /// Waits for every sync started so far.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Sync task did not complete: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing(Mutex<Vec<String>>);

    #[async_trait]
    impl RemoteSync for Failing {
        async fn sync(&self, message: &str) -> Result<SyncOutcome> {
            self.0.lock().unwrap().push(message.to_string());
            Err(JournalError::SyncFailed {
                message: "remote rejected".into(),
            })
        }
    }

    #[tokio::test]
    async fn spawned_failures_are_swallowed() {
        let sync = Arc::new(Failing(Mutex::new(Vec::new())));
        spawn_sync(sync.clone(), "note: 2025-01-27".into()).await.unwrap();
        assert_eq!(sync.0.lock().unwrap().as_slice(), ["note: 2025-01-27"]);
    }

    #[tokio::test]
    async fn flush_waits_for_triggered_syncs() {
        let failing = Arc::new(Failing(Mutex::new(Vec::new())));
        let background = BackgroundSync::new(failing.clone());
        background.trigger("one".into());
        background.trigger("two".into());
        background.flush().await;
        assert_eq!(failing.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_sync_is_noop() {
        let config = Config::default();
        let sync = sync_from_config(&config);
        assert_eq!(sync.sync("x").await.unwrap(), SyncOutcome::Disabled);
    }
}
