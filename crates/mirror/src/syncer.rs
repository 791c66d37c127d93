//! Commits resolved manifests to the mirror.
//!
//! Blocking; async callers run it on a blocking thread.

use std::collections::BTreeSet;
use std::time::Duration;

use depotsync_model::{AppId, ResolvedManifest};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{MirrorError, Result};
use crate::git::{Author, Git};
use crate::layout::{self, APPS_DIR, DEPOTS_DIR};
use crate::lock::MirrorLock;
use crate::state::RepoSyncState;

const REMOTE: &str = "origin";

/// Settings shared by every mirror operation.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub branch: String,
    pub author: Author,
    /// Push after committing when a remote is configured.
    pub push: bool,
    pub lock_timeout: Duration,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            branch: "main".into(),
            author: Author::default(),
            push: false,
            lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-run inputs for [`sync`].
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub app_id: AppId,
    pub app_name: Option<String>,
    pub dlc_ids: BTreeSet<u32>,
    /// Keep the name and DLC lines already in the app's script. Set when
    /// the run has no fresh app metadata.
    pub inherit_script_metadata: bool,
    pub options: MirrorOptions,
}

/// Result of a mirror operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub state: RepoSyncState,
    /// The new commit, or `None` when nothing changed.
    pub commit: Option<String>,
    /// Depots whose record changed in the new commit.
    pub depots: Vec<u32>,
    pub pushed: bool,
}

/// Writes `resolved` into the mirror and commits it if anything changed.
///
/// Creates the repository if absent. Every git command, `init` included,
/// runs under the mirror lock. Fails with a conflict when the lock is held
/// elsewhere, the working tree has uncommitted changes, or HEAD moved since
/// the last sync.
pub fn sync(
    resolved: &ResolvedManifest,
    state: &RepoSyncState,
    ctx: &SyncContext,
) -> Result<SyncOutcome> {
    let git = Git::new(&state.local_path);
    std::fs::create_dir_all(git.git_dir())?;
    let _lock = MirrorLock::acquire(&git.git_dir(), ctx.options.lock_timeout)?;
    prepare(&git, state, &ctx.options)?;
    let head = check_untouched(&git, state)?;

    let mut next = state.clone();
    next.last_synced_commit = head;

    let (depots, lua_changed) = layout::write_app(
        git.dir(),
        ctx.app_id,
        ctx.app_name.as_deref(),
        resolved,
        &ctx.dlc_ids,
        ctx.inherit_script_metadata,
    )?;

    let paths: Vec<&str> = [DEPOTS_DIR, APPS_DIR]
        .into_iter()
        .filter(|p| git.dir().join(p).exists())
        .collect();
    if !paths.is_empty() {
        git.add_all(&paths)?;
    }

    if git.index_is_clean()? {
        info!(app_id = %ctx.app_id, "mirror already up to date");
        if next != *state {
            next.save()?;
        }
        return Ok(SyncOutcome {
            state: next,
            commit: None,
            depots: Vec::new(),
            pushed: false,
        });
    }

    let message = commit_message(ctx.app_id, &depots, lua_changed);
    let commit = git.commit(&ctx.options.author, &message)?;
    info!(app_id = %ctx.app_id, %commit, depots = ?depots, "mirror committed");
    next.last_synced_commit = Some(commit.clone());
    next.save()?;

    let pushed = push_if_configured(&git, &next, &ctx.options, false)?;
    Ok(SyncOutcome {
        state: next,
        commit: Some(commit),
        depots,
        pushed,
    })
}

/// Replaces the mirror's history with a single root commit of the current
/// tree, drops unreachable objects, and force-pushes when configured.
///
/// Returns `None` for a mirror with no commits.
pub fn compact(state: &RepoSyncState, options: &MirrorOptions) -> Result<Option<SyncOutcome>> {
    let git = Git::new(&state.local_path);
    if !git.is_repo() {
        return Ok(None);
    }
    let _lock = MirrorLock::acquire(&git.git_dir(), options.lock_timeout)?;
    if check_untouched(&git, state)?.is_none() {
        return Ok(None);
    }

    let root = git.commit_tree_of_head(&options.author, "depotsync snapshot")?;
    git.run(&["reset", "-q", "--soft", &root])?;
    git.run(&["reflog", "expire", "--expire=now", "--all"])?;
    git.run(&["gc", "-q", "--prune=now"])?;
    info!(mirror = %state.local_path.display(), commit = %root, "mirror history compacted");

    let mut next = state.clone();
    next.last_synced_commit = Some(root.clone());
    next.save()?;

    let pushed = push_if_configured(&git, &next, options, true)?;
    Ok(Some(SyncOutcome {
        state: next,
        commit: Some(root),
        depots: Vec::new(),
        pushed,
    }))
}

/// Initialises the repository and points the remote at `state`. Caller
/// holds the lock.
fn prepare(git: &Git, state: &RepoSyncState, options: &MirrorOptions) -> Result<()> {
    if !git.is_repo() {
        info!(mirror = %state.local_path.display(), branch = %options.branch, "initialising mirror");
        git.init(&options.branch)?;
    }
    if let Some(url) = &state.remote_url {
        git.set_remote(REMOTE, url)?;
    }
    Ok(())
}

/// Returns HEAD if the mirror is exactly as the last sync left it.
///
/// Without a recorded commit, a clean tree's HEAD is adopted.
fn check_untouched(git: &Git, state: &RepoSyncState) -> Result<Option<String>> {
    let dirty = git.status()?;
    if !dirty.is_empty() {
        warn!(mirror = %git.dir().display(), changes = dirty.len(), "mirror has uncommitted changes");
        return Err(MirrorError::ForeignChange(format!(
            "uncommitted changes: {}",
            dirty.join("; ")
        )));
    }

    let head = git.head()?;
    match (&state.last_synced_commit, &head) {
        (Some(expected), Some(actual)) if expected != actual => Err(MirrorError::ForeignChange(
            format!("HEAD is {actual}, last synced {expected}"),
        )),
        (Some(expected), None) => Err(MirrorError::ForeignChange(format!(
            "HEAD is unborn, last synced {expected}"
        ))),
        _ => Ok(head),
    }
}

fn push_if_configured(
    git: &Git,
    state: &RepoSyncState,
    options: &MirrorOptions,
    force: bool,
) -> Result<bool> {
    if !options.push || state.remote_url.is_none() {
        return Ok(false);
    }
    git.push(REMOTE, &options.branch, force)?;
    info!(branch = %options.branch, force, "mirror pushed");
    Ok(true)
}

fn commit_message(app_id: AppId, depots: &[u32], lua_changed: bool) -> String {
    if depots.is_empty() && lua_changed {
        return format!("app {app_id}: update unlock script");
    }
    let ids: Vec<String> = depots.iter().map(u32::to_string).collect();
    format!("app {app_id}: update depots {}", ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let app = AppId::new(480).unwrap();
        assert_eq!(commit_message(app, &[481, 482], true), "app 480: update depots 481, 482");
        assert_eq!(commit_message(app, &[], true), "app 480: update unlock script");
    }
}
