use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use depotsync_mirror::lock::MirrorLock;
use depotsync_mirror::{
    MirrorError, MirrorOptions, RepoSyncState, SyncContext, compact, sync,
};
use depotsync_model::{AppId, DepotEntry, ErrorKind, ResolvedManifest};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn manifest(entries: &[(u32, u64)]) -> ResolvedManifest {
    let map: BTreeMap<u32, DepotEntry> = entries
        .iter()
        .map(|&(depot_id, manifest_id)| {
            (
                depot_id,
                DepotEntry {
                    depot_id,
                    manifest_id,
                    decryption_key: Some(vec![depot_id as u8; 4]),
                    source_id: "a-herta/manifest".into(),
                    source_priority: 10,
                    observed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                },
            )
        })
        .collect();
    ResolvedManifest::from_map(map)
}

fn context(push: bool) -> SyncContext {
    SyncContext {
        app_id: AppId::new(480).unwrap(),
        app_name: Some("Spacewar".into()),
        dlc_ids: BTreeSet::new(),
        inherit_script_metadata: false,
        options: MirrorOptions {
            push,
            lock_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    }
}

#[test]
fn first_sync_initialises_and_commits() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = dir.path().join("mirror");
    let state = RepoSyncState::new(&mirror, None);

    let outcome = sync(&manifest(&[(481, 1001), (482, 2002)]), &state, &context(false)).unwrap();
    let commit = outcome.commit.clone().unwrap();
    assert_eq!(outcome.depots, vec![481, 482]);
    assert!(!outcome.pushed);
    assert_eq!(outcome.state.last_synced_commit.as_deref(), Some(commit.as_str()));

    assert_eq!(git(&mirror, &["rev-parse", "HEAD"]), commit);
    assert_eq!(git(&mirror, &["symbolic-ref", "HEAD"]), "refs/heads/main");
    assert_eq!(
        git(&mirror, &["log", "-1", "--format=%s"]),
        "app 480: update depots 481, 482"
    );
    assert!(mirror.join("depots/481.json").exists());
    assert!(mirror.join("apps/480.lua").exists());

    // The state file is persisted and round-trips.
    let reloaded = RepoSyncState::load(&mirror, None).unwrap();
    assert_eq!(reloaded, outcome.state);
}

#[test]
fn unchanged_manifest_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let resolved = manifest(&[(481, 1001)]);

    let first = sync(&resolved, &state, &context(false)).unwrap();
    let second = sync(&resolved, &first.state, &context(false)).unwrap();

    assert!(second.commit.is_none());
    assert!(second.depots.is_empty());
    assert_eq!(second.state, first.state);
    assert_eq!(git(dir.path(), &["rev-list", "--count", "HEAD"]), "1");
}

#[test]
fn changed_manifest_commits_only_changed_depots() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);

    let first = sync(&manifest(&[(481, 1001), (482, 2002)]), &state, &context(false)).unwrap();
    let second = sync(&manifest(&[(481, 1001), (482, 2003)]), &first.state, &context(false)).unwrap();

    assert_eq!(second.depots, vec![482]);
    assert_eq!(
        git(dir.path(), &["log", "-1", "--format=%s"]),
        "app 480: update depots 482"
    );
    assert_eq!(git(dir.path(), &["rev-list", "--count", "HEAD"]), "2");
}

#[test]
fn dirty_tree_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();

    std::fs::write(dir.path().join("depots/481.json"), "{}").unwrap();
    let err = sync(&manifest(&[(481, 1002)]), &first.state, &context(false)).unwrap_err();
    assert!(matches!(err, MirrorError::ForeignChange(_)));
    assert!(matches!(ErrorKind::from(err), ErrorKind::RepoConflict(_)));
    // Nothing was overwritten.
    assert_eq!(std::fs::read_to_string(dir.path().join("depots/481.json")).unwrap(), "{}");
}

#[test]
fn foreign_commit_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();

    git(
        dir.path(),
        &[
            "-c", "user.name=someone", "-c", "user.email=someone@example.com",
            "commit", "--allow-empty", "-q", "-m", "manual",
        ],
    );
    let err = sync(&manifest(&[(481, 1001)]), &first.state, &context(false)).unwrap_err();
    assert!(matches!(err, MirrorError::ForeignChange(_)));
}

#[test]
fn missing_state_adopts_clean_head() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();
    std::fs::remove_file(dir.path().join(".git/depotsync-state.json")).unwrap();

    let fresh = RepoSyncState::load(dir.path(), None).unwrap();
    assert!(fresh.last_synced_commit.is_none());
    let outcome = sync(&manifest(&[(481, 1001)]), &fresh, &context(false)).unwrap();
    assert!(outcome.commit.is_none());
    assert_eq!(outcome.state.last_synced_commit, first.state.last_synced_commit);
    assert_eq!(RepoSyncState::load(dir.path(), None).unwrap(), outcome.state);
}

#[test]
fn held_lock_is_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();

    let _held = MirrorLock::acquire(&dir.path().join(".git"), Duration::ZERO).unwrap();
    let err = sync(&manifest(&[(481, 1002)]), &first.state, &context(false)).unwrap_err();
    assert!(matches!(err, MirrorError::Locked(_)));
    assert!(matches!(ErrorKind::from(err), ErrorKind::RepoConflict(_)));
}

#[test]
fn concurrent_first_syncs_serialise() {
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("remote.git");
    std::fs::create_dir(&remote).unwrap();
    git(&remote, &["init", "-q", "--bare"]);
    let mirror = dir.path().join("mirror");
    let resolved = manifest(&[(481, 1001)]);
    let mut ctx = context(false);
    ctx.options.lock_timeout = Duration::from_secs(30);

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let state = RepoSyncState::new(&mirror, Some(remote.display().to_string()));
                let (resolved, ctx) = (&resolved, &ctx);
                scope.spawn(move || sync(resolved, &state, ctx))
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let commits: Vec<_> = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap().commit)
        .collect();
    assert_eq!(commits.iter().filter(|c| c.is_some()).count(), 1);
    assert_eq!(git(&mirror, &["rev-list", "--count", "HEAD"]), "1");
    assert_eq!(
        git(&mirror, &["remote", "get-url", "origin"]),
        remote.display().to_string()
    );
    assert!(!mirror.join(".git").join(depotsync_mirror::lock::LOCK_FILE).exists());
}

#[cfg(target_os = "linux")]
#[test]
fn abandoned_lock_does_not_block_sync() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();

    let lock = dir.path().join(".git").join(depotsync_mirror::lock::LOCK_FILE);
    std::fs::write(&lock, "999999999\n").unwrap();
    let second = sync(&manifest(&[(481, 1002)]), &first.state, &context(false)).unwrap();
    assert!(second.commit.is_some());
    assert!(!lock.exists());
}

#[test]
fn compact_squashes_history_and_keeps_tree() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path(), None);
    let first = sync(&manifest(&[(481, 1001)]), &state, &context(false)).unwrap();
    let second = sync(&manifest(&[(481, 1002)]), &first.state, &context(false)).unwrap();
    let tree_before = git(dir.path(), &["rev-parse", "HEAD^{tree}"]);

    let compacted = compact(&second.state, &context(false).options).unwrap().unwrap();
    assert_eq!(git(dir.path(), &["rev-list", "--count", "HEAD"]), "1");
    assert_eq!(git(dir.path(), &["rev-parse", "HEAD^{tree}"]), tree_before);
    assert_eq!(
        compacted.state.last_synced_commit.as_deref(),
        Some(git(dir.path(), &["rev-parse", "HEAD"]).as_str())
    );

    // The compacted state is a valid base for the next sync.
    let next = sync(&manifest(&[(481, 1003)]), &compacted.state, &context(false)).unwrap();
    assert!(next.commit.is_some());
}

#[test]
fn compact_on_empty_mirror_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let state = RepoSyncState::new(dir.path().join("none"), None);
    assert!(compact(&state, &MirrorOptions::default()).unwrap().is_none());
}

#[test]
fn push_and_force_push_to_remote() {
    let dir = tempfile::tempdir().unwrap();
    let remote = dir.path().join("remote.git");
    std::fs::create_dir(&remote).unwrap();
    git(&remote, &["init", "-q", "--bare"]);
    let mirror = dir.path().join("mirror");
    let state = RepoSyncState::new(&mirror, Some(remote.display().to_string()));

    let first = sync(&manifest(&[(481, 1001)]), &state, &context(true)).unwrap();
    assert!(first.pushed);
    assert_eq!(
        git(&remote, &["rev-parse", "refs/heads/main"]),
        first.commit.clone().unwrap()
    );

    let second = sync(&manifest(&[(481, 1002)]), &first.state, &context(true)).unwrap();
    let compacted = compact(&second.state, &context(true).options).unwrap().unwrap();
    assert!(compacted.pushed);
    assert_eq!(
        git(&remote, &["rev-parse", "refs/heads/main"]),
        compacted.commit.unwrap()
    );
    assert_eq!(git(&remote, &["rev-list", "--count", "refs/heads/main"]), "1");
}
