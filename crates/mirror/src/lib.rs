//! Local git mirror of resolved depot manifests.
//!
//! One JSON record per depot and one Lua unlock script per app, committed
//! only when content changes. All git work goes through the `git`
//! executable.

pub mod error;
pub mod git;
pub mod layout;
pub mod lock;
pub mod state;
pub mod syncer;

pub use error::MirrorError;
pub use git::Author;
pub use state::RepoSyncState;
pub use syncer::{MirrorOptions, SyncContext, SyncOutcome, compact, sync};
