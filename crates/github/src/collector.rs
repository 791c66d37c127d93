//! Concurrent candidate download and assembly into depot entries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use depotsync_model::{AppId, CandidateSet, DepotEntry, PipelineEvent, SourceError};
use futures_util::stream::{Stream, StreamExt};
use tracing::debug;

use crate::client::GitHubClient;
use crate::sources::TrustedSource;
use crate::types::{CandidateContent, CandidateFile, ManifestClaim};

/// Result of fetching one discovered candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum GatherOutcome {
    /// Downloaded and parsed.
    Fetched {
        file: CandidateFile,
        content: CandidateContent,
    },
    Failed(SourceError),
}

impl GitHubClient {
    /// Discovers and fetches candidates, at most `max_workers` at a time.
    ///
    /// Outcomes arrive in completion order. Dropping the stream cancels the
    /// downloads still in flight.
    pub fn gather(&self, app_id: AppId) -> impl Stream<Item = GatherOutcome> + '_ {
        self.fetch_all(self.search_candidates(app_id))
    }

    /// Like [`gather`](Self::gather), over the DLC branches of `sources`.
    pub fn gather_dlc(
        &self,
        dlc_ids: Vec<u32>,
        sources: Vec<TrustedSource>,
    ) -> impl Stream<Item = GatherOutcome> + '_ {
        self.fetch_all(self.dlc_candidates(dlc_ids, sources))
    }

    fn fetch_all<'a, S>(&'a self, found: S) -> impl Stream<Item = GatherOutcome> + 'a
    where
        S: Stream<Item = Result<CandidateFile, SourceError>> + 'a,
    {
        let workers = self.config.max_workers.max(1);
        found
            .map(move |found| async move {
                let file = match found {
                    Ok(file) => file,
                    Err(e) => return GatherOutcome::Failed(e),
                };
                match self.fetch(&file).await {
                    Ok(content) => {
                        self.events.emit(PipelineEvent::CandidateAccepted {
                            source_id: file.source_id.clone(),
                            path: file.path.clone(),
                        });
                        GatherOutcome::Fetched { file, content }
                    }
                    Err(e) => {
                        debug!(source = %file.source_id, path = %file.path, error = %e, "candidate rejected");
                        GatherOutcome::Failed(SourceError::new(file.source_id, e))
                    }
                }
            })
            .buffer_unordered(workers)
    }
}

struct Claim {
    source_id: String,
    source_priority: i32,
    observed_at: DateTime<Utc>,
    manifest: ManifestClaim,
}

/// App name offered by one source's `appinfo.vdf`.
struct NameClaim {
    source_priority: i32,
    source_id: String,
    name: String,
}

impl NameClaim {
    /// Higher priority wins, then the smaller source id, then the smaller
    /// name, so arrival order never matters.
    fn beats(&self, other: &NameClaim) -> bool {
        (other.source_priority, &self.source_id, &self.name)
            < (self.source_priority, &other.source_id, &other.name)
    }
}

/// Accumulates fetched candidates until gathering ends.
///
/// Keys from a source's `key.vdf` attach to that source's manifest claims
/// for the same depot when the entries are built. Search hits carry no
/// commit time and are stamped `MIN_UTC`, so among themselves the source
/// id decides.
#[derive(Default)]
pub struct CandidateCollector {
    claims: Vec<Claim>,
    keys: BTreeMap<(String, u32), Vec<u8>>,
    dlc_ids: BTreeSet<u32>,
    config_sources: BTreeSet<String>,
    app_name: Option<NameClaim>,
}

impl CandidateCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, file: &CandidateFile, content: CandidateContent) {
        match content {
            CandidateContent::Manifest(manifest) => self.claims.push(Claim {
                source_id: file.source_id.clone(),
                source_priority: file.source_priority,
                observed_at: file.observed_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
                manifest,
            }),
            CandidateContent::DepotKeys(keys) => {
                for (depot_id, key) in keys {
                    // Arrival order varies between runs; keep the smaller key.
                    self.keys
                        .entry((file.source_id.clone(), depot_id))
                        .and_modify(|existing| {
                            if key < *existing {
                                *existing = key.clone();
                            }
                        })
                        .or_insert(key);
                }
            }
            CandidateContent::AppConfig { dlcs, package_dlcs } => {
                self.config_sources.insert(file.source_id.clone());
                self.dlc_ids.extend(dlcs);
                self.dlc_ids.extend(package_dlcs);
            }
            CandidateContent::AppInfo { name } => {
                let claim = NameClaim {
                    source_priority: file.source_priority,
                    source_id: file.source_id.clone(),
                    name,
                };
                match &self.app_name {
                    Some(current) if !claim.beats(current) => {}
                    _ => self.app_name = Some(claim),
                }
            }
        }
    }

    /// Accepts a file from a DLC branch. Only depot data counts there; the
    /// branch's own name and DLC list describe the DLC, not the app.
    pub fn accept_dlc(&mut self, file: &CandidateFile, content: CandidateContent) {
        match content {
            CandidateContent::Manifest(_) | CandidateContent::DepotKeys(_) => self.accept(file, content),
            CandidateContent::AppConfig { .. } | CandidateContent::AppInfo { .. } => {
                debug!(source = %file.source_id, path = %file.path, "ignoring dlc branch metadata");
            }
        }
    }

    /// Number of manifest claims collected so far.
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// DLC ids announced by `config.json` files.
    pub fn dlc_ids(&self) -> &BTreeSet<u32> {
        &self.dlc_ids
    }

    /// Whether `source_id` supplied a `config.json`.
    pub fn has_app_config(&self, source_id: &str) -> bool {
        self.config_sources.contains(source_id)
    }

    /// App name from the best-ranked `appinfo.vdf`.
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_ref().map(|claim| claim.name.as_str())
    }

    /// Builds the candidate set.
    pub fn into_candidates(self) -> CandidateSet {
        let keys = self.keys;
        self.claims
            .into_iter()
            .map(|claim| {
                let decryption_key = keys
                    .get(&(claim.source_id.clone(), claim.manifest.depot_id))
                    .cloned();
                DepotEntry {
                    depot_id: claim.manifest.depot_id,
                    manifest_id: claim.manifest.manifest_id,
                    decryption_key,
                    source_id: claim.source_id,
                    source_priority: claim.source_priority,
                    observed_at: claim.observed_at,
                }
            })
            .collect()
    }
}
