//! Reconciliation of competing depot claims.
//!
//! For every depot id, exactly one claim wins:
//!
//! 1. highest `source_priority`
//! 2. latest `observed_at`
//! 3. lexicographically smallest `source_id`
//! 4. highest `manifest_id`
//! 5. a claim with a decryption key over one without, then the smaller key
//!
//! The ordering is total, so the result never depends on input order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use depotsync_model::{DepotEntry, ResolvedManifest};
use tracing::debug;

/// Selects one entry per depot id.
pub fn reconcile(candidates: &[DepotEntry]) -> ResolvedManifest {
    let mut winners: BTreeMap<u32, &DepotEntry> = BTreeMap::new();

    for entry in candidates {
        winners
            .entry(entry.depot_id)
            .and_modify(|current| {
                if precedence(entry, current) == Ordering::Greater {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }

    debug!(candidates = candidates.len(), depots = winners.len(), "reconciled");
    ResolvedManifest::from_map(
        winners
            .into_iter()
            .map(|(depot_id, entry)| (depot_id, entry.clone()))
            .collect(),
    )
}

/// Orders two claims for the same depot; `Greater` means `a` wins.
pub fn precedence(a: &DepotEntry, b: &DepotEntry) -> Ordering {
    a.source_priority
        .cmp(&b.source_priority)
        .then_with(|| a.observed_at.cmp(&b.observed_at))
        .then_with(|| b.source_id.cmp(&a.source_id))
        .then_with(|| a.manifest_id.cmp(&b.manifest_id))
        .then_with(|| match (&a.decryption_key, &b.decryption_key) {
            (Some(ka), Some(kb)) => kb.cmp(ka),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        })
}
