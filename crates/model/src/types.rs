//! Core data model: app ids, depot claims and resolved manifests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A validated Steam application id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct AppId(u32);

impl AppId {
    /// Validates a raw id. Zero, negative and values above `u32::MAX`
    /// are rejected.
    pub fn new(raw: i64) -> Result<Self, ErrorKind> {
        if raw <= 0 {
            return Err(ErrorKind::InvalidInput(format!(
                "app id must be positive, got {raw}"
            )));
        }
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| ErrorKind::InvalidInput(format!("app id {raw} is out of range")))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<i64> for AppId {
    type Error = ErrorKind;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<AppId> for u32 {
    fn from(id: AppId) -> Self {
        id.0
    }
}

impl FromStr for AppId {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| ErrorKind::InvalidInput(format!("app id is not an integer: {s:?}")))?;
        Self::new(raw)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Metadata about an application as reported by Steam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub app_id: AppId,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_type: String,
    #[serde(default)]
    pub depot_ids: Vec<u32>,
    #[serde(default)]
    pub dlc_ids: Vec<u32>,
}

/// One source's claim about a depot's current manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepotEntry {
    pub depot_id: u32,
    pub manifest_id: u64,
    #[serde(default, with = "hex_key", skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<Vec<u8>>,
    pub source_id: String,
    pub source_priority: i32,
    pub observed_at: DateTime<Utc>,
}

impl DepotEntry {
    /// Returns the decryption key as lowercase hex, if present.
    pub fn key_hex(&self) -> Option<String> {
        self.decryption_key.as_deref().map(hex::encode)
    }
}

/// Serializes optional key bytes as a lowercase hex string.
mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Append-only collection of depot claims gathered for one app.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    entries: Vec<DepotEntry>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DepotEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ends the gathering phase. The returned set cannot be appended to.
    pub fn freeze(self) -> FrozenCandidates {
        FrozenCandidates {
            entries: self.entries.into(),
        }
    }
}

impl Extend<DepotEntry> for CandidateSet {
    fn extend<I: IntoIterator<Item = DepotEntry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl FromIterator<DepotEntry> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = DepotEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A candidate set whose gathering phase has ended.
#[derive(Debug, Clone, Default)]
pub struct FrozenCandidates {
    entries: Arc<[DepotEntry]>,
}

impl FrozenCandidates {
    /// Distinct depot ids present in the set.
    pub fn depot_ids(&self) -> BTreeSet<u32> {
        self.entries.iter().map(|e| e.depot_id).collect()
    }
}

impl Deref for FrozenCandidates {
    type Target = [DepotEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

/// One chosen entry per depot id, ordered by depot id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedManifest {
    entries: BTreeMap<u32, DepotEntry>,
}

impl ResolvedManifest {
    /// Wraps an already-reconciled map. Each value's `depot_id` must
    /// equal its key.
    pub fn from_map(entries: BTreeMap<u32, DepotEntry>) -> Self {
        debug_assert!(entries.iter().all(|(k, v)| *k == v.depot_id));
        Self { entries }
    }

    pub fn get(&self, depot_id: u32) -> Option<&DepotEntry> {
        self.entries.get(&depot_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn depot_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DepotEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(depot_id: u32, key: Option<Vec<u8>>) -> DepotEntry {
        DepotEntry {
            depot_id,
            manifest_id: 1001,
            decryption_key: key,
            source_id: "a-herta/manifest".into(),
            source_priority: 10,
            observed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn app_id_rejects_non_positive() {
        assert!(matches!(AppId::new(0), Err(ErrorKind::InvalidInput(_))));
        assert!(matches!(AppId::new(-480), Err(ErrorKind::InvalidInput(_))));
        assert!(matches!(
            AppId::new(i64::from(u32::MAX) + 1),
            Err(ErrorKind::InvalidInput(_))
        ));
        assert_eq!(AppId::new(480).unwrap().get(), 480);
    }

    #[test]
    fn app_id_from_str() {
        assert_eq!("480".parse::<AppId>().unwrap().get(), 480);
        assert_eq!(" 730 ".parse::<AppId>().unwrap().get(), 730);
        assert!("spacewar".parse::<AppId>().is_err());
        assert!("-1".parse::<AppId>().is_err());
    }

    #[test]
    fn app_id_serde_validates() {
        let id: AppId = serde_json::from_str("480").unwrap();
        assert_eq!(id.get(), 480);
        assert!(serde_json::from_str::<AppId>("0").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "480");
    }

    #[test]
    fn depot_entry_key_serializes_as_hex() {
        let e = entry(481, Some(vec![0xde, 0xad, 0xbe, 0xef]));
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains(r#""decryption_key":"deadbeef""#));
        let parsed: DepotEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, e);
        assert_eq!(parsed.key_hex().as_deref(), Some("deadbeef"));
    }

    #[test]
    fn depot_entry_without_key_omits_field() {
        let e = entry(481, None);
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("decryption_key"));
        let parsed: DepotEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.decryption_key, None);
    }

    #[test]
    fn candidate_set_freeze_keeps_entries() {
        let mut set = CandidateSet::new();
        set.push(entry(481, None));
        set.extend([entry(482, None), entry(481, None)]);
        assert_eq!(set.len(), 3);

        let frozen = set.freeze();
        assert_eq!(frozen.len(), 3);
        assert_eq!(frozen.depot_ids().into_iter().collect::<Vec<_>>(), vec![481, 482]);
    }

    #[test]
    fn resolved_manifest_iterates_in_depot_order() {
        let mut map = BTreeMap::new();
        map.insert(482, entry(482, None));
        map.insert(481, entry(481, None));
        let resolved = ResolvedManifest::from_map(map);
        assert_eq!(resolved.depot_ids().collect::<Vec<_>>(), vec![481, 482]);
        assert_eq!(resolved.get(481).unwrap().manifest_id, 1001);
        assert!(resolved.get(999).is_none());
    }
}
