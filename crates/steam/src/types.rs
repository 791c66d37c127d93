//! Response types for the Steam store `appdetails` endpoint.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Per-app envelope: `{"<appid>": {"success": bool, "data": {...}}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct AppDetailsEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<AppDetailsData>,
}

/// The subset of `data` the pipeline uses.
#[derive(Debug, Deserialize)]
pub(crate) struct AppDetailsData {
    pub name: String,
    #[serde(rename = "type", default)]
    pub app_type: String,
    #[serde(default)]
    pub dlc: Vec<u32>,
    /// Only present on mirrors of the store API that expose PICS depot
    /// sections; keys are depot ids.
    #[serde(default)]
    pub depots: BTreeMap<String, serde_json::Value>,
}

impl AppDetailsData {
    /// Numeric depot ids, ignoring non-depot keys such as `branches`.
    pub fn depot_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.depots.keys().filter_map(|k| k.parse().ok()).collect();
        ids.sort_unstable();
        ids
    }
}
