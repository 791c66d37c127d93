//! Candidate content parsers.

use depotsync_model::ErrorKind;
use serde::Deserialize;

use crate::types::{CandidateContent, ManifestClaim};
use crate::vdf;

/// Leading bytes of a Steam depot manifest payload (`0x71F617D0`, LE).
pub const MANIFEST_MAGIC: [u8; 4] = 0x71F6_17D0u32.to_le_bytes();

/// What kind of candidate a file name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Manifest,
    KeyVdf,
    AppConfig,
    AppInfo,
}

/// Classifies a file name, or `None` if it carries nothing of interest.
pub fn classify(file_name: &str) -> Option<CandidateKind> {
    if file_name.ends_with(".manifest") {
        Some(CandidateKind::Manifest)
    } else if file_name.eq_ignore_ascii_case("key.vdf") {
        Some(CandidateKind::KeyVdf)
    } else if file_name.eq_ignore_ascii_case("config.json") {
        Some(CandidateKind::AppConfig)
    } else if file_name.eq_ignore_ascii_case("appinfo.vdf") {
        Some(CandidateKind::AppInfo)
    } else {
        None
    }
}

/// Parses a downloaded candidate.
pub fn parse_candidate(file_name: &str, body: &[u8]) -> Result<CandidateContent, ErrorKind> {
    match classify(file_name) {
        Some(CandidateKind::Manifest) => parse_manifest(file_name, body).map(CandidateContent::Manifest),
        Some(CandidateKind::KeyVdf) => parse_key_vdf(body).map(CandidateContent::DepotKeys),
        Some(CandidateKind::AppConfig) => parse_app_config(body),
        Some(CandidateKind::AppInfo) => parse_app_info(body).map(|name| CandidateContent::AppInfo { name }),
        None => Err(ErrorKind::ParseError(format!("{file_name}: not a candidate file"))),
    }
}

/// Parses `{depot}_{manifest}.manifest` and checks the payload magic.
pub fn parse_manifest(file_name: &str, body: &[u8]) -> Result<ManifestClaim, ErrorKind> {
    let (depot_id, manifest_id) = parse_manifest_name(file_name)?;

    if body.is_empty() {
        return Err(ErrorKind::ParseError(format!("{file_name}: empty manifest")));
    }
    if !body.starts_with(&MANIFEST_MAGIC) {
        return Err(ErrorKind::ParseError(format!(
            "{file_name}: bad manifest magic"
        )));
    }

    Ok(ManifestClaim {
        depot_id,
        manifest_id,
    })
}

/// Splits a manifest file name into depot and manifest ids.
pub fn parse_manifest_name(file_name: &str) -> Result<(u32, u64), ErrorKind> {
    let bad = || ErrorKind::ParseError(format!("{file_name}: expected <depot>_<manifest>.manifest"));

    let stem = file_name.strip_suffix(".manifest").ok_or_else(bad)?;
    let (depot, manifest) = stem.split_once('_').ok_or_else(bad)?;
    let depot_id: u32 = depot.parse().map_err(|_| bad())?;
    let manifest_id: u64 = manifest.parse().map_err(|_| bad())?;
    if depot_id == 0 {
        return Err(bad());
    }
    Ok((depot_id, manifest_id))
}

/// Reads `depots/{id}/DecryptionKey` entries from a text `key.vdf`.
pub fn parse_key_vdf(body: &[u8]) -> Result<Vec<(u32, Vec<u8>)>, ErrorKind> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ErrorKind::ParseError(format!("key.vdf: {e}")))?;
    let root = vdf::parse(text).map_err(|e| ErrorKind::ParseError(format!("key.vdf: {e}")))?;
    let depots = root
        .get("depots")
        .ok_or_else(|| ErrorKind::ParseError("key.vdf: missing depots section".into()))?;

    let mut keys = Vec::new();
    for (id, entry) in depots.entries() {
        let depot_id: u32 = id
            .parse()
            .map_err(|_| ErrorKind::ParseError(format!("key.vdf: bad depot id {id:?}")))?;
        let Some(hex_key) = entry.get("DecryptionKey").and_then(vdf::VdfValue::as_str) else {
            continue;
        };
        let key = hex::decode(hex_key.trim())
            .map_err(|e| ErrorKind::ParseError(format!("key.vdf: depot {depot_id}: {e}")))?;
        keys.push((depot_id, key));
    }
    Ok(keys)
}

/// Reads `common/name` from a text `appinfo.vdf`.
pub fn parse_app_info(body: &[u8]) -> Result<String, ErrorKind> {
    let text = std::str::from_utf8(body)
        .map_err(|e| ErrorKind::ParseError(format!("appinfo.vdf: {e}")))?;
    let root = vdf::parse(text).map_err(|e| ErrorKind::ParseError(format!("appinfo.vdf: {e}")))?;
    // Dumps either start at `common` or wrap it in an `appinfo` object.
    let common = root
        .get("common")
        .or_else(|| root.get("appinfo").and_then(|app| app.get("common")));
    common
        .and_then(|c| c.get("name"))
        .and_then(vdf::VdfValue::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ErrorKind::ParseError("appinfo.vdf: missing common/name".into()))
}

#[derive(Deserialize)]
struct AppConfigFile {
    #[serde(default)]
    dlcs: Vec<u32>,
    #[serde(default)]
    packagedlcs: Vec<u32>,
}

fn parse_app_config(body: &[u8]) -> Result<CandidateContent, ErrorKind> {
    let config: AppConfigFile = serde_json::from_slice(body)
        .map_err(|e| ErrorKind::ParseError(format!("config.json: {e}")))?;
    Ok(CandidateContent::AppConfig {
        dlcs: config.dlcs,
        package_dlcs: config.packagedlcs,
    })
}
