//! On-disk layout of a mirror.
//!
//! ```text
//! depots/{depot_id}.json   one resolved manifest per depot
//! apps/{app_id}.lua        unlock script for the app
//! ```
//!
//! Rendering is a pure function of its inputs, so an unchanged manifest
//! produces byte-identical files.
//!
//! Depot records are keyed by depot id alone. A depot shared by several
//! apps (a redistributable, say) has one record, written by whichever
//! app synced it last; each app's script still pins the manifest its own
//! run resolved.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use depotsync_model::{AppId, DepotEntry, ResolvedManifest};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEPOTS_DIR: &str = "depots";
pub const APPS_DIR: &str = "apps";

/// Contents of `depots/{depot_id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotRecord {
    pub depot_id: u32,
    pub manifest_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<String>,
    pub source_id: String,
}

impl From<&DepotEntry> for DepotRecord {
    fn from(entry: &DepotEntry) -> Self {
        Self {
            depot_id: entry.depot_id,
            manifest_id: entry.manifest_id,
            decryption_key: entry.key_hex(),
            source_id: entry.source_id.clone(),
        }
    }
}

pub fn depot_path(root: &Path, depot_id: u32) -> PathBuf {
    root.join(DEPOTS_DIR).join(format!("{depot_id}.json"))
}

pub fn app_path(root: &Path, app_id: AppId) -> PathBuf {
    root.join(APPS_DIR).join(format!("{app_id}.lua"))
}

pub fn render_depot(entry: &DepotEntry) -> Result<String> {
    let mut json = serde_json::to_string_pretty(&DepotRecord::from(entry))?;
    json.push('\n');
    Ok(json)
}

/// Renders the Lua unlock script: app and depot registrations (with keys
/// where known), DLC registrations, then pinned manifests.
pub fn render_lua(
    app_id: AppId,
    app_name: Option<&str>,
    resolved: &ResolvedManifest,
    dlc_ids: &BTreeSet<u32>,
) -> String {
    let mut lua = String::new();
    if let Some(name) = app_name.filter(|n| !n.is_empty()) {
        let _ = writeln!(lua, "-- {}", name.replace('\n', " "));
    }
    let _ = writeln!(lua, "addappid({app_id})");

    for entry in resolved.iter() {
        match entry.key_hex() {
            Some(key) => {
                let _ = writeln!(lua, "addappid({}, 1, \"{key}\")", entry.depot_id);
            }
            None => {
                let _ = writeln!(lua, "addappid({}, 1)", entry.depot_id);
            }
        }
    }
    for dlc in dlc_ids {
        if *dlc != app_id.get() && resolved.get(*dlc).is_none() {
            let _ = writeln!(lua, "addappid({dlc}, 1)");
        }
    }
    for entry in resolved.iter() {
        let _ = writeln!(lua, "setManifestid({}, \"{}\")", entry.depot_id, entry.manifest_id);
    }
    lua
}

/// App name and DLC registrations found in an existing unlock script.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub name: Option<String>,
    pub dlc_ids: BTreeSet<u32>,
}

/// Reads back what [`render_lua`] wrote. DLC lines are the bare
/// `addappid(id, 1)` registrations without a pinned manifest.
pub fn read_script_metadata(lua: &str) -> ScriptMetadata {
    let name = lua
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("-- "))
        .map(str::to_string);

    let mut registered = BTreeSet::new();
    let mut pinned = BTreeSet::new();
    for line in lua.lines() {
        if let Some(args) = call_args(line, "addappid") {
            if let [id, "1"] = args.as_slice() {
                registered.extend(id.parse::<u32>().ok());
            }
        } else if let Some(args) = call_args(line, "setManifestid") {
            pinned.extend(args.first().and_then(|id| id.parse::<u32>().ok()));
        }
    }

    ScriptMetadata {
        name,
        dlc_ids: registered.difference(&pinned).copied().collect(),
    }
}

fn call_args<'a>(line: &'a str, function: &str) -> Option<Vec<&'a str>> {
    let inner = line
        .trim()
        .strip_prefix(function)?
        .strip_prefix('(')?
        .strip_suffix(')')?;
    Some(inner.split(',').map(str::trim).collect())
}

/// Writes `contents` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes `contents` unless the file already holds exactly that. Returns
/// true if the file changed.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool> {
    match std::fs::read(path) {
        Ok(existing) if existing == contents.as_bytes() => Ok(false),
        Ok(_) => write_atomic(path, contents.as_bytes()).map(|()| true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            write_atomic(path, contents.as_bytes()).map(|()| true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes the app's files under `root`. Returns the depot ids whose
/// record changed and whether the Lua script changed.
///
/// With `inherit` set, the name and DLC lines of the app's existing script
/// are kept: its name wins over `app_name` and its DLC ids join `dlc_ids`.
pub fn write_app(
    root: &Path,
    app_id: AppId,
    app_name: Option<&str>,
    resolved: &ResolvedManifest,
    dlc_ids: &BTreeSet<u32>,
    inherit: bool,
) -> Result<(Vec<u32>, bool)> {
    let mut changed = Vec::new();
    for entry in resolved.iter() {
        if write_if_changed(&depot_path(root, entry.depot_id), &render_depot(entry)?)? {
            changed.push(entry.depot_id);
        }
    }

    let script = app_path(root, app_id);
    let mut name = app_name.map(str::to_string);
    let mut dlcs = dlc_ids.clone();
    if inherit {
        match std::fs::read_to_string(&script) {
            Ok(existing) => {
                let previous = read_script_metadata(&existing);
                name = previous.name.or(name);
                dlcs.extend(previous.dlc_ids);
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let lua = render_lua(app_id, name.as_deref(), resolved, &dlcs);
    let lua_changed = write_if_changed(&script, &lua)?;
    Ok((changed, lua_changed))
}
