use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::session::document::{FlowDocument, PersistedFlow};
use super::settings::AppSettings;

#[derive(Debug, Serialize, Deserialize)]
pub struct AppStateFile {
    pub flow: PersistedFlow,
}

impl AppStateFile {
    pub fn from_document(doc: &FlowDocument) -> Self {
        Self { flow: doc.to_persisted() }
    }

    /// Rebuild the runtime document. Consumes `self`; the loaded graph
    /// becomes the document's saved baseline, so it starts clean.
    pub fn into_document(self) -> FlowDocument {
        self.flow.into_document()
    }
}

static SETTINGS_OVERRIDE: OnceLock<AppSettings> = OnceLock::new();

pub fn set_settings_override(settings: AppSettings) {
    let _ = SETTINGS_OVERRIDE.set(settings);
}

fn autosave_dir() -> PathBuf {
    // If an override is set (e.g. from main.rs or a test), use it.
    if let Some(settings) = SETTINGS_OVERRIDE.get() {
        return settings.autosave_dir();
    }
    let settings = AppSettings::load().unwrap_or_default();
    settings.autosave_dir()
}

pub fn active_state_path() -> PathBuf {
    autosave_dir().join("flow.ron")
}

pub fn versioned_state_path_now() -> PathBuf {
    let now = OffsetDateTime::now_utc();
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = now.format(fmt).unwrap_or_else(|_| "unknown".to_string());
    autosave_dir().join(format!("flow_{}.ron", stamp))
}

fn ensure_autosave_dir() -> std::io::Result<()> {
    fs::create_dir_all(autosave_dir())
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("ron.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

pub fn save_active(state: &AppStateFile) -> anyhow::Result<PathBuf> {
    ensure_autosave_dir()?;
    let pretty = PrettyConfig::new()
        .separate_tuple_members(true)
        .enumerate_arrays(true);
    let s = ron::ser::to_string_pretty(state, pretty)?;
    let path = active_state_path();
    atomic_write(&path, s.as_bytes())?;
    Ok(path)
}

pub fn save_versioned(state: &AppStateFile) -> anyhow::Result<PathBuf> {
    ensure_autosave_dir()?;
    let pretty = PrettyConfig::new()
        .separate_tuple_members(true)
        .enumerate_arrays(true);
    let s = ron::ser::to_string_pretty(state, pretty)?;
    let path = versioned_state_path_now();
    atomic_write(&path, s.as_bytes())?;
    Ok(path)
}

pub fn load_active() -> anyhow::Result<Option<AppStateFile>> {
    let path = active_state_path();
    if !path.exists() {
        return Ok(None);
    }
    load_from_path(&path).map(Some)
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppStateFile> {
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let state: AppStateFile = ron::from_str(&buf)?;
    Ok(state)
}

pub fn list_versions() -> anyhow::Result<Vec<PathBuf>> {
    let dir = autosave_dir();
    let mut entries: Vec<PathBuf> = Vec::new();
    if dir.exists() {
        for e in fs::read_dir(dir)? {
            let p = e?.path();
            if let Some(name) = p.file_name().and_then(|s| s.to_str())
                && name.starts_with("flow_") && name.ends_with(".ron")
            {
                entries.push(p);
            }
        }
    }
    // sort descending by filename (timestamp)
    entries.sort();
    entries.reverse();
    Ok(entries)
}
