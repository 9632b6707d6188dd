//! Read-only views of the appliance directory: stored manifests, the
//! installed-application roster and the token store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{KiteError, Result};
use crate::manifest::Manifest;

/// One roster entry with its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledApp {
    /// Application id (first roster column).
    pub app_id: String,
    /// Manifest file name (second roster column).
    pub manifest_name: String,
    /// Parsed manifest.
    pub manifest: Manifest,
}

/// File-backed stores under the appliance directory.
#[derive(Debug, Clone)]
pub struct ApplianceStore {
    manifests_dir: PathBuf,
    apps_file: PathBuf,
    tokens_dir: PathBuf,
}

impl ApplianceStore {
    /// Stores for the directories named in `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            manifests_dir: config.manifests_dir(),
            apps_file: config.apps_file(),
            tokens_dir: config.tokens_dir(),
        }
    }

    /// Read the manifest stored as `name`; `None` when the file is missing.
    pub fn read_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let Some(path) = child_path(&self.manifests_dir, name) else {
            log::warn!("[kite-store] refusing manifest name {name:?}");
            return Ok(None);
        };
        let Some(text) = read_optional(&path)? else {
            return Ok(None);
        };
        Manifest::from_json(&text)
            .map(Some)
            .map_err(|source| KiteError::Manifest {
                name: name.to_owned(),
                source,
            })
    }

    /// Installed applications listed in the `apps` roster.
    ///
    /// Each line is `app-id manifest-name`; shorter lines are skipped, as
    /// are entries whose manifest file is missing.
    pub fn installed_apps(&self) -> Result<Vec<InstalledApp>> {
        let text = fs::read_to_string(&self.apps_file)?;
        let mut apps = Vec::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let (Some(app_id), Some(manifest_name)) = (fields.next(), fields.next()) else {
                continue;
            };
            match self.read_manifest(manifest_name)? {
                Some(manifest) => apps.push(InstalledApp {
                    app_id: app_id.to_owned(),
                    manifest_name: manifest_name.to_owned(),
                    manifest,
                }),
                None => log::warn!(
                    "[kite-store] roster entry {app_id} names missing manifest {manifest_name}"
                ),
            }
        }
        Ok(apps)
    }

    /// Directory holding token files, created on first use.
    pub fn tokens_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.tokens_dir)?;
        Ok(&self.tokens_dir)
    }

    /// JSON content of the token named `name`; `None` when it does not exist.
    pub fn open_token(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let Some(path) = child_path(self.tokens_dir()?, name) else {
            log::warn!("[kite-store] refusing token name {name:?}");
            return Ok(None);
        };
        let Some(text) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| KiteError::Token {
                name: name.to_owned(),
                source,
            })
    }
}

/// `dir/name` when `name` is a single plain path component.
fn child_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) => Some(dir.join(name)),
        _ => None,
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
