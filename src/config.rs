//! Configuration loading.
//!
//! The client needs to know where the appliance directory lives (control
//! socket, stored manifests, application roster, tokens) and, optionally,
//! which platform identifier to use when picking a manifest's build.

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use crate::error::{KiteError, Result};

/// Name of the daemon's control socket inside the appliance directory.
pub const CONTROL_SOCKET_NAME: &str = "applianced-control";

/// Client configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Appliance state directory.
    #[serde(default)]
    pub appliance_dir: PathBuf,
    /// Platform identifier used to select a manifest build reference.
    /// Falls back to the daemon's system type when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<String>,
}

impl Config {
    /// Configuration rooted at `appliance_dir`.
    pub fn new(appliance_dir: impl Into<PathBuf>) -> Self {
        Self {
            appliance_dir: appliance_dir.into(),
            system_type: None,
        }
    }

    /// Load configuration: the JSON file named by `KITE_CONFIG` (if any),
    /// then `KITE_APPLIANCE_DIR` / `KITE_SYSTEM_TYPE` overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_overrides(None, None)
    }

    /// [`Config::load`], with command-line values applied last.
    pub fn load_with_overrides(
        appliance_dir: Option<PathBuf>,
        system_type: Option<String>,
    ) -> Result<Self> {
        let mut config = match std::env::var_os("KITE_CONFIG") {
            Some(path) => Self::load_from_file(&PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        if let Some(dir) = appliance_dir {
            config.appliance_dir = dir;
        }
        if system_type.is_some() {
            config.system_type = system_type;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            KiteError::Config(format!("cannot parse config file {}: {e}", path.display()))
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os("KITE_APPLIANCE_DIR") {
            self.appliance_dir = PathBuf::from(dir);
        }

        if let Ok(system_type) = std::env::var("KITE_SYSTEM_TYPE") {
            if !system_type.is_empty() {
                self.system_type = Some(system_type);
            }
        }
    }

    /// Reject a configuration without an appliance directory.
    pub fn validate(&self) -> Result<()> {
        if self.appliance_dir.as_os_str().is_empty() {
            return Err(KiteError::Config(
                "no appliance directory: set KITE_APPLIANCE_DIR or pass --appliance-dir".into(),
            ));
        }
        Ok(())
    }

    /// `<appliance>/applianced-control`.
    pub fn control_socket_path(&self) -> PathBuf {
        self.appliance_dir.join(CONTROL_SOCKET_NAME)
    }

    /// `<appliance>/manifests`.
    pub fn manifests_dir(&self) -> PathBuf {
        self.appliance_dir.join("manifests")
    }

    /// `<appliance>/apps`.
    pub fn apps_file(&self) -> PathBuf {
        self.appliance_dir.join("apps")
    }

    /// `<appliance>/tokens`.
    pub fn tokens_dir(&self) -> PathBuf {
        self.appliance_dir.join("tokens")
    }
}
