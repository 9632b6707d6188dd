//! Installed-application manifest model.
//!
//! Manifests are JSON objects stored under `<appliance>/manifests/<name>`:
//!
//! ```json
//! {
//!   "name": "Photos",
//!   "domain": "photos.example.com",
//!   "nix-closure": { "x86_64-linux": "/nix/store/...-photos" },
//!   "run-as-admin": false,
//!   "singleton": true,
//!   "app-url": "photos.example.com",
//!   "version": "1.4.0",
//!   "icon": "https://photos.example.com/icon.svg"
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `major.minor.patch` version. Anything that is not exactly three
/// dot-separated integers normalises to `0.0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl ManifestVersion {
    /// Strict parse: exactly three dot-separated integers.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }

    /// Lenient parse used for stored manifests.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// `(major, minor, patch)`.
    pub fn as_tuple(self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for ManifestVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ManifestVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::parse_or_default).unwrap_or_default())
    }
}

/// Descriptor of an installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Display name.
    pub name: String,
    /// Application domain.
    pub domain: String,
    /// Build reference per platform identifier.
    #[serde(rename = "nix-closure")]
    pub nix_closures: BTreeMap<String, String>,
    /// Instances run with admin rights.
    #[serde(rename = "run-as-admin", default)]
    pub run_as_admin: bool,
    /// Only one instance may exist.
    #[serde(default)]
    pub singleton: bool,
    /// Application URL, when it differs from the domain.
    #[serde(rename = "app-url", default)]
    pub app_url: Option<String>,
    /// Version, `0.0.0` when absent or malformed.
    #[serde(default)]
    pub version: ManifestVersion,
    /// Icon reference.
    #[serde(default)]
    pub icon: Option<String>,
}

/// The web-facing subset of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    /// Display name.
    pub name: String,
    /// Application domain.
    pub domain: String,
    /// Application URL.
    #[serde(rename = "app-url")]
    pub app_url: Option<String>,
    /// Version string.
    pub version: ManifestVersion,
    /// Icon reference.
    pub icon: Option<String>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// `(major, minor, patch)`.
    pub fn version_info(&self) -> (u32, u32, u32) {
        self.version.as_tuple()
    }

    /// Build reference for `platform`; `None` when the manifest has no
    /// build for it.
    pub fn build_ref(&self, platform: &str) -> Option<&str> {
        self.nix_closures.get(platform).map(String::as_str)
    }

    /// Web-facing view.
    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            name: self.name.clone(),
            domain: self.domain.clone(),
            app_url: self.app_url.clone(),
            version: self.version,
            icon: self.icon.clone(),
        }
    }
}
