//! Kite Local - control-plane client for the Kite appliance daemon.
//!
//! The daemon manages isolated containers (personas and application
//! instances) and is reached over a local `SOCK_SEQPACKET` socket in the
//! appliance directory. This crate speaks its binary attribute protocol,
//! hands stdio descriptors across with SCM_RIGHTS, and drives remote
//! processes and application registration to completion.
//!
//! # Modules
//!
//! - [`protocol`] - attribute codec, packet framing, opcode catalogue
//! - [`socket`] - control socket, pipes and the readiness wait
//! - [`client`] - [`LocalClient`] and its operations
//! - [`process`] - [`RemoteProcess`] handles
//! - [`progress`] - registration progress records
//! - [`manifest`] / [`appliance`] - stored manifests, roster and tokens
//! - [`config`] - configuration loading
//! - [`commands`] - CLI subcommand handlers

pub mod appliance;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod manifest;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod socket;

// Re-export commonly used types
pub use client::{
    ApplicationInfo, ApplicationStatus, ContainerInfo, LocalClient, PersonaInfo, RemoteCommand,
    Signature, SpawnTarget, Stdio,
};
pub use config::Config;
pub use error::{KiteError, ProtocolError, Result};
pub use manifest::{Manifest, ManifestSummary, ManifestVersion};
pub use process::{ProcessStatus, RemoteProcess};
pub use protocol::{Id32, PersonaId, ResponseCode, SiteId, TokenId};
