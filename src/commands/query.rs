//! Read-only lookup commands.
//!
//! # Examples
//!
//! ```bash
//! kite-local personas
//! kite-local persona 0000000000000000000000000000000000000000000000000000000000000000
//! kite-local container 10.0.0.2
//! kite-local app photos.example.com
//! ```

use std::net::IpAddr;

use anyhow::{Context, Result};

use super::print_json;
use crate::{LocalClient, PersonaId};

/// Print the daemon's system type.
pub fn system_type(client: &mut LocalClient) -> Result<()> {
    print_json(&client.system_type()?)
}

/// Print every persona id.
pub fn personas(client: &mut LocalClient) -> Result<()> {
    print_json(&client.list_personas()?)
}

/// Print one persona's details.
///
/// # Errors
///
/// Returns an error if `id` is not 64 hex characters or the lookup fails.
pub fn persona(client: &mut LocalClient, id: &str) -> Result<()> {
    let id: PersonaId = id.parse().with_context(|| format!("invalid persona id {id:?}"))?;
    print_json(&client.get_persona_info(id)?)
}

/// Print the container behind `address`.
pub fn container(client: &mut LocalClient, address: IpAddr) -> Result<()> {
    print_json(&client.get_container_info(address)?)
}

/// Print the status of an installed application.
pub fn app(client: &mut LocalClient, url: &str) -> Result<()> {
    print_json(&client.get_application_status(url)?)
}

/// Print the installed-application roster with manifest summaries.
pub fn apps(client: &mut LocalClient) -> Result<()> {
    let platform = client.platform()?;
    let apps = client.installed_applications().context("cannot read application roster")?;
    let listing: Vec<_> = apps
        .iter()
        .map(|app| {
            serde_json::json!({
                "app_id": app.app_id,
                "manifest": app.manifest_name,
                "summary": app.manifest.summary(),
                "build": platform.as_deref().and_then(|p| app.manifest.build_ref(p)),
            })
        })
        .collect();
    print_json(&listing)
}

/// Print a stored token.
pub fn token(client: &mut LocalClient, name: &str) -> Result<()> {
    print_json(&client.open_token(name)?)
}
