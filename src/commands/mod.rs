//! CLI subcommand implementations for kite-local.
//!
//! Each handler takes a connected [`LocalClient`](crate::LocalClient) and
//! prints its result as pretty JSON on stdout:
//!
//! - [`query`] - read-only lookups (system type, personas, containers, apps, tokens)
//! - [`admin`] - changes (create persona, update container, register app)
//! - [`run`] - remote process execution
//!
//! # Usage
//!
//! ```ignore
//! use kite_local::{commands, Config, LocalClient};
//!
//! let mut client = LocalClient::connect(&Config::load()?)?;
//! commands::query::personas(&mut client)?;
//! ```

pub mod admin;
pub mod query;
pub mod run;

use anyhow::Result;
use serde::Serialize;

/// Print `value` as pretty JSON, or `null` for `None`.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
