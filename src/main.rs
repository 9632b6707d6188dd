//! kite-local CLI - talks to the Kite appliance daemon from the command line.
//!
//! This is the main binary entry point. See the `kite_local` library for
//! the protocol client itself.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kite_local::{commands, Config, KiteError, LocalClient, Signature};

/// Exit status when the control plane is not reachable with our privileges
/// (`EX_NOPERM` from sysexits.h).
const EXIT_NOPERM: i32 = 77;

// CLI
#[derive(Parser)]
#[command(name = "kite-local")]
#[command(version)]
#[command(about = "Control-plane client for the Kite appliance daemon")]
struct Cli {
    /// Appliance directory (overrides KITE_APPLIANCE_DIR)
    #[arg(long, global = true)]
    appliance_dir: Option<PathBuf>,
    /// Platform identifier for manifest builds (overrides KITE_SYSTEM_TYPE)
    #[arg(long, global = true)]
    system_type: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the daemon's system type
    SystemType,
    /// List persona ids
    Personas,
    /// Show one persona
    Persona {
        /// Persona id (64 hex characters)
        id: String,
    },
    /// Create a persona
    CreatePersona {
        /// Display name
        #[arg(long)]
        name: String,
        /// Password
        #[arg(long)]
        password: String,
        /// Grant superuser rights
        #[arg(long)]
        superuser: bool,
    },
    /// Show the container behind a network address
    Container {
        /// Container address
        address: IpAddr,
    },
    /// Set or clear a container's credential
    UpdateContainer {
        /// Container address
        address: IpAddr,
        /// New credential; omitted clears it
        #[arg(long)]
        credential: Option<String>,
    },
    /// Show an installed application
    App {
        /// Application URL
        url: String,
    },
    /// List installed applications
    Apps,
    /// Install an application from a manifest URL
    Register {
        /// Manifest URL
        manifest_url: String,
        /// Signature URL; inferred when omitted
        #[arg(long)]
        signature: Option<String>,
        /// Send no signature location at all
        #[arg(long, conflicts_with = "signature")]
        no_signature: bool,
        /// Do not print progress
        #[arg(long)]
        quiet: bool,
    },
    /// Show a stored token
    Token {
        /// Token file name
        name: String,
    },
    /// Run a command inside a container
    Run {
        /// IP address, kite+app://<app> URL or application name
        target: String,
        /// Persona whose application instance to use
        #[arg(long)]
        persona: Option<String>,
        /// Collect output and print it after the process exits
        #[arg(long)]
        capture: bool,
        /// Command and arguments
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            let denied = e.chain().any(|cause| {
                cause
                    .downcast_ref::<KiteError>()
                    .is_some_and(KiteError::is_permission)
            });
            std::process::exit(if denied { EXIT_NOPERM } else { 1 });
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::load_with_overrides(cli.appliance_dir.clone(), cli.system_type.clone())
        .context("failed to load configuration")
}

fn dispatch(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    let mut client = LocalClient::connect(&config)?;

    match cli.command {
        Commands::SystemType => commands::query::system_type(&mut client)?,
        Commands::Personas => commands::query::personas(&mut client)?,
        Commands::Persona { id } => commands::query::persona(&mut client, &id)?,
        Commands::CreatePersona { name, password, superuser } => {
            commands::admin::create_persona(&mut client, &name, &password, superuser)?;
        }
        Commands::Container { address } => commands::query::container(&mut client, address)?,
        Commands::UpdateContainer { address, credential } => {
            commands::admin::update_container(&mut client, address, credential.as_deref())?;
        }
        Commands::App { url } => commands::query::app(&mut client, &url)?,
        Commands::Apps => commands::query::apps(&mut client)?,
        Commands::Register {
            manifest_url,
            signature,
            no_signature,
            quiet,
        } => {
            let signature = if no_signature {
                Signature::Omit
            } else {
                Signature::from(signature.as_deref())
            };
            commands::admin::register(&mut client, &manifest_url, signature, quiet)?;
        }
        Commands::Token { name } => commands::query::token(&mut client, &name)?,
        Commands::Run { target, persona, capture, args } => {
            let code =
                commands::run::run(&mut client, &target, persona.as_deref(), &args, capture)?;
            client.close();
            return Ok(code);
        }
    }

    client.close();
    Ok(0)
}
