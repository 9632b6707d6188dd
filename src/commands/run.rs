//! Remote process execution command.
//!
//! # Examples
//!
//! ```bash
//! # Run in the instance of an application, output straight to our terminal
//! kite-local run kite+app://notes.example -- ls -l /
//!
//! # Capture output and print it after the process exits
//! kite-local run 10.0.0.7 --capture -- cat /etc/hostname
//! ```

use std::io::{self, Write};
use std::os::unix::io::AsFd;

use anyhow::{Context, Result};

use crate::{LocalClient, PersonaId, ProcessStatus, RemoteCommand, Stdio};

/// Run `args` in `target` and return the exit status to report.
///
/// Without `capture` the daemon writes straight to our stdout and stderr.
/// With it, both are piped back and printed after completion.
pub fn run(
    client: &mut LocalClient,
    target: &str,
    persona: Option<&str>,
    args: &[String],
    capture: bool,
) -> Result<i32> {
    let stdout = io::stdout();
    let stderr = io::stderr();

    let mut command = RemoteCommand::new(target);
    command.args(args.iter().cloned());
    if let Some(persona) = persona {
        let id: PersonaId =
            persona.parse().with_context(|| format!("invalid persona id {persona:?}"))?;
        command.persona(id);
    }
    if capture {
        command.stdout(Stdio::Pipe).stderr(Stdio::Pipe);
    } else {
        command.stdout(Stdio::Fd(stdout.as_fd())).stderr(Stdio::Fd(stderr.as_fd()));
    }

    let mut process = client.spawn(&command)?;
    let (out, err) = process.communicate(None)?;
    if capture {
        stdout.lock().write_all(&out)?;
        stderr.lock().write_all(&err)?;
    }

    let status = process.status();
    match (status, process.returncode()) {
        (ProcessStatus::Success, Some(code)) => Ok(code),
        _ => {
            log::warn!("[kite-local] remote process ended with {status:?}");
            Ok(1)
        }
    }
}
