//! Commands that change daemon state.

use std::io::{self, Write};
use std::net::IpAddr;

use anyhow::{Context, Result};

use super::print_json;
use crate::client::ProgressFn;
use crate::{LocalClient, Signature};

/// Create a persona and print its id.
pub fn create_persona(
    client: &mut LocalClient,
    name: &str,
    password: &str,
    superuser: bool,
) -> Result<()> {
    let id = client.create_persona(name, password, superuser)?;
    print_json(&id)
}

/// Set or clear a container credential and print the daemon's verdict.
pub fn update_container(
    client: &mut LocalClient,
    address: IpAddr,
    credential: Option<&str>,
) -> Result<()> {
    let code = client.update_container(address, credential)?;
    print_json(&serde_json::json!({ "code": code.0, "result": code.to_string() }))
}

/// Writes progress lines and keeps the first write failure, since the
/// progress callback itself cannot fail.
struct ProgressReport<W> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> ProgressReport<W> {
    fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn record(&mut self, message: &str, complete: u64, total: u64) {
        if self.error.is_none() {
            self.error = writeln!(self.out, "{message}: {complete}/{total}").err();
        }
    }

    fn finish(self) -> io::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

/// Register an application, reporting progress on stderr unless `quiet`.
pub fn register(
    client: &mut LocalClient,
    manifest_url: &str,
    signature: Signature<'_>,
    quiet: bool,
) -> Result<()> {
    let mut report = ProgressReport::new(io::stderr());
    let mut record = |message: &str, complete: u64, total: u64| {
        report.record(message, complete, total);
    };
    let progress: Option<&mut ProgressFn<'_>> = if quiet { None } else { Some(&mut record) };
    client
        .register_application(manifest_url, signature, progress)
        .with_context(|| format!("failed to register {manifest_url}"))?;
    report.finish().context("failed to report registration progress")?;
    print_json(&serde_json::json!({ "registered": manifest_url }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn progress_lines_are_written() {
        let mut report = ProgressReport::new(Vec::new());
        report.record("fetching", 1, 4);
        report.record("done", 4, 4);
        assert!(report.error.is_none());
        assert_eq!(report.out, b"fetching: 1/4\ndone: 4/4\n");
        report.finish().unwrap();
    }

    #[test]
    fn write_failure_is_reported_once_finished() {
        let mut report = ProgressReport::new(Closed);
        report.record("fetching", 1, 4);
        report.record("done", 4, 4);
        let err = report.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
