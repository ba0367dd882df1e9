//! Hostname: persistent and runtime short name, plus a loopback entry in the
//! hosts file.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use super::{StepContext, StepOutcome};
use crate::process::Cmd;

/// Text before the first `.` of a fully qualified name.
pub fn short_hostname(fqdn: &str) -> &str {
    fqdn.split_once('.').map_or(fqdn, |(short, _)| short)
}

/// The loopback line written to the hosts file.
pub fn hosts_line(fqdn: &str) -> String {
    format!("127.0.0.1\t{} {}\n", fqdn, short_hostname(fqdn))
}

pub(super) fn run(fqdn: &str, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let short = short_hostname(fqdn);

    Cmd::new("setup-hostname")
        .arg(short)
        .run_with(ctx.runner)
        .context("setting persistent hostname")?;
    Cmd::new("hostname")
        .arg(short)
        .run_with(ctx.runner)
        .context("setting runtime hostname")?;

    if append_hosts_entry(&ctx.paths.hosts, fqdn)? {
        tracing::info!(hostname = fqdn, "added hosts entry");
    } else {
        tracing::debug!(hostname = fqdn, "hosts entry already present");
    }
    Ok(StepOutcome::applied())
}

/// Append the loopback line unless an identical line is already there.
/// Returns whether the file changed.
fn append_hosts_entry(path: &Path, fqdn: &str) -> Result<bool> {
    let line = hosts_line(fqdn);

    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("reading '{}'", path.display())),
    };
    if existing.lines().any(|l| l == line.trim_end()) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening '{}'", path.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")
            .with_context(|| format!("writing '{}'", path.display()))?;
    }
    file.write_all(line.as_bytes())
        .with_context(|| format!("writing '{}'", path.display()))?;
    Ok(true)
}
