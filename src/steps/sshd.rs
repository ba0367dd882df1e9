//! OpenSSH server: config directives, authorized keys, restart.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::Path;

use super::{StepContext, StepOutcome};
use crate::document::SshdConfig;
use crate::patcher::{patch, DirectiveMap};
use crate::service::ServiceAction;

/// The `sshd_config` directives managed from the document.
pub fn sshd_directives(sshd: &SshdConfig) -> DirectiveMap {
    let mut directives = DirectiveMap::new();
    directives.insert("Port".into(), sshd.port.to_string());
    directives.insert("PermitRootLogin".into(), sshd.permit_root_login.clone());
    directives.insert(
        "PasswordAuthentication".into(),
        yes_no(sshd.password_authentication).into(),
    );
    directives.insert(
        "PermitEmptyPasswords".into(),
        yes_no(sshd.permit_empty_passwords).into(),
    );
    if let Some(address) = &sshd.listen_address {
        directives.insert("ListenAddress".into(), address.clone());
    }
    directives
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

pub(super) fn run(sshd: &SshdConfig, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();

    patch(&ctx.paths.sshd_config, " ", &sshd_directives(sshd)).context("configuring sshd")?;

    let added = add_authorized_keys(&ctx.paths.authorized_keys, &sshd.authorized_keys)
        .context("installing authorized keys")?;
    if added > 0 {
        tracing::info!(added, "added authorized keys");
    }

    outcome.best_effort(
        ctx.services
            .control("sshd", ServiceAction::Restart)
            .context("restarting sshd"),
    );
    Ok(outcome)
}

/// Append keys not yet present. The `.ssh` directory is created 0700 and
/// the file 0600. Returns how many keys were added.
fn add_authorized_keys(path: &Path, keys: &[String]) -> Result<usize> {
    let keys: Vec<&str> = keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .collect();
    if keys.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = path.parent() {
        if !parent.is_dir() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(parent)
                .with_context(|| format!("creating '{}'", parent.display()))?;
        }
    }

    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("reading '{}'", path.display())),
    };
    let mut present: HashSet<&str> = existing.lines().map(str::trim).collect();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("opening '{}'", path.display()))?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        file.write_all(b"\n")
            .with_context(|| format!("writing '{}'", path.display()))?;
    }

    let mut added = 0;
    for key in keys {
        if present.insert(key) {
            writeln!(file, "{}", key).with_context(|| format!("writing '{}'", path.display()))?;
            added += 1;
        }
    }
    Ok(added)
}
