//! In-place directive patching for native config files.
//!
//! Handles the `key<delimiter>value` style shared by `sshd_config`,
//! `chrony.conf`, `ssmtp.conf` and friends. Each desired directive ends up
//! present exactly once with the desired value:
//!
//! - a line whose directive matches is rewritten where it stands
//! - every other line (comments, blank lines, unrelated directives) is kept
//!   byte-for-byte and in order
//! - directives missing from the file are appended at the end
//!
//! Only the first occurrence of a duplicated directive is rewritten; later
//! duplicates pass through untouched.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::materialize::replace_file;

/// Directive name to desired value. Sorted, so appended directives come out
/// in a stable order.
pub type DirectiveMap = BTreeMap<String, String>;

/// Mode for config files the patcher has to create.
const NEW_FILE_MODE: u32 = 0o644;

/// Patch the file at `path` so it carries every directive in `desired`.
///
/// A missing file is treated as empty. The result is staged next to the
/// target and renamed over it, so readers never see a half-written file.
/// Nothing is written when the file already matches.
pub fn patch(path: &Path, delimiter: &str, desired: &DirectiveMap) -> Result<()> {
    check_directives(delimiter, desired)
        .with_context(|| format!("patching config '{}'", path.display()))?;

    let (original, mode) = match fs::read_to_string(path) {
        Ok(text) => {
            let mode = fs::metadata(path)
                .with_context(|| format!("reading metadata '{}'", path.display()))?
                .permissions()
                .mode();
            (text, mode & 0o7777)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => (String::new(), NEW_FILE_MODE),
        Err(err) => {
            return Err(err).with_context(|| format!("reading config '{}'", path.display()))
        }
    };

    let patched = patch_text(&original, delimiter, desired);
    if patched == original {
        tracing::debug!(path = %path.display(), "config already up to date");
        return Ok(());
    }

    replace_file(path, patched.as_bytes(), mode)
        .with_context(|| format!("patching config '{}'", path.display()))?;
    tracing::info!(path = %path.display(), directives = desired.len(), "patched config");
    Ok(())
}

/// Reject mappings whose output could not be matched again on the next
/// run: empty keys, keys containing the delimiter, and line breaks in keys
/// or values.
pub fn check_directives(delimiter: &str, desired: &DirectiveMap) -> Result<()> {
    if delimiter.is_empty() {
        bail!("empty directive delimiter");
    }
    if delimiter.contains(['\n', '\r']) {
        bail!("directive delimiter contains a line break");
    }
    for (directive, value) in desired {
        if directive.is_empty() {
            bail!("empty directive name");
        }
        if directive.contains(delimiter) {
            bail!(
                "directive '{}' contains the delimiter '{}'",
                directive,
                delimiter
            );
        }
        if directive.contains(['\n', '\r']) {
            bail!("directive {:?} contains a line break", directive);
        }
        if value.contains(['\n', '\r']) {
            bail!("value of '{}' contains a line break", directive);
        }
    }
    Ok(())
}

/// Pure form of [`patch`]: returns the patched text.
///
/// Untouched lines keep their own terminator (`\n` or `\r\n`); a rewritten
/// line keeps the terminator of the line it replaces. Appended directives
/// and a final unterminated line get `\n`.
pub fn patch_text(original: &str, delimiter: &str, desired: &DirectiveMap) -> String {
    let mut applied: BTreeSet<&str> = BTreeSet::new();
    let mut out = String::with_capacity(original.len());

    for raw in original.split_inclusive('\n') {
        let (body, ending) = split_line_ending(raw);
        match match_directive(body, delimiter, desired) {
            Some((directive, value)) if applied.insert(directive) => {
                out.push_str(directive);
                out.push_str(delimiter);
                out.push_str(value);
                out.push_str(if ending.is_empty() { "\n" } else { ending });
            }
            _ => {
                out.push_str(raw);
                if ending.is_empty() {
                    out.push('\n');
                }
            }
        }
    }

    for (directive, value) in desired {
        if !applied.contains(directive.as_str()) {
            out.push_str(directive);
            out.push_str(delimiter);
            out.push_str(value);
            out.push('\n');
        }
    }

    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn match_directive<'a>(
    line: &str,
    delimiter: &str,
    desired: &'a DirectiveMap,
) -> Option<(&'a str, &'a str)> {
    if line.is_empty() {
        return None;
    }
    let (directive, _) = line.split_once(delimiter)?;
    desired
        .get_key_value(directive)
        .map(|(key, value)| (key.as_str(), value.as_str()))
}
