//! Live host state the scratch-disk step branches on: running processes,
//! active mounts and active swap devices.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::System;

use crate::settings::HostPaths;

pub trait HostProbe {
    /// Names of all running processes.
    fn process_names(&self) -> Result<Vec<String>>;

    /// Mount points currently in use.
    fn mount_points(&self) -> Result<Vec<PathBuf>>;

    /// Devices or files currently used as swap.
    fn swap_devices(&self) -> Result<Vec<String>>;
}

/// Reads the running system through `sysinfo` and procfs.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    proc_mounts: PathBuf,
    proc_swaps: PathBuf,
}

impl SystemProbe {
    pub fn new(paths: &HostPaths) -> Self {
        Self {
            proc_mounts: paths.proc_mounts.clone(),
            proc_swaps: paths.proc_swaps.clone(),
        }
    }
}

impl HostProbe for SystemProbe {
    fn process_names(&self) -> Result<Vec<String>> {
        let mut system = System::new();
        system.refresh_processes();
        Ok(system
            .processes()
            .values()
            .map(|process| process.name().to_string())
            .collect())
    }

    fn mount_points(&self) -> Result<Vec<PathBuf>> {
        let text = read_proc(&self.proc_mounts)?;
        Ok(parse_mounts(&text))
    }

    fn swap_devices(&self) -> Result<Vec<String>> {
        let text = read_proc(&self.proc_swaps)?;
        Ok(parse_swaps(&text))
    }
}

fn read_proc(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))
}

/// Parse `/proc/mounts`: second whitespace-separated field, with the kernel's
/// octal escapes (`\040` for space) decoded.
pub fn parse_mounts(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Parse `/proc/swaps`: first field of every line after the header.
pub fn parse_swaps(text: &str) -> Vec<String> {
    text.lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(unescape_octal)
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
