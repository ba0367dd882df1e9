//! Preflight checks for a provisioning run.
//!
//! Verifies that the native tools the applicable steps shell out to are on
//! `PATH`, so a missing package shows up before the first step runs instead
//! of halfway through.
//!
//! # Example
//!
//! ```rust
//! use alpine_lift::document::ProvisioningDocument;
//! use alpine_lift::preflight::{command_exists, missing_tools};
//!
//! if !command_exists("setup-alpine") {
//!     println!("alpine-conf not installed");
//! }
//!
//! let doc = ProvisioningDocument::default();
//! assert!(missing_tools(&doc).is_empty());
//! ```

use serde::Serialize;

use crate::document::ProvisioningDocument;
use crate::steps::Step;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Alpine package providing each tool.
///
/// Each tuple is (command_name, package_name).
pub const TOOL_PACKAGES: &[(&str, &str)] = &[
    ("setup-alpine", "alpine-conf"),
    ("setup-hostname", "alpine-conf"),
    ("setup-disk", "alpine-conf"),
    ("hostname", "busybox"),
    ("chpasswd", "busybox"),
    ("umount", "busybox"),
    ("swapon", "busybox"),
    ("chown", "busybox"),
    ("apk", "apk-tools"),
    ("rc-service", "openrc"),
    ("rc-update", "openrc"),
];

/// Package that provides `tool`, when known.
pub fn package_for(tool: &str) -> Option<&'static str> {
    TOOL_PACKAGES
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, package)| *package)
}

/// A tool needed by an applicable step but absent from `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingTool {
    pub step: Step,
    pub tool: &'static str,
    pub package: Option<&'static str>,
}

/// Tools needed by the steps that apply to `doc`, filtered through `exists`.
pub fn missing_tools_with(
    doc: &ProvisioningDocument,
    exists: impl Fn(&str) -> bool,
) -> Vec<MissingTool> {
    Step::ORDER
        .into_iter()
        .filter(|step| step.applies(doc))
        .flat_map(|step| {
            step.required_tools()
                .iter()
                .map(move |tool| (step, *tool))
        })
        .filter(|(_, tool)| !exists(tool))
        .map(|(step, tool)| MissingTool {
            step,
            tool,
            package: package_for(tool),
        })
        .collect()
}

/// Tools needed by the steps that apply to `doc` and not found on `PATH`.
pub fn missing_tools(doc: &ProvisioningDocument) -> Vec<MissingTool> {
    missing_tools_with(doc, command_exists)
}

/// One line per missing tool.
pub fn describe(missing: &[MissingTool]) -> String {
    missing
        .iter()
        .map(|m| match m.package {
            Some(package) => format!("  {} for {} (install: {})", m.tool, m.step, package),
            None => format!("  {} for {}", m.tool, m.step),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
