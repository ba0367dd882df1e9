//! Provisioning steps.
//!
//! Each step is a guarded unit of work: its guard looks at one section of
//! the [`ProvisioningDocument`], and when the section is absent or empty the
//! step is a no-op. An applicable step returns `Err` for a fatal failure or a
//! [`StepOutcome`] carrying the best-effort failures it swallowed.
//!
//! [`Step::ORDER`] is the fixed execution order; later steps rely on the side
//! effects of earlier ones (network before services, scratch disk before
//! anything that persists state on it).

mod base_install;
mod disk;
mod drp;
mod files;
mod hostname;
mod motd;
mod mta;
mod ntp;
mod packages;
mod password;
mod sshd;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::document::ProvisioningDocument;
use crate::fetch::Downloader;
use crate::probe::HostProbe;
use crate::process::CommandRunner;
use crate::service::ServiceControl;
use crate::settings::{HostPaths, Settings};
use crate::template::TemplateRenderer;

pub use hostname::{hosts_line, short_hostname};
pub use sshd::sshd_directives;

/// Everything a step may touch on the host.
pub struct StepContext<'a> {
    pub settings: &'a Settings,
    pub paths: &'a HostPaths,
    pub renderer: &'a TemplateRenderer,
    pub runner: &'a dyn CommandRunner,
    pub services: &'a dyn ServiceControl,
    pub downloader: &'a dyn Downloader,
    pub probe: &'a dyn HostProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    BaseInstall,
    Hostname,
    RootPassword,
    ScratchDisk,
    Packages,
    Sshd,
    Ntp,
    Mta,
    WriteFiles,
    Motd,
    Drp,
}

impl Step {
    pub const ORDER: [Step; 11] = [
        Step::BaseInstall,
        Step::Hostname,
        Step::RootPassword,
        Step::ScratchDisk,
        Step::Packages,
        Step::Sshd,
        Step::Ntp,
        Step::Mta,
        Step::WriteFiles,
        Step::Motd,
        Step::Drp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::BaseInstall => "base-install",
            Step::Hostname => "hostname",
            Step::RootPassword => "root-password",
            Step::ScratchDisk => "scratch-disk",
            Step::Packages => "packages",
            Step::Sshd => "sshd",
            Step::Ntp => "ntp",
            Step::Mta => "mta",
            Step::WriteFiles => "write-files",
            Step::Motd => "motd",
            Step::Drp => "drp",
        }
    }

    /// The step's guard.
    pub fn applies(self, doc: &ProvisioningDocument) -> bool {
        match self {
            Step::BaseInstall => doc.network.is_some(),
            Step::Hostname => doc.hostname().is_some(),
            Step::RootPassword => doc.root_password().is_some(),
            Step::ScratchDisk => doc.scratch_disk().is_some(),
            Step::Packages => doc.packages.is_some(),
            Step::Sshd => doc.sshd.is_some(),
            Step::Ntp => doc.ntp().is_some(),
            Step::Mta => doc.mta.is_some(),
            Step::WriteFiles => !doc.write_files.is_empty(),
            Step::Motd => doc.motd().is_some(),
            Step::Drp => doc.drp().is_some(),
        }
    }

    /// Native tools the step invokes when it applies.
    pub fn required_tools(self) -> &'static [&'static str] {
        match self {
            Step::BaseInstall => &["setup-alpine"],
            Step::Hostname => &["setup-hostname", "hostname"],
            Step::RootPassword => &["chpasswd"],
            Step::ScratchDisk => &["setup-disk", "umount", "swapon", "rc-service"],
            Step::Packages => &["apk"],
            Step::Sshd => &["rc-service"],
            Step::Ntp => &["rc-service", "rc-update"],
            Step::Mta => &[],
            Step::WriteFiles => &["chown"],
            Step::Motd => &[],
            Step::Drp => &["rc-service", "rc-update"],
        }
    }

    /// Run the step. A step whose guard is false returns
    /// [`StepStatus::Skipped`] without touching the host; each arm below
    /// matches on the same section its [`Step::applies`] guard checks.
    pub fn run(self, doc: &ProvisioningDocument, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        match self {
            Step::BaseInstall => match &doc.network {
                Some(network) => base_install::run(network, doc, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Hostname => match doc.hostname() {
                Some(fqdn) => hostname::run(fqdn, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::RootPassword => match doc.root_password() {
                Some(password) => password::run(password, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::ScratchDisk => match doc.scratch_disk() {
                Some(disk) => disk::run(disk, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Packages => match &doc.packages {
                Some(packages) => packages::run(packages, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Sshd => match &doc.sshd {
                Some(sshd) => sshd::run(sshd, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Ntp => match doc.ntp() {
                Some(ntp) => ntp::run(ntp, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Mta => match &doc.mta {
                Some(mta) => mta::run(mta, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::WriteFiles => match doc.write_files.as_slice() {
                [] => Ok(StepOutcome::skipped()),
                entries => files::run(entries, ctx),
            },
            Step::Motd => match doc.motd() {
                Some(motd) => motd::run(motd, ctx),
                None => Ok(StepOutcome::skipped()),
            },
            Step::Drp => match doc.drp() {
                Some(drp) => drp::run(drp, ctx),
                None => Ok(StepOutcome::skipped()),
            },
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Step::ORDER
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown step '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Applied,
    Skipped,
}

/// Result of a step that did not fail fatally.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub status: StepStatus,
    /// Best-effort failures, already logged.
    pub warnings: Vec<anyhow::Error>,
}

impl StepOutcome {
    pub fn applied() -> Self {
        Self::default()
    }

    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            warnings: Vec::new(),
        }
    }

    /// Log and keep a best-effort failure.
    pub fn warn(&mut self, err: anyhow::Error) {
        tracing::warn!(error = %format!("{:#}", err), "best-effort action failed");
        self.warnings.push(err);
    }

    /// Keep the error of `result`, if any, as a warning.
    pub fn best_effort(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.warn(err);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixture::Host;
    use super::*;

    #[test]
    fn test_step_names_round_trip() {
        for step in Step::ORDER {
            assert_eq!(step.name().parse::<Step>().unwrap(), step);
        }
        assert!("reboot".parse::<Step>().is_err());
    }

    #[test]
    fn test_guard_false_makes_no_calls() {
        let host = Host::new();
        let doc = ProvisioningDocument::default();

        for step in Step::ORDER {
            assert!(!step.applies(&doc), "{} should not apply", step);
            let outcome = step.run(&doc, &host.ctx()).unwrap();
            assert_eq!(outcome.status, StepStatus::Skipped);
            assert!(outcome.warnings.is_empty());
        }

        assert!(host.journal.entries().is_empty());
    }

    #[test]
    fn test_empty_sections_are_skipped_by_run() {
        let host = Host::new();
        let doc = ProvisioningDocument::from_yaml_str(
            "network:\n  hostname: \"  \"\n  ntp:\n    pools: []\nwrite_files: []\nmotd: \"\\n\"\ndrp:\n  assets_url: \"\"\n",
        )
        .unwrap();

        // base-install applies to any network section
        for step in Step::ORDER.into_iter().filter(|s| *s != Step::BaseInstall) {
            assert!(!step.applies(&doc), "{} should not apply", step);
            let outcome = step.run(&doc, &host.ctx()).unwrap();
            assert_eq!(outcome.status, StepStatus::Skipped, "{}", step);
        }

        assert!(host.journal.entries().is_empty());
    }

    #[test]
    fn test_best_effort_collects_warning() {
        let mut outcome = StepOutcome::applied();
        outcome.best_effort(Ok(()));
        outcome.best_effort(Err(anyhow::anyhow!("restart failed")));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.status, StepStatus::Applied);
    }
}
