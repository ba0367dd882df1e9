//! OpenRC service control.
//!
//! Maps start/stop/restart intents onto `rc-service` and runlevel
//! registration onto `rc-update`. A request for a state the service is
//! already in counts as success.

use anyhow::{bail, Result};
use std::fmt;

use crate::process::{Cmd, CommandResult, CommandRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ServiceControl {
    /// Apply `action` to `service` and wait for it to finish.
    fn control(&self, service: &str, action: ServiceAction) -> Result<()>;

    /// Add `service` to `runlevel`.
    fn enable(&self, service: &str, runlevel: &str) -> Result<()>;
}

/// Service control through the OpenRC command line tools.
pub struct OpenRc<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> OpenRc<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl ServiceControl for OpenRc<'_> {
    fn control(&self, service: &str, action: ServiceAction) -> Result<()> {
        let cmd = Cmd::new("rc-service")
            .arg(service)
            .arg(action.as_str())
            .allow_fail();
        let result = cmd.run_with(self.runner)?;
        if result.success() || already_in_state(&result) {
            tracing::debug!(service, %action, "service request done");
            return Ok(());
        }
        bail!(
            "'{}' failed with exit code {:?}: {}",
            cmd,
            result.code,
            combined_output(&result)
        )
    }

    fn enable(&self, service: &str, runlevel: &str) -> Result<()> {
        let cmd = Cmd::new("rc-update")
            .args(["add", service, runlevel])
            .allow_fail();
        let result = cmd.run_with(self.runner)?;
        if result.success() || already_in_state(&result) {
            return Ok(());
        }
        bail!(
            "'{}' failed with exit code {:?}: {}",
            cmd,
            result.code,
            combined_output(&result)
        )
    }
}

/// OpenRC reports e.g. "sshd has already been started", "already stopped"
/// or "already installed in runlevel".
fn already_in_state(result: &CommandResult) -> bool {
    combined_output(result).contains("already")
}

fn combined_output(result: &CommandResult) -> String {
    format!("{}{}", result.stdout, result.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, RecordingRunner};

    #[test]
    fn test_control_runs_rc_service() {
        let journal = Journal::default();
        let runner = RecordingRunner::new(&journal);

        OpenRc::new(&runner)
            .control("sshd", ServiceAction::Restart)
            .unwrap();

        assert_eq!(journal.entries(), vec!["rc-service sshd restart"]);
    }

    #[test]
    fn test_already_started_is_success() {
        let runner = RecordingRunner::new(&Journal::default()).respond(
            "rc-service",
            CommandResult::failed(1, " * WARNING: docker has already been started"),
        );

        assert!(OpenRc::new(&runner)
            .control("docker", ServiceAction::Start)
            .is_ok());
    }

    #[test]
    fn test_real_failure_is_error() {
        let runner = RecordingRunner::new(&Journal::default()).respond(
            "rc-service",
            CommandResult::failed(1, " * rc-service: service `nope' does not exist"),
        );

        let err = OpenRc::new(&runner)
            .control("nope", ServiceAction::Stop)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_enable_runs_rc_update() {
        let journal = Journal::default();
        let runner = RecordingRunner::new(&journal);

        OpenRc::new(&runner).enable("drpcli", "default").unwrap();

        assert_eq!(journal.entries(), vec!["rc-update add drpcli default"]);
    }

    #[test]
    fn test_enable_already_added_is_success() {
        let runner = RecordingRunner::new(&Journal::default()).respond(
            "rc-update",
            CommandResult::failed(1, " * rc-update: drpcli already installed in runlevel `default'; skipping"),
        );

        assert!(OpenRc::new(&runner).enable("drpcli", "default").is_ok());
    }
}
