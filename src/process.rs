//! External command execution.
//!
//! Every native tool the provisioning steps drive (`setup-alpine`, `apk`,
//! `chpasswd`, `rc-service`, ...) is described by a [`Cmd`] and executed by a
//! [`CommandRunner`]. The production runner spawns real processes; tests swap
//! in a recording fake so the pipeline can run without touching the host.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// A native command invocation.
///
/// Arguments and environment are stored as plain strings so invocations can
/// be compared and logged. Standard input, when set, is written in full and
/// closed before the process is awaited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    stream: bool,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Feed `input` on a pipe to the child's standard input.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Send the child's output straight to the controlling terminal instead
    /// of capturing it.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Don't turn a non-zero exit status into an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn env_list(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub fn is_streamed(&self) -> bool {
        self.stream
    }

    /// Execute with `runner`, failing on a non-zero exit unless
    /// [`Cmd::allow_fail`] was set.
    pub fn run_with(&self, runner: &dyn CommandRunner) -> Result<CommandResult> {
        let result = runner.exec(self)?;
        if !self.allow_fail && !result.success() {
            bail!(
                "'{}' failed with {}: {}",
                self,
                result.exit_description(),
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    /// Execute on the live host.
    pub fn run(&self) -> Result<CommandResult> {
        self.run_with(&SystemRunner)
    }
}

/// Renders as a shell-like command line. Standard input is never shown
/// since it may carry credentials.
impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command.
///
/// Output fields are empty when the command was streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn exit_description(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code (terminated by signal)".to_string(),
        }
    }
}

/// Executes [`Cmd`]s.
///
/// Implementations report the raw outcome; exit status policy lives in
/// [`Cmd::run_with`].
pub trait CommandRunner {
    fn exec(&self, cmd: &Cmd) -> Result<CommandResult>;
}

/// Spawns real processes on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn exec(&self, cmd: &Cmd) -> Result<CommandResult> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }

        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if cmd.stream {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        tracing::debug!(command = %cmd, "running");
        let mut child = command
            .spawn()
            .with_context(|| format!("spawning '{}'", cmd))?;

        // The pipe must be closed before waiting, otherwise a child that
        // reads until EOF never exits.
        let written = match (&cmd.stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let result = pipe.write_all(input);
                drop(pipe);
                result
            }
            _ => Ok(()),
        };

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for '{}'", cmd))?;
        written.with_context(|| format!("writing standard input of '{}'", cmd))?;

        Ok(CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
