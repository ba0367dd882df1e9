//! Recording fakes for the host-facing traits.
//!
//! All fakes append to one shared [`Journal`], so tests can assert the exact
//! interleaving of commands, service requests and downloads.

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::fetch::Downloader;
use crate::probe::HostProbe;
use crate::process::{Cmd, CommandResult, CommandRunner};
use crate::service::{ServiceAction, ServiceControl};

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

type Observer = Box<dyn Fn(&Cmd)>;

pub struct RecordingRunner {
    journal: Journal,
    responses: HashMap<String, CommandResult>,
    commands: RefCell<Vec<Cmd>>,
    observer: Option<Observer>,
}

impl RecordingRunner {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            responses: HashMap::new(),
            commands: RefCell::new(Vec::new()),
            observer: None,
        }
    }

    /// Answer every invocation of `program` with `result` (default: success).
    pub fn respond(mut self, program: &str, result: CommandResult) -> Self {
        self.responses.insert(program.to_string(), result);
        self
    }

    /// Call `observer` before recording each command.
    pub fn observe(mut self, observer: impl Fn(&Cmd) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn exec(&self, cmd: &Cmd) -> Result<CommandResult> {
        if let Some(observer) = &self.observer {
            observer(cmd);
        }
        self.journal.record(cmd.to_string());
        self.commands.borrow_mut().push(cmd.clone());
        Ok(self
            .responses
            .get(cmd.program())
            .cloned()
            .unwrap_or_else(CommandResult::ok))
    }
}

pub struct FakeServices {
    journal: Journal,
    failing: Vec<String>,
}

impl FakeServices {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            failing: Vec::new(),
        }
    }

    /// Make every request for `service` fail.
    pub fn fail(mut self, service: &str) -> Self {
        self.failing.push(service.to_string());
        self
    }
}

impl ServiceControl for FakeServices {
    fn control(&self, service: &str, action: ServiceAction) -> Result<()> {
        self.journal.record(format!("service {} {}", service, action));
        if self.failing.iter().any(|s| s == service) {
            bail!("{} {} failed", service, action);
        }
        Ok(())
    }

    fn enable(&self, service: &str, runlevel: &str) -> Result<()> {
        self.journal
            .record(format!("service {} enable {}", service, runlevel));
        if self.failing.iter().any(|s| s == service) {
            bail!("enabling {} failed", service);
        }
        Ok(())
    }
}

pub struct FakeDownloader {
    journal: Journal,
    bodies: HashMap<String, Vec<u8>>,
}

impl FakeDownloader {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            bodies: HashMap::new(),
        }
    }

    pub fn serve(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }
}

impl Downloader for FakeDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.journal.record(format!("fetch {}", url));
        match self.bodies.get(url) {
            Some(body) => Ok(body.clone()),
            None => bail!("404 for '{}'", url),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    pub processes: Vec<String>,
    pub mounts: Vec<PathBuf>,
    pub swaps: Vec<String>,
}

impl HostProbe for FakeProbe {
    fn process_names(&self) -> Result<Vec<String>> {
        Ok(self.processes.clone())
    }

    fn mount_points(&self) -> Result<Vec<PathBuf>> {
        Ok(self.mounts.clone())
    }

    fn swap_devices(&self) -> Result<Vec<String>> {
        Ok(self.swaps.clone())
    }
}
