//! First-boot provisioning engine for Alpine Linux.
//!
//! Consumes a declarative alpine-data document and drives the host's native
//! setup tools (setup-alpine, setup-disk, apk, OpenRC) into the described
//! state. Every piece of work is one of the guarded [`steps`], run once in a
//! fixed order by [`lift::Lift`].
//!
//! # Architecture
//!
//! ```text
//! lift (orchestrator)
//!     │
//!     ├── steps ──┬── template     rendered config artifacts
//!     │           ├── patcher      in-place directive edits
//!     │           ├── materialize  files with mode and owner
//!     │           └── service      OpenRC requests
//!     │
//!     └── backends: process (CommandRunner), fetch (Downloader),
//!                   service (ServiceControl), probe (HostProbe)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use alpine_lift::document::ProvisioningDocument;
//! use alpine_lift::lift::{Backends, Lift};
//! use alpine_lift::settings::Settings;
//!
//! let doc = ProvisioningDocument::load("/etc/alpine-data.yml".as_ref())?;
//! let settings = Settings::default();
//! let report = Lift::new(&doc, &settings, backends).run()?;
//! ```

pub mod document;
pub mod fetch;
pub mod lift;
pub mod materialize;
pub mod patcher;
pub mod preflight;
pub mod probe;
pub mod process;
pub mod service;
pub mod settings;
pub mod steps;
pub mod template;

#[cfg(test)]
mod testing;

pub use document::ProvisioningDocument;
pub use lift::{Backends, Lift, LiftError, RunReport};
pub use patcher::{patch, DirectiveMap};
pub use settings::{HostPaths, Settings};
pub use steps::{Step, StepOutcome, StepStatus};
