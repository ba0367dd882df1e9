//! Step orchestration.
//!
//! [`Lift`] walks [`Step::ORDER`] once against a loaded document. Skipped
//! steps are logged and recorded, best-effort failures are collected per
//! step, and the first fatal failure aborts the run as [`LiftError::Step`].

use serde::Serialize;
use thiserror::Error;

use crate::document::ProvisioningDocument;
use crate::fetch::Downloader;
use crate::preflight::{self, MissingTool};
use crate::probe::HostProbe;
use crate::process::CommandRunner;
use crate::service::ServiceControl;
use crate::settings::{HostPaths, Settings};
use crate::steps::{Step, StepContext, StepOutcome, StepStatus};
use crate::template::TemplateRenderer;

#[derive(Debug, Error)]
pub enum LiftError {
    #[error("step '{step}' failed")]
    Step {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl LiftError {
    pub fn step(&self) -> Step {
        match self {
            LiftError::Step { step, .. } => *step,
        }
    }
}

/// The host-facing implementations a run drives.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub runner: &'a dyn CommandRunner,
    pub services: &'a dyn ServiceControl,
    pub downloader: &'a dyn Downloader,
    pub probe: &'a dyn HostProbe,
}

/// One executed step.
#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Outcome of a run that reached the end of the step list.
#[derive(Debug, Default)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn applied(&self) -> impl Iterator<Item = Step> + '_ {
        self.steps
            .iter()
            .filter(|r| r.outcome.status == StepStatus::Applied)
            .map(|r| r.step)
    }

    pub fn warning_count(&self) -> usize {
        self.steps.iter().map(|r| r.outcome.warnings.len()).sum()
    }
}

/// What a run would do, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub step: Step,
    pub applies: bool,
    pub missing_tools: Vec<&'static str>,
}

pub struct Lift<'a> {
    doc: &'a ProvisioningDocument,
    settings: &'a Settings,
    paths: HostPaths,
    renderer: TemplateRenderer,
    backends: Backends<'a>,
}

impl<'a> Lift<'a> {
    pub fn new(
        doc: &'a ProvisioningDocument,
        settings: &'a Settings,
        backends: Backends<'a>,
    ) -> Self {
        Self {
            doc,
            settings,
            paths: settings.host_paths(),
            renderer: TemplateRenderer::from_settings(settings),
            backends,
        }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    fn context(&self) -> StepContext<'_> {
        StepContext {
            settings: self.settings,
            paths: &self.paths,
            renderer: &self.renderer,
            runner: self.backends.runner,
            services: self.backends.services,
            downloader: self.backends.downloader,
            probe: self.backends.probe,
        }
    }

    /// Run every step in order, stopping at the first fatal failure.
    pub fn run(&self) -> Result<RunReport, LiftError> {
        let ctx = self.context();
        let mut report = RunReport::default();

        for step in Step::ORDER {
            let span = tracing::info_span!("step", name = %step);
            let _guard = span.enter();

            if !step.applies(self.doc) {
                tracing::debug!("skipped");
                report.steps.push(StepReport {
                    step,
                    outcome: StepOutcome::skipped(),
                });
                continue;
            }

            tracing::info!("starting");
            let outcome = step
                .run(self.doc, &ctx)
                .map_err(|source| LiftError::Step { step, source })?;
            if outcome.warnings.is_empty() {
                tracing::info!("done");
            } else {
                tracing::info!(warnings = outcome.warnings.len(), "done with warnings");
            }
            report.steps.push(StepReport { step, outcome });
        }

        tracing::info!(
            applied = report.applied().count(),
            warnings = report.warning_count(),
            "provisioning finished"
        );
        Ok(report)
    }
}

/// Applicability and missing host tools of every step.
pub fn plan(doc: &ProvisioningDocument) -> Vec<PlannedStep> {
    plan_with(doc, preflight::missing_tools(doc))
}

/// Fold preflight findings into the step list.
pub fn plan_with(doc: &ProvisioningDocument, missing: Vec<MissingTool>) -> Vec<PlannedStep> {
    Step::ORDER
        .into_iter()
        .map(|step| PlannedStep {
            step,
            applies: step.applies(doc),
            missing_tools: missing
                .iter()
                .filter(|m| m.step == step)
                .map(|m| m.tool)
                .collect(),
        })
        .collect()
}
