//! Message of the day.

use anyhow::{Context, Result};

use super::{StepContext, StepOutcome};
use crate::materialize::replace_file;

pub(super) fn run(motd: &str, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    replace_file(&ctx.paths.motd, motd.as_bytes(), 0o644).context("writing motd")?;
    tracing::info!(bytes = motd.len(), "wrote motd");
    Ok(StepOutcome::applied())
}
