//! Root password via `chpasswd`.

use anyhow::{Context, Result};

use super::{StepContext, StepOutcome};
use crate::process::Cmd;

pub(super) fn run(password: &str, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    // The credential line goes over a pipe that is closed once written;
    // the runner waits for chpasswd to exit before returning.
    Cmd::new("chpasswd")
        .stdin(format!("root:{}\n", password))
        .run_with(ctx.runner)
        .context("changing root password")?;
    tracing::info!("root password set");
    Ok(StepOutcome::applied())
}
