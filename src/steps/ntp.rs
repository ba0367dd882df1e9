//! Time sync via chrony.

use anyhow::{Context, Result};

use super::{StepContext, StepOutcome};
use crate::document::Ntp;
use crate::materialize::install;
use crate::service::ServiceAction;
use crate::template::Template;

pub(super) fn run(ntp: &Ntp, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();

    let rendered = ctx.renderer.render(Template::Chrony, ntp)?;
    install(&rendered, &ctx.paths.chrony_conf, 0o644).context("installing chrony config")?;
    tracing::info!(
        pools = ntp.pools.len(),
        servers = ntp.servers.len(),
        "wrote chrony config"
    );

    outcome.best_effort(
        ctx.services
            .enable("chronyd", "default")
            .context("enabling chronyd"),
    );
    outcome.best_effort(
        ctx.services
            .control("chronyd", ServiceAction::Restart)
            .context("restarting chronyd"),
    );
    Ok(outcome)
}
