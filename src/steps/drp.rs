//! Digital Rebar Provision runner: fetch the `drpcli` agent, install it as
//! an OpenRC service and start it.
//!
//! Both the binary and the init script are installed only when absent, so a
//! locally customised agent survives a rerun.

use anyhow::{Context, Result};
use serde::Serialize;

use super::{StepContext, StepOutcome};
use crate::document::Drp;
use crate::materialize::{install, make_executable, replace_file};
use crate::service::ServiceAction;
use crate::template::Template;

const AGENT_ASSET: &str = "drpcli.amd64.linux";
const SERVICE: &str = "drpcli";

#[derive(Serialize)]
struct InitContext<'a> {
    bin: String,
    endpoint: Option<&'a str>,
    token: Option<&'a str>,
}

pub(super) fn run(drp: &Drp, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();
    let bin = &ctx.paths.drpcli_bin;
    let rc = &ctx.paths.drpcli_rc;

    if bin.exists() {
        tracing::debug!(path = %bin.display(), "drpcli already installed");
    } else {
        let url = agent_url(&drp.assets_url);
        tracing::info!(%url, "downloading drpcli");
        let agent = ctx
            .downloader
            .fetch(&url)
            .with_context(|| format!("downloading drpcli from '{}'", url))?;
        replace_file(bin, &agent, 0o755).context("installing drpcli")?;
    }

    if rc.exists() {
        tracing::debug!(path = %rc.display(), "drpcli service already installed");
    } else {
        let rendered = ctx.renderer.render(
            Template::DrpcliInit,
            &InitContext {
                bin: ctx.settings.host_view(bin).display().to_string(),
                endpoint: drp.endpoint.as_deref(),
                token: drp.token.as_deref(),
            },
        )?;
        install(&rendered, rc, 0o644).context("installing drpcli service")?;
        make_executable(rc)?;
        ctx.services
            .enable(SERVICE, "default")
            .context("adding drpcli to the default runlevel")?;
    }

    outcome.best_effort(
        ctx.services
            .control(SERVICE, ServiceAction::Start)
            .context("starting drpcli"),
    );
    Ok(outcome)
}

fn agent_url(assets_url: &str) -> String {
    format!("{}/{}", assets_url.trim().trim_end_matches('/'), AGENT_ASSET)
}
