//! Package repositories and apk transactions.
//!
//! Order is fixed so installs land on a freshly updated index: repositories
//! file, `apk update`, `apk upgrade`, removals, then installs.

use anyhow::{Context, Result};
use serde::Serialize;

use super::{StepContext, StepOutcome};
use crate::document::Packages;
use crate::materialize::install;
use crate::process::Cmd;
use crate::template::Template;

#[derive(Serialize)]
struct RepositoriesContext<'a> {
    repositories: &'a [String],
}

pub(super) fn run(packages: &Packages, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    if packages.repositories.is_empty() {
        tracing::debug!("no repositories listed, keeping existing repositories file");
    } else {
        let rendered = ctx.renderer.render(
            Template::Repositories,
            &RepositoriesContext {
                repositories: &packages.repositories,
            },
        )?;
        install(&rendered, &ctx.paths.apk_repositories, 0o644)?;
        tracing::info!(count = packages.repositories.len(), "wrote apk repositories");
    }

    if packages.update {
        apk(ctx, &["update"])?;
    }
    if packages.upgrade {
        apk(ctx, &["upgrade"])?;
    }
    for package in &packages.uninstall {
        apk(ctx, &["del", package])?;
    }
    for package in &packages.install {
        apk(ctx, &["add", package])?;
    }

    Ok(StepOutcome::applied())
}

fn apk(ctx: &StepContext<'_>, args: &[&str]) -> Result<()> {
    let cmd = Cmd::new("apk").args(args.iter().copied());
    tracing::info!(command = %cmd, "running apk");
    cmd.run_with(ctx.runner)
        .with_context(|| format!("running '{}'", cmd))?;
    Ok(())
}
