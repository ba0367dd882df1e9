//! Arbitrary files from `write_files`.
//!
//! Each entry is materialized independently. A download or write failure
//! skips that entry and the step moves on; failing to create parent
//! directories or to change ownership aborts the run.

use anyhow::{Context, Result};
use std::borrow::Cow;

use super::{StepContext, StepOutcome};
use crate::document::{FileDescriptor, FileSource};
use crate::materialize;

pub(super) fn run(files: &[FileDescriptor], ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();

    for file in files {
        let target = ctx.settings.rooted(&file.path);
        let mode = file.mode()?;

        let content: Cow<'_, [u8]> = match file.source()? {
            FileSource::Inline(text) => Cow::Borrowed(text.as_bytes()),
            FileSource::Url(url) => match ctx.downloader.fetch(url) {
                Ok(body) => Cow::Owned(body),
                Err(err) => {
                    outcome.warn(err.context(format!(
                        "downloading content of '{}'",
                        file.path.display()
                    )));
                    continue;
                }
            },
        };

        match materialize::write(&target, &content, mode, file.owner(), ctx.runner) {
            Ok(()) => tracing::info!(path = %file.path.display(), "wrote file"),
            Err(err) if err.is_fatal() => {
                return Err(err).with_context(|| format!("writing '{}'", file.path.display()))
            }
            Err(err) => outcome.warn(err.into()),
        }
    }

    Ok(outcome)
}
