//! File materialization: writing content to host paths with the requested
//! permission bits and ownership.
//!
//! [`write`] reports which of its three sub-operations failed through
//! [`MaterializeError`], so the calling step can decide what is fatal:
//! directory creation and ownership changes abort the run, a failed write
//! does not.

use anyhow::{Context, Result};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::{Cmd, CommandRunner};

/// Mode for directories created on the way to a materialized file.
pub const PARENT_DIR_MODE: u32 = 0o711;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("creating parent directories of '{}'", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing '{}'", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("changing owner of '{}' to '{owner}'", path.display())]
    Chown {
        path: PathBuf,
        owner: String,
        #[source]
        source: anyhow::Error,
    },
}

impl MaterializeError {
    /// Whether the failure must abort the provisioning run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MaterializeError::Write { .. })
    }
}

/// Write `content` to `path` with `mode`, then hand it to `owner` if given.
///
/// Missing parent directories are created with [`PARENT_DIR_MODE`].
pub fn write(
    path: &Path,
    content: &[u8],
    mode: u32,
    owner: Option<&str>,
    runner: &dyn CommandRunner,
) -> std::result::Result<(), MaterializeError> {
    create_parent_dirs(path).map_err(|source| MaterializeError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;

    write_with_mode(path, content, mode).map_err(|source| MaterializeError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(owner) = owner {
        Cmd::new("chown")
            .arg(owner)
            .arg_path(path)
            .run_with(runner)
            .map_err(|source| MaterializeError::Chown {
                path: path.to_path_buf(),
                owner: owner.to_string(),
                source,
            })?;
    }

    tracing::debug!(path = %path.display(), mode = %format!("{:o}", mode), "materialized file");
    Ok(())
}

/// The file is created with `mode` so its content is never readable with
/// looser permissions; the explicit chmod afterwards undoes the umask and
/// fixes up files that already existed.
fn write_with_mode(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    file.write_all(content)
}

fn create_parent_dirs(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => DirBuilder::new()
            .recursive(true)
            .mode(PARENT_DIR_MODE)
            .create(parent),
        _ => Ok(()),
    }
}

/// Atomically replace `path` with `contents`.
///
/// The data is staged in a temporary file in the same directory and renamed
/// into place once fully written and chmod'ed.
pub fn replace_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("creating directory '{}'", parent.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("staging temporary file in '{}'", parent.display()))?;
    staged
        .write_all(contents)
        .and_then(|()| staged.as_file().sync_all())
        .with_context(|| format!("writing staged copy of '{}'", path.display()))?;
    fs::set_permissions(staged.path(), fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on staged '{}'", path.display()))?;
    staged
        .persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("moving staged file into '{}'", path.display()))?;
    Ok(())
}

/// Install a staged file (typically a rendered template) at `dest`.
pub fn install(src: &Path, dest: &Path, mode: u32) -> Result<()> {
    let contents =
        fs::read(src).with_context(|| format!("reading staged file '{}'", src.display()))?;
    replace_file(dest, &contents, mode)
        .with_context(|| format!("installing '{}'", dest.display()))?;
    tracing::debug!(dest = %dest.display(), "installed file");
    Ok(())
}

/// Make a file executable (chmod +x).
pub fn make_executable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("reading metadata '{}'", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
        .with_context(|| format!("setting permissions '{}'", path.display()))?;
    Ok(())
}
