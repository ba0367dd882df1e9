//! Engine settings and well-known host paths.
//!
//! Settings come from an optional TOML file (`/etc/lift.toml` by default).
//! Every field has a default, so a missing file is equivalent to an empty
//! one. All host paths are resolved under [`Settings::root`], which lets the
//! whole pipeline run against a scratch directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/lift.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Filesystem root every host path is resolved under.
    pub root: PathBuf,
    /// Capture the output of `setup-alpine` and `setup-disk` instead of
    /// streaming it to the terminal.
    pub silent: bool,
    /// Sleep after stopping the container runtime, before touching its mounts.
    pub settle_delay_secs: u64,
    /// Directory whose files override the built-in templates by name.
    pub template_dir: Option<PathBuf>,
    /// Where rendered templates are staged. System temp dir when unset.
    pub temp_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub disk: DiskSettings,
    pub paths: PathOverrides,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            silent: false,
            settle_delay_secs: 5,
            template_dir: None,
            temp_dir: None,
            http_timeout_secs: 60,
            disk: DiskSettings::default(),
            paths: PathOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskSettings {
    /// Filesystem created on the scratch disk.
    pub filesystem: String,
    /// OpenRC service of the container runtime.
    pub container_service: String,
    /// Substring identifying a running container runtime process.
    pub container_process: String,
    /// Mounts below this path are released before the disk is set up.
    pub protected_mount_root: PathBuf,
}

impl Default for DiskSettings {
    fn default() -> Self {
        Self {
            filesystem: "ext4".to_string(),
            container_service: "docker".to_string(),
            container_process: "docker".to_string(),
            protected_mount_root: PathBuf::from("/var/lib/docker"),
        }
    }
}

/// Per-path overrides. Relative or absolute, each is re-rooted under
/// [`Settings::root`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathOverrides {
    pub hosts: Option<PathBuf>,
    pub authorized_keys: Option<PathBuf>,
    pub sshd_config: Option<PathBuf>,
    pub apk_repositories: Option<PathBuf>,
    pub motd: Option<PathBuf>,
    pub ssmtp_conf: Option<PathBuf>,
    pub chrony_conf: Option<PathBuf>,
    pub drpcli_bin: Option<PathBuf>,
    pub drpcli_rc: Option<PathBuf>,
    pub proc_mounts: Option<PathBuf>,
    pub proc_swaps: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings '{}'", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing settings '{}'", path.display()))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths::resolve(&self.root, &self.paths)
    }

    /// Resolve an absolute host path (e.g. from a write_files entry) under
    /// the configured root.
    pub fn rooted(&self, path: &Path) -> PathBuf {
        reroot(&self.root, path)
    }

    /// Inverse of [`Settings::rooted`]: how a path under the root appears on
    /// the provisioned host itself. Paths outside the root are returned
    /// unchanged.
    pub fn host_view(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => Path::new("/").join(relative),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Concrete locations of every file the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub hosts: PathBuf,
    pub authorized_keys: PathBuf,
    pub sshd_config: PathBuf,
    pub apk_repositories: PathBuf,
    pub motd: PathBuf,
    pub ssmtp_conf: PathBuf,
    pub chrony_conf: PathBuf,
    pub drpcli_bin: PathBuf,
    pub drpcli_rc: PathBuf,
    pub proc_mounts: PathBuf,
    pub proc_swaps: PathBuf,
}

impl HostPaths {
    pub fn resolve(root: &Path, overrides: &PathOverrides) -> Self {
        let pick = |value: &Option<PathBuf>, default: &str| {
            reroot(root, value.as_deref().unwrap_or(Path::new(default)))
        };
        Self {
            hosts: pick(&overrides.hosts, "/etc/hosts"),
            authorized_keys: pick(&overrides.authorized_keys, "/root/.ssh/authorized_keys"),
            sshd_config: pick(&overrides.sshd_config, "/etc/ssh/sshd_config"),
            apk_repositories: pick(&overrides.apk_repositories, "/etc/apk/repositories"),
            motd: pick(&overrides.motd, "/etc/motd"),
            ssmtp_conf: pick(&overrides.ssmtp_conf, "/etc/ssmtp/ssmtp.conf"),
            chrony_conf: pick(&overrides.chrony_conf, "/etc/chrony/chrony.conf"),
            drpcli_bin: pick(&overrides.drpcli_bin, "/usr/local/bin/drpcli"),
            drpcli_rc: pick(&overrides.drpcli_rc, "/etc/init.d/drpcli"),
            proc_mounts: pick(&overrides.proc_mounts, "/proc/mounts"),
            proc_swaps: pick(&overrides.proc_swaps, "/proc/swaps"),
        }
    }

    /// The documented default locations on a live host.
    pub fn system() -> Self {
        Self::resolve(Path::new("/"), &PathOverrides::default())
    }
}

fn reroot(root: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_system_paths_match_documented_locations() {
        let paths = HostPaths::system();
        assert_eq!(paths.hosts, PathBuf::from("/etc/hosts"));
        assert_eq!(
            paths.authorized_keys,
            PathBuf::from("/root/.ssh/authorized_keys")
        );
        assert_eq!(paths.sshd_config, PathBuf::from("/etc/ssh/sshd_config"));
        assert_eq!(paths.apk_repositories, PathBuf::from("/etc/apk/repositories"));
        assert_eq!(paths.ssmtp_conf, PathBuf::from("/etc/ssmtp/ssmtp.conf"));
        assert_eq!(paths.chrony_conf, PathBuf::from("/etc/chrony/chrony.conf"));
        assert_eq!(paths.drpcli_bin, PathBuf::from("/usr/local/bin/drpcli"));
        assert_eq!(paths.drpcli_rc, PathBuf::from("/etc/init.d/drpcli"));
    }

    #[test]
    fn test_paths_are_rerooted() {
        let settings = Settings {
            root: PathBuf::from("/tmp/target"),
            ..Settings::default()
        };
        let paths = settings.host_paths();
        assert_eq!(paths.motd, PathBuf::from("/tmp/target/etc/motd"));
        assert_eq!(
            settings.rooted(Path::new("/opt/app/config.yml")),
            PathBuf::from("/tmp/target/opt/app/config.yml")
        );
        assert_eq!(
            settings.host_view(&paths.drpcli_bin),
            PathBuf::from("/usr/local/bin/drpcli")
        );
    }

    #[test]
    fn test_missing_settings_file_is_default() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join("lift.toml")).unwrap();
        assert_eq!(settings.root, PathBuf::from("/"));
        assert_eq!(settings.disk.container_service, "docker");
    }

    #[test]
    fn test_load_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lift.toml");
        fs::write(
            &path,
            r#"
root = "/mnt/target"
silent = true
settle_delay_secs = 0

[disk]
container_service = "containerd"

[paths]
sshd_config = "/etc/ssh/sshd_config.d/lift.conf"
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.silent);
        assert_eq!(settings.settle_delay(), Duration::ZERO);
        assert_eq!(settings.disk.container_service, "containerd");
        assert_eq!(settings.disk.filesystem, "ext4");
        assert_eq!(
            settings.host_paths().sshd_config,
            PathBuf::from("/mnt/target/etc/ssh/sshd_config.d/lift.conf")
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lift.toml");
        fs::write(&path, "rooot = \"/\"\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
