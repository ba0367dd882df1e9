//! The alpine-data provisioning document.
//!
//! Loaded once from YAML before the pipeline starts and never mutated
//! afterwards. Every section is optional; each provisioning step checks its
//! own section through the guard accessors at the bottom of
//! [`ProvisioningDocument`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fetch::Downloader;

/// Where the document is read from when no location is given.
pub const DEFAULT_DATA_PATH: &str = "/etc/alpine-data.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningDocument {
    pub network: Option<Network>,
    pub sshd: Option<SshdConfig>,
    pub packages: Option<Packages>,
    pub mta: Option<Mta>,
    /// Block device turned into the persistent data volume.
    pub scratch_disk: Option<String>,
    pub drp: Option<Drp>,
    pub write_files: Vec<FileDescriptor>,
    pub motd: Option<String>,
    pub root_password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Network {
    /// Fully qualified host name, e.g. `web01.example.com`.
    pub hostname: Option<String>,
    pub interfaces: Vec<Interface>,
    pub dns: Option<Dns>,
    pub proxy: Option<String>,
    /// Keyboard layout and variant as `setup-keymap` expects them (`"us us"`).
    pub keymap: Option<String>,
    pub timezone: Option<String>,
    pub ntp: Option<Ntp>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Interface {
    pub name: String,
    #[serde(default)]
    pub dhcp: bool,
    pub address: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
}

/// Resolver settings handed to setup-dns. The domain doubles as the
/// resolver's search list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Dns {
    pub nameservers: Vec<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ntp {
    pub pools: Vec<String>,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshdConfig {
    pub port: u16,
    pub listen_address: Option<String>,
    #[serde(deserialize_with = "permit_root_login")]
    pub permit_root_login: String,
    pub password_authentication: bool,
    pub permit_empty_passwords: bool,
    pub authorized_keys: Vec<String>,
}

impl Default for SshdConfig {
    fn default() -> Self {
        Self {
            port: 22,
            listen_address: None,
            permit_root_login: "prohibit-password".to_string(),
            password_authentication: false,
            permit_empty_passwords: false,
            authorized_keys: Vec::new(),
        }
    }
}

/// Accepts booleans as well as the literal sshd keywords, since YAML authors
/// tend to write `permit_root_login: true`.
fn permit_root_login<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Keyword(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Flag(true) => Ok("yes".to_string()),
        Raw::Flag(false) => Ok("no".to_string()),
        Raw::Keyword(word) => match word.as_str() {
            "yes" | "no" | "prohibit-password" | "without-password" | "forced-commands-only" => {
                Ok(word)
            }
            other => Err(serde::de::Error::custom(format!(
                "unsupported permit_root_login '{}'",
                other
            ))),
        },
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Packages {
    pub repositories: Vec<String>,
    pub update: bool,
    pub upgrade: bool,
    pub install: Vec<String>,
    pub uninstall: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Mta {
    /// Address that receives mail for uid < 1000.
    pub root: Option<String>,
    pub server: String,
    #[serde(default = "default_mta_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub use_starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub hostname: Option<String>,
    #[serde(default)]
    pub from_line_override: bool,
}

fn default_mta_port() -> u16 {
    25
}

/// Digital Rebar Provision runner.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Drp {
    pub assets_url: String,
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

/// A file to write during provisioning.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileDescriptor {
    pub path: PathBuf,
    /// Octal permission bits, e.g. `"0644"` or `"600"`.
    pub permissions: Option<String>,
    pub content: Option<String>,
    pub content_url: Option<String>,
    /// `user` or `user:group`, passed to `chown`.
    pub owner: Option<String>,
}

/// Where a descriptor's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource<'a> {
    Inline(&'a str),
    Url(&'a str),
}

pub const DEFAULT_FILE_MODE: u32 = 0o644;

impl FileDescriptor {
    pub fn mode(&self) -> Result<u32> {
        match self.permissions.as_deref().map(str::trim) {
            None | Some("") => Ok(DEFAULT_FILE_MODE),
            Some(raw) => parse_mode(raw),
        }
    }

    pub fn source(&self) -> Result<FileSource<'_>> {
        let url = self.content_url.as_deref().filter(|url| !url.trim().is_empty());
        match (self.content.as_deref(), url) {
            (Some(_), Some(_)) => bail!(
                "'{}' sets both content and content_url",
                self.path.display()
            ),
            (Some(content), None) => Ok(FileSource::Inline(content)),
            (None, Some(url)) => Ok(FileSource::Url(url)),
            (None, None) => bail!(
                "'{}' sets neither content nor content_url",
                self.path.display()
            ),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref().map(str::trim).filter(|o| !o.is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            bail!("write_files entry without a path");
        }
        self.mode()
            .with_context(|| format!("permissions of '{}'", self.path.display()))?;
        self.source()?;
        Ok(())
    }
}

/// Parse an octal permission string such as `"0644"`, `"644"` or `"0o600"`.
pub fn parse_mode(raw: &str) -> Result<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("'{}' is not an octal file mode", raw))?;
    if mode > 0o7777 {
        bail!("file mode '{}' is out of range", raw);
    }
    Ok(mode)
}

impl ProvisioningDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let document: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).context("parsing alpine-data document")?
        };
        document.validate()?;
        Ok(document)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading alpine-data '{}'", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading '{}'", path.display()))
    }

    /// Load from a local path or an `http(s)://` URL.
    pub fn from_location(location: &str, downloader: &dyn Downloader) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let body = downloader.fetch(location)?;
            let text = String::from_utf8(body)
                .with_context(|| format!("alpine-data at '{}' is not UTF-8", location))?;
            return Self::from_yaml_str(&text).with_context(|| format!("loading '{}'", location));
        }
        Self::load(Path::new(location))
    }

    pub fn validate(&self) -> Result<()> {
        for (index, file) in self.write_files.iter().enumerate() {
            file.validate()
                .with_context(|| format!("invalid write_files entry #{}", index))?;
        }
        if let Some(network) = &self.network {
            for iface in &network.interfaces {
                if !iface.dhcp && iface.address.is_none() {
                    bail!(
                        "interface '{}' needs either dhcp or a static address",
                        iface.name
                    );
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Step guards
    // ─────────────────────────────────────────────────────────────────────

    pub fn hostname(&self) -> Option<&str> {
        non_empty(self.network.as_ref()?.hostname.as_deref())
    }

    pub fn root_password(&self) -> Option<&str> {
        // Not trimmed: whitespace may be part of the password.
        self.root_password.as_deref().filter(|pw| !pw.is_empty())
    }

    pub fn scratch_disk(&self) -> Option<&str> {
        non_empty(self.scratch_disk.as_deref())
    }

    pub fn motd(&self) -> Option<&str> {
        self.motd.as_deref().filter(|motd| !motd.trim().is_empty())
    }

    /// NTP settings, only when at least one pool or server is listed.
    pub fn ntp(&self) -> Option<&Ntp> {
        self.network
            .as_ref()?
            .ntp
            .as_ref()
            .filter(|ntp| !ntp.pools.is_empty() || !ntp.servers.is_empty())
    }

    /// DRP settings, only when an assets URL is configured.
    pub fn drp(&self) -> Option<&Drp> {
        self.drp
            .as_ref()
            .filter(|drp| !drp.assets_url.trim().is_empty())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
