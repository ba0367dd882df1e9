//! Base system install through `setup-alpine` and a generated answer file.
//!
//! The network interfaces file is rendered first and embedded in the answer
//! file. `setup-alpine` prompts twice for the root password on stdin.

use anyhow::{Context, Result};
use serde::Serialize;

use super::hostname::short_hostname;
use super::{StepContext, StepOutcome};
use crate::document::{Interface, Network, ProvisioningDocument};
use crate::process::Cmd;
use crate::template::Template;

const DEFAULT_KEYMAP: &str = "us us";
const DEFAULT_HOSTNAME: &str = "alpine";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_PROXY: &str = "none";
/// `setup-apkrepos` selector for "first mirror in the list".
const DEFAULT_REPOSITORIES: &str = "-1";

#[derive(Serialize)]
struct InterfacesContext<'a> {
    hostname: Option<&'a str>,
    interfaces: &'a [Interface],
}

#[derive(Serialize)]
struct AnswerFileContext<'a> {
    keymap: &'a str,
    hostname: &'a str,
    interfaces: String,
    domain: Option<&'a str>,
    nameservers: &'a [String],
    timezone: &'a str,
    proxy: &'a str,
    repositories: String,
}

pub(super) fn run(
    network: &Network,
    doc: &ProvisioningDocument,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();
    let short = doc.hostname().map(short_hostname);

    let interfaces = ctx.renderer.render_to_string(
        Template::Interfaces,
        &InterfacesContext {
            hostname: short,
            interfaces: &network.interfaces,
        },
    )?;

    let dns = network.dns.as_ref();
    let repositories = doc
        .packages
        .as_ref()
        .filter(|packages| !packages.repositories.is_empty())
        .map(|packages| packages.repositories.join(" "))
        .unwrap_or_else(|| DEFAULT_REPOSITORIES.to_string());

    let answers = AnswerFileContext {
        keymap: or_default(network.keymap.as_deref(), DEFAULT_KEYMAP),
        hostname: short.unwrap_or(DEFAULT_HOSTNAME),
        interfaces,
        domain: dns.and_then(|dns| dns.domain.as_deref()),
        nameservers: dns.map(|dns| dns.nameservers.as_slice()).unwrap_or(&[]),
        timezone: or_default(network.timezone.as_deref(), DEFAULT_TIMEZONE),
        proxy: or_default(network.proxy.as_deref(), DEFAULT_PROXY),
        repositories,
    };
    let answer_file = ctx.renderer.render(Template::AnswerFile, &answers)?;

    let password = doc.root_password().unwrap_or_default();
    tracing::info!(answer_file = %answer_file.display(), "running setup-alpine");
    let result = Cmd::new("setup-alpine")
        .arg("-f")
        .arg_path(&answer_file)
        .stdin(format!("{0}\n{0}\n", password))
        .stream(!ctx.settings.silent)
        .allow_fail()
        .run_with(ctx.runner)
        .context("running setup-alpine");

    // setup-alpine exits non-zero on partial failures of its sub-scripts
    // that leave a usable system, so neither outcome aborts the run.
    match result {
        Ok(res) if res.success() => {}
        Ok(res) => outcome.warn(anyhow::anyhow!(
            "setup-alpine exited with {}: {}",
            res.code.map_or_else(|| "a signal".to_string(), |c| c.to_string()),
            res.stderr.trim()
        )),
        Err(err) => outcome.warn(err),
    }
    Ok(outcome)
}

fn or_default<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use crate::document::ProvisioningDocument;
    use crate::process::{Cmd, CommandResult};
    use crate::steps::fixture::Host;
    use crate::steps::Step;
    use crate::testing::RecordingRunner;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    const DOC: &str = "\
network:
  hostname: web01.example.com
  interfaces:
    - name: eth0
      dhcp: true
  dns:
    domain: example.com
    nameservers: [10.0.0.2, 10.0.0.3]
  timezone: Europe/Berlin
packages:
  repositories:
    - http://mirror/main
    - http://mirror/community
root_password: hunter2
";

    /// Capture the answer file while it still exists.
    fn capture_answer_file(host: &mut Host) -> Rc<RefCell<String>> {
        let captured = Rc::new(RefCell::new(String::new()));
        let sink = captured.clone();
        host.runner = RecordingRunner::new(&host.journal).observe(move |cmd: &Cmd| {
            if cmd.program() == "setup-alpine" {
                *sink.borrow_mut() = fs::read_to_string(&cmd.arg_list()[1]).unwrap();
            }
        });
        captured
    }

    #[test]
    fn test_answer_file_contents() {
        let mut host = Host::new();
        let captured = capture_answer_file(&mut host);
        let doc = ProvisioningDocument::from_yaml_str(DOC).unwrap();

        let outcome = Step::BaseInstall.run(&doc, &host.ctx()).unwrap();

        assert!(outcome.warnings.is_empty());
        let answers = captured.borrow();
        assert!(answers.contains("KEYMAPOPTS=\"us us\"\n"));
        assert!(answers.contains("HOSTNAMEOPTS=\"-n web01\"\n"));
        assert!(answers.contains("iface eth0 inet dhcp\n\thostname web01\n"));
        assert!(answers.contains("DNSOPTS=\"-d example.com 10.0.0.2 10.0.0.3\"\n"));
        assert!(answers.contains("TIMEZONEOPTS=\"-z Europe/Berlin\"\n"));
        assert!(answers.contains("PROXYOPTS=\"none\"\n"));
        assert!(answers.contains("APKREPOSOPTS=\"http://mirror/main http://mirror/community\"\n"));
    }

    #[test]
    fn test_password_sent_twice_on_stdin() {
        let host = Host::new();
        let doc = ProvisioningDocument::from_yaml_str(DOC).unwrap();

        Step::BaseInstall.run(&doc, &host.ctx()).unwrap();

        let commands = host.runner.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].arg_list()[0], "-f");
        assert_eq!(commands[0].input(), Some(&b"hunter2\nhunter2\n"[..]));
    }

    #[test]
    fn test_defaults_without_dns_or_repositories() {
        let mut host = Host::new();
        let captured = capture_answer_file(&mut host);
        let doc = ProvisioningDocument::from_yaml_str("network: {}\n").unwrap();

        Step::BaseInstall.run(&doc, &host.ctx()).unwrap();

        let answers = captured.borrow();
        assert!(answers.contains("HOSTNAMEOPTS=\"-n alpine\"\n"));
        assert!(answers.contains("DNSOPTS=\"\"\n"));
        assert!(answers.contains("TIMEZONEOPTS=\"-z UTC\"\n"));
        assert!(answers.contains("APKREPOSOPTS=\"-1\"\n"));
    }

    #[test]
    fn test_setup_alpine_failure_is_warning() {
        let mut host = Host::new();
        host.runner = RecordingRunner::new(&host.journal)
            .respond("setup-alpine", CommandResult::failed(1, "setup-ntp failed"));
        let doc = ProvisioningDocument::from_yaml_str(DOC).unwrap();

        let outcome = Step::BaseInstall.run(&doc, &host.ctx()).unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].to_string().contains("setup-ntp failed"));
    }

    #[test]
    fn test_answer_file_removed_afterwards() {
        let host = Host::new();
        let doc = ProvisioningDocument::from_yaml_str(DOC).unwrap();

        Step::BaseInstall.run(&doc, &host.ctx()).unwrap();

        let staged = host.runner.commands()[0].arg_list()[1].clone();
        assert!(!std::path::Path::new(&staged).exists());
    }
}
