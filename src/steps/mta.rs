//! Outgoing mail relay via ssmtp.

use anyhow::{Context, Result};

use super::{StepContext, StepOutcome};
use crate::document::Mta;
use crate::materialize::install;
use crate::template::Template;

/// The config may carry relay credentials.
const SSMTP_CONF_MODE: u32 = 0o640;

pub(super) fn run(mta: &Mta, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let rendered = ctx.renderer.render(Template::Ssmtp, mta)?;
    install(&rendered, &ctx.paths.ssmtp_conf, SSMTP_CONF_MODE)
        .context("installing ssmtp config")?;
    tracing::info!(server = %mta.server, port = mta.port, "configured mail relay");
    Ok(StepOutcome::applied())
}

#[cfg(test)]
mod tests {
    use crate::document::ProvisioningDocument;
    use crate::steps::fixture::Host;
    use crate::steps::Step;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_ssmtp_config() {
        let host = Host::new();
        let doc = ProvisioningDocument::from_yaml_str(
            "\
mta:
  root: ops@example.com
  server: smtp.example.com
  port: 587
  use_starttls: true
  username: relay
  password: secret
",
        )
        .unwrap();

        Step::Mta.run(&doc, &host.ctx()).unwrap();

        let config = fs::read_to_string(&host.paths.ssmtp_conf).unwrap();
        assert!(config.contains("root=ops@example.com\n"));
        assert!(config.contains("mailhub=smtp.example.com:587\n"));
        assert!(config.contains("UseTLS=NO\n"));
        assert!(config.contains("UseSTARTTLS=YES\n"));
        assert!(config.contains("AuthUser=relay\n"));
        assert!(config.contains("AuthPass=secret\n"));
        let mode = fs::metadata(&host.paths.ssmtp_conf)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
        assert!(host.journal.entries().is_empty());
    }

    #[test]
    fn test_minimal_relay_has_no_auth_lines() {
        let host = Host::new();
        let doc = ProvisioningDocument::from_yaml_str("mta:\n  server: mail\n").unwrap();

        Step::Mta.run(&doc, &host.ctx()).unwrap();

        let config = fs::read_to_string(&host.paths.ssmtp_conf).unwrap();
        assert!(config.contains("mailhub=mail:25\n"));
        assert!(!config.contains("AuthUser"));
        assert!(!config.contains("root="));
    }
}
