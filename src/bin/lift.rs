//! lift - first-boot provisioning for Alpine Linux.
//!
//! Reads an alpine-data document and drives the host's setup tools into the
//! state it describes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use alpine_lift::document::{ProvisioningDocument, DEFAULT_DATA_PATH};
use alpine_lift::fetch::HttpDownloader;
use alpine_lift::lift::{self, Backends, Lift};
use alpine_lift::patcher::{self, DirectiveMap};
use alpine_lift::preflight;
use alpine_lift::probe::SystemProbe;
use alpine_lift::process::SystemRunner;
use alpine_lift::service::OpenRc;
use alpine_lift::settings::{Settings, DEFAULT_SETTINGS_PATH};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// alpine-data document: file path or http(s) URL
    #[arg(short, long, default_value = DEFAULT_DATA_PATH)]
    data: String,

    /// Engine settings (TOML)
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Provision a tree under this directory instead of /
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every applicable provisioning step
    Run {
        #[command(flatten)]
        source: Source,

        /// Capture setup-alpine/setup-disk output instead of streaming it
        #[arg(long)]
        silent: bool,
    },

    /// Show which steps apply and which host tools are missing
    Plan {
        #[command(flatten)]
        source: Source,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set directives in a config file in place
    Patch {
        file: PathBuf,
        /// Separator between directive and value, e.g. " " or "="
        delimiter: String,
        /// KEY=VALUE pairs
        #[arg(required = true)]
        directives: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { source, silent } => run(&source, silent),
        Commands::Plan { source, json } => plan(&source, json),
        Commands::Patch {
            file,
            delimiter,
            directives,
        } => patch(&file, &delimiter, &directives),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load(source: &Source) -> Result<(Settings, ProvisioningDocument, HttpDownloader)> {
    let mut settings = Settings::load(&source.settings)?;
    if let Some(root) = &source.root {
        settings.root = root.clone();
    }
    let downloader = HttpDownloader::new(settings.http_timeout())?;
    let doc = ProvisioningDocument::from_location(&source.data, &downloader)?;
    Ok((settings, doc, downloader))
}

fn run(source: &Source, silent: bool) -> Result<()> {
    let (mut settings, doc, downloader) = load(source)?;
    settings.silent |= silent;

    // SAFETY: geteuid has no preconditions and cannot fail.
    if unsafe { libc::geteuid() } != 0 {
        tracing::warn!("not running as root; most steps will fail");
    }

    let missing = preflight::missing_tools(&doc);
    if !missing.is_empty() {
        tracing::warn!(
            "host tools missing for applicable steps:\n{}",
            preflight::describe(&missing)
        );
    }

    let runner = SystemRunner;
    let services = OpenRc::new(&runner);
    let probe = SystemProbe::new(&settings.host_paths());
    let backends = Backends {
        runner: &runner,
        services: &services,
        downloader: &downloader,
        probe: &probe,
    };

    let report = Lift::new(&doc, &settings, backends).run()?;
    if report.warning_count() > 0 {
        tracing::warn!(
            warnings = report.warning_count(),
            "some best-effort actions failed, see above"
        );
    }
    Ok(())
}

fn plan(source: &Source, json: bool) -> Result<()> {
    let (_, doc, _) = load(source)?;
    let plan = lift::plan(&doc);

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for entry in &plan {
        let state = if entry.applies { "apply" } else { "skip" };
        if entry.missing_tools.is_empty() {
            println!("{:<14} {}", entry.step.name(), state);
        } else {
            println!(
                "{:<14} {} (missing: {})",
                entry.step.name(),
                state,
                entry.missing_tools.join(", ")
            );
        }
    }
    Ok(())
}

fn patch(file: &Path, delimiter: &str, directives: &[String]) -> Result<()> {
    let mut desired = DirectiveMap::new();
    for pair in directives {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got '{}'", pair);
        };
        if key.is_empty() {
            bail!("empty directive name in '{}'", pair);
        }
        desired.insert(key.to_string(), value.to_string());
    }
    patcher::patch(file, delimiter, &desired)
        .with_context(|| format!("patching '{}'", file.display()))
}
