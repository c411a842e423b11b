use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use berserko_core::validate::{self, Checked, Severity};
use berserko_core::{Config, Strategy};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, warn};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry::Registry};

use crate::settings_file::JsonFileSettings;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Kerberos/SPNEGO authentication helper for proxied HTTP traffic
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file holding the saved configuration
    #[arg(long, default_value = "berserko-settings.json")]
    pub settings: PathBuf,

    /// DNS name of the domain (not the NetBIOS name)
    #[arg(short, long)]
    pub domain: Option<String>,

    /// KDC host name
    #[arg(short, long)]
    pub kdc: Option<String>,

    /// Plain username, without any domain qualifier
    #[arg(short, long)]
    pub username: Option<String>,

    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Persist the password when saving the configuration
    #[arg(long)]
    pub save_password: bool,

    #[arg(short, long)]
    pub strategy: Option<StrategyArg>,

    /// Do not treat dot-less host names as part of the domain
    #[arg(long)]
    pub no_plainhost_expand: bool,

    /// Leave servers that also offer NTLM alone
    #[arg(long)]
    pub ignore_ntlm: bool,

    /// Log file
    #[arg(long, default_value = "berserko.log")]
    pub log_file: PathBuf,

    /// Verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the KDC answers for the configured domain
    TestDomain,
    /// Log in with the configured credentials
    TestCredentials,
    /// Print an Authorization header for a host
    Token { host: String },
    /// GET a URL, authenticating with Negotiate as the configured strategy dictates
    Fetch {
        url: String,
        /// Print response headers as well as the body
        #[arg(short, long)]
        include: bool,
    },
    /// Print the effective configuration
    ShowConfig,
    /// Validate and persist the effective configuration
    SaveConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Proactive,
    ProactiveAfter401,
    Reactive401,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Proactive => Self::Proactive,
            StrategyArg::ProactiveAfter401 => Self::ProactiveAfter401,
            StrategyArg::Reactive401 => Self::Reactive401,
        }
    }
}

/// Filter directives for `-v` count `verbose`. Dependencies stay one notch below our own
/// crates until `-vvv`.
fn log_filter(verbose: u8) -> String {
    let (own, deps) = match verbose {
        0 => ("info", "error"),
        1 => ("debug", "warn"),
        2 => ("trace", "info"),
        _ => return "trace".to_owned(),
    };
    format!("warn,berserko={own},berserko_core={own},sspi={deps},ureq={deps}")
}

/// Routes all tracing output to `args.log_file`; `RUST_LOG` overrides the verbosity.
pub fn init_logging(args: &Args) -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("A panic occurred: {}", panic_info);
    }));

    // Bridge logs from the `log` crate to `tracing`
    LogTracer::init().ok();

    let file = std::fs::File::create(&args.log_file)
        .with_context(|| format!("failed to create log file {}", args.log_file.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    if LOG_GUARD.set(guard).is_err() {
        warn!("log writer already installed");
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(args.verbose)));

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact(),
    );
    tracing::subscriber::set_global_default(subscriber)?;

    debug!(log_file = %args.log_file.display(), verbose = args.verbose, "logging ready");
    Ok(())
}

/// Effective configuration: the saved settings overlaid with command-line values.
///
/// Returns the notices raised while validating the overrides.
pub fn effective_config(args: &Args, store: &JsonFileSettings) -> anyhow::Result<(Config, Vec<String>)> {
    let mut config = berserko_core::settings::load_config(store)
        .context("saved settings are unreadable")?
        .unwrap_or_default();
    let mut notices = Vec::new();

    let mut take = |checked: Checked| {
        for notice in &checked.notices {
            match notice.severity() {
                Severity::Info => debug!(%notice, "settings notice"),
                Severity::Warning => warn!(%notice, "settings warning"),
            }
            notices.push(notice.to_string());
        }
        checked.value
    };

    if let Some(domain) = &args.domain {
        config.domain = take(validate::check_domain(domain));
    }
    if let Some(kdc) = &args.kdc {
        config.kdc = take(validate::check_kdc(kdc));
    }
    if let Some(username) = &args.username {
        config.username = take(validate::check_username(username));
    }
    if let Some(password) = &args.password {
        config.password.clone_from(password);
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy.into();
    }

    config.save_password |= args.save_password;
    config.plainhost_expand &= !args.no_plainhost_expand;
    config.ignore_ntlm_servers |= args.ignore_ntlm;
    config.log_level = match args.verbose {
        0 => berserko_core::Level::Normal,
        _ => berserko_core::Level::Verbose,
    };
    config.enabled = true;

    Ok((config, notices))
}
