mod config;
mod http_client;
mod settings_file;

use std::sync::Arc;

use anyhow::{Context, bail};
use berserko_core::{
    AlertSink, AuthDecisionEngine, HttpExchange, HttpMessage, HttpService, ProxyHost,
    ScopeResolver, SspiProvider, ToolOrigin, TokenNegotiator,
};
use clap::Parser;
use tracing::{error, info, instrument};

use config::{Args, Command, effective_config, init_logging};
use http_client::UreqProxyHost;
use settings_file::JsonFileSettings;

/// Alerts go straight to the terminal.
struct ConsoleAlerts;

impl AlertSink for ConsoleAlerts {
    fn issue_alert(&self, message: &str) {
        eprintln!("[berserko] {message}");
    }
}

type Engine = AuthDecisionEngine<SspiProvider, UreqProxyHost>;

#[instrument(name = "main", level = "info")]
fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging. If it fails, we can't log, so just print and exit.
    if let Err(e) = init_logging(&args) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run_app(&args) {
        error!("Application failed to run: {:?}", e);
        return Err(e);
    }

    Ok(())
}

fn run_app(args: &Args) -> anyhow::Result<()> {
    let mut store = JsonFileSettings::open(&args.settings)?;
    let (config, notices) = effective_config(args, &store)?;
    for notice in &notices {
        eprintln!("{notice}");
    }

    info!(domain = %config.domain, kdc = %config.kdc, strategy = %config.strategy, "configuration ready");

    match &args.command {
        Command::ShowConfig => {
            println!("{config}");
            return Ok(());
        }
        Command::SaveConfig => {
            berserko_core::settings::save_config(&mut store, &config);
            store.flush()?;
            println!("Settings saved to {}", store.path().display());
            return Ok(());
        }
        _ => {}
    }

    let host = UreqProxyHost::new()?;
    let engine = AuthDecisionEngine::new(
        config,
        SspiProvider::default(),
        host.clone(),
        Arc::new(ConsoleAlerts),
    );

    match &args.command {
        Command::TestDomain => {
            let check = engine.test_domain();
            println!("{check}");
            if !check.is_success() {
                bail!("domain check failed");
            }
        }
        Command::TestCredentials => {
            let check = engine.test_credentials();
            println!("{check}");
            if !check.is_success() {
                bail!("credential check failed");
            }
        }
        Command::Token { host } => print_token(&engine, host)?,
        Command::Fetch { url, include } => fetch(&engine, &host, url, *include)?,
        Command::ShowConfig | Command::SaveConfig => {}
    }

    Ok(())
}

fn print_token(engine: &Engine, host: &str) -> anyhow::Result<()> {
    let config = engine.config();
    let spn = ScopeResolver::new(&config).to_service_principal(host);
    let negotiated = TokenNegotiator::new(engine.sessions())
        .negotiate(&config, &spn)
        .with_context(|| format!("no token for {spn}"))?;

    println!("Authorization: {}", negotiated.authorization_value());
    Ok(())
}

/// Runs one GET through the engine the same way a proxied request would be handled.
#[instrument(name = "fetch", level = "info", skip(engine, host), err)]
fn fetch(engine: &Engine, host: &UreqProxyHost, url: &str, include: bool) -> anyhow::Result<()> {
    let url = url::Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    let hostname = url.host_str().context("URL has no host")?;
    let port = url.port_or_known_default().context("URL has no port")?;
    let service = HttpService::new(hostname, port, url.scheme() == "https");

    let target = url
        .query()
        .map_or_else(|| url.path().to_owned(), |query| format!("{}?{query}", url.path()));
    let request = HttpMessage {
        start_line: format!("GET {target} HTTP/1.1"),
        headers: vec![
            ("Host".to_owned(), hostname.to_owned()),
            ("User-Agent".to_owned(), concat!("berserko/", env!("CARGO_PKG_VERSION")).to_owned()),
            ("Accept".to_owned(), "*/*".to_owned()),
        ],
        body: Vec::new(),
    };

    let mut exchange = HttpExchange::new(service, request.to_bytes());
    engine.process_http_message(ToolOrigin::Proxy, true, &mut exchange);

    let response = host.make_http_request(&exchange.service, &exchange.request)?;
    exchange.response = Some(response);
    engine.process_http_message(ToolOrigin::Proxy, false, &mut exchange);

    let raw = exchange.response.unwrap_or_default();
    let response = HttpMessage::parse(&raw).context("unreadable response")?;

    if include {
        println!("{}", response.start_line);
        for (name, value) in &response.headers {
            println!("{name}: {value}");
        }
        println!();
    } else {
        eprintln!("{}", response.start_line);
    }
    println!("{}", String::from_utf8_lossy(&response.body));

    Ok(())
}
