//! Command-line probe for remote mobile UI automation sessions.
//!
//! Starts a session against an Appium-compatible server and exercises the
//! resolution layer from the shell, which is handy for checking locators and
//! page descriptors before they go into a test suite.
//!
//! # Usage
//!
//! ```bash
//! # Check that a session can be started and answers liveness probes
//! uidrive probe
//!
//! # Resolve a locator with fallbacks
//! uidrive find id com.example.shop:id/btn_sign_in --alt "xpath=//*[@text='Sign In']"
//!
//! # Wait for a page described in JSON to load
//! uidrive wait-page pages/login.json -o 15000
//!
//! # Validate a page descriptor without a server
//! uidrive check-page pages/login.json
//!
//! # Print the effective configuration
//! uidrive --server http://10.0.0.5:4723 config
//!
//! # Append step results to a JSON Lines report
//! uidrive --report run.jsonl wait-page pages/home.json
//!
//! # Keep a timestamped report in ~/.uidrive/reports
//! uidrive --save-report probe
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uidrive_core::config::SessionConfig;
use uidrive_core::locator::{Locator, Strategy};
use uidrive_core::page::{Page, PageDescriptor, PageError};
use uidrive_core::report::{JsonlSink, Reporter, TracingSink};
use uidrive_core::resolver::{ResilientLocator, ResolveError};
use uidrive_core::session::SessionClient;
use uidrive_core::webdriver::WebDriverClient;

/// Command-line probe for remote mobile UI automation sessions.
#[derive(Parser)]
#[command(name = "uidrive")]
#[command(about = "Probe sessions, locators, and page descriptors on an automation server")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.uidrive/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Automation server URL, overriding the config file
    #[arg(long, env = "UIDRIVE_SERVER_URL")]
    server: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Append step results to this JSON Lines file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Also keep step results under ~/.uidrive/reports
    #[arg(long)]
    save_report: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Start a session, verify it answers, and stop it
    Probe,

    /// Resolve a locator and print the matched element
    Find {
        /// Strategy: id, xpath, class_name, accessibility_id
        strategy: Strategy,
        /// Strategy-specific query
        value: String,
        /// Fallback locator as strategy=value (repeatable, tried in order)
        #[arg(short, long = "alt", value_parser = parse_locator)]
        alternates: Vec<Locator>,
        /// Timeout in milliseconds for the primary locator
        #[arg(short = 'o', long, env = "UIDRIVE_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Wait until the page described by a JSON descriptor is loaded
    WaitPage {
        /// Path to the page descriptor
        descriptor: PathBuf,
        /// Timeout in milliseconds (defaults to the configured load timeout)
        #[arg(short = 'o', long, env = "UIDRIVE_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Validate a page descriptor without contacting a server
    CheckPage {
        /// Path to the page descriptor
        descriptor: PathBuf,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Probe => "probe",
            Command::Find { .. } => "find",
            Command::WaitPage { .. } => "wait-page",
            Command::CheckPage { .. } => "check-page",
            Command::Config => "config",
            Command::Completions { .. } => "completions",
        }
    }
}

fn parse_locator(s: &str) -> Result<Locator, String> {
    let (strategy, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected strategy=value, got '{s}'"))?;
    let strategy: Strategy = strategy.parse().map_err(|e| format!("{e}"))?;
    Locator::try_new(strategy, value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Connection(String),
    ActionFailed(String),
    Config(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Connection(_) => ExitCode::from(2),
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::Config(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl From<ResolveError> for CliError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(e) => CliError::ActionFailed(e.to_string()),
            ResolveError::Session(e) => CliError::Connection(e.to_string()),
            ResolveError::Driver(e) => CliError::Connection(e.to_string()),
            ResolveError::InvalidLocator(e) => CliError::Config(e.to_string()),
        }
    }
}

impl From<PageError> for CliError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Session(_) | PageError::Driver(_) => CliError::Connection(e.to_string()),
            PageError::UnknownElement { .. } | PageError::InvalidDescriptor(_) => {
                CliError::Config(e.to_string())
            }
            _ => CliError::ActionFailed(e.to_string()),
        }
    }
}

fn load_config(cli: &Cli) -> Result<SessionConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from(path)
            .map_err(|e| CliError::Config(format!("{}: {}", path.display(), e)))?,
        None => SessionConfig::load(),
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config)
}

fn reporter(cli: &Cli) -> Result<Reporter, CliError> {
    let mut reporter = Reporter::new().with_sink(Arc::new(TracingSink));
    if let Some(path) = &cli.report {
        let sink = JsonlSink::create(path)
            .map_err(|e| CliError::Config(format!("{}: {}", path.display(), e)))?;
        reporter = reporter.with_sink(Arc::new(sink));
    }
    if cli.save_report {
        let sink = JsonlSink::in_reports_dir(cli.command.name())
            .map_err(|e| CliError::Config(format!("reports dir: {}", e)))?;
        debug!(path = %sink.path().display(), "saving report");
        reporter = reporter.with_sink(Arc::new(sink));
    }
    Ok(reporter)
}

fn connect(config: SessionConfig) -> Result<Arc<SessionClient>, CliError> {
    let driver = WebDriverClient::new(&config.server_url)
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(Arc::new(SessionClient::new(Arc::new(driver), config)))
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// `|timestamp|command|target|duration|` status line on stderr.
fn status_line(cli: &Cli, command: &str, target: &str, started: Instant) {
    if !cli.quiet {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
        eprintln!(
            "|{}|{}|{}|{}ms|",
            now,
            command,
            target,
            started.elapsed().as_millis()
        );
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Commands that never contact a server.
    match &cli.command {
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "uidrive", &mut std::io::stdout());
            return Ok(());
        }
        Command::Config => {
            let config = load_config(&cli)?;
            let json = serde_json::to_value(&config)
                .map_err(|e| CliError::Config(e.to_string()))?;
            print_json(&json);
            return Ok(());
        }
        Command::CheckPage { descriptor } => {
            let page = PageDescriptor::from_path(descriptor)
                .map_err(|e| CliError::Config(format!("{}: {}", descriptor.display(), e)))?;
            if cli.format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "page": page.name,
                    "elements": page.locators.keys().collect::<Vec<_>>(),
                    "valid": true,
                }));
            } else {
                println!("{}: ok ({} elements)", page.name, page.locators.len());
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let reporter = reporter(&cli)?;
    debug!(server = %config.server_url, run_id = %reporter.run_id(), "connecting");
    let session = connect(config)?;

    let result = run_remote(&cli, &session, &reporter).await;
    session.stop().await;
    result
}

async fn run_remote(cli: &Cli, session: &Arc<SessionClient>, reporter: &Reporter) -> Result<(), CliError> {
    let started = Instant::now();
    match &cli.command {
        Command::Probe => {
            let handle = match session.get_or_recreate().await {
                Ok(handle) => handle,
                Err(e) => {
                    reporter.fail("probe", e.to_string());
                    return Err(CliError::Connection(e.to_string()));
                }
            };
            let live = session.verify_live(&handle).await;
            if !live {
                reporter.fail("probe", "session did not answer the liveness probe");
                return Err(CliError::Connection(format!(
                    "session {} did not answer the liveness probe",
                    handle.session_id
                )));
            }
            reporter.pass("probe", format!("session {} is live", handle.session_id));

            if cli.format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "session_id": handle.session_id,
                    "generation": handle.generation,
                    "live": live,
                }));
            } else {
                println!("{}", handle.session_id);
            }
            status_line(cli, "probe", &session.config().server_url, started);
            Ok(())
        }
        Command::Find {
            strategy,
            value,
            alternates,
            timeout,
        } => {
            let locator = alternates
                .iter()
                .cloned()
                .fold(Locator::new(*strategy, value.clone()), Locator::or);
            locator
                .validate()
                .map_err(|e| CliError::Config(e.to_string()))?;

            let resolver = ResilientLocator::new(session.clone(), session.config().wait);
            let handle = match resolver
                .resolve(&locator, timeout.map(Duration::from_millis))
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    reporter.fail("find", e.to_string());
                    return Err(e.into());
                }
            };
            reporter.pass("find", format!("{} matched {}", locator, handle.matched()));

            if cli.format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "element_id": handle.element_id(),
                    "matched": handle.matched(),
                    "via_alternate": handle.via_alternate(),
                    "session_id": handle.session_id(),
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                }));
            } else {
                println!("{} {}", handle.element_id(), handle.matched());
            }
            status_line(cli, "find", &locator.to_string(), started);
            Ok(())
        }
        Command::WaitPage { descriptor, timeout } => {
            let descriptor = PageDescriptor::from_path(descriptor)
                .map_err(|e| CliError::Config(format!("{}: {}", descriptor.display(), e)))?;
            let name = descriptor.name.clone();
            let page = Page::from_session(Arc::new(descriptor), session.clone());

            match page.wait_until_loaded(timeout.map(Duration::from_millis)).await {
                Ok(handle) => {
                    reporter.pass(&name, "page loaded");
                    if cli.format == OutputFormat::Json {
                        print_json(&serde_json::json!({
                            "page": name,
                            "loaded": true,
                            "matched": handle.matched(),
                            "elapsed_ms": started.elapsed().as_millis() as u64,
                        }));
                    } else {
                        println!("{}: loaded", name);
                    }
                    status_line(cli, "wait-page", &name, started);
                    Ok(())
                }
                Err(e) => {
                    reporter.fail_with_screenshot(&name, e.to_string(), &page).await;
                    Err(e.into())
                }
            }
        }
        Command::Completions { .. } | Command::Config | Command::CheckPage { .. } => unreachable!(),
    }
}
