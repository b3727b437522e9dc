//! patentqa - ask the patent RAG backend from the terminal
//!
//! USAGE:
//!   patentqa                          # interactive UI with answer history
//!   patentqa ask "<question>"         # one-shot: print the cleaned answer
//!   patentqa doctor                   # check config and backend reachability
//!   patentqa config set <key> <value> # non-interactive config

mod ui;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use patentqa::config::{self, Config};
use patentqa::{client, logging, HistoryEntry, HttpBackend, QueryController, SessionState};

// ═══════════════════════════════════════════════════════════════
// CLI
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Interactive,
    Ask { question: String, json: bool },
    Doctor,
    ConfigSet { key: String, value: String },
    Help,
}

/// Flags that apply to every command
#[derive(Debug, Default, PartialEq, Eq)]
struct Overrides {
    endpoint: Option<String>,
    timeout_ms: Option<u64>,
}

fn parse_args() -> Result<(Command, Overrides)> {
    parse_from(std::env::args().skip(1).collect())
}

fn parse_from(args: Vec<String>) -> Result<(Command, Overrides)> {
    let mut overrides = Overrides::default();
    let mut rest = Vec::new();
    let mut json = false;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok((Command::Help, overrides)),
            "--endpoint" | "-e" => {
                i += 1;
                let url = args.get(i).context("--endpoint needs a URL")?;
                overrides.endpoint = Some(url.clone());
            }
            "--timeout" | "-t" => {
                i += 1;
                let ms = args.get(i).context("--timeout needs milliseconds")?;
                overrides.timeout_ms = Some(config::parse_timeout_ms(ms)?);
            }
            "--json" => json = true,
            other => rest.push(other.to_string()),
        }
        i += 1;
    }

    let command = match rest.first().map(|s| s.as_str()) {
        None => Command::Interactive,
        Some("ask") => {
            let question = rest[1..].join(" ");
            if question.trim().is_empty() {
                anyhow::bail!("Usage: patentqa ask \"<question>\"");
            }
            Command::Ask { question, json }
        }
        Some("doctor") => Command::Doctor,
        Some("config") if rest.get(1).map(|s| s.as_str()) == Some("set") => Command::ConfigSet {
            key: rest.get(2).cloned().unwrap_or_default(),
            value: rest.get(3).cloned().unwrap_or_default(),
        },
        Some(other) => anyhow::bail!("Unknown command: {}. Try --help", other),
    };

    Ok((command, overrides))
}

fn print_help() {
    println!(r#"patentqa - ask the patent RAG backend from the terminal

USAGE:
    patentqa                            # interactive UI with answer history
    patentqa ask "<question>" [--json]  # one-shot: print the cleaned answer
    patentqa doctor                     # check config and backend reachability
    patentqa config set <key> <value>   # set config value

FLAGS:
    -e, --endpoint <url>    Query endpoint (default http://localhost:8000/query)
    -t, --timeout <ms>      Per-query timeout (default 10000)
        --json              Print state and history as JSON (ask)
    -h, --help              Show this help

CONFIG KEYS:
    endpoint, host, port, timeout

FILES:
    ~/.config/patentqa/config.json      Endpoint, timeout
    ~/.local/state/patentqa/patentqa.log  Interactive UI log

ENVIRONMENT:
    PATENTQA_ENDPOINT       Override the configured endpoint
    PATENTQA_TIMEOUT_MS     Override the configured timeout
    PATENTQA_LOG            Log filter, e.g. patentqa=debug

CONTROLS (interactive mode):
    Enter   Send question / replay highlighted history entry
    Tab     Switch between input and history
    Up/Down Move in history
    Esc     Quit
"#);
}

// ═══════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    let (command, overrides) = parse_args()?;

    match command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Interactive => run_interactive(&overrides).await,
        Command::Ask { question, json } => {
            logging::init_stderr()?;
            run_ask(&question, json, &overrides).await
        }
        Command::Doctor => {
            logging::init_stderr()?;
            run_doctor(&overrides).await
        }
        Command::ConfigSet { key, value } => run_config_set(&key, &value),
    }
}

/// Resolved endpoint and timeout, CLI flags first
fn resolve(overrides: &Overrides) -> Result<(String, Duration)> {
    let cfg = Config::load()?;
    let endpoint = match &overrides.endpoint {
        Some(url) => {
            client::parse_endpoint(url)?;
            url.clone()
        }
        None => cfg.resolve_endpoint()?,
    };
    let timeout = match overrides.timeout_ms {
        Some(ms) => Duration::from_millis(ms),
        None => cfg.resolve_timeout()?,
    };
    Ok((endpoint, timeout))
}

fn build_controller(overrides: &Overrides) -> Result<(QueryController, String)> {
    let (endpoint, timeout) = resolve(overrides)?;
    let backend = HttpBackend::new(&endpoint)?;
    Ok((QueryController::new(Arc::new(backend), timeout), endpoint))
}

// ═══════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct AskReport<'a> {
    state: &'a SessionState,
    history: &'a [HistoryEntry],
}

async fn run_ask(question: &str, json: bool, overrides: &Overrides) -> Result<()> {
    let (controller, _) = build_controller(overrides)?;

    controller
        .submit(question)?
        .await
        .context("Query task failed")?;

    let state = controller.state();
    if json {
        let history = controller.history();
        let report = AskReport {
            state: &state,
            history: &history,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if state.error.is_none() {
        println!("{}", state.response_text);
    }

    if let Some(error) = state.error {
        anyhow::bail!("{}", error.message);
    }
    Ok(())
}

async fn run_doctor(overrides: &Overrides) -> Result<()> {
    println!("patentqa doctor\n");

    let path = config::config_path()?;
    println!("[{}] Config: {}",
        if path.exists() { "✓" } else { "-" },
        path.display()
    );

    let (endpoint, timeout) = match resolve(overrides) {
        Ok(resolved) => resolved,
        Err(e) => {
            println!("[✗] Endpoint: {:#}", e);
            return Ok(());
        }
    };
    println!("[✓] Endpoint: {}", endpoint);
    println!("[✓] Timeout: {}ms", timeout.as_millis());

    print!("[?] Backend: checking...");
    match client::check_connectivity(&endpoint, timeout).await {
        Ok(()) => println!("\r[✓] Backend: reachable         "),
        Err(e) => println!("\r[✗] Backend: {}", e),
    }

    Ok(())
}

fn run_config_set(key: &str, value: &str) -> Result<()> {
    let mut cfg = Config::load()?;
    cfg.set(key, value)?;
    cfg.save()?;
    println!("Set {} = {} in {}", key, value, config::config_path()?.display());
    Ok(())
}

async fn run_interactive(overrides: &Overrides) -> Result<()> {
    let log_path = logging::log_path()?;
    logging::init_file(&log_path)?;

    let (controller, endpoint) = build_controller(overrides)?;
    let result = ui::run_tui(&controller, &endpoint).await;
    controller.shutdown();
    result
}
