//! Lumen - agent-programmable smart lamp
//!
//! Runs the behavior engine with a logging LED sink and a line-based event
//! ingress, which is how the controller is exercised without lamp hardware
//! attached.
//!
//! # Usage
//!
//! ```bash
//! # Interactive: type event names (click, hold, release, double, or any
//! # custom event) on stdin
//! cargo run --release -- --stdin
//!
//! # Button driver piping events in
//! button-daemon | lumen --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `LUMEN_CONFIG`: path to the TOML config (default: ./lumen.toml)
//! - `ANTHROPIC_API_KEY`: enables the LLM parser for pipeline `llm` steps
//! - `RUST_LOG`: logging level (default: info)

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lumen::{ClaudeParser, Engine, LampConfig, LogSink};

#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "Agent-programmable smart lamp behavior engine")]
#[command(version)]
struct CliArgs {
    /// Read event names from stdin, one per line
    #[arg(long)]
    stdin: bool,

    /// Override the config file path
    #[arg(short, long, env = "LUMEN_CONFIG")]
    config: Option<std::path::PathBuf>,
}

/// Map the short forms people type to canonical event names.
fn canonical_event(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    match trimmed {
        "" => None,
        "click" => Some(lumen::events::BUTTON_CLICK),
        "double" => Some(lumen::events::BUTTON_DOUBLE_CLICK),
        "hold" => Some(lumen::events::BUTTON_HOLD),
        "release" => Some(lumen::events::BUTTON_RELEASE),
        other => Some(other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = CliArgs::parse();
    let config = match &args.config {
        Some(path) => LampConfig::from_path(path),
        None => LampConfig::load(),
    };

    let mut builder = Engine::builder().config(config).sink(Arc::new(LogSink));
    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => {
            builder = builder.llm(Arc::new(ClaudeParser::new(key)));
        }
        _ => info!("ANTHROPIC_API_KEY unset - pipeline llm steps disabled"),
    }
    let engine = builder.build();

    info!("Lumen engine up, current state: {}", engine.current_state().await);

    if args.stdin {
        run_stdin_events(&engine).await;
    } else {
        info!("No event source selected (pass --stdin); waiting for Ctrl-C");
        tokio::signal::ctrl_c().await?;
    }

    engine.shutdown().await;
    Ok(())
}

/// Deliver stdin lines as events until EOF or Ctrl-C.
async fn run_stdin_events(engine: &Engine) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[Ingress] Shutdown signal received");
                return;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let Some(event) = canonical_event(&line) else {
                    continue;
                };
                let fired = engine.on_event(event).await;
                info!(
                    "[Ingress] {event} -> {} (state: {})",
                    if fired { "fired" } else { "no rule" },
                    engine.current_state().await
                );
            }
            Ok(None) => {
                info!("[Ingress] stdin closed");
                return;
            }
            Err(e) => {
                warn!("[Ingress] stdin error: {e}");
                return;
            }
        }
    }
}
