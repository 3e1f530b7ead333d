//! FraudGuard console
//!
//! Headless driver for the stream coordinator. Prints one line per incoming
//! transaction and reads operator commands from stdin.
//!
//! Usage:
//!   fraudguard --api-base http://localhost:8000
//!   fraudguard --force-demo --speed 2 --autostart
//!
//! Environment:
//!   FRAUDGUARD_API_BASE - Remote scoring service base URL
//!   FRAUDGUARD_WS_URL - Explicit stream URL (default: derived from the API base)
//!   FRAUDGUARD_FORCE_DEMO - Always use the local generator
//!   FRAUDGUARD_SPEED / FRAUDGUARD_SEED - Local generator tuning

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fraudguard_stream::session::SessionStore;
use fraudguard_stream::{SessionConfig, SessionController, StoreEvent, TransactionEvent};

#[derive(Parser, Debug)]
#[command(name = "fraudguard")]
#[command(about = "FraudGuard stream coordinator console")]
struct Args {
    /// Remote scoring service base URL
    #[arg(long, env = "FRAUDGUARD_API_BASE")]
    api_base: Option<String>,

    /// Stream URL override
    #[arg(long, env = "FRAUDGUARD_WS_URL")]
    ws_url: Option<String>,

    /// Skip the remote service and run the local generator
    #[arg(long)]
    force_demo: bool,

    /// Treat a missing endpoint as "no service" instead of localhost
    #[arg(long)]
    production: bool,

    /// Events per second multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Seed for reproducible local generation
    #[arg(long)]
    seed: Option<u64>,

    /// Start streaming immediately
    #[arg(long)]
    autostart: bool,

    /// Do not print a line per transaction
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Start,
    Stop,
    Toggle,
    Speed(f64),
    Inject,
    FraudOnly,
    Reset,
    Clear,
    Demo(usize),
    Explain,
    Status,
    Health,
    Features,
    Metrics,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_lowercase();
    let arg = parts.next();

    let cmd = match verb.as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "toggle" | "t" => Command::Toggle,
        "speed" => {
            let v = arg.ok_or("usage: speed <value>")?;
            Command::Speed(v.parse().map_err(|_| format!("not a number: {}", v))?)
        }
        "inject" | "i" => Command::Inject,
        "fraud-only" => Command::FraudOnly,
        "reset" => Command::Reset,
        "clear" => Command::Clear,
        "demo" => {
            let n = match arg {
                Some(v) => v.parse().map_err(|_| format!("not a count: {}", v))?,
                None => 100,
            };
            Command::Demo(n)
        }
        "explain" | "x" => Command::Explain,
        "status" | "s" => Command::Status,
        "health" => Command::Health,
        "features" => Command::Features,
        "metrics" => Command::Metrics,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(cmd)
}

const HELP: &str = "commands: start | stop | toggle | speed <v> | inject | fraud-only | reset | clear | demo [n] | explain | status | health | features | metrics | quit";

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();

    let mut config = SessionConfig::from_env();
    if args.api_base.is_some() {
        config.api_base = args.api_base.clone();
    }
    if args.ws_url.is_some() {
        config.ws_url = args.ws_url.clone();
    }
    config.force_demo |= args.force_demo;
    config.production |= args.production;
    if let Some(speed) = args.speed.filter(|s| s.is_finite() && *s > 0.0) {
        config.speed = speed;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let controller =
        Arc::new(SessionController::new(config).context("Failed to build session controller")?);
    let mode = controller.initialize().await;
    info!(mode = %mode, reason = ?controller.local_reason(), "🚀 FraudGuard console ready");
    println!("{}", HELP);

    if !args.quiet {
        tokio::spawn(print_events(controller.store()));
    }
    if args.autostart {
        controller.start().await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Quit) => break,
            Ok(cmd) => run_command(&controller, cmd).await,
            Err(msg) => println!("{}", msg),
        }

        if let Some(err) = controller.snapshot().last_error {
            println!("last error: {}", err);
        }
    }

    controller.shutdown();
    info!("👋 FraudGuard console exiting");
    Ok(())
}

async fn run_command(controller: &SessionController, cmd: Command) {
    match cmd {
        Command::Start => controller.start().await,
        Command::Stop => controller.stop().await,
        Command::Toggle => controller.toggle().await,
        Command::Speed(v) => {
            if let Err(e) = controller.update_speed(v).await {
                println!("{}", e);
            }
        }
        Command::Inject => {
            if let Some(event) = controller.inject_fraud().await {
                println!("injected {}", event_line(&event));
            }
        }
        Command::FraudOnly => {
            let removed = controller.show_fraud_only().await;
            println!("removed {} non-fraud events", removed);
        }
        Command::Reset => controller.reset_simulator().await,
        Command::Clear => controller.clear_transactions(),
        Command::Demo(n) => match controller.load_demo_data(n).await {
            Ok(loaded) => println!("loaded {} demo records", loaded),
            Err(e) => println!("{}", e),
        },
        Command::Explain => {
            let Some(event) = controller.store().head() else {
                println!("no events to explain");
                return;
            };
            match controller.explain(&event).await {
                Ok(explanation) => {
                    println!(
                        "{} prediction={:.3} base={:.3}",
                        event.id(),
                        explanation.prediction,
                        explanation.base_value
                    );
                    for c in explanation.top_features {
                        println!("  {:<6} value={:+.3} contribution={:+.4}", c.feature, c.value, c.contribution);
                    }
                }
                Err(e) => println!("{}", e),
            }
        }
        Command::Status => {
            let snap = controller.snapshot();
            println!(
                "mode={} status={} running={} speed={} processed={} fraud={} buffered={}",
                snap.mode,
                snap.status,
                snap.stats.is_running,
                snap.stats.speed,
                snap.stats.transactions_processed,
                snap.stats.fraud_count,
                snap.events.len()
            );
            if let Some(m) = controller.connection_metrics() {
                match serde_json::to_string(&m) {
                    Ok(json) => println!("stream {}", json),
                    Err(e) => warn!(error = %e, "metrics serialization failed"),
                }
            }
        }
        Command::Health => match controller.health().await {
            Ok(h) => println!("health={} models_ready={}", h.status, h.models_ready),
            Err(e) => println!("{}", e),
        },
        Command::Features => match controller.feature_importance().await {
            Ok(map) => {
                let mut ranked: Vec<(String, f64)> = map.into_iter().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                for (name, score) in ranked.into_iter().take(10) {
                    println!("  {:<6} {:.4}", name, score);
                }
            }
            Err(e) => println!("{}", e),
        },
        Command::Metrics => match controller.model_metrics().await {
            Ok(value) => println!("{}", value),
            Err(e) => println!("{}", e),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}

async fn print_events(store: Arc<SessionStore>) {
    let mut rx = store.subscribe();
    loop {
        match rx.recv().await {
            Ok(StoreEvent::EventAdded { event, .. }) => println!("{}", event_line(&event)),
            Ok(StoreEvent::StatusChanged(status)) => println!("-- {}", status),
            Ok(StoreEvent::ModeChanged(mode)) => println!("-- mode {}", mode),
            Ok(StoreEvent::Reset) => println!("-- reset"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn event_line(event: &TransactionEvent) -> String {
    format!(
        "{} {} ${:>9.2} score={:.3} {:<6} {}",
        event.timestamp().format("%H:%M:%S"),
        event.id(),
        event.amount(),
        event.risk_score(),
        event.risk_level().as_str(),
        if event.is_fraud() { "FRAUD" } else { "" }
    )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fraudguard_stream=info,fraudguard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_env() {
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
