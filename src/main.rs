use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use callpanel::audio::WavDevices;
use callpanel::call::{CallPanel, RegistryFactory};
use callpanel::ledger::CallLedger;
use callpanel::live::GeminiLiveConnector;
use callpanel::tools::{Roster, ToolRegistry};
use callpanel::transcript::Speaker;
use callpanel::{CallEvent, Config};

/// Call-center agent panel backed by Gemini Live
#[derive(Parser, Debug)]
#[command(name = "callpanel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one call, replaying a WAV file as the caller
    Call {
        /// Caller audio (any rate; resampled to 16kHz mono)
        #[arg(short = 'i', long = "input", value_name = "WAV")]
        input: PathBuf,

        /// Where to write the agent's speech (24kHz mono)
        #[arg(short = 'o', long = "output", value_name = "WAV")]
        output: PathBuf,

        /// Hang up after this many seconds
        #[arg(short = 's', long = "seconds")]
        seconds: Option<u64>,
    },

    /// Print the agent's tool declarations as JSON
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callpanel=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Tools => {
            let registry = ToolRegistry::from_entropy(config.roster());
            println!("{}", serde_json::to_string_pretty(&registry.declarations())?);
            Ok(())
        }
        Commands::Call {
            input,
            output,
            seconds,
        } => run_call(&config, input, output, seconds.map(Duration::from_secs)).await,
    }
}

async fn run_call(
    config: &Config,
    input: PathBuf,
    output: PathBuf,
    limit: Option<Duration>,
) -> anyhow::Result<()> {
    let connector = GeminiLiveConnector::new(
        config.api_key(),
        config.live.endpoint.clone(),
        config.setup_timeout(),
    );
    let devices = WavDevices::new(input, output);
    let roster: Roster = config.roster();
    let registry: RegistryFactory = Arc::new(move || ToolRegistry::from_entropy(roster.clone()));

    let (panel, mut events) = CallPanel::spawn(
        config.controller_config()?,
        Arc::new(connector),
        Arc::new(devices),
        registry,
    );

    let call_id = panel.start_call().await?;
    println!("Call {call_id} started (Ctrl+C to hang up)");

    let mut ledger = CallLedger::new();
    let hang_up_at = limit.map(|d| tokio::time::Instant::now() + d);
    let mut hung_up = false;

    loop {
        let armed = !hung_up;
        let timer = async move {
            match hang_up_at {
                Some(at) if armed => tokio::time::sleep_until(at).await,
                _ => std::future::pending().await,
            }
        };

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                ledger.apply(&event);
                let finished = matches!(event, CallEvent::CallEnded { .. });
                print_event(&event);
                if finished {
                    break;
                }
            }
            result = tokio::signal::ctrl_c(), if !hung_up => {
                result?;
                println!("Hanging up...");
                hung_up = true;
                panel.end_call().await?;
            }
            () = timer => {
                println!("Time limit reached, hanging up...");
                hung_up = true;
                panel.end_call().await?;
            }
        }
    }

    panel.shutdown().await;
    print_summary(&ledger);
    Ok(())
}

fn print_event(event: &CallEvent) {
    match event {
        CallEvent::TranscriptUpdated { index, entry } => {
            let who = match entry.speaker {
                Speaker::Caller => "Caller",
                Speaker::Agent => "Agent ",
                Speaker::System => "System",
            };
            println!("[{index:>3}] {who}: {}", entry.text);
        }
        CallEvent::TicketCreated(ticket) => {
            println!(
                "Ticket {} ({}, {}) assigned to {}",
                ticket.id,
                ticket.category,
                ticket.department,
                ticket.assigned_to.as_deref().unwrap_or("nobody")
            );
        }
        CallEvent::IssueAutoResolved { resolution_id, details, .. } => {
            println!("Issue resolved by the agent ({resolution_id}): {details}");
        }
        CallEvent::NewConnectionRequested(request) => {
            println!(
                "New connection request {} for {} ({}, {}, {})",
                request.request_id,
                request.customer_name,
                request.village,
                request.mandal,
                request.district
            );
        }
        CallEvent::CallForwarded { .. } => println!("Call forwarded to a human manager"),
        CallEvent::CallEnded { reason, transcript, .. } => {
            println!("Call ended ({reason:?}) with {} transcript entries", transcript.len());
        }
        CallEvent::Error { message } => eprintln!("Error: {message}"),
        CallEvent::CallStarted { .. } | CallEvent::StateChanged { .. } => {}
    }
}

fn print_summary(ledger: &CallLedger) {
    let stats = ledger.stats();
    println!();
    println!(
        "Calls: {} total, {} attended, {} missed, {} forwarded",
        stats.total_calls, stats.attended_calls, stats.missed_calls, stats.forwarded_calls
    );
    println!(
        "Tickets: {}  Auto-resolved: {}  New connection requests: {}",
        ledger.tickets().len(),
        stats.auto_resolved,
        stats.new_connection_requests
    );
    if let Some(call) = ledger.calls().last() {
        if let Some(end) = call.end_time {
            let secs = (end - call.start_time).num_milliseconds() as f64 / 1000.0;
            println!("Last call: {:?}, {secs:.1}s", call.status);
        }
    }
}
