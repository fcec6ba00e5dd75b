//! Callbridge CLI Application
//!
//! Drives the call-control layer against the in-memory engine and platform.

use anyhow::{Context, Result};
use callbridge_core::prelude::*;
use callbridge_core::sim::{spawn_action_pump, SimulatedEngine, SimulatedPlatform};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "CALLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place an outbound call
    Place {
        /// Participant id, phone number, group id, meeting link or `room:` id
        target: String,

        /// Enable video
        #[arg(long)]
        video: bool,

        /// Hold and resume the call before hanging up
        #[arg(long)]
        hold: bool,
    },

    /// Receive an incoming call
    Incoming {
        /// Announce the call by push before the engine delivers it
        #[arg(long)]
        push_first: bool,

        /// How long the engine takes to deliver the call
        #[arg(long, default_value = "2000")]
        engine_delay_ms: u64,

        /// Override the admission timeout
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Decline instead of answering
        #[arg(long)]
        decline: bool,
    },

    /// Print the effective configuration
    Config,
}

struct Demo {
    service: Arc<CallControlService>,
    engine: Arc<SimulatedEngine>,
    platform: Arc<SimulatedPlatform>,
}

impl Demo {
    fn new(config: CallControlConfig) -> Result<Self> {
        let (engine, engine_events) = SimulatedEngine::with_events();
        let engine = Arc::new(engine.with_operation_delay(Duration::from_millis(50)));
        let (platform, actions) = SimulatedPlatform::new();
        let platform = Arc::new(platform);

        let service = Arc::new(
            CallControlService::builder(engine.clone(), platform.clone())
                .with_config(config)
                .build()?,
        );
        service.spawn_engine_event_loop(engine_events);
        spawn_action_pump(service.delegate(), actions);
        spawn_event_printer(&service);

        Ok(Self {
            service,
            engine,
            platform,
        })
    }

    fn print_summary(&self) {
        let snapshot = self.service.registry().snapshot();
        println!("📊 Platform saw:");
        println!(
            "   requested: {} | fulfilled: {} | failed: {}",
            self.platform.requested().len(),
            self.platform.fulfilled().len(),
            self.platform.failed().len()
        );
        println!(
            "   incoming reports: {} | ended reports: {}",
            self.platform.reported_incoming().len(),
            self.platform.ended().len()
        );
        println!(
            "   registry: {} active, {} incoming, {} pending",
            snapshot.active_calls, snapshot.incoming_calls, snapshot.transactions
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callbridge=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Place {
            target,
            video,
            hold,
        } => {
            handle_place(config, &target, video, hold).await?;
        }
        Commands::Incoming {
            push_first,
            engine_delay_ms,
            timeout_ms,
            decline,
        } => {
            let mut config = config;
            if let Some(timeout_ms) = timeout_ms {
                config.admission_timeout_ms = timeout_ms;
            }
            handle_incoming(
                config,
                push_first,
                Duration::from_millis(engine_delay_ms),
                decline,
            )
            .await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<CallControlConfig> {
    let Some(path) = path else {
        return Ok(CallControlConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    CallControlConfig::from_json_str(&text)
        .with_context(|| format!("parsing configuration from {}", path.display()))
}

async fn handle_place(config: CallControlConfig, target: &str, video: bool, hold: bool) -> Result<()> {
    let target: CallTarget = target.parse()?;
    println!("📞 Calling {}...", target.handle_value());

    let demo = Demo::new(config)?;
    let options = if video {
        CallOptions::video_call()
    } else {
        CallOptions::audio_only()
    };

    let call = demo.service.place_call(target, options).await?;
    println!("✅ Call placed: {} (engine {})", call.reported_id, call.engine_id);

    demo.service
        .delegate()
        .did_activate_audio_session()
        .await?;
    demo.engine.set_state(&call.engine_id, CallState::Connected);
    tokio::time::sleep(Duration::from_millis(100)).await;

    if hold {
        demo.service.hold_call(call.reported_id, true).await?;
        println!("⏸  On hold");
        demo.service.hold_call(call.reported_id, false).await?;
        println!("▶️  Resumed");
    }

    demo.service.end_call(call.reported_id).await?;
    demo.service
        .delegate()
        .did_deactivate_audio_session()
        .await?;
    println!("📞 Call ended");

    demo.print_summary();
    Ok(())
}

async fn handle_incoming(
    config: CallControlConfig,
    push_first: bool,
    engine_delay: Duration,
    decline: bool,
) -> Result<()> {
    let demo = Demo::new(config)?;
    let call_id = CallUuid::new();
    println!("👂 Incoming call {}", call_id);

    if push_first {
        let payload = json!({
            "data": {
                "callId": call_id.to_string(),
                "callerId": "8:acs:demo-caller",
                "displayName": "Demo Caller",
                "videoCall": "false"
            }
        });
        demo.service.handle_push(&payload).await?;
        println!("🔔 Announced by push, engine delivers in {:?}", engine_delay);

        let engine = demo.engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine_delay).await;
            engine.ring(
                call_id,
                Participant::new("8:acs:demo-caller"),
                Some("Demo Caller".to_string()),
                false,
            );
        });
    } else {
        let mut events = demo.service.subscribe_events();
        demo.engine.ring(
            call_id,
            Participant::new("8:acs:demo-caller"),
            Some("Demo Caller".to_string()),
            false,
        );
        while let Ok(event) = events.recv().await {
            if matches!(event, BridgeEvent::IncomingCall { .. }) {
                break;
            }
        }
    }

    if decline {
        match demo.service.end_call(call_id).await {
            Ok(()) => println!("❌ Declined"),
            Err(e) => println!("⚠️  Decline failed: {e}"),
        }
        demo.print_summary();
        return Ok(());
    }

    match demo
        .service
        .accept_call(call_id, CallOptions::audio_only())
        .await
    {
        Ok(call) => {
            println!("✅ Answered: {} ({:?})", call.reported_id, call.state);
            demo.service
                .delegate()
                .did_activate_audio_session()
                .await?;
            demo.service.end_call(call.reported_id).await?;
            demo.service
                .delegate()
                .did_deactivate_audio_session()
                .await?;
            println!("📞 Call ended");
        }
        Err(CallControlError::NoIncomingCallFound(id)) => {
            println!("⌛ Engine never delivered call {id} in time");
        }
        Err(e) => return Err(e.into()),
    }

    demo.print_summary();
    Ok(())
}

fn spawn_event_printer(service: &Arc<CallControlService>) {
    let mut events = service.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(?event, "Bridge event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
