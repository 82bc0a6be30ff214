use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use browser_stream::config::AppConfig;
use browser_stream::control::ControlHandle;
use browser_stream::events::{EventBus, SessionEvent};
use browser_stream::input::{
    key_press, paste, pointer_click, wheel, ClipboardEvent, CommandMessage, KeyEvent,
    PointerEvent, SinkBounds, WheelEvent,
};
use browser_stream::media::RtpStatsSink;
use browser_stream::session::{Role, Session};

/// Environment override for the backend base URL
const BACKEND_URL_ENV: &str = "BROWSER_STREAM_BACKEND_URL";

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// browser-stream command line arguments
#[derive(Parser, Debug)]
#[command(name = "browser-stream")]
#[command(version, about = "View a remote browser over WebRTC and drive it from stdin", long_about = None)]
struct CliArgs {
    /// TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config and environment)
    #[arg(short = 'b', long, value_name = "URL")]
    backend_url: Option<String>,

    /// Signaling role: initiator or responder
    #[arg(short = 'r', long, value_name = "ROLE")]
    role: Option<Role>,

    /// Page the remote browser opens
    #[arg(short = 'u', long, value_name = "URL")]
    launch_url: Option<String>,

    /// Control WebSocket URL (default derived from the backend URL)
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Do not open the control channel
    #[arg(long, conflicts_with = "no_media")]
    no_control: bool,

    /// Do not negotiate media
    #[arg(long)]
    no_media: bool,

    /// Log level
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Session event topics to log: `*`, `media.*` or an exact event name
    #[arg(short = 'e', long = "events", value_name = "TOPIC", default_value = "*")]
    event_topics: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.json_logs);

    tracing::info!("Starting browser-stream v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(args.config.as_deref()).await?;
    apply_overrides(&mut config, &args, std::env::var(BACKEND_URL_ENV).ok());
    config.validate()?;
    tracing::info!(
        "Backend: {} (role: {}, control: {})",
        config.backend.base_url,
        config.session.role,
        config.control.enabled
    );

    let sink = Arc::new(RtpStatsSink::new());
    let events = EventBus::new();
    spawn_event_logger(events.subscribe(), args.event_topics.clone());

    let mut session = Session::from_config(config, sink.clone())?.with_events(events);
    let stop = session.stop_token();

    tokio::spawn(shutdown_on_ctrl_c(stop.clone()));
    if let Some(handle) = session.control_handle() {
        tokio::spawn(forward_stdin(handle, stop));
    }

    match session.start().await {
        Ok(()) => session.run().await,
        Err(e) => tracing::error!("Session setup failed: {}", e),
    }
    let failure = session.last_error().cloned();
    session.stop().await;

    let stats = sink.stats();
    tracing::info!(
        "Session {} closed after {}s: {} RTP packets, {} bytes",
        session.id(),
        (chrono::Utc::now() - session.created_at()).num_seconds(),
        stats.packets,
        stats.bytes
    );

    if let Some(report) = failure {
        anyhow::bail!("session failed ({}): {}", report.kind, report.message);
    }
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "browser_stream=error,webrtc=error",
        LogLevel::Warn => "browser_stream=warn,webrtc=warn",
        LogLevel::Info => "browser_stream=info,webrtc=warn",
        LogLevel::Verbose => "browser_stream=debug,webrtc=warn",
        LogLevel::Debug => "browser_stream=debug,webrtc=info",
        LogLevel::Trace => "browser_stream=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// CLI flags win over the environment, which wins over the config file
fn apply_overrides(config: &mut AppConfig, args: &CliArgs, env_backend_url: Option<String>) {
    if let Some(url) = args.backend_url.clone().or(env_backend_url) {
        config.backend.base_url = url;
    }
    if let Some(role) = args.role {
        config.session.role = role;
    }
    if let Some(url) = &args.launch_url {
        config.control.launch_url = url.clone();
    }
    if let Some(url) = &args.ws_url {
        config.control.ws_url = Some(url.clone());
    }
    if args.no_control {
        config.control.enabled = false;
    }
    if args.no_media {
        config.media.enabled = false;
    }
}

fn spawn_event_logger(mut rx: broadcast::Receiver<SessionEvent>, topics: Vec<String>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if !is_subscribed(&event, &topics) => {}
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(session = event.session_id(), "Event: {}", json),
                    Err(e) => tracing::warn!("Failed to serialize {}: {}", event.event_name(), e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn is_subscribed(event: &SessionEvent, topics: &[String]) -> bool {
    topics.iter().any(|topic| event.matches_topic(topic))
}

async fn shutdown_on_ctrl_c(stop: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            stop.cancel();
        }
        Err(e) => tracing::warn!("Failed to install Ctrl-C handler: {}", e),
    }
}

/// Read commands from stdin until EOF, which ends the session
async fn forward_stdin(handle: ControlHandle, stop: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(Some(command)) => {
                    if !handle.send(&command) {
                        tracing::warn!(
                            "Control link is {}, {} command dropped",
                            handle.state(),
                            command.name()
                        );
                    }
                }
                Ok(None) => {}
                Err(msg) => tracing::warn!("{}", msg),
            },
            Ok(None) => {
                tracing::info!("Input closed, stopping session");
                stop.cancel();
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read input: {}", e);
                break;
            }
        }
    }
}

/// Parse `click X Y`, `key K`, `paste TEXT` or `scroll DX DY`
///
/// Click coordinates are already relative to the video sink.
fn parse_command(line: &str) -> Result<Option<CommandMessage>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let captured = match verb {
        "click" => {
            let (x, y) = parse_pair(rest)?;
            pointer_click(
                PointerEvent {
                    client_x: x,
                    client_y: y,
                },
                SinkBounds::default(),
            )
        }
        "key" if !rest.is_empty() => key_press(KeyEvent {
            key: rest.to_string(),
        }),
        "paste" if !rest.is_empty() => paste(ClipboardEvent {
            text: rest.to_string(),
        }),
        "scroll" => {
            let (delta_x, delta_y) = parse_pair(rest)?;
            wheel(WheelEvent { delta_x, delta_y })
        }
        _ => return Err(format!("Unrecognized input: {}", line)),
    };
    Ok(Some(captured.message))
}

fn parse_pair(s: &str) -> Result<(f64, f64), String> {
    let mut parts = s.split_whitespace().map(str::parse::<f64>);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(a)), Some(Ok(b)), None) => Ok((a, b)),
        _ => Err(format!("Expected two numbers, got \"{}\"", s)),
    }
}
