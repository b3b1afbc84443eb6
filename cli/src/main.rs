//! guestapi CLI: inspect an Incus instance from the inside and watch host events.
//!
//! Usage:
//! ```bash
//! guestapi probe
//! guestapi info
//! guestapi devices
//! guestapi config list
//! guestapi config get my_config_item
//! guestapi config has cloud-init.user-data
//! guestapi metadata
//! guestapi watch --type config
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use guestapi_core::paths::parse_event_types;
use guestapi_core::{probe, ClientConfig, Event, EventPayload};
use guestapi_http::GuestClient;
use guestapi_ws::{CancellationToken, EventStream, EventStreamConfig};

mod logging;

#[derive(Parser)]
#[command(
    name = "guestapi",
    about = "Query the Incus guest API from inside an instance",
    long_about = "
Query the Incus guest API from inside an instance.

The host exposes the API on a Unix socket inside every instance
(/dev/incus/sock by default).

ENVIRONMENT VARIABLES:
  GUESTAPI_SOCKET   Path of the guest API socket
  RUST_LOG          Log filter (overrides --verbose)
",
    version
)]
struct Cli {
    /// Path of the guest API socket
    #[arg(long, global = true, env = "GUESTAPI_SOCKET", default_value = guestapi_core::paths::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Timeout for request/response calls, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the guest API socket is reachable
    Probe,

    /// Show API version, location, instance type and state
    Info,

    /// List devices attached to the instance
    Devices,

    /// Read config keys set by the host operator
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the cloud-init meta-data document
    Metadata,

    /// Stream config/device change events until interrupted
    Watch {
        /// Event types to subscribe to (config, device); all when omitted
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,

        /// Skip unknown event types and malformed metadata instead of exiting
        #[arg(long)]
        lenient: bool,

        /// Maximum number of events being handled at once
        #[arg(long)]
        max_in_flight: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List every readable config key
    List,

    /// Print the value of a key (bare keys are read as `user.<key>`)
    Get {
        key: String,
        /// Fail if the key is missing or blank
        #[arg(long)]
        required: bool,
    },

    /// Exit 0 if the key exists, 1 otherwise
    Has { key: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(&logging::LogConfig::from_flags(cli.verbose, cli.json_logs));

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ClientConfig::with_socket_path(&cli.socket);
    if let Some(ms) = cli.timeout_ms {
        config = config.request_timeout(Duration::from_millis(ms));
    }
    let client = GuestClient::from_config(&config);

    match cli.command {
        Commands::Probe => {
            let reachable = probe(&config.socket_path);
            if cli.json {
                print_json(&serde_json::json!({ "socket": config.socket_path, "reachable": reachable }))?;
            } else if reachable {
                println!("inside an instance: {} is reachable", config.socket_path.display());
            } else {
                println!("not inside an instance: {} is unreachable", config.socket_path.display());
            }
            return Ok(if reachable { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
        Commands::Info => {
            let info = client.info().await.context("failed to fetch instance info")?;
            if cli.json {
                print_json(&info)?;
            } else {
                println!("API version:   {}", info.api_version);
                println!("Location:      {}", info.location);
                println!("Instance type: {}", info.instance_type);
                println!("State:         {}", info.state);
            }
        }
        Commands::Devices => {
            let devices = client.devices().await.context("failed to list devices")?;
            if cli.json {
                print_json(&devices)?;
            } else {
                for (name, settings) in &devices {
                    println!("{name}");
                    for (k, v) in settings {
                        println!("    {k}: {v}");
                    }
                }
            }
        }
        Commands::Config { action } => return config_cmd(&client, action, cli.json).await,
        Commands::Metadata => {
            let meta = client.metadata().await.context("failed to fetch meta-data")?;
            print!("{meta}");
        }
        Commands::Watch {
            types,
            lenient,
            max_in_flight,
        } => watch(&config, types, lenient, max_in_flight, cli.json).await?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn config_cmd(client: &GuestClient, action: ConfigAction, json: bool) -> Result<ExitCode> {
    match action {
        ConfigAction::List => {
            let keys = client.list_config().await.context("failed to list config keys")?;
            if json {
                print_json(&keys)?;
            } else {
                for key in keys {
                    println!("{key}");
                }
            }
        }
        ConfigAction::Get { key, required } => {
            let value = if required {
                client.require_config(&key).await
            } else {
                client.config(&key).await
            }
            .with_context(|| format!("failed to read config key {key}"))?;
            if json {
                print_json(&serde_json::json!({ "key": key, "value": value }))?;
            } else {
                println!("{value}");
            }
        }
        ConfigAction::Has { key } => {
            let present = client
                .has_config(&key)
                .await
                .with_context(|| format!("failed to check config key {key}"))?;
            if json {
                print_json(&serde_json::json!({ "key": key, "present": present }))?;
            }
            return Ok(if present { ExitCode::SUCCESS } else { ExitCode::FAILURE });
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn watch(
    config: &ClientConfig,
    types: Vec<String>,
    lenient: bool,
    max_in_flight: Option<usize>,
    json: bool,
) -> Result<()> {
    let types = parse_event_types(&types).context("unsupported --type")?;

    let mut stream_config = if lenient {
        EventStreamConfig::lenient()
    } else {
        EventStreamConfig::default()
    };
    if let Some(limit) = max_in_flight {
        stream_config = stream_config.max_in_flight(limit);
    }
    // Lets Ctrl-C take effect while the host is quiet.
    stream_config = stream_config.read_timeout(Duration::from_millis(500));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, closing subscription");
            on_signal.cancel();
        }
    });

    let stream = EventStream::from_config(config, stream_config);
    let result = stream
        .subscribe(
            cancel,
            move |event: Event| {
                print_event(&event, json);
                std::future::ready(())
            },
            types,
        )
        .await;

    if let Err(e) = result {
        bail!("event stream ended: {e}");
    }
    Ok(())
}

fn print_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
        }
        return;
    }

    match &event.payload {
        EventPayload::Config(Some(update)) => println!(
            "[{}] key {} updated - old value: {}; new value: {}",
            event.timestamp, update.key, update.old_value, update.value
        ),
        EventPayload::Device(Some(update)) => println!(
            "[{}] device {} {} (type: {}, path: {})",
            event.timestamp, update.name, update.action, update.config.kind, update.config.path
        ),
        EventPayload::Config(None) | EventPayload::Device(None) => {
            println!("[{}] {} event without metadata", event.timestamp, event.event_type())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
