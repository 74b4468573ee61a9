mod cache;
mod config;
mod event;
mod gateway;
mod host;
mod http;
mod net;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::event::{ControlMessage, Event, Outcome};
use crate::http::Request;

#[derive(Parser, Debug)]
#[command(name = "offline-gateway")]
#[command(about = "Offline cache gateway for the corporate site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-gateway/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the data directory holding the cache database
  #[arg(long)]
  data_dir: Option<PathBuf>,

  /// Log to stderr instead of the rolling log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the install manifest
  Install,
  /// Remove stale namespaces and start intercepting
  Activate,
  /// Issue a request through the gateway
  Fetch {
    /// Site path or absolute URL
    target: String,
    /// Treat as a top-level page load
    #[arg(long)]
    navigate: bool,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// Post a control message
  Message {
    #[arg(value_enum)]
    kind: MessageKind,
  },
  /// Deliver a background sync signal
  Sync { tag: String },
  /// Deliver a periodic sync signal
  PeriodicSync { tag: String },
  /// Render a push payload
  Push { body: Option<String> },
  /// Click a notification action
  Click { action: Option<String> },
  /// Submit the contact form, queueing it if the network is down
  Submit {
    /// JSON payload
    json: String,
  },
  /// List queued submissions
  Pending,
  /// Read newline-delimited JSON events from stdin
  Run,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MessageKind {
  SkipWaiting,
  GetVersion,
}

impl From<MessageKind> for ControlMessage {
  fn from(kind: MessageKind) -> Self {
    match kind {
      MessageKind::SkipWaiting => ControlMessage::SkipWaiting,
      MessageKind::GetVersion => ControlMessage::GetVersion,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override data directory if specified on command line
  let config = if let Some(data_dir) = args.data_dir {
    config::Config {
      data_dir: Some(data_dir),
      ..config
    }
  } else {
    config
  };

  let _guard = init_logging(&config, args.log_stderr)?;

  let host = host::Host::open(config)?;

  let event = match args.command {
    Command::Run => {
      return host.run(tokio::io::stdin(), tokio::io::stdout()).await;
    }
    Command::Pending => {
      let pending = host.pending()?;
      println!("{}", serde_json::to_string_pretty(&pending)?);
      return Ok(());
    }
    Command::Install => Event::Install,
    Command::Activate => Event::Activate,
    Command::Fetch {
      target,
      navigate,
      accept,
      method,
    } => {
      let url = host.gateway().config().resolve(&target)?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      request.method = method.to_uppercase();
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }
      Event::Fetch { request }
    }
    Command::Message { kind } => Event::Message {
      message: kind.into(),
    },
    Command::Sync { tag } => Event::Sync { tag },
    Command::PeriodicSync { tag } => Event::PeriodicSync { tag },
    Command::Push { body } => Event::Push { body },
    Command::Click { action } => Event::NotificationClick { action },
    Command::Submit { json } => Event::Submit {
      data: serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON payload: {}", e))?,
    },
  };

  let outcome = host.dispatch(event).await?;
  print_outcome(&outcome)?;

  Ok(())
}

fn print_outcome(outcome: &Outcome) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(outcome)?);
  Ok(())
}

/// Set up tracing. Stdout carries outcomes, so logs go to a daily file unless asked otherwise.
fn init_logging(config: &config::Config, log_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("OFFLINE_GATEWAY_LOG")
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  if log_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  let log_dir = config.data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "gateway.log"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
