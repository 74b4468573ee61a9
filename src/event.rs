use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::gateway::{LifecycleState, Notification, PendingSubmission};
use crate::http::{Request, Response};

/// Events delivered to the gateway by the hosting runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
  /// Outgoing request from a page
  Fetch { request: Request },
  Install,
  Activate,
  /// Control message posted by a page
  Message { message: ControlMessage },
  /// Background sync after connectivity returns
  Sync { tag: String },
  PeriodicSync { tag: String },
  Push {
    #[serde(default)]
    body: Option<String>,
  },
  NotificationClick {
    #[serde(default)]
    action: Option<String>,
  },
  /// Contact form submission to deliver or defer
  Submit { data: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
  GetVersion,
}

/// What handling an event produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  /// Response for an intercepted request
  Response(Response),
  /// The runtime must perform the request itself
  NotIntercepted,
  Installed {
    state: LifecycleState,
    cached: usize,
  },
  Activated {
    deleted: Vec<String>,
    clients_claimed: bool,
  },
  /// Reply to GET_VERSION
  Version { version: String },
  /// Accepted, no reply
  Ack,
  Synced { delivered: usize, remaining: usize },
  Refreshed {
    refreshed: Vec<String>,
    failed: Vec<String>,
  },
  Notification(Notification),
  OpenWindow { url: String },
  Dismissed,
  /// Live submission reached the server
  Submitted { status: u16 },
  /// Submission stored for the next `contact-form` sync
  Queued {
    submission: PendingSubmission,
    sync_tag: String,
  },
  /// Event kind or tag this gateway does not handle
  Ignored { reason: String },
}

/// One line of input in `run` mode
#[derive(Debug, Deserialize)]
pub struct Envelope {
  #[serde(default)]
  pub id: Option<u64>,
  pub event: Event,
}

#[derive(Debug)]
pub enum Input {
  Event(Envelope),
  Malformed(String),
}

/// Event handler that produces events from newline-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Input>,
}

impl EventHandler {
  /// Spawn a reader over the given input stream
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line.trim().is_empty() {
              continue;
            }
            let input = match serde_json::from_str::<Envelope>(&line) {
              Ok(envelope) => Input::Event(envelope),
              Err(e) => {
                warn!(error = %e, "malformed event line");
                Input::Malformed(format!("Malformed event: {}", e))
              }
            };
            if tx.send(input).is_err() {
              break;
            }
          }
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read events");
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Input> {
    self.rx.recv().await
  }
}
