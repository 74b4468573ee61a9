//! Host runtime: delivers events to the gateway and performs the requests it
//! declines to intercept.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cache::SqliteStorage;
use crate::config::Config;
use crate::event::{Event, EventHandler, Input, Outcome};
use crate::gateway::{Gateway, PendingSubmission, SubmissionQueue};
use crate::net::{Fetcher, HttpFetcher};

pub struct Host {
  gateway: Gateway<SqliteStorage, HttpFetcher>,
  /// Network client used for requests the gateway leaves alone
  network: HttpFetcher,
}

impl Host {
  pub fn open(config: Config) -> Result<Self> {
    let storage = SqliteStorage::open(&config.data_dir()?)?;
    let network = HttpFetcher::new(&config)?;
    let gateway = Gateway::new(config, storage, network.clone());

    Ok(Self { gateway, network })
  }

  pub fn gateway(&self) -> &Gateway<SqliteStorage, HttpFetcher> {
    &self.gateway
  }

  /// Deliver one event; fetches the gateway does not intercept go straight to the network.
  pub async fn dispatch(&self, event: Event) -> Result<Outcome> {
    dispatch(&self.gateway, &self.network, event).await
  }

  pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
    self.gateway.state().storage().pending()
  }

  /// Read newline-delimited JSON events and write one JSON reply line per event.
  ///
  /// Each event runs as its own task, so replies may arrive out of order;
  /// the `id` from the input is echoed back for correlation.
  pub async fn run<R, W>(self, input: R, mut output: W) -> Result<()>
  where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
  {
    let mut events = EventHandler::from_reader(input);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
      while let Some(line) = rx.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
      }
      output.flush().await
    });

    let mut tasks = JoinSet::new();
    let mut received = 0usize;
    while let Some(input) = events.next().await {
      received += 1;
      match input {
        Input::Event(envelope) => {
          let gateway = self.gateway.clone();
          let network = self.network.clone();
          let tx = tx.clone();
          tasks.spawn(async move {
            let result = dispatch(&gateway, &network, envelope.event).await;
            // The writer only stops once every sender is gone
            let _ = tx.send(reply_line(envelope.id, &result));
          });
        }
        Input::Malformed(error) => {
          let _ = tx.send(reply_line(None, &Err(eyre!(error))));
        }
      }
    }

    while let Some(joined) = tasks.join_next().await {
      joined.map_err(|e| eyre!("Event task failed: {}", e))?;
    }
    drop(tx);

    writer
      .await
      .map_err(|e| eyre!("Output task failed: {}", e))?
      .map_err(|e| eyre!("Failed to write output: {}", e))?;

    info!(events = received, "event stream closed");
    Ok(())
  }
}

async fn dispatch<F: Fetcher>(
  gateway: &Gateway<SqliteStorage, F>,
  network: &F,
  event: Event,
) -> Result<Outcome> {
  let passthrough = match &event {
    Event::Fetch { request } => Some(request.clone()),
    _ => None,
  };

  match (gateway.handle(event).await?, passthrough) {
    (Outcome::NotIntercepted, Some(request)) => {
      debug!(url = %request.url, method = %request.method, "not intercepted, going to network");
      Ok(Outcome::Response(network.fetch(&request).await?))
    }
    (outcome, _) => Ok(outcome),
  }
}

/// JSON reply for one event, tagged with the caller's id.
pub fn reply_line(id: Option<u64>, result: &Result<Outcome>) -> String {
  let mut value = match result {
    Ok(outcome) => serde_json::to_value(outcome).unwrap_or_else(|e| {
      json!({ "outcome": "error", "error": format!("Failed to serialize outcome: {}", e) })
    }),
    Err(err) => json!({ "outcome": "error", "error": format!("{:#}", err) }),
  };

  if let (Some(id), Some(map)) = (id, value.as_object_mut()) {
    map.insert("id".to_string(), json!(id));
  }

  value.to_string()
}
