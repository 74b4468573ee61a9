//! Deferred form delivery and periodic route refresh.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};

use super::{Gateway, GatewayStore};
use crate::event::Outcome;
use crate::http::Request;
use crate::net::Fetcher;

/// Sync tag under which queued submissions are retried
pub const CONTACT_FORM_TAG: &str = "contact-form";
/// Periodic sync tag that refreshes top-level routes
pub const UPDATE_CACHE_TAG: &str = "update-cache";

impl<S: GatewayStore, F: Fetcher> Gateway<S, F> {
  pub(super) async fn on_sync(&self, tag: &str) -> Result<Outcome> {
    match tag {
      CONTACT_FORM_TAG => self.resync_submissions().await,
      other => {
        warn!(tag = other, "ignoring unknown sync tag");
        Ok(Outcome::Ignored {
          reason: format!("unknown sync tag '{}'", other),
        })
      }
    }
  }

  pub(super) async fn on_periodic_sync(&self, tag: &str) -> Result<Outcome> {
    match tag {
      UPDATE_CACHE_TAG => self.refresh_routes().await,
      other => {
        warn!(tag = other, "ignoring unknown periodic sync tag");
        Ok(Outcome::Ignored {
          reason: format!("unknown periodic sync tag '{}'", other),
        })
      }
    }
  }

  fn submission_request(&self, data: &Value) -> Result<Request> {
    let endpoint = self.config.resolve(&self.config.routes.submission_endpoint)?;
    let body =
      serde_json::to_string(data).map_err(|e| eyre!("Failed to serialize submission: {}", e))?;
    Ok(Request::post_json(endpoint, body))
  }

  /// Deliver a form submission, queueing it when the network is unreachable.
  ///
  /// Only transport failures are queued: an HTTP error status means the
  /// server was reached and answered.
  pub async fn submit(&self, data: Value) -> Result<Outcome> {
    let request = self.submission_request(&data)?;

    match self.fetcher.fetch(&request).await {
      Ok(response) => Ok(Outcome::Submitted {
        status: response.status,
      }),
      Err(err) => {
        let submission = self.state.storage().enqueue(&data)?;
        info!(id = submission.id, error = %err, "submission queued for background sync");
        Ok(Outcome::Queued {
          submission,
          sync_tag: CONTACT_FORM_TAG.to_string(),
        })
      }
    }
  }

  /// Try every queued submission once, oldest first.
  ///
  /// An entry leaves the queue only after a 2xx reply; anything else keeps
  /// it for the next sync.
  pub async fn resync_submissions(&self) -> Result<Outcome> {
    let _draining = self.resync.lock().await;
    let storage = self.state.storage();
    let pending = storage.pending()?;
    let mut delivered = 0;
    let mut remaining = 0;

    for submission in pending {
      let request = self.submission_request(&submission.data)?;

      match self.fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => match storage.remove(submission.id) {
          Ok(_) => {
            info!(id = submission.id, "queued submission delivered");
            delivered += 1;
          }
          Err(err) => {
            // Delivered but still queued; the next sync sends it again
            warn!(id = submission.id, error = %err, "failed to dequeue delivered submission");
            remaining += 1;
          }
        },
        Ok(response) => {
          warn!(id = submission.id, status = response.status, "resubmission rejected, keeping");
          remaining += 1;
        }
        Err(err) => {
          warn!(id = submission.id, error = %err, "resubmission failed, keeping");
          remaining += 1;
        }
      }
    }

    Ok(Outcome::Synced {
      delivered,
      remaining,
    })
  }

  /// Re-fetch the configured routes into the dynamic namespace.
  ///
  /// Each route succeeds or fails on its own.
  pub async fn refresh_routes(&self) -> Result<Outcome> {
    let requests = self
      .config
      .routes
      .refresh
      .iter()
      .map(|route| self.config.resolve(route).map(Request::navigate))
      .collect::<Result<Vec<_>>>()?;

    let dynamic = &self.state.namespaces.dynamic;
    let results = join_all(requests.iter().map(|request| async move {
      let response = self.fetcher.fetch(request).await?;
      if !response.is_success() {
        return Err(eyre!("status {}", response.status));
      }
      self.state.storage().put_entry(dynamic, &request.key(), &response)
    }))
    .await;

    let mut refreshed = Vec::new();
    let mut failed = Vec::new();
    for (request, result) in requests.iter().zip(results) {
      match result {
        Ok(()) => refreshed.push(request.url.to_string()),
        Err(err) => {
          warn!(url = %request.url, error = %err, "route refresh failed");
          failed.push(request.url.to_string());
        }
      }
    }
    info!(refreshed = refreshed.len(), failed = failed.len(), "routes refreshed");

    Ok(Outcome::Refreshed { refreshed, failed })
  }
}
