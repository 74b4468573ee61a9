//! Offline cache gateway.
//!
//! Every event from the hosting runtime goes through [`Gateway::handle`]:
//! - fetches are classified and answered by a per-class cache strategy
//! - install/activate drive the versioned namespace lifecycle
//! - sync events resubmit queued forms and refresh top-level routes

mod classify;
mod lifecycle;
mod notification;
mod outbox;
mod sync;

pub use classify::{Classifier, RequestClass};
pub use lifecycle::{LifecycleRecord, LifecycleState, LifecycleStore};
pub use notification::Notification;
pub use outbox::{PendingSubmission, SubmissionQueue};

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage, Namespaces};
use crate::config::Config;
use crate::event::{ControlMessage, Event, Outcome};
use crate::http::{Request, Response};
use crate::net::Fetcher;

/// Everything the gateway persists: namespaces, lifecycle and the submission queue.
pub trait GatewayStore: CacheStorage + LifecycleStore + SubmissionQueue {}

impl<T: CacheStorage + LifecycleStore + SubmissionQueue> GatewayStore for T {}

/// State shared by every handler: the version tag, its namespaces and the store.
pub struct GatewayState<S: GatewayStore> {
  pub version: String,
  pub namespaces: Namespaces,
  storage: Arc<S>,
}

impl<S: GatewayStore> GatewayState<S> {
  pub fn new(config: &Config, storage: Arc<S>) -> Self {
    Self {
      version: config.version.clone(),
      namespaces: Namespaces::new(&config.cache_prefix, &config.version),
      storage,
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Lifecycle state of the running version; unknown versions have not started installing.
  pub fn lifecycle(&self) -> Result<Option<LifecycleRecord>> {
    self.storage.lifecycle(&self.version)
  }
}

pub struct Gateway<S: GatewayStore, F: Fetcher> {
  state: Arc<GatewayState<S>>,
  cache: CacheLayer<S>,
  fetcher: Arc<F>,
  classifier: Arc<Classifier>,
  config: Arc<Config>,
  /// Held while the submission queue is drained
  resync: Arc<tokio::sync::Mutex<()>>,
}

impl<S: GatewayStore, F: Fetcher> Clone for Gateway<S, F> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      cache: self.cache.clone(),
      fetcher: Arc::clone(&self.fetcher),
      classifier: Arc::clone(&self.classifier),
      config: Arc::clone(&self.config),
      resync: Arc::clone(&self.resync),
    }
  }
}

impl<S: GatewayStore, F: Fetcher> Gateway<S, F> {
  pub fn new(config: Config, storage: S, fetcher: F) -> Self {
    let storage = Arc::new(storage);

    Self {
      state: Arc::new(GatewayState::new(&config, Arc::clone(&storage))),
      cache: CacheLayer::new(storage),
      fetcher: Arc::new(fetcher),
      classifier: Arc::new(Classifier::new(&config.routes)),
      config: Arc::new(config),
      resync: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  pub fn state(&self) -> &GatewayState<S> {
    &self.state
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Dispatch one event.
  pub async fn handle(&self, event: Event) -> Result<Outcome> {
    match event {
      Event::Fetch { request } => Ok(self.on_fetch(&request).await),
      Event::Install => self.install().await,
      Event::Activate => self.activate(),
      Event::Message { message } => self.on_message(message),
      Event::Sync { tag } => self.on_sync(&tag).await,
      Event::PeriodicSync { tag } => self.on_periodic_sync(&tag).await,
      Event::Push { body } => Ok(Outcome::Notification(Notification::from_push(
        &self.config.notifications,
        body.as_deref(),
      ))),
      Event::NotificationClick { action } => self.on_notification_click(action.as_deref()),
      Event::Submit { data } => self.submit(data).await,
    }
  }

  async fn on_fetch(&self, request: &Request) -> Outcome {
    if !request.is_cacheable() {
      return Outcome::NotIntercepted;
    }

    match self.state.lifecycle() {
      Ok(Some(record)) if record.state.can_intercept_fetch() => {
        Outcome::Response(self.respond(request).await)
      }
      Ok(_) => Outcome::NotIntercepted,
      Err(err) => {
        warn!(error = %err, "lifecycle lookup failed, not intercepting");
        Outcome::NotIntercepted
      }
    }
  }

  /// Answer an intercepted request. Always produces a response.
  pub async fn respond(&self, request: &Request) -> Response {
    match self.route(request).await {
      Ok(result) => {
        debug!(
          url = %request.url,
          source = ?result.source,
          cached_at = ?result.cached_at,
          status = result.data.status,
          "served"
        );
        result.data
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "request failed, using last-resort fallback");
        self.last_resort(request)
      }
    }
  }

  async fn route(&self, request: &Request) -> Result<CacheResult<Response>> {
    let key = request.key();
    let namespaces = &self.state.namespaces;
    let fetch = || self.fetcher.fetch(request);

    match self.classifier.classify(request) {
      RequestClass::StaticAsset => {
        self
          .cache
          .cache_first(&namespaces.static_assets, &key, fetch)
          .await
      }
      RequestClass::ApiRequest | RequestClass::DynamicOther => {
        self.cache.network_first(&namespaces.dynamic, &key, fetch).await
      }
      RequestClass::NavigationRequest => {
        match self.cache.network_first(&namespaces.dynamic, &key, fetch).await {
          Ok(result) => Ok(result),
          Err(err) => match self.offline_page()? {
            Some(page) => {
              info!(url = %request.url, "offline, serving fallback page");
              Ok(page)
            }
            None => Err(err),
          },
        }
      }
    }
  }

  /// The offline fallback page from the static namespace.
  fn offline_page(&self) -> Result<Option<CacheResult<Response>>> {
    let url = self.config.resolve(&self.config.install.offline_page)?;
    let cached = self
      .state
      .storage()
      .match_entry(&self.state.namespaces.static_assets, &Request::get(url).key())?;

    Ok(cached.map(|c| CacheResult::offline(c.response, c.cached_at)))
  }

  fn last_resort(&self, request: &Request) -> Response {
    if request.is_navigation() {
      match self.offline_page() {
        Ok(Some(page)) => return page.data,
        Ok(None) => {}
        Err(err) => warn!(error = %err, "offline page lookup failed"),
      }
    }
    Response::service_unavailable()
  }

  /// Precache the install manifest. All assets land in the static namespace or none do.
  pub async fn install(&self) -> Result<Outcome> {
    let version = &self.state.version;
    let storage = self.state.storage();

    if let Some(record) = self.state.lifecycle()? {
      if matches!(record.state, LifecycleState::Waiting | LifecycleState::Active) {
        debug!(version = %version, state = %record.state, "already installed");
        return Ok(Outcome::Installed {
          state: record.state,
          cached: storage.entry_count(&self.state.namespaces.static_assets)?,
        });
      }
    }

    storage.set_lifecycle(version, LifecycleState::Installing)?;
    info!(version = %version, "installing");

    let requests = self
      .config
      .install_manifest()?
      .iter()
      .map(|path| self.config.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let fetched = futures::future::try_join_all(requests.iter().map(|request| async move {
      let response = self.fetcher.fetch(request).await?;
      if !response.is_success() {
        return Err(eyre!(
          "Precache of {} failed with status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    }))
    .await;

    let entries = match fetched {
      Ok(entries) => entries,
      Err(err) => {
        warn!(version = %version, error = %err, "install failed, static namespace left untouched");
        return Err(err.wrap_err(format!("Install of version {} failed", version)));
      }
    };

    storage.put_entries(&self.state.namespaces.static_assets, &entries)?;
    storage.open_namespace(&self.state.namespaces.dynamic)?;
    let skip_waiting = storage.set_lifecycle(version, LifecycleState::Waiting)?.skip_waiting;
    info!(version = %version, cached = entries.len(), "installed");

    if skip_waiting {
      self.activate()?;
    }

    Ok(Outcome::Installed {
      state: if skip_waiting {
        LifecycleState::Active
      } else {
        LifecycleState::Waiting
      },
      cached: entries.len(),
    })
  }

  /// Delete every namespace not owned by the running version and take control.
  pub fn activate(&self) -> Result<Outcome> {
    let version = &self.state.version;
    let storage = self.state.storage();

    match self.state.lifecycle()?.map(|r| r.state) {
      Some(LifecycleState::Waiting) | Some(LifecycleState::Active) => {}
      Some(state) => {
        return Err(eyre!("Cannot activate version {} while {}", version, state));
      }
      None => return Err(eyre!("Cannot activate version {} before install", version)),
    }

    let mut deleted = Vec::new();
    for name in storage.namespaces()? {
      if self.state.namespaces.is_current(&name) {
        continue;
      }
      if storage.delete_namespace(&name)? {
        info!(namespace = %name, "deleted stale namespace");
        deleted.push(name);
      }
    }

    storage.set_lifecycle(version, LifecycleState::Active)?;
    let retired = storage.retire_other_versions(version)?;
    info!(version = %version, deleted = deleted.len(), retired, "activated");

    Ok(Outcome::Activated {
      deleted,
      clients_claimed: true,
    })
  }

  fn on_message(&self, message: ControlMessage) -> Result<Outcome> {
    match message {
      ControlMessage::GetVersion => Ok(Outcome::Version {
        version: self.state.version.clone(),
      }),
      // The flag is recorded first so an install finishing concurrently
      // either sees it or leaves a Waiting state behind for us to activate
      ControlMessage::SkipWaiting => {
        match self.state.storage().request_skip_waiting(&self.state.version)? {
          LifecycleState::Waiting => self.activate(),
          LifecycleState::Active | LifecycleState::Installing => Ok(Outcome::Ack),
          LifecycleState::Redundant => Ok(Outcome::Ignored {
            reason: format!("version {} is redundant", self.state.version),
          }),
        }
      }
    }
  }

  fn on_notification_click(&self, action: Option<&str>) -> Result<Outcome> {
    match action {
      Some(notification::EXPLORE_ACTION) => Ok(Outcome::OpenWindow {
        url: self.config.resolve("/")?.to_string(),
      }),
      _ => Ok(Outcome::Dismissed),
    }
  }
}
