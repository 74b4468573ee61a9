//! Scripted fetcher for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use super::Fetcher;
use crate::http::{Request, Response};

/// Replies from a table keyed by "METHOD url"; anything unscripted fails like a dropped connection.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Option<Response>>>,
  calls: Mutex<Vec<Request>>,
}

fn route_key(method: &str, url: &str) -> String {
  format!("{} {}", method.to_uppercase(), url)
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, method: &str, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(route_key(method, url), Some(response));
  }

  /// Make a route fail at the transport level.
  pub fn fail(&self, method: &str, url: &str) {
    self.routes.lock().unwrap().insert(route_key(method, url), None);
  }

  /// Make every route fail at the transport level.
  pub fn go_offline(&self) {
    self.routes.lock().unwrap().clear();
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Fetcher for MockFetcher {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    self.calls.lock().unwrap().push(request.clone());
    let reply = self
      .routes
      .lock()
      .unwrap()
      .get(&route_key(&request.method, request.url.as_str()))
      .cloned()
      .flatten()
      .ok_or_else(|| eyre!("network unreachable: {}", request.url));

    async move { reply }
  }
}
