//! Request and response types passed between the page, the gateway and the network.

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::Url;

/// How the page issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  NoCors,
}

/// An outgoing request from the page.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
  #[serde(default = "default_method")]
  pub method: String,
  pub url: Url,
  #[serde(default)]
  pub mode: RequestMode,
  /// Header names are stored lowercased
  #[serde(default, deserialize_with = "deserialize_lowercase_headers")]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub body: Option<String>,
}

fn default_method() -> String {
  "GET".to_string()
}

fn deserialize_lowercase_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let map: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
  Ok(map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

impl Request {
  /// A plain GET for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: default_method(),
      url,
      mode: RequestMode::default(),
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// A top-level page load, as a browser would issue it.
  pub fn navigate(url: Url) -> Self {
    Self::get(url)
      .with_mode(RequestMode::Navigate)
      .with_header("accept", "text/html,application/xhtml+xml")
  }

  /// A POST carrying a JSON body.
  pub fn post_json(url: Url, body: String) -> Self {
    Self {
      method: "POST".to_string(),
      url,
      mode: RequestMode::SameOrigin,
      headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
      body: Some(body),
    }
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Only GET requests over http(s) are intercepted and cached.
  pub fn is_cacheable(&self) -> bool {
    self.is_get() && matches!(self.url.scheme(), "http" | "https")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Identity of a cacheable request: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url: url.as_str().to_string(),
    }
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A response served to the page, either from the network or from a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  #[serde(serialize_with = "serialize_body")]
  pub body: Vec<u8>,
}

fn serialize_body<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&String::from_utf8_lossy(body))
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_lowercase(), value.to_string());
    self
  }

  /// Synthetic reply used when nothing else can answer the request.
  pub fn service_unavailable() -> Self {
    Self::new(503, Vec::new()).with_header("content-type", "text/plain")
  }

  /// 2xx responses are the only ones written to a namespace.
  pub fn is_success(&self) -> bool {
    (200..=299).contains(&self.status)
  }
}
