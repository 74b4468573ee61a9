//! Request classification.
//!
//! Precedence is fixed: static asset, then API, then navigation, and
//! everything else is `DynamicOther`. The classifier only looks at the URL
//! path, the request mode and the `Accept` header.

use std::collections::BTreeSet;

use crate::config::RoutesConfig;
use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  StaticAsset,
  ApiRequest,
  NavigationRequest,
  DynamicOther,
}

#[derive(Debug, Clone)]
pub struct Classifier {
  static_prefixes: Vec<String>,
  static_extensions: BTreeSet<String>,
  api_prefix: String,
  api_patterns: Vec<String>,
}

impl Classifier {
  pub fn new(routes: &RoutesConfig) -> Self {
    Self {
      static_prefixes: routes.static_prefixes.clone(),
      static_extensions: routes.static_extensions.clone(),
      api_prefix: routes.api_prefix.clone(),
      api_patterns: routes.api_patterns.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    let path = request.url.path();

    match (
      self.is_static_asset(path),
      self.is_api(path),
      is_navigation(request),
    ) {
      (true, _, _) => RequestClass::StaticAsset,
      (false, true, _) => RequestClass::ApiRequest,
      (false, false, true) => RequestClass::NavigationRequest,
      (false, false, false) => RequestClass::DynamicOther,
    }
  }

  fn is_static_asset(&self, path: &str) -> bool {
    self.static_prefixes.iter().any(|p| path.starts_with(p.as_str()))
      || extension(path).is_some_and(|ext| self.static_extensions.contains(&ext))
  }

  fn is_api(&self, path: &str) -> bool {
    path.starts_with(self.api_prefix.as_str())
      || self.api_patterns.iter().any(|p| path.contains(p.as_str()))
  }
}

fn is_navigation(request: &Request) -> bool {
  request.is_navigation()
    || (request.is_get()
      && request
        .header("accept")
        .is_some_and(|accept| accept.to_ascii_lowercase().contains("text/html")))
}

/// Lowercased extension of the last path segment, if any.
fn extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (stem, ext) = segment.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_lowercase())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::RequestMode;
  use url::Url;

  fn classifier() -> Classifier {
    Classifier::new(&RoutesConfig::default())
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://site.test").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_static_prefix() {
    assert_eq!(classifier().classify(&get("/assets/app.a1b2")), RequestClass::StaticAsset);
    assert_eq!(
      classifier().classify(&get("/_next/static/chunks/main")),
      RequestClass::StaticAsset
    );
  }

  #[test]
  fn test_static_extension_any_case() {
    let c = classifier();
    assert_eq!(c.classify(&get("/images/hero.WEBP")), RequestClass::StaticAsset);
    assert_eq!(c.classify(&get("/fonts/brand.woff2")), RequestClass::StaticAsset);
    assert_eq!(c.classify(&get("/app.a1b2.js")), RequestClass::StaticAsset);
  }

  #[test]
  fn test_static_wins_over_api() {
    assert_eq!(classifier().classify(&get("/api/logo.png")), RequestClass::StaticAsset);
  }

  #[test]
  fn test_api_prefix_and_patterns() {
    let c = classifier();
    assert_eq!(c.classify(&get("/api/products")), RequestClass::ApiRequest);
    assert_eq!(c.classify(&get("/data/services.json")), RequestClass::ApiRequest);
    assert_eq!(c.classify(&get("/v2/data/company/info")), RequestClass::ApiRequest);
  }

  #[test]
  fn test_api_wins_over_navigation() {
    let request = get("/api/products").with_mode(RequestMode::Navigate);
    assert_eq!(classifier().classify(&request), RequestClass::ApiRequest);
  }

  #[test]
  fn test_navigation_by_mode() {
    let request = get("/contact").with_mode(RequestMode::Navigate);
    assert_eq!(classifier().classify(&request), RequestClass::NavigationRequest);
  }

  #[test]
  fn test_navigation_by_accept_header() {
    let request = get("/products/pumps").with_header("Accept", "text/html,*/*");
    assert_eq!(classifier().classify(&request), RequestClass::NavigationRequest);
  }

  #[test]
  fn test_accept_media_type_any_case() {
    let request = get("/about").with_header("accept", "Text/HTML;q=0.9");
    assert_eq!(classifier().classify(&request), RequestClass::NavigationRequest);
  }

  #[test]
  fn test_everything_else_is_dynamic() {
    let c = classifier();
    assert_eq!(c.classify(&get("/feed")), RequestClass::DynamicOther);
    assert_eq!(
      c.classify(&get("/sitemap.xml").with_header("accept", "application/xml")),
      RequestClass::DynamicOther
    );
  }

  #[test]
  fn test_dotfile_and_trailing_dot_have_no_extension() {
    assert_eq!(extension("/.js"), None);
    assert_eq!(extension("/file."), None);
    assert_eq!(extension("/dir.css/page"), None);
    assert_eq!(extension("/a/b.CSS"), Some("css".to_string()));
  }
}
