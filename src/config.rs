use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the site is served from (e.g. https://www.example.com)
  pub origin: Url,
  /// Cache version tag, fixed at build time
  pub version: String,
  /// Prefix shared by every namespace name
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  #[serde(default)]
  pub install: InstallConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Network timeout in seconds, enforced by the HTTP client
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Log level used when OFFLINE_GATEWAY_LOG is unset
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Directory holding the cache database and logs (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallConfig {
  /// Assets that must be cached before the gateway leaves Installing
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Build-emitted JSON array of extra critical bundle paths
  pub manifest_file: Option<PathBuf>,
  /// Page served to navigations when both network and cache fail
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
}

impl Default for InstallConfig {
  fn default() -> Self {
    Self {
      precache: default_precache(),
      manifest_file: None,
      offline_page: default_offline_page(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  #[serde(default = "default_static_prefixes")]
  pub static_prefixes: Vec<String>,
  /// File extensions of build output (case-insensitive, no leading dot)
  #[serde(default = "default_static_extensions", deserialize_with = "deserialize_extension_set")]
  pub static_extensions: BTreeSet<String>,
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Known data endpoints matched anywhere in the path
  #[serde(default = "default_api_patterns")]
  pub api_patterns: Vec<String>,
  /// Endpoint accepting contact form submissions
  #[serde(default = "default_submission_endpoint")]
  pub submission_endpoint: String,
  /// Top-level routes re-fetched on periodic sync
  #[serde(default = "default_refresh_routes")]
  pub refresh: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      static_prefixes: default_static_prefixes(),
      static_extensions: default_static_extensions(),
      api_prefix: default_api_prefix(),
      api_patterns: default_api_patterns(),
      submission_endpoint: default_submission_endpoint(),
      refresh: default_refresh_routes(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub title: String,
  /// Body shown when a push arrives without a payload
  #[serde(default = "default_notification_body")]
  pub default_body: String,
  #[serde(default = "default_notification_icon")]
  pub icon: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: default_notification_title(),
      default_body: default_notification_body(),
      icon: default_notification_icon(),
    }
  }
}

fn deserialize_extension_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

fn default_cache_prefix() -> String {
  "site".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_precache() -> Vec<String> {
  vec!["/".into(), "/manifest.json".into(), "/offline.html".into()]
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_static_prefixes() -> Vec<String> {
  vec!["/_next/static/".into(), "/static/".into(), "/assets/".into()]
}

fn default_static_extensions() -> BTreeSet<String> {
  [
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "woff",
    "woff2", "ttf", "otf", "eot",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_api_patterns() -> Vec<String> {
  vec![
    "/data/products".into(),
    "/data/services".into(),
    "/data/company".into(),
  ]
}

fn default_submission_endpoint() -> String {
  "/api/contact".to_string()
}

fn default_refresh_routes() -> Vec<String> {
  vec![
    "/".into(),
    "/products".into(),
    "/services".into(),
    "/about".into(),
    "/contact".into(),
  ]
}

fn default_notification_title() -> String {
  "New update available".to_string()
}

fn default_notification_body() -> String {
  "Check out our latest products and services.".to_string()
}

fn default_notification_icon() -> String {
  "/icons/icon-192x192.png".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-gateway.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-gateway/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-gateway/config.yaml\n\
                 At minimum it needs `origin` and `version`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-gateway.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-gateway").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parse and validate configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("`origin` must be an http(s) URL, got {}", self.origin));
    }
    if !self
      .install
      .precache
      .iter()
      .any(|p| p == &self.install.offline_page)
    {
      return Err(eyre!(
        "Offline page {} must be listed in install.precache",
        self.install.offline_page
      ));
    }
    Ok(())
  }

  /// The full install manifest: configured precache list followed by the
  /// build-emitted bundle paths, without duplicates.
  pub fn install_manifest(&self) -> Result<Vec<String>> {
    let mut manifest = self.install.precache.clone();

    if let Some(path) = &self.install.manifest_file {
      let contents = std::fs::read_to_string(path)
        .map_err(|e| eyre!("Failed to read install manifest {}: {}", path.display(), e))?;
      let extra: Vec<String> = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse install manifest {}: {}", path.display(), e))?;
      for entry in extra {
        if !manifest.contains(&entry) {
          manifest.push(entry);
        }
      }
    }

    Ok(manifest)
  }

  /// Resolve a site-relative path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))
  }

  /// Directory for the cache database and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-gateway"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("origin: https://site.test\nversion: v1\n").unwrap();
    assert_eq!(config.cache_prefix, "site");
    assert_eq!(config.install.offline_page, "/offline.html");
    assert!(config.routes.static_extensions.contains("woff2"));
    assert_eq!(config.routes.api_prefix, "/api/");
    assert_eq!(config.timeout_secs, 30);
  }

  #[test]
  fn test_extensions_are_normalized() {
    let config = Config::from_yaml(
      "origin: https://site.test\nversion: v1\nroutes:\n  static_extensions: ['.JS', 'Css']\n",
    )
    .unwrap();
    let expected: BTreeSet<String> = ["css", "js"].into_iter().map(String::from).collect();
    assert_eq!(config.routes.static_extensions, expected);
  }

  #[test]
  fn test_offline_page_must_be_precached() {
    let result = Config::from_yaml(
      "origin: https://site.test\nversion: v1\ninstall:\n  precache: ['/']\n",
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_empty_version_rejected() {
    assert!(Config::from_yaml("origin: https://site.test\nversion: ''\n").is_err());
  }

  #[test]
  fn test_non_http_origin_rejected() {
    assert!(Config::from_yaml("origin: file:///srv/site\nversion: v1\n").is_err());
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config::from_yaml("origin: https://site.test\nversion: v1\n").unwrap();
    assert_eq!(
      config.resolve("/assets/app.js").unwrap().as_str(),
      "https://site.test/assets/app.js"
    );
    assert_eq!(
      config.resolve("https://cdn.test/x.png").unwrap().as_str(),
      "https://cdn.test/x.png"
    );
  }

  #[test]
  fn test_install_manifest_without_file_is_precache_list() {
    let config = Config::from_yaml("origin: https://site.test\nversion: v1\n").unwrap();
    assert_eq!(
      config.install_manifest().unwrap(),
      vec!["/", "/manifest.json", "/offline.html"]
    );
  }

  #[test]
  fn test_install_manifest_merges_build_file() {
    let path = std::env::temp_dir().join(format!("offline-gateway-manifest-{}.json", std::process::id()));
    std::fs::write(&path, r#"["/assets/app.a1b2.js", "/", "/assets/app.c3d4.css"]"#).unwrap();

    let yaml = format!(
      "origin: https://site.test\nversion: v1\ninstall:\n  manifest_file: {}\n",
      path.display()
    );
    let config = Config::from_yaml(&yaml).unwrap();
    let manifest = config.install_manifest().unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(
      manifest,
      vec![
        "/",
        "/manifest.json",
        "/offline.html",
        "/assets/app.a1b2.js",
        "/assets/app.c3d4.css"
      ]
    );
  }
}
