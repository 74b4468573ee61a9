//! Versioned namespace names.

/// The namespace names owned by one cache version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
  /// Immutable build assets
  pub static_assets: String,
  /// Navigations and API responses
  pub dynamic: String,
  /// General namespace from older builds, kept so cleanup recognises it
  pub legacy: String,
}

impl Namespaces {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      static_assets: format!("{}-static-{}", prefix, version),
      dynamic: format!("{}-dynamic-{}", prefix, version),
      legacy: format!("{}-{}", prefix, version),
    }
  }

  /// Whether a namespace belongs to this version.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_assets || name == self.dynamic || name == self.legacy
  }
}
