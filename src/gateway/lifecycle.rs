//! Lifecycle state persisted per cache version tag.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::cache::SqliteStorage;

/// Installing -> Waiting -> Active -> (Redundant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  /// Precaching the install manifest
  Installing,
  /// Installed, not yet controlling pages
  Waiting,
  /// Intercepting requests
  Active,
  /// Superseded by another version
  Redundant,
}

impl LifecycleState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, LifecycleState::Active)
  }

  fn as_str(&self) -> &'static str {
    match self {
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Active => "active",
      LifecycleState::Redundant => "redundant",
    }
  }
}

impl std::str::FromStr for LifecycleState {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(LifecycleState::Installing),
      "waiting" => Ok(LifecycleState::Waiting),
      "active" => Ok(LifecycleState::Active),
      "redundant" => Ok(LifecycleState::Redundant),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}

impl std::fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleRecord {
  pub state: LifecycleState,
  /// SKIP_WAITING arrived before install finished
  pub skip_waiting: bool,
}

pub trait LifecycleStore: Send + Sync {
  fn lifecycle(&self, version: &str) -> Result<Option<LifecycleRecord>>;

  /// Upsert the state for a version, keeping any pending skip-waiting request.
  /// Returns the record as written, read in the same statement.
  fn set_lifecycle(&self, version: &str, state: LifecycleState) -> Result<LifecycleRecord>;

  /// Remember that the version should activate as soon as it is installed.
  /// Returns the state the flag was recorded against, read in the same statement.
  fn request_skip_waiting(&self, version: &str) -> Result<LifecycleState>;

  /// Mark every other version redundant. Returns how many changed.
  fn retire_other_versions(&self, version: &str) -> Result<usize>;
}

impl LifecycleStore for SqliteStorage {
  fn lifecycle(&self, version: &str) -> Result<Option<LifecycleRecord>> {
    let conn = self.lock()?;

    let row: Option<(String, bool)> = conn
      .query_row(
        "SELECT state, skip_waiting FROM lifecycle WHERE version = ?",
        params![version],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read lifecycle of {}: {}", version, e))?;

    row
      .map(|(state, skip_waiting)| {
        Ok(LifecycleRecord {
          state: state.parse()?,
          skip_waiting,
        })
      })
      .transpose()
  }

  fn set_lifecycle(&self, version: &str, state: LifecycleState) -> Result<LifecycleRecord> {
    let conn = self.lock()?;

    let (stored, skip_waiting): (String, bool) = conn
      .query_row(
        "INSERT INTO lifecycle (version, state, updated_at) VALUES (?, ?, datetime('now'))
         ON CONFLICT(version) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
         RETURNING state, skip_waiting",
        params![version, state.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to set lifecycle of {}: {}", version, e))?;

    Ok(LifecycleRecord {
      state: stored.parse()?,
      skip_waiting,
    })
  }

  fn request_skip_waiting(&self, version: &str) -> Result<LifecycleState> {
    let conn = self.lock()?;

    let state: String = conn
      .query_row(
        "INSERT INTO lifecycle (version, state, skip_waiting) VALUES (?, ?, 1)
         ON CONFLICT(version) DO UPDATE SET skip_waiting = 1
         RETURNING state",
        params![version, LifecycleState::Installing.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to record skip-waiting for {}: {}", version, e))?;

    state.parse()
  }

  fn retire_other_versions(&self, version: &str) -> Result<usize> {
    let conn = self.lock()?;

    let changed = conn
      .execute(
        "UPDATE lifecycle SET state = ?, updated_at = datetime('now')
         WHERE version != ? AND state != ?",
        params![
          LifecycleState::Redundant.as_str(),
          version,
          LifecycleState::Redundant.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to retire old versions: {}", e))?;

    Ok(changed)
  }
}
