//! Durable queue of form submissions waiting for connectivity.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{parse_datetime, SqliteStorage};

/// A submission that could not reach the network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSubmission {
  pub id: i64,
  pub data: Value,
  pub created_at: DateTime<Utc>,
}

pub trait SubmissionQueue: Send + Sync {
  fn enqueue(&self, data: &Value) -> Result<PendingSubmission>;

  /// Every queued submission, oldest first.
  fn pending(&self) -> Result<Vec<PendingSubmission>>;

  /// Drop a submission after confirmed delivery. Returns whether it existed.
  fn remove(&self, id: i64) -> Result<bool>;
}

impl SubmissionQueue for SqliteStorage {
  fn enqueue(&self, data: &Value) -> Result<PendingSubmission> {
    let conn = self.lock()?;
    let created_at = Utc::now();
    let text =
      serde_json::to_string(data).map_err(|e| eyre!("Failed to serialize submission: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_submissions (data, created_at) VALUES (?, ?)",
        params![text, created_at.format("%Y-%m-%d %H:%M:%S").to_string()],
      )
      .map_err(|e| eyre!("Failed to queue submission: {}", e))?;

    Ok(PendingSubmission {
      id: conn.last_insert_rowid(),
      data: data.clone(),
      created_at,
    })
  }

  fn pending(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT id, data, created_at FROM pending_submissions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list pending submissions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending submission: {}", e))?;

    rows
      .into_iter()
      .map(|(id, data, created_at)| {
        Ok(PendingSubmission {
          id,
          data: serde_json::from_str(&data)
            .map_err(|e| eyre!("Failed to parse pending submission {}: {}", id, e))?,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.lock()?;

    let removed = conn
      .execute("DELETE FROM pending_submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove submission {}: {}", id, e))?;

    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_enqueue_assigns_increasing_ids() {
    let storage = SqliteStorage::in_memory().unwrap();
    let first = storage.enqueue(&json!({"name": "Ada"})).unwrap();
    let second = storage.enqueue(&json!({"name": "Grace"})).unwrap();
    assert!(second.id > first.id);
  }

  #[test]
  fn test_pending_is_oldest_first() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.enqueue(&json!({"n": 1})).unwrap();
    storage.enqueue(&json!({"n": 2})).unwrap();

    let pending = storage.pending().unwrap();
    let data: Vec<_> = pending.iter().map(|p| p.data["n"].as_i64().unwrap()).collect();
    assert_eq!(data, vec![1, 2]);
  }

  #[test]
  fn test_remove_only_named_entry() {
    let storage = SqliteStorage::in_memory().unwrap();
    let first = storage.enqueue(&json!({"n": 1})).unwrap();
    let second = storage.enqueue(&json!({"n": 2})).unwrap();

    assert!(storage.remove(first.id).unwrap());
    assert!(!storage.remove(first.id).unwrap());

    let pending = storage.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);
  }
}
