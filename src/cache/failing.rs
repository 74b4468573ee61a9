//! Storage wrapper whose cache operations can be switched to fail, for tests.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

use super::storage::{CacheStorage, CachedResponse, SqliteStorage};
use crate::gateway::{LifecycleRecord, LifecycleState, LifecycleStore, PendingSubmission, SubmissionQueue};
use crate::http::{RequestKey, Response};

/// Delegates to an in-memory SQLite store until `break_cache` is called.
///
/// Lifecycle and submission queue calls always reach the inner store.
pub struct FailingStorage {
  inner: SqliteStorage,
  broken: AtomicBool,
}

impl FailingStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::in_memory().unwrap(),
      broken: AtomicBool::new(false),
    }
  }

  /// Every later namespace read or write fails.
  pub fn break_cache(&self) {
    self.broken.store(true, Ordering::SeqCst);
  }

  fn check(&self) -> Result<()> {
    if self.broken.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    Ok(())
  }
}

impl CacheStorage for FailingStorage {
  fn open_namespace(&self, namespace: &str) -> Result<()> {
    self.check()?;
    self.inner.open_namespace(namespace)
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    self.check()?;
    self.inner.namespaces()
  }

  fn delete_namespace(&self, namespace: &str) -> Result<bool> {
    self.check()?;
    self.inner.delete_namespace(namespace)
  }

  fn match_entry(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.check()?;
    self.inner.match_entry(namespace, key)
  }

  fn put_entry(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.check()?;
    self.inner.put_entry(namespace, key, response)
  }

  fn put_entries(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.check()?;
    self.inner.put_entries(namespace, entries)
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    self.check()?;
    self.inner.entry_count(namespace)
  }
}

impl LifecycleStore for FailingStorage {
  fn lifecycle(&self, version: &str) -> Result<Option<LifecycleRecord>> {
    self.inner.lifecycle(version)
  }

  fn set_lifecycle(&self, version: &str, state: LifecycleState) -> Result<LifecycleRecord> {
    self.inner.set_lifecycle(version, state)
  }

  fn request_skip_waiting(&self, version: &str) -> Result<LifecycleState> {
    self.inner.request_skip_waiting(version)
  }

  fn retire_other_versions(&self, version: &str) -> Result<usize> {
    self.inner.retire_other_versions(version)
  }
}

impl SubmissionQueue for FailingStorage {
  fn enqueue(&self, data: &Value) -> Result<PendingSubmission> {
    self.inner.enqueue(data)
  }

  fn pending(&self) -> Result<Vec<PendingSubmission>> {
    self.inner.pending()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    self.inner.remove(id)
  }
}
