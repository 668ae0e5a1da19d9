//! The property cache
//!
//! All reads and writes go through one `RwLock`-guarded map. Refreshes work
//! on a copy of the entry outside the lock and write the copy back only if
//! the stored entry was not replaced in the meantime.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing::{Instrument, Span};

use crate::entry::CacheEntry;
use crate::refresh::{EntryRefresher, RefreshError, RefreshFailure, RefreshReport};

/// Default time after which an entry counts as expired
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(10);

/// Default upper bound for a single entry refresh
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Named property sets with TTL-based refresh
pub struct PropertyCache {
    expire_after: Duration,
    refresh_timeout: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    refresher: Arc<dyn EntryRefresher>,
}

impl std::fmt::Debug for PropertyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyCache")
            .field("expire_after", &self.expire_after)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("entries", &self.len())
            .finish()
    }
}

impl PropertyCache {
    /// Create an empty cache refreshed by `refresher`
    pub fn new(refresher: Arc<dyn EntryRefresher>) -> Self {
        Self {
            expire_after: DEFAULT_EXPIRE_AFTER,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            entries: RwLock::new(HashMap::new()),
            refresher,
        }
    }

    /// Set the TTL (builder pattern)
    pub fn with_expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = expire_after;
        self
    }

    /// Set the per-entry refresh timeout (builder pattern)
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    // A panic while holding the lock cannot leave a half-written entry:
    // entries are only ever replaced whole.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite an entry
    pub fn insert(&self, name: impl Into<String>, entry: CacheEntry) {
        self.write().insert(name.into(), entry);
    }

    /// Insert or overwrite several entries
    pub fn insert_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, CacheEntry)>,
    {
        self.write().extend(entries);
    }

    /// Properties of `name`, or an empty map when it is not cached.
    ///
    /// Use `contains` when absence matters.
    pub fn get_props(&self, name: &str) -> HashMap<String, String> {
        self.read()
            .get(name)
            .map(|entry| entry.props.clone())
            .unwrap_or_default()
    }

    /// Copy of the whole entry
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cached entry names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `entry` is expired as of `reference` (boundary inclusive)
    pub fn is_expired(&self, entry: &CacheEntry, reference: DateTime<Utc>) -> bool {
        let elapsed = reference
            .timestamp_millis()
            .saturating_sub(entry.updated_at_millis);
        let ttl = i64::try_from(self.expire_after.as_millis()).unwrap_or(i64::MAX);
        elapsed >= ttl
    }

    /// Refresh every entry expired as of `reference`; skip the rest.
    ///
    /// Expired entries are refreshed concurrently. Cancelling `cancel` fails
    /// the refreshes still in flight with `RefreshError::Cancelled`.
    pub async fn refresh_expired_at(
        &self,
        cancel: &CancellationToken,
        reference: DateTime<Utc>,
    ) -> RefreshReport {
        let span = tracing::info_span!(
            "cache.refresh_expired",
            reference.ms = reference.timestamp_millis(),
            refresh.total.succeeded = Empty,
            refresh.total.failed = Empty,
            refresh.total.skipped = Empty
        );
        self.refresh_batch(cancel, reference, false)
            .instrument(span)
            .await
    }

    /// Refresh every entry regardless of age
    pub async fn refresh_force(&self, cancel: &CancellationToken) -> RefreshReport {
        let span = tracing::info_span!(
            "cache.refresh_force",
            refresh.total.succeeded = Empty,
            refresh.total.failed = Empty,
            refresh.total.skipped = Empty
        );
        self.refresh_batch(cancel, Utc::now(), true)
            .instrument(span)
            .await
    }

    async fn refresh_batch(
        &self,
        cancel: &CancellationToken,
        reference: DateTime<Utc>,
        force: bool,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();

        let due: Vec<(String, CacheEntry, bool)> = {
            let entries = self.read();
            entries
                .iter()
                .filter_map(|(name, entry)| {
                    let expired = self.is_expired(entry, reference);
                    if expired || force {
                        Some((name.clone(), entry.clone(), expired))
                    } else {
                        report.skipped += 1;
                        None
                    }
                })
                .collect()
        };

        let outcomes = join_all(due.into_iter().map(|(name, snapshot, expired)| {
            let span = tracing::info_span!(
                "cache.refresh_entry",
                entry = %name,
                is_expired = expired,
                error = Empty
            );
            self.refresh_entry(cancel, name, snapshot).instrument(span)
        }))
        .await;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(error) => report.failures.push(RefreshFailure { name, error }),
            }
        }

        report.record_on(&Span::current());
        report
    }

    async fn refresh_entry(
        &self,
        cancel: &CancellationToken,
        name: String,
        snapshot: CacheEntry,
    ) -> (String, Result<(), RefreshError>) {
        let mut working = snapshot.clone();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RefreshError::Cancelled),
            result = tokio::time::timeout(
                self.refresh_timeout,
                self.refresher.refresh(&name, &mut working),
            ) => result.unwrap_or(Err(RefreshError::Timeout(self.refresh_timeout))),
        };

        match &outcome {
            Ok(()) => self.write_back(&name, &snapshot, working),
            Err(e) => {
                Span::current().record("error", tracing::field::display(e));
            }
        }
        (name, outcome)
    }

    fn write_back(&self, name: &str, snapshot: &CacheEntry, refreshed: CacheEntry) {
        let mut entries = self.write();
        match entries.get_mut(name) {
            Some(current) if *current == *snapshot => *current = refreshed,
            Some(_) => {
                tracing::debug!(entry = %name, "entry replaced during refresh, keeping newer value");
            }
            None => {}
        }
    }
}
