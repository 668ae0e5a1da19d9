//! Concurrent TTL property cache
//!
//! Holds named property sets, each stamped with the time it was last
//! fetched. Entries are never evicted; expired ones are refreshed in place,
//! either on demand or by a background schedule.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use trace_export_cache::{CacheEntry, HttpPropertyRefresher, PropertyCache};
//!
//! # async fn run() {
//! let cache = Arc::new(
//!     PropertyCache::new(Arc::new(HttpPropertyRefresher::new("http://props.local")))
//!         .with_expire_after(Duration::from_secs(10)),
//! );
//! cache.insert("trace-export", CacheEntry::default());
//!
//! let schedule = cache.schedule_refresh(CancellationToken::new(), Duration::from_secs(30));
//! // ...
//! schedule.stop().await.ok();
//! # }
//! ```

pub mod cache;
pub mod entry;
pub mod refresh;
pub mod scheduler;

pub use cache::{PropertyCache, DEFAULT_EXPIRE_AFTER, DEFAULT_REFRESH_TIMEOUT};
pub use entry::CacheEntry;
pub use refresh::{EntryRefresher, HttpPropertyRefresher, RefreshError, RefreshFailure, RefreshReport};
pub use scheduler::{RefreshSchedule, SchedulerState};
