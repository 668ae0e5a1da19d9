//! Integration tests for the property cache and its refresh schedule

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use trace_export_cache::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn entry(updated_at_millis: i64) -> CacheEntry {
    CacheEntry::new(updated_at_millis, HashMap::new())
}

/// Refresher that records calls and fails for a fixed set of names
#[derive(Default)]
struct ScriptedRefresher {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl ScriptedRefresher {
    fn failing(names: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn called(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    fn calls_for(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

#[async_trait]
impl EntryRefresher for ScriptedRefresher {
    async fn refresh(&self, name: &str, entry: &mut CacheEntry) -> Result<(), RefreshError> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.failing.contains(name) {
            return Err(RefreshError::Other(format!("{} is unavailable", name)));
        }
        let mut props = HashMap::new();
        props.insert("source".to_string(), format!("refreshed:{}", name));
        entry.replace_props(props);
        Ok(())
    }
}

struct SlowRefresher(Duration);

#[async_trait]
impl EntryRefresher for SlowRefresher {
    async fn refresh(&self, _name: &str, _entry: &mut CacheEntry) -> Result<(), RefreshError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct PendingRefresher;

#[async_trait]
impl EntryRefresher for PendingRefresher {
    async fn refresh(&self, _name: &str, _entry: &mut CacheEntry) -> Result<(), RefreshError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Signals when a refresh starts, then waits to be released
struct GatedRefresher {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl EntryRefresher for GatedRefresher {
    async fn refresh(&self, _name: &str, entry: &mut CacheEntry) -> Result<(), RefreshError> {
        self.entered.notify_one();
        self.release.notified().await;
        let mut props = HashMap::new();
        props.insert("v".to_string(), "refreshed".to_string());
        entry.replace_props(props);
        Ok(())
    }
}

/// A span seen by `SpanCapture`, with its fields rendered as text
#[derive(Debug, Clone)]
struct CapturedSpan {
    id: u64,
    name: &'static str,
    fields: HashMap<String, String>,
}

impl CapturedSpan {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Layer recording every span and the fields recorded on it later
#[derive(Clone, Default)]
struct SpanCapture(Arc<Mutex<Vec<CapturedSpan>>>);

impl SpanCapture {
    fn named(&self, name: &str) -> Vec<CapturedSpan> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

struct FieldText<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldText<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S> Layer<S> for SpanCapture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        attrs.record(&mut FieldText(&mut fields));
        self.0.lock().unwrap().push(CapturedSpan {
            id: id.into_u64(),
            name: attrs.metadata().name(),
            fields,
        });
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut spans = self.0.lock().unwrap();
        if let Some(span) = spans.iter_mut().rev().find(|s| s.id == id.into_u64()) {
            values.record(&mut FieldText(&mut span.fields));
        }
    }
}

fn capture_spans() -> (SpanCapture, tracing::subscriber::DefaultGuard) {
    let capture = SpanCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

#[tokio::test]
async fn test_refresh_expired_at_skips_fresh_entries() {
    let refresher = Arc::new(ScriptedRefresher::default());
    let cache = PropertyCache::new(refresher.clone()).with_expire_after(Duration::from_millis(1));
    cache.insert("a", entry(5));
    cache.insert("b", entry(10));

    let report = cache
        .refresh_expired_at(&CancellationToken::new(), at(6))
        .await;

    assert_eq!(refresher.called(), vec!["a"]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_refresh_expired_at_three_entries() {
    let refresher = Arc::new(ScriptedRefresher::default());
    let cache = PropertyCache::new(refresher.clone()).with_expire_after(Duration::from_millis(1));
    cache.insert("a", entry(5));
    cache.insert("b", entry(10));
    cache.insert("c", entry(15));

    let report = cache
        .refresh_expired_at(&CancellationToken::new(), at(11))
        .await;

    assert_eq!(refresher.called(), vec!["a", "b"]);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.total(), 3);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_entry() {
    let refresher = Arc::new(ScriptedRefresher::failing(&["x"]));
    let cache = PropertyCache::new(refresher.clone());
    cache.insert("x", entry(0));
    cache.insert("y", entry(0));

    let report = cache.refresh_force(&CancellationToken::new()).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].name, "x");
    assert_eq!(
        report.failures[0].error,
        RefreshError::Other("x is unavailable".to_string())
    );
    assert!(report.failure("y").is_none());

    // the failed entry keeps its old value
    assert_eq!(cache.get("x"), Some(entry(0)));
    assert_eq!(
        cache.get_props("y").get("source").map(String::as_str),
        Some("refreshed:y")
    );
}

#[tokio::test]
async fn test_refresh_force_never_skips() {
    let refresher = Arc::new(ScriptedRefresher::default());
    let cache = PropertyCache::new(refresher.clone()).with_expire_after(Duration::from_secs(3600));
    cache.insert("a", CacheEntry::fresh(HashMap::new()));
    cache.insert("b", CacheEntry::fresh(HashMap::new()));

    let report = cache.refresh_force(&CancellationToken::new()).await;

    assert_eq!(report.skipped, 0);
    assert_eq!(report.succeeded, 2);
    assert_eq!(refresher.called(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_refresh_of_empty_cache() {
    let cache = PropertyCache::new(Arc::new(ScriptedRefresher::default()));

    let report = cache.refresh_force(&CancellationToken::new()).await;

    assert_eq!(report, RefreshReport::default());
}

#[tokio::test]
async fn test_refreshed_entry_is_written_back() {
    let cache = PropertyCache::new(Arc::new(ScriptedRefresher::default()));
    cache.insert("repo", entry(0));

    let before = Utc::now().timestamp_millis();
    cache.refresh_force(&CancellationToken::new()).await;

    let stored = cache.get("repo").unwrap();
    assert!(stored.updated_at_millis >= before);
    assert_eq!(
        stored.props.get("source").map(String::as_str),
        Some("refreshed:repo")
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_refresh_times_out() {
    let cache = PropertyCache::new(Arc::new(SlowRefresher(Duration::from_secs(60))))
        .with_refresh_timeout(Duration::from_secs(5));
    cache.insert("slow", entry(0));

    let report = cache.refresh_force(&CancellationToken::new()).await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(
        report.failure("slow").map(|f| f.error.clone()),
        Some(RefreshError::Timeout(Duration::from_secs(5)))
    );
    assert_eq!(cache.get("slow"), Some(entry(0)));
}

#[tokio::test]
async fn test_cancelled_token_fails_every_refresh() {
    let cache = PropertyCache::new(Arc::new(PendingRefresher));
    cache.insert("a", entry(0));
    cache.insert("b", entry(0));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = cache.refresh_force(&cancel).await;

    assert_eq!(report.failed(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| f.error == RefreshError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_refreshes() {
    let cache = PropertyCache::new(Arc::new(PendingRefresher))
        .with_refresh_timeout(Duration::from_secs(60));
    cache.insert("a", entry(0));

    let cancel = CancellationToken::new();
    let (report, ()) = tokio::join!(cache.refresh_force(&cancel), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });

    assert_eq!(
        report.failure("a").map(|f| f.error.clone()),
        Some(RefreshError::Cancelled)
    );
}

#[tokio::test]
async fn test_insert_during_refresh_wins() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let cache = PropertyCache::new(Arc::new(GatedRefresher {
        entered: entered.clone(),
        release: release.clone(),
    }));
    cache.insert("repo", entry(0));

    let mut inserted = HashMap::new();
    inserted.insert("v".to_string(), "inserted".to_string());

    let token = CancellationToken::new();
    let (report, ()) = tokio::join!(cache.refresh_force(&token), async {
        entered.notified().await;
        cache.insert("repo", CacheEntry::new(1, inserted.clone()));
        release.notify_one();
    });

    assert_eq!(report.succeeded, 1);
    assert_eq!(cache.get_props("repo"), inserted);
}

#[tokio::test]
async fn test_http_refresher_replaces_props() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/properties/octo/app"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"team": "infra", "tier": "1"})),
        )
        .mount(&server)
        .await;

    let refresher = HttpPropertyRefresher::new(format!("{}/properties", server.uri()));
    let cache = PropertyCache::new(Arc::new(refresher));
    cache.insert("octo/app", entry(0));

    let report = cache.refresh_force(&CancellationToken::new()).await;

    assert!(report.is_clean());
    let props = cache.get_props("octo/app");
    assert_eq!(props.get("team").map(String::as_str), Some("infra"));
    assert_eq!(props.get("tier").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_http_refresher_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such entry"))
        .mount(&server)
        .await;

    let refresher = HttpPropertyRefresher::new(server.uri());
    let mut target = entry(0);
    let err = refresher.refresh("missing", &mut target).await.unwrap_err();

    assert_eq!(
        err,
        RefreshError::Status {
            status: 404,
            message: "no such entry".to_string()
        }
    );
    assert_eq!(target, entry(0));
}

#[tokio::test]
async fn test_http_refresher_rejects_non_object_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a", "b"])))
        .mount(&server)
        .await;

    let refresher = HttpPropertyRefresher::new(server.uri());
    let err = refresher.refresh("list", &mut entry(0)).await.unwrap_err();

    assert!(matches!(err, RefreshError::Parse(_)));
}

#[tokio::test(start_paused = true)]
async fn test_schedule_refreshes_then_sleeps() {
    let refresher = Arc::new(ScriptedRefresher::failing(&["broken"]));
    let cache = Arc::new(
        PropertyCache::new(refresher.clone()).with_expire_after(Duration::from_secs(3600)),
    );
    cache.insert("good", entry(0));
    cache.insert("broken", entry(0));

    let schedule = cache.schedule_refresh(CancellationToken::new(), Duration::from_secs(30));
    let mut state = schedule.subscribe();
    state
        .wait_for(|s| *s == SchedulerState::Sleeping)
        .await
        .unwrap();

    assert_eq!(refresher.calls_for("good"), 1);
    assert_eq!(refresher.calls_for("broken"), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;

    // "good" was stamped by the first batch, "broken" is still expired
    assert_eq!(refresher.calls_for("good"), 1);
    assert_eq!(refresher.calls_for("broken"), 2);
    assert_eq!(schedule.state(), SchedulerState::Sleeping);

    schedule.stop().await.unwrap();
    assert_eq!(*state.borrow(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_cancelled_before_start_never_refreshes() {
    let refresher = Arc::new(ScriptedRefresher::default());
    let cache = Arc::new(PropertyCache::new(refresher.clone()));
    cache.insert("a", entry(0));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let schedule = cache.schedule_refresh(cancel, Duration::from_secs(30));
    let state = schedule.subscribe();
    schedule.join().await.unwrap();

    assert_eq!(*state.borrow(), SchedulerState::Stopped);
    assert!(refresher.called().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_schedule_stops_on_external_cancel() {
    let cache = Arc::new(PropertyCache::new(Arc::new(ScriptedRefresher::default())));
    let cancel = CancellationToken::new();

    let schedule = cache.schedule_refresh(cancel.clone(), Duration::from_secs(30));
    let mut state = schedule.subscribe();
    state
        .wait_for(|s| *s == SchedulerState::Sleeping)
        .await
        .unwrap();

    cancel.cancel();
    schedule.join().await.unwrap();
    assert_eq!(*state.borrow(), SchedulerState::Stopped);
}

#[tokio::test]
async fn test_forced_refresh_is_traced_per_entry() {
    let (spans, _guard) = capture_spans();
    let refresher = Arc::new(ScriptedRefresher::failing(&["x"]));
    let cache = PropertyCache::new(refresher).with_expire_after(Duration::from_secs(3600));
    cache.insert("a", entry(0));
    cache.insert("b", CacheEntry::fresh(HashMap::new()));
    cache.insert("x", entry(0));

    cache.refresh_force(&CancellationToken::new()).await;

    let batch = spans.named("cache.refresh_force");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].field("refresh.total.succeeded"), Some("2"));
    assert_eq!(batch[0].field("refresh.total.failed"), Some("1"));
    assert_eq!(batch[0].field("refresh.total.skipped"), Some("0"));

    let entries = spans.named("cache.refresh_entry");
    assert_eq!(entries.len(), 3);
    let by_name = |name: &str| {
        entries
            .iter()
            .find(|s| s.field("entry") == Some(name))
            .cloned()
            .unwrap()
    };
    assert_eq!(by_name("a").field("is_expired"), Some("true"));
    assert_eq!(by_name("b").field("is_expired"), Some("false"));
    assert_eq!(by_name("b").field("error"), None);
    assert_eq!(by_name("x").field("error"), Some("x is unavailable"));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_batch_is_traced() {
    let (spans, _guard) = capture_spans();
    let cache = Arc::new(
        PropertyCache::new(Arc::new(ScriptedRefresher::default()))
            .with_expire_after(Duration::from_secs(3600)),
    );
    cache.insert("a", entry(0));

    let schedule = cache.schedule_refresh(CancellationToken::new(), Duration::from_secs(30));
    let mut state = schedule.subscribe();
    state
        .wait_for(|s| *s == SchedulerState::Sleeping)
        .await
        .unwrap();
    schedule.stop().await.unwrap();

    let batches = spans.named("cache.scheduled_refresh");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].field("refresh.schedule.interval.ms"), Some("30000"));
    assert_eq!(batches[0].field("refresh.total.succeeded"), Some("1"));
    assert_eq!(batches[0].field("refresh.total.failed"), Some("0"));
    assert_eq!(spans.named("cache.refresh_expired").len(), 1);
}

proptest! {
    #[test]
    fn prop_expiry_matches_elapsed_time(
        updated in 0i64..1_000_000,
        ttl in 0u64..100_000,
        offset in -100_000i64..200_000,
    ) {
        let cache = PropertyCache::new(Arc::new(ScriptedRefresher::default()))
            .with_expire_after(Duration::from_millis(ttl));
        let reference = updated + offset;

        prop_assert_eq!(
            cache.is_expired(&entry(updated), at(reference)),
            offset >= ttl as i64
        );
    }

    #[test]
    fn prop_expiry_total_over_any_stamp(updated in any::<i64>(), ttl in any::<u32>()) {
        let cache = PropertyCache::new(Arc::new(ScriptedRefresher::default()))
            .with_expire_after(Duration::from_millis(u64::from(ttl)));
        let now = Utc::now();

        let expected = i128::from(now.timestamp_millis()) - i128::from(updated) >= i128::from(ttl);
        prop_assert_eq!(cache.is_expired(&entry(updated), now), expected);
    }
}
