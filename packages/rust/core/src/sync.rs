//! Source sync pipeline: fetch each source and upsert its entries as items.

use std::collections::HashSet;
use std::time::Instant;

use govsite_feeds::{FeedEntry, fetch_source_entries};
use govsite_shared::{ContentSource, GovsiteError, ItemMetadata, Result, SyncConfig};
use govsite_storage::{ItemUpsert, SourceFilter, Storage};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Which sources to sync. Empty means every source.
pub type SyncFilter = SourceFilter;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Counts for one synced source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceSyncResult {
    pub source_id: i64,
    pub source_label: String,
    pub source_url: String,
    pub total_entries: usize,
    pub created: usize,
    pub updated: usize,
    /// Entries with no URL or a URL already seen in this run.
    pub skipped: usize,
}

/// A source that could not be synced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub source_id: i64,
    pub source_label: String,
    pub source_url: String,
    pub error: String,
}

/// Outcome of syncing a set of sources.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub results: Vec<SourceSyncResult>,
    pub failures: Vec<SyncFailure>,
    pub elapsed_ms: u128,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Sum of all per-source counts.
    pub fn totals(&self) -> SourceSyncResult {
        self.results
            .iter()
            .fold(SourceSyncResult::default(), |mut acc, r| {
                acc.total_entries += r.total_entries;
                acc.created += r.created;
                acc.updated += r.updated;
                acc.skipped += r.skipped;
                acc
            })
    }
}

/// Progress callback for sync status.
pub trait SyncProgress: Send + Sync {
    /// Called before a source is fetched.
    fn source_started(&self, source: &ContentSource, current: usize, total: usize);
    /// Called after a source synced successfully.
    fn source_finished(&self, result: &SourceSyncResult);
    /// Called when a source failed.
    fn source_failed(&self, source: &ContentSource, error: &GovsiteError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl SyncProgress for SilentProgress {
    fn source_started(&self, _source: &ContentSource, _current: usize, _total: usize) {}
    fn source_finished(&self, _result: &SourceSyncResult) {}
    fn source_failed(&self, _source: &ContentSource, _error: &GovsiteError) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Sync every source matching `filter`, in ID order.
///
/// Errors for individual sources are collected in the report; only an
/// empty selection or a storage failure while listing aborts.
#[instrument(skip_all, fields(source_ids = ?filter.source_ids, site_id = ?filter.site_id))]
pub async fn sync_sources(
    storage: &Storage,
    filter: &SyncFilter,
    config: &SyncConfig,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    let start = Instant::now();
    let sources = storage.list_sources(filter).await?;
    if sources.is_empty() {
        return Err(GovsiteError::validation(
            "No content discovery sources matched the provided filters.",
        ));
    }

    let total = sources.len();
    let mut report = SyncReport::default();
    for (index, source) in sources.iter().enumerate() {
        progress.source_started(source, index + 1, total);
        match sync_source(storage, source, config).await {
            Ok(result) => {
                progress.source_finished(&result);
                report.results.push(result);
            }
            Err(e) => {
                warn!(source_id = source.id, url = %source.url, error = %e, "source sync failed");
                progress.source_failed(source, &e);
                report.failures.push(SyncFailure {
                    source_id: source.id,
                    source_label: source.label().to_string(),
                    source_url: source.url.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.elapsed_ms = start.elapsed().as_millis();
    let totals = report.totals();
    info!(
        sources = total,
        failed = report.failures.len(),
        created = totals.created,
        updated = totals.updated,
        skipped = totals.skipped,
        elapsed_ms = report.elapsed_ms,
        "sync finished"
    );
    Ok(report)
}

/// Fetch one source and upsert its entries, recording a sync run.
#[instrument(skip_all, fields(source_id = source.id, url = %source.url))]
pub async fn sync_source(
    storage: &Storage,
    source: &ContentSource,
    config: &SyncConfig,
) -> Result<SourceSyncResult> {
    let run_id = storage.insert_sync_run(source.id).await?;

    match sync_source_entries(storage, source, config).await {
        Ok(result) => {
            let stats = serde_json::to_string(&result)
                .map_err(|e| GovsiteError::Storage(format!("failed to encode sync stats: {e}")))?;
            storage
                .finish_sync_run(&run_id, Some(&stats), None)
                .await?;
            info!(
                entries = result.total_entries,
                created = result.created,
                updated = result.updated,
                skipped = result.skipped,
                "source synced"
            );
            Ok(result)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(record_err) = storage.finish_sync_run(&run_id, None, Some(&message)).await {
                warn!(error = %record_err, "failed to record sync failure");
            }
            Err(e)
        }
    }
}

async fn sync_source_entries(
    storage: &Storage,
    source: &ContentSource,
    config: &SyncConfig,
) -> Result<SourceSyncResult> {
    let entries = fetch_source_entries(source, config).await?;

    let mut result = SourceSyncResult {
        source_id: source.id,
        source_label: source.label().to_string(),
        source_url: source.url.clone(),
        ..SourceSyncResult::default()
    };

    let urls: Vec<String> = entries
        .iter()
        .map(|e| e.url.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    let mut existing: HashSet<String> = storage
        .existing_item_urls(&urls)
        .await?
        .into_iter()
        .collect();
    let mut seen = HashSet::new();

    for entry in &entries {
        result.total_entries += 1;
        let url = entry.url.trim();
        if url.is_empty() || !seen.insert(url.to_string()) {
            result.skipped += 1;
            continue;
        }

        storage
            .upsert_item(&ItemUpsert {
                url: url.to_string(),
                source_id: Some(source.id),
                title: entry.title.clone(),
                summary: entry.summary.clone(),
                published_at: entry.created_at,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
                metadata: entry_metadata(entry),
                tag_ids: source.default_tag_ids.clone(),
            })
            .await?;

        if existing.contains(url) {
            result.updated += 1;
        } else {
            existing.insert(url.to_string());
            result.created += 1;
        }
    }
    Ok(result)
}

/// Common entry fields plus format-specific extras, without empty values.
fn entry_metadata(entry: &FeedEntry) -> ItemMetadata {
    let mut metadata = ItemMetadata::new();
    metadata.insert("format".into(), Value::from(entry.format.as_str()));
    metadata.insert("entry_id".into(), Value::from(entry.entry_id.clone()));
    metadata.insert("author_names".into(), Value::from(entry.author_names.clone()));
    metadata.insert("published_raw".into(), Value::from(entry.published_raw.clone()));
    metadata.insert("updated_raw".into(), Value::from(entry.updated_raw.clone()));
    for (key, value) in &entry.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    metadata.retain(|_, value| !is_empty_value(value));
    metadata
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govsite_storage::{ListingQuery, SourceUpsert};
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("govsite_sync_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/feeds/{name}"))
            .unwrap_or_else(|_| panic!("missing fixture: {name}"))
    }

    async fn add_source(storage: &Storage, url: String, tag_ids: Vec<i64>) -> ContentSource {
        let mut upsert = SourceUpsert::new(1, url);
        upsert.default_tag_ids = Some(tag_ids);
        let id = storage.upsert_source(&upsert).await.unwrap().id();
        storage.get_source(id).await.unwrap().unwrap()
    }

    async fn mount(server: &MockServer, at: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl SyncProgress for RecordingProgress {
        fn source_started(&self, source: &ContentSource, current: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {current}/{total}", source.id));
        }
        fn source_finished(&self, result: &SourceSyncResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {}", result.source_id));
        }
        fn source_failed(&self, source: &ContentSource, _error: &GovsiteError) {
            self.events
                .lock()
                .unwrap()
                .push(format!("failed {}", source.id));
        }
    }

    #[tokio::test]
    async fn syncing_twice_creates_then_updates() {
        let server = MockServer::start().await;
        mount(&server, "/feed.xml", fixture("atom.xml")).await;

        let storage = test_storage().await;
        storage.insert_site("localhost", 80, true).await.unwrap();
        let tag = storage.insert_tag("blog", "Blog").await.unwrap();
        let source = add_source(&storage, format!("{}/feed.xml", server.uri()), vec![tag.id]).await;
        let config = SyncConfig::default();

        let first = sync_source(&storage, &source, &config).await.unwrap();
        assert_eq!((first.total_entries, first.created, first.updated), (2, 2, 0));

        let second = sync_source(&storage, &source, &config).await.unwrap();
        assert_eq!((second.created, second.updated), (0, 2));

        let listing = storage.list_items(&ListingQuery::default()).await.unwrap();
        assert_eq!(listing.total_items, 2);

        let item = storage
            .get_item_by_url("https://example.gov.uk/posts/first")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.source_id, Some(source.id));
        assert_eq!(item.tag_ids, vec![tag.id]);
        assert_eq!(item.published_at, item.created_at);
        assert_eq!(item.metadata["format"], json!("atom"));
        assert_eq!(
            item.metadata["author_names"],
            json!(["Ada Lovelace", "Grace Hopper"])
        );

        assert_eq!(storage.sync_run_counts(source.id).await.unwrap(), (2, 0));
    }

    #[tokio::test]
    async fn entries_without_url_or_repeated_are_skipped() {
        let server = MockServer::start().await;
        let rss = fixture("rss.xml").replace(
            "https://example.gov.uk/news/two",
            "https://example.gov.uk/news/one",
        );
        mount(&server, "/rss.xml", rss).await;

        let storage = test_storage().await;
        storage.insert_site("localhost", 80, true).await.unwrap();
        let source = add_source(&storage, format!("{}/rss.xml", server.uri()), vec![]).await;

        let result = sync_source(&storage, &source, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(result.total_entries, 3);
        assert_eq!(result.created, 1);
        assert_eq!(result.skipped, 2);
    }

    #[tokio::test]
    async fn empty_metadata_values_are_dropped() {
        let server = MockServer::start().await;
        mount(&server, "/rss.xml", fixture("rss.xml")).await;

        let storage = test_storage().await;
        storage.insert_site("localhost", 80, true).await.unwrap();
        let source = add_source(&storage, format!("{}/rss.xml", server.uri()), vec![]).await;
        sync_source(&storage, &source, &SyncConfig::default())
            .await
            .unwrap();

        let item = storage
            .get_item_by_url("https://example.gov.uk/news/two")
            .await
            .unwrap()
            .unwrap();
        // news/two has no updated or pubDate, only dc:date
        assert_eq!(item.metadata["published_raw"], json!("2024-01-05T14:00:00Z"));
        assert!(item.metadata.get("format").is_some());
        assert!(!item.metadata.values().any(is_empty_value));
    }

    #[tokio::test]
    async fn failures_are_collected_and_recorded() {
        let server = MockServer::start().await;
        mount(&server, "/good.xml", fixture("atom.xml")).await;
        Mock::given(method("GET"))
            .and(path("/bad.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        storage.insert_site("localhost", 80, true).await.unwrap();
        let bad = add_source(&storage, format!("{}/bad.xml", server.uri()), vec![]).await;
        let good = add_source(&storage, format!("{}/good.xml", server.uri()), vec![]).await;

        let progress = RecordingProgress::default();
        let report = sync_sources(&storage, &SyncFilter::default(), &SyncConfig::default(), &progress)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_id, bad.id);
        assert!(report.failures[0].error.contains("HTTP 500"));
        assert_eq!(report.totals().created, 2);

        let events = progress.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                format!("start {} 1/2", bad.id),
                format!("failed {}", bad.id),
                format!("start {} 2/2", good.id),
                format!("done {}", good.id),
            ]
        );
        assert_eq!(storage.sync_run_counts(bad.id).await.unwrap(), (0, 1));
    }

    #[tokio::test]
    async fn unmatched_filter_is_an_error() {
        let storage = test_storage().await;
        let filter = SyncFilter {
            source_ids: vec![42],
            site_id: None,
        };
        let err = sync_sources(&storage, &filter, &SyncConfig::default(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No content discovery sources matched"));
    }

    #[test]
    fn metadata_merges_format_extras() {
        let mut extras = ItemMetadata::new();
        extras.insert("watchers".into(), json!(5));
        extras.insert("language".into(), Value::Null);
        extras.insert("topics".into(), json!([]));
        let entry = FeedEntry {
            format: govsite_feeds::FeedFormat::GithubOrgRepositories,
            url: "https://github.com/o/r".into(),
            title: "r".into(),
            summary: String::new(),
            created_at: None,
            updated_at: None,
            entry_id: "R_1".into(),
            author_names: vec![],
            published_raw: String::new(),
            updated_raw: String::new(),
            metadata: extras,
        };
        let metadata = entry_metadata(&entry);
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata["format"], json!("github_org_repositories"));
        assert_eq!(metadata["entry_id"], json!("R_1"));
        assert_eq!(metadata["watchers"], json!(5));
    }
}
