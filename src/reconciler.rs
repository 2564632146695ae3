//! Snapshot reconciliation.
//!
//! One run: resolve the author, load the baseline, fetch with retries,
//! merge additively and persist. A failed fetch never erases what the
//! baseline already knew.

use crate::config::SiteLayout;
use crate::error::{CitationError, Result};
use crate::retry::RetryPolicy;
use crate::snapshot::{BaselineSource, Metadata, Snapshot, SnapshotStore};
use crate::source::{AuthorRecord, ScholarSource};
use tracing::{debug, error, info, warn};

/// Counts from merging one fetched record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub updated: usize,
    pub skipped: usize,
}

/// Result of one reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub snapshot: Snapshot,
    pub baseline: BaselineSource,
    /// Fetch attempts made, including the successful one
    pub attempts: u32,
    pub fetched: bool,
    pub stats: MergeStats,
    pub persisted: bool,
}

/// Upsert every usable publication of `record` into `snapshot`.
///
/// Entries absent from `record` are left as they were.
pub fn merge(snapshot: &mut Snapshot, record: &AuthorRecord) -> MergeStats {
    let mut stats = MergeStats::default();

    if record.publications.is_empty() {
        warn!(author = %record.author_id, "No publications found in author data");
    }

    for raw in &record.publications {
        match raw.normalize() {
            Ok(publication) => {
                info!(
                    title = %publication.title,
                    year = %publication.year,
                    citations = publication.citations,
                    "Found publication"
                );
                snapshot.upsert(publication);
                stats.updated += 1;
            }
            Err(rejected) => {
                warn!(reason = %rejected, "Skipping publication");
                stats.skipped += 1;
            }
        }
    }

    stats
}

pub struct Reconciler<S> {
    source: S,
    store: SnapshotStore,
    policy: RetryPolicy,
}

impl<S: ScholarSource> Reconciler<S> {
    pub fn new(source: S, store: SnapshotStore) -> Self {
        Self {
            source,
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve the author from the site files, then reconcile.
    ///
    /// # Errors
    ///
    /// Fails when no author id is configured or the snapshot is locked.
    pub async fn run(&self, site: &SiteLayout) -> Result<ReconcileOutcome> {
        let author_id = site.resolve_author_id()?;
        self.reconcile(&author_id).await
    }

    /// Merge a fresh fetch for `author_id` into the stored snapshot.
    ///
    /// # Errors
    ///
    /// Only [`CitationError::Locked`] escapes; lock, fetch and write
    /// failures are logged and reflected in the outcome.
    pub async fn reconcile(&self, author_id: &str) -> Result<ReconcileOutcome> {
        let _lock = match self.store.lock() {
            Ok(lock) => Some(lock),
            Err(e @ CitationError::Locked(_)) => return Err(e),
            Err(e) => {
                warn!(path = %self.store.path().display(), error = %e, "Could not take snapshot lock, continuing without it");
                None
            }
        };
        info!(author = author_id, path = %self.store.path().display(), "Fetching citations");

        let (papers, baseline) = self.store.load_baseline();
        let mut snapshot = Snapshot::new(Metadata::now(author_id), papers);

        let (record, attempts) = self.fetch_with_retry(author_id).await;
        let Some(record) = record else {
            warn!(author = author_id, attempts, "All retries failed, keeping existing data");
            return Ok(ReconcileOutcome {
                snapshot,
                baseline,
                attempts,
                fetched: false,
                stats: MergeStats::default(),
                persisted: false,
            });
        };

        let stats = merge(&mut snapshot, &record);

        let persisted = match self.store.save(&snapshot) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.store.path().display(), error = %e, "Error saving citation data");
                false
            }
        };

        Ok(ReconcileOutcome {
            snapshot,
            baseline,
            attempts,
            fetched: true,
            stats,
            persisted,
        })
    }

    async fn fetch_with_retry(&self, author_id: &str) -> (Option<AuthorRecord>, u32) {
        let mut attempt = 0;
        loop {
            match self.source.fetch_author(author_id).await {
                Ok(record) => return (Some(record), attempt + 1),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Fetch attempt failed"
                    );
                    if self.policy.is_last(attempt) {
                        return (None, attempt + 1);
                    }
                    let wait = self.policy.backoff(attempt);
                    debug!(wait_secs = wait.as_secs_f64(), "Retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{PaperRecord, Papers};
    use crate::source::mock::{author, publication, MockSource};
    use crate::source::{UNKNOWN_TITLE, UNKNOWN_YEAR};
    use std::time::Duration;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SnapshotStore {
        SnapshotStore::new(dir.path().join("_data").join("citations.yml"))
    }

    fn seed(store: &SnapshotStore, entries: &[(&str, u64)]) {
        let mut papers = Papers::new();
        for (id, citations) in entries {
            papers.insert(
                id.to_string(),
                PaperRecord {
                    title: format!("Paper {id}"),
                    year: "2019".to_string(),
                    citations: *citations,
                },
            );
        }
        store
            .save(&Snapshot::new(Metadata::now("ABC"), papers))
            .expect("seed snapshot");
    }

    fn reload(store: &SnapshotStore) -> Papers {
        store.load_baseline().0
    }

    fn fresh_fetch() -> AuthorRecord {
        author(
            "ABC",
            vec![
                publication("a", Some("Alpha"), Some("2021"), Some(5)),
                publication("b", None, None, Some(0)),
            ],
        )
    }

    #[tokio::test]
    async fn test_fresh_fetch_into_empty_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store.clone());

        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");
        assert!(outcome.fetched);
        assert!(outcome.persisted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.baseline, BaselineSource::Missing);

        let papers = reload(&store);
        assert_eq!(papers["a"].citations, 5);
        assert_eq!(papers["b"].title, UNKNOWN_TITLE);
        assert_eq!(papers["b"].year, UNKNOWN_YEAR);
        assert_eq!(papers["b"].citations, 0);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let reconciler = Reconciler::new(
            MockSource::new().then_ok(fresh_fetch()).then_ok(fresh_fetch()),
            store.clone(),
        );

        let first = reconciler.reconcile("ABC").await.expect("first run");
        let on_disk_first = Snapshot::new(Metadata::default(), reload(&store));
        let second = reconciler.reconcile("ABC").await.expect("second run");
        let on_disk_second = Snapshot::new(Metadata::default(), reload(&store));

        assert_eq!(
            first.snapshot.papers_yaml().expect("yaml"),
            second.snapshot.papers_yaml().expect("yaml")
        );
        assert_eq!(
            on_disk_first.papers_yaml().expect("yaml"),
            on_disk_second.papers_yaml().expect("yaml")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_keeps_baseline() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        seed(&store, &[("a", 5)]);
        let before = std::fs::read_to_string(store.path()).expect("read");

        let reconciler = Reconciler::new(MockSource::new(), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");

        assert!(!outcome.fetched);
        assert!(!outcome.persisted);
        assert_eq!(outcome.snapshot.papers["a"].citations, 5);
        assert_eq!(reload(&store)["a"].citations, 5);
        assert_eq!(std::fs::read_to_string(store.path()).expect("read"), before);
    }

    #[tokio::test]
    async fn test_merge_is_additive() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        seed(&store, &[("a", 1), ("b", 9)]);
        let b_before = reload(&store)["b"].clone();

        let update = author("ABC", vec![publication("a", Some("Alpha v2"), Some("2022"), Some(12))]);
        let reconciler = Reconciler::new(MockSource::new().then_ok(update), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");
        assert_eq!(outcome.stats, MergeStats { updated: 1, skipped: 0 });

        let papers = reload(&store);
        assert_eq!(papers.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(papers["a"].citations, 12);
        assert_eq!(papers["a"].title, "Alpha v2");
        assert_eq!(papers["b"], b_before);
    }

    #[tokio::test]
    async fn test_publications_without_id_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);

        let mut orphan = publication("x", Some("Orphan"), None, Some(3));
        orphan.author_pub_id = None;
        let record = author("ABC", vec![orphan, publication("a", Some("Alpha"), None, Some(2))]);

        let reconciler = Reconciler::new(MockSource::new().then_ok(record), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");

        assert_eq!(outcome.stats, MergeStats { updated: 1, skipped: 1 });
        assert_eq!(reload(&store).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_makes_three_attempts_with_growing_delay() {
        let dir = TempDir::new().expect("tempdir");
        let source = MockSource::new()
            .then_err(CitationError::Captcha)
            .then_err(CitationError::RateLimited(60))
            .then_err(CitationError::Captcha)
            .then_ok(fresh_fetch());
        let reconciler = Reconciler::new(source, store_in(&dir));

        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.fetched);

        let calls = reconciler.source.call_times();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(1));
        assert!(second_gap >= first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let source = MockSource::new()
            .then_err(CitationError::Captcha)
            .then_ok(fresh_fetch());
        let reconciler = Reconciler::new(source, store.clone());

        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.persisted);
        assert_eq!(reload(&store)["a"].citations, 5);
    }

    #[tokio::test]
    async fn test_locked_snapshot_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        let _held = store.lock().expect("lock");

        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store);
        assert!(matches!(
            reconciler.reconcile("ABC").await,
            Err(CitationError::Locked(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_lock_does_not_block_the_run() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("_data")).expect("mkdir");
        let lock_file = dir.path().join("_data/citations.yml.lock");
        std::fs::write(&lock_file, "999999999\n").expect("write lock");

        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");

        assert!(outcome.persisted);
        assert_eq!(reload(&store)["a"].citations, 5);
        assert!(!lock_file.exists());
    }

    #[tokio::test]
    async fn test_unwritable_data_dir_still_fetches_and_merges() {
        let dir = TempDir::new().expect("tempdir");
        // A plain file where the data directory should be
        std::fs::write(dir.path().join("_data"), "not a directory").expect("write");
        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store_in(&dir));

        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");
        assert!(outcome.fetched);
        assert!(!outcome.persisted);
        assert_eq!(outcome.stats, MergeStats { updated: 2, skipped: 0 });
        assert_eq!(outcome.snapshot.papers["a"].citations, 5);
        assert_eq!(reconciler.source.call_times().len(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_not_raised() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        // The snapshot path is a directory, so the final rename fails
        std::fs::create_dir_all(store.path()).expect("mkdir");

        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");

        assert!(outcome.fetched);
        assert!(!outcome.persisted);
        assert_eq!(outcome.snapshot.papers["a"].citations, 5);
        assert!(store.path().is_dir());
    }

    #[tokio::test]
    async fn test_unreadable_entry_keeps_other_baseline_papers() {
        let dir = TempDir::new().expect("tempdir");
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("_data")).expect("mkdir");
        std::fs::write(
            store.path(),
            "papers:\n  keep1:\n    title: Kept\n    year: '2018'\n    citations: 40\n  bad:\n    citations: null\n",
        )
        .expect("write");

        let update = author("ABC", vec![publication("a", Some("Alpha"), Some("2021"), Some(5))]);
        let reconciler = Reconciler::new(MockSource::new().then_ok(update), store.clone());
        let outcome = reconciler.reconcile("ABC").await.expect("reconcile");

        assert!(matches!(outcome.baseline, BaselineSource::Partial { skipped: 1, .. }));
        let papers = reload(&store);
        assert_eq!(papers.keys().collect::<Vec<_>>(), vec!["keep1", "a"]);
        assert_eq!(papers["keep1"].citations, 40);
    }

    #[tokio::test]
    async fn test_run_without_author_id_fails() {
        let dir = TempDir::new().expect("tempdir");
        let site = SiteLayout::new(dir.path());
        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store_in(&dir));

        assert!(matches!(reconciler.run(&site).await, Err(CitationError::Config(_))));
        assert!(reconciler.source.call_times().is_empty());
    }

    #[tokio::test]
    async fn test_run_resolves_author_from_socials() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("_data")).expect("mkdir");
        std::fs::write(dir.path().join("_data/socials.yml"), "scholar_userid: ABC\n").expect("write");
        let site = SiteLayout::new(dir.path());
        let store = SnapshotStore::new(site.snapshot_path());

        let reconciler = Reconciler::new(MockSource::new().then_ok(fresh_fetch()), store.clone());
        let outcome = reconciler.run(&site).await.expect("run");

        assert_eq!(outcome.snapshot.metadata.scholar_userid, "ABC");
        let text = std::fs::read_to_string(store.path()).expect("read");
        assert!(text.contains("scholar_userid: ABC"));
    }
}
