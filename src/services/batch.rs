//! Page-by-page batch driver.
//!
//! Each page is listed (with retries), its in-scope keys are run through the
//! worker pool, and only once every key on the page has settled does the
//! cursor advance. Per-key failures are recorded; a page that cannot be
//! listed ends the run.

use crate::{
    errors::{BatchError, WorkflowError},
    services::{
        enumerator::{PaginatedEnumerator, WorkItem},
        pool::WorkerPool,
        retry::{RetryError, RetryExecutor},
        workflow::{KeyWorkflow, WorkflowOutcome},
    },
};
use tracing::{Instrument, info, info_span, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: String,
    pub error: String,
}

/// Running totals for a batch, surfaced to the operator at the end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub pages: usize,
    pub keys_seen: usize,
    pub keys_in_scope: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failures: Vec<KeyFailure>,
    /// Last key of the last fully settled page.
    pub last_cursor: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    pub start_after: Option<String>,
    pub max_pages: Option<usize>,
}

pub struct BatchRunner {
    enumerator: PaginatedEnumerator,
    workflow: KeyWorkflow,
    pool: WorkerPool,
    retry: RetryExecutor,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(
        enumerator: PaginatedEnumerator,
        workflow: KeyWorkflow,
        pool: WorkerPool,
        retry: RetryExecutor,
        options: BatchOptions,
    ) -> Self {
        Self {
            enumerator,
            workflow,
            pool,
            retry,
            options,
        }
    }

    /// Drive the batch to completion, accumulating into `summary`.
    ///
    /// `summary` is left consistent on error so the caller can still report
    /// it and the last cursor.
    pub async fn run(&self, summary: &mut BatchSummary) -> Result<(), BatchError> {
        let mut cursor = self.options.start_after.clone();
        summary.last_cursor = cursor.clone();
        let mut index = 0;

        loop {
            if self.options.max_pages.is_some_and(|max| index >= max) {
                info!("stopping after {} pages", index);
                break;
            }

            let page = self
                .retry
                .run("list page", || self.enumerator.next_page(index, cursor.as_deref()))
                .await
                .map_err(|source| BatchError::Enumeration {
                    cursor: cursor.clone(),
                    source,
                })?;
            if page.is_empty() {
                info!("enumeration of `{}` complete", self.enumerator.prefix());
                break;
            }

            let items = self.enumerator.work_items(&page);
            summary.keys_seen += page.keys.len();
            summary.keys_in_scope += items.len();

            self.run_page(&items, summary)
                .instrument(info_span!("page", index))
                .await;

            summary.pages += 1;
            cursor = page.next_cursor().map(str::to_string);
            summary.last_cursor = cursor.clone();
            info!(
                page = index,
                "page settled, resume with --start-after {}",
                cursor.as_deref().unwrap_or_default()
            );
            index += 1;
        }

        Ok(())
    }

    async fn run_page(&self, items: &[WorkItem], summary: &mut BatchSummary) {
        let report = self
            .pool
            .run(items, |item| self.process_with_retry(item))
            .await;

        for (_, outcome) in &report.results {
            if outcome.made_change() {
                summary.changed += 1;
            } else {
                summary.unchanged += 1;
            }
        }
        for failure in report.failures {
            warn!("{} failed: {}", failure.item.key, failure.error);
            summary.failures.push(KeyFailure {
                key: failure.item.key.to_string(),
                error: failure.error.to_string(),
            });
        }
    }

    async fn process_with_retry(
        &self,
        item: &WorkItem,
    ) -> Result<WorkflowOutcome, RetryError<WorkflowError>> {
        let workflow = &self.workflow;
        let key = &item.key;
        self.retry
            .run_when(
                key.as_str(),
                move || workflow.process(key),
                WorkflowError::is_transient,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{object::TagSet, tag::ClassificationTag},
        services::{
            retry::RetryPolicy,
            testing::{FakeCompressor, FakeRenderer, FakeUpstream, MemoryStore, StoreCall},
            workflow::UpstreamCache,
        },
    };
    use std::{io, sync::Arc};

    fn runner(
        store: Arc<MemoryStore>,
        upstream: Arc<FakeUpstream>,
        options: BatchOptions,
    ) -> BatchRunner {
        let enumerator =
            PaginatedEnumerator::new(store.clone(), "outfits/", ".png").with_page_size(4);
        let workflow = KeyWorkflow::new(
            store,
            upstream,
            Arc::new(FakeRenderer::complete(b"rendered")),
            Arc::new(FakeCompressor::returning(b"small")),
            Arc::new(UpstreamCache::new(4)),
        );
        BatchRunner::new(
            enumerator,
            workflow,
            WorkerPool::new(2),
            RetryExecutor::new(RetryPolicy {
                max_retries: 2,
                attempt_timeout: None,
            }),
            options,
        )
    }

    fn seed(store: &MemoryStore, entities: u64) {
        for entity in 1..=entities {
            for size in ["150", "300", "preview"] {
                let key = format!("outfits/000/000/{entity:03}/{size}.png");
                store.insert(&key, b"original-large-bytes", TagSet::new());
            }
        }
    }

    #[tokio::test]
    async fn processes_every_page_and_counts_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let upstream = Arc::new(FakeUpstream::new());
        seed(&store, 3);
        upstream.fail(2, &["outfit deleted"]);

        let mut summary = BatchSummary::default();
        runner(store.clone(), upstream.clone(), BatchOptions::default())
            .run(&mut summary)
            .await
            .unwrap();

        assert_eq!(summary.keys_in_scope, 9);
        assert_eq!(summary.changed, 6);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(summary.failures.len(), 3);
        assert!(summary.failures.iter().all(|f| f.key.starts_with("outfits/000/000/002/")));
        assert!(summary.keys_seen > summary.keys_in_scope);
        assert_eq!(upstream.fetch_count(), 3);
        assert!(summary.last_cursor.is_some());
    }

    #[tokio::test]
    async fn second_batch_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let upstream = Arc::new(FakeUpstream::new());
        seed(&store, 2);

        let mut first = BatchSummary::default();
        runner(store.clone(), upstream.clone(), BatchOptions::default())
            .run(&mut first)
            .await
            .unwrap();
        let mut second = BatchSummary::default();
        runner(store.clone(), upstream.clone(), BatchOptions::default())
            .run(&mut second)
            .await
            .unwrap();

        assert_eq!(first.changed, 6);
        assert_eq!(second.changed, 0);
        assert_eq!(second.unchanged, 6);
        assert!(second.failures.is_empty());
        for entity in 1..=2 {
            let key = format!("outfits/000/000/{entity:03}/preview.png");
            let tags = store.object(&key).unwrap().tags;
            assert_eq!(ClassificationTag::from_tags(&tags), Some(ClassificationTag::Compressed));
            let backup = store.object(&format!("{key}.bkup")).unwrap();
            assert_eq!(
                ClassificationTag::from_tags(&backup.tags),
                Some(ClassificationTag::Backup)
            );
        }
    }

    #[tokio::test]
    async fn transient_listing_failures_are_retried() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1);
        store.fail_next_lists(&[io::ErrorKind::ConnectionReset, io::ErrorKind::TimedOut]);

        let mut summary = BatchSummary::default();
        runner(store.clone(), Arc::new(FakeUpstream::new()), BatchOptions::default())
            .run(&mut summary)
            .await
            .unwrap();

        assert_eq!(summary.changed, 3);
    }

    #[tokio::test]
    async fn exhausted_listing_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1);
        store.fail_next_lists(&[io::ErrorKind::ConnectionReset; 3]);

        let mut summary = BatchSummary::default();
        let err = runner(store.clone(), Arc::new(FakeUpstream::new()), BatchOptions::default())
            .run(&mut summary)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Enumeration { cursor: None, .. }));
        assert!(err.to_string().contains("gave up after 2 retries"));
        assert_eq!(summary.pages, 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn resumes_from_printed_cursor() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3);
        let first_only = BatchOptions {
            start_after: None,
            max_pages: Some(1),
        };
        let mut first = BatchSummary::default();
        runner(store.clone(), Arc::new(FakeUpstream::new()), first_only)
            .run(&mut first)
            .await
            .unwrap();
        let cursor = first.last_cursor.clone().unwrap();

        let resume = BatchOptions {
            start_after: Some(cursor.clone()),
            max_pages: None,
        };
        let mut rest = BatchSummary::default();
        runner(store.clone(), Arc::new(FakeUpstream::new()), resume)
            .run(&mut rest)
            .await
            .unwrap();

        assert!(store.calls().contains(&StoreCall::List {
            start_after: Some(cursor)
        }));
        assert_eq!(first.changed + rest.changed, 9);
        assert!(rest.failures.is_empty());
    }

    #[tokio::test]
    async fn max_pages_stops_with_resumable_cursor() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3);
        let options = BatchOptions {
            start_after: None,
            max_pages: Some(1),
        };

        let mut summary = BatchSummary::default();
        runner(store.clone(), Arc::new(FakeUpstream::new()), options)
            .run(&mut summary)
            .await
            .unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.keys_seen, 4);
        assert_eq!(
            summary.last_cursor.as_deref(),
            Some("outfits/000/000/002/150.png")
        );
    }
}
