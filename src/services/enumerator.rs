//! Cursor-resumable, fixed-size page listing of the key space.

use crate::{
    models::object_key::ObjectKey,
    services::capabilities::{ObjectStore, StoreResult},
};
use std::sync::Arc;
use tracing::info;

/// Upper bound on keys returned per page.
pub const PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub keys: Vec<String>,
}

impl Page {
    /// An empty page means the key space is exhausted.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The cursor to resume from after this page: its last key.
    pub fn next_cursor(&self) -> Option<&str> {
        self.keys.last().map(String::as_str)
    }
}

/// A key discovered while enumerating, tagged with the page it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub key: ObjectKey,
    pub page_index: usize,
}

pub struct PaginatedEnumerator {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    suffix: String,
    page_size: usize,
}

impl PaginatedEnumerator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            suffix: suffix.into(),
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, PAGE_SIZE);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// List the page after `cursor` (or the first page when `None`).
    pub async fn next_page(&self, index: usize, cursor: Option<&str>) -> StoreResult<Page> {
        let keys = self
            .store
            .list(&self.prefix, cursor, self.page_size)
            .await?;

        match (keys.first(), keys.last()) {
            (Some(first), Some(last)) => info!(
                page = index,
                count = keys.len(),
                "page spans {} .. {}",
                first,
                last
            ),
            _ => info!(page = index, "no keys after {}", cursor.unwrap_or("<start>")),
        }

        Ok(Page { index, keys })
    }

    /// Keys on `page` that the workflow should process: matching suffix,
    /// not a backup, and encoding an entity id and size class.
    pub fn work_items(&self, page: &Page) -> Vec<WorkItem> {
        page.keys
            .iter()
            .filter(|key| key.ends_with(&self.suffix))
            .filter_map(|key| ObjectKey::parse(key))
            .map(|key| WorkItem {
                key,
                page_index: page.index,
            })
            .collect()
    }
}
