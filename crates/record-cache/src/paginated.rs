//! # Paginated Record Arrays
//!
//! A [`PaginatedRecordArray`] is a query array filled by discrete fetches. It
//! dereferences to its [`RecordArray`], so reads (`len`, `object_at`,
//! `subscribe`, ...) work the same as on any live array.
//!
//! ## Page state
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `page` | last page fetched |
//! | `start_page` | first page currently held |
//! | `page_size` | records per page; the server's `pageSize` meta wins |
//! | `total_pages` | `ceil(total / page_size)` when the server reports `total` |
//! | `is_finished` | no more pages to fetch |
//!
//! Page state and membership change together, in the same actor request, and
//! only when a fetch completes. A failed fetch changes neither.
//!
//! ## Overlapping loads
//!
//! The last issued load wins. When a `load_page(2)` is still in flight as
//! `load_page(3)` is issued, page 2's records are still merged into the
//! identity map when they arrive, but they never become the array's content.
//! The superseded call still returns `Ok(())`.
//!
//! Only a load that is applied can supersede another. If `load_page(3)` fails,
//! the earlier `load_page(2)` is applied when it arrives.

use crate::adapter::PageRequest;
use crate::error::{Result, StoreError};
use crate::executor::{Query, QueryExecutor};
use crate::record_array::RecordArray;
use crate::serializer::PayloadMeta;
use parking_lot::RwLock;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Snapshot of a paginated array's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: u32,
    pub start_page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub is_finished: bool,
}

impl PageState {
    fn new(page_size: u32) -> Self {
        Self {
            page: 1,
            start_page: 1,
            page_size: page_size.max(1),
            total_pages: 0,
            is_finished: false,
        }
    }

    /// Folds one completed fetch into the state.
    ///
    /// `request` is `None` for an unpaged query, which is finished after a
    /// single fetch.
    pub fn apply(&mut self, request: Option<PageRequest>, returned: usize, meta: &PayloadMeta, mode: LoadMode) {
        let reported = meta.page_size.filter(|size| *size > 0);
        let Some(request) = request else {
            if let Some(size) = reported {
                self.page_size = size;
            }
            if let Some(total) = meta.total {
                self.total_pages = pages_for(total, self.page_size);
            }
            self.is_finished = meta.is_finished.unwrap_or(true);
            return;
        };

        self.page_size = reported.unwrap_or(request.page_size).max(1);
        self.page = request.page;
        if mode == LoadMode::Replace {
            self.start_page = request.page;
        }
        if let Some(total) = meta.total {
            self.total_pages = pages_for(total, self.page_size);
        }
        self.is_finished = match meta.is_finished {
            Some(finished) => finished,
            None if self.total_pages > 0 => self.page >= self.total_pages,
            None => (returned as u64) < u64::from(self.page_size),
        };
    }
}

fn pages_for(total: u64, page_size: u32) -> u32 {
    let pages = total.div_ceil(u64::from(page_size.max(1)));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Whether a fetched page replaces the content or is appended to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Replace,
    Append,
}

/// `issued` numbers loads in the order they start; `applied` is the number of
/// the newest load that reached the array.
#[derive(Debug)]
struct PageTracker {
    state: RwLock<PageState>,
    issued: AtomicU64,
    applied: AtomicU64,
}

/// A finished fetch on its way to the store actor. The actor applies it only
/// if no load issued after it has been applied to the same array.
pub struct PageCompletion {
    tracker: Arc<PageTracker>,
    generation: u64,
    request: Option<PageRequest>,
    meta: PayloadMeta,
    mode: LoadMode,
}

impl PageCompletion {
    pub(crate) fn is_current(&self) -> bool {
        self.generation > self.tracker.applied.load(Ordering::Acquire)
    }

    pub(crate) fn mode(&self) -> LoadMode {
        self.mode
    }

    pub(crate) fn apply(&self, returned: usize) {
        self.tracker
            .state
            .write()
            .apply(self.request, returned, &self.meta, self.mode);
        self.tracker.applied.store(self.generation, Ordering::Release);
    }
}

impl std::fmt::Debug for PageCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCompletion")
            .field("generation", &self.generation)
            .field("request", &self.request)
            .field("meta", &self.meta)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A query array with server-driven pagination.
#[derive(Clone)]
pub struct PaginatedRecordArray {
    array: RecordArray,
    query: Query,
    executor: QueryExecutor,
    tracker: Arc<PageTracker>,
}

impl PaginatedRecordArray {
    pub(crate) fn new(array: RecordArray, query: Query, executor: QueryExecutor, page_size: u32) -> Self {
        Self {
            array,
            query,
            executor,
            tracker: Arc::new(PageTracker {
                state: RwLock::new(PageState::new(page_size)),
                issued: AtomicU64::new(0),
                applied: AtomicU64::new(0),
            }),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn page_state(&self) -> PageState {
        *self.tracker.state.read()
    }

    pub fn page(&self) -> u32 {
        self.page_state().page
    }

    pub fn start_page(&self) -> u32 {
        self.page_state().start_page
    }

    pub fn page_size(&self) -> u32 {
        self.page_state().page_size
    }

    pub fn total_pages(&self) -> u32 {
        self.page_state().total_pages
    }

    pub fn is_finished(&self) -> bool {
        self.page_state().is_finished
    }

    /// The live array behind this one.
    pub fn record_array(&self) -> &RecordArray {
        &self.array
    }

    /// Replaces the content with page `page`. Pages start at 1.
    ///
    /// Returns `Ok(())` without touching the content when a load issued later
    /// was applied first.
    pub async fn load_page(&self, page: u32) -> Result<()> {
        if page == 0 {
            return Err(StoreError::InvalidPage(page));
        }
        self.load(Some(page), LoadMode::Replace).await.map(|_| ())
    }

    /// Appends the page after the last one fetched.
    pub async fn load_more(&self) -> Result<()> {
        if !self.is_loaded() {
            return self.load_initial().await;
        }
        let next = self.page().saturating_add(1);
        self.load(Some(next), LoadMode::Append).await.map(|_| ())
    }

    /// First fetch, as described by the query.
    pub(crate) async fn load_initial(&self) -> Result<()> {
        let page = if self.query.is_paged() {
            Some(self.query.page().unwrap_or(1))
        } else {
            None
        };
        self.load(page, LoadMode::Replace).await.map(|_| ())
    }

    /// Fetches and hands the result to the store. Answers whether this load
    /// was applied or superseded.
    #[instrument(skip(self), fields(type_key = self.query.type_key()))]
    async fn load(&self, page: Option<u32>, mode: LoadMode) -> Result<bool> {
        let generation = self.tracker.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let request = match page {
            Some(page) => Some(PageRequest::new(
                page,
                self.executor.page_size_for(self.query.type_key())?,
            )),
            None => None,
        };

        let fetched = self.executor.fetch(&self.query, request).await?;
        let completion = PageCompletion {
            tracker: self.tracker.clone(),
            generation,
            request,
            meta: fetched.meta,
            mode,
        };
        let applied = self
            .executor
            .client()
            .load_page(self.array.clone(), fetched.records, completion)
            .await?;
        if !applied {
            debug!(generation, "Load superseded");
        }
        Ok(applied)
    }
}

impl Deref for PaginatedRecordArray {
    type Target = RecordArray;

    fn deref(&self) -> &RecordArray {
        &self.array
    }
}

impl std::fmt::Debug for PaginatedRecordArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedRecordArray")
            .field("query", &self.query)
            .field("len", &self.array.len())
            .field("state", &self.page_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(page_size: Option<u32>, total: Option<u64>, is_finished: Option<bool>) -> PayloadMeta {
        PayloadMeta {
            page_size,
            total,
            is_finished,
        }
    }

    #[test]
    fn server_page_size_wins() {
        let mut state = PageState::new(25);
        state.apply(Some(PageRequest::new(1, 1)), 1, &meta(Some(10), None, None), LoadMode::Replace);
        assert_eq!(state.page_size, 10);
        // One record on a page of ten: nothing left.
        assert!(state.is_finished);
    }

    #[test]
    fn total_pages_from_total() {
        let mut state = PageState::new(25);
        state.apply(Some(PageRequest::new(1, 25)), 1, &meta(Some(10), Some(12), None), LoadMode::Replace);
        assert_eq!(state.total_pages, 2);
        assert!(!state.is_finished);

        state.apply(Some(PageRequest::new(2, 25)), 1, &meta(Some(10), Some(12), None), LoadMode::Append);
        assert!(state.is_finished);
        assert_eq!(state.start_page, 1);
        assert_eq!(state.page, 2);
    }

    #[test]
    fn explicit_finished_flag_wins() {
        let mut state = PageState::new(25);
        state.apply(Some(PageRequest::new(1, 10)), 10, &meta(Some(10), None, Some(true)), LoadMode::Replace);
        assert!(state.is_finished);
    }

    #[test]
    fn full_page_without_meta_is_not_finished() {
        let mut state = PageState::new(1);
        state.apply(Some(PageRequest::new(1, 1)), 1, &PayloadMeta::default(), LoadMode::Replace);
        assert!(!state.is_finished);
        state.apply(Some(PageRequest::new(3, 1)), 1, &PayloadMeta::default(), LoadMode::Replace);
        assert_eq!(state.start_page, 3);
    }

    #[test]
    fn unpaged_queries_finish_after_one_fetch() {
        let mut state = PageState::new(25);
        state.apply(None, 3, &PayloadMeta::default(), LoadMode::Replace);
        assert!(state.is_finished);
        assert_eq!(state.page, 1);
    }

    #[test]
    fn unpaged_queries_take_the_server_page_size() {
        let mut state = PageState::new(25);
        state.apply(None, 1, &meta(Some(10), Some(12), None), LoadMode::Replace);
        assert_eq!(state.page_size, 10);
        assert_eq!(state.total_pages, 2);
        assert!(state.is_finished);
    }

    #[test]
    fn page_math_survives_huge_totals() {
        assert_eq!(pages_for(0, 10), 0);
        assert_eq!(pages_for(12, 10), 2);
        assert_eq!(pages_for(u64::MAX, 1), u32::MAX);
    }
}
