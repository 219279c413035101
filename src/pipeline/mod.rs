//! Export pipeline: the fetch driver (producer), the orchestrator that wires
//! it to the batch writer (consumer), and the `CursorSource` seam that lets
//! tests drive both with fakes.

pub mod fetch;
pub mod orchestrator;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::elastic::{CursorToken, ScrollClient, ScrollPage};
use crate::error::AppError;

pub use fetch::{FetchDriver, FetchReport, FetchStats, StopReason};
pub use orchestrator::{ExportPipeline, ExportReport, PipelineSettings, RunPhase};

/// Boxed future returned by `CursorSource` methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Cursor protocol operations, allowing test fakes.
pub trait CursorSource: Send + Sync {
    /// Issues the initial query and returns the first page with its cursor.
    fn open_cursor<'a>(&'a self, query: Option<&'a Value>) -> SourceFuture<'a, ScrollPage>;

    /// Fetches the page after `cursor`; an empty page means exhaustion.
    fn next_batch<'a>(&'a self, cursor: &'a CursorToken) -> SourceFuture<'a, ScrollPage>;

    /// Releases the server-side cursor (best-effort).
    fn release_cursor<'a>(&'a self, cursor: &'a CursorToken) -> SourceFuture<'a, ()>;
}

/// Implementation of CursorSource for the real scroll client.
impl CursorSource for ScrollClient {
    fn open_cursor<'a>(&'a self, query: Option<&'a Value>) -> SourceFuture<'a, ScrollPage> {
        Box::pin(ScrollClient::open_cursor(self, query))
    }

    fn next_batch<'a>(&'a self, cursor: &'a CursorToken) -> SourceFuture<'a, ScrollPage> {
        Box::pin(ScrollClient::next_batch(self, cursor))
    }

    fn release_cursor<'a>(&'a self, cursor: &'a CursorToken) -> SourceFuture<'a, ()> {
        Box::pin(ScrollClient::release_cursor(self, cursor))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory `CursorSource` used by the pipeline tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::record::{Batch, Record};

    /// Serves pre-built pages; each `next_batch` pops the next one.
    pub struct FakeSource {
        first: Mutex<Option<Result<ScrollPage, AppError>>>,
        pages: Mutex<VecDeque<Result<Batch, AppError>>>,
        next_calls: AtomicUsize,
        released: Mutex<Vec<String>>,
        panic_on_next: bool,
    }

    impl FakeSource {
        /// `total` records split into pages of `page_size`, ids 0..total.
        pub fn paged(total: usize, page_size: usize) -> Self {
            let records: Vec<Record> = (0..total).map(record).collect();
            let mut pages: VecDeque<Batch> =
                records.chunks(page_size).map(|c| c.to_vec()).collect();
            let first = pages.pop_front().unwrap_or_default();
            Self::new(Ok(first), pages.into_iter().map(Ok).collect())
        }

        pub fn new(first: Result<Batch, AppError>, pages: Vec<Result<Batch, AppError>>) -> Self {
            let first = first.map(|records| ScrollPage {
                cursor: CursorToken::new("cursor-0"),
                records,
                total_hits: None,
            });
            Self {
                first: Mutex::new(Some(first)),
                pages: Mutex::new(pages.into_iter().collect()),
                next_calls: AtomicUsize::new(0),
                released: Mutex::new(Vec::new()),
                panic_on_next: false,
            }
        }

        /// Serves `first`, then panics on the first `next_batch`.
        pub fn panicking(first: Batch) -> Self {
            Self {
                panic_on_next: true,
                ..Self::new(Ok(first), Vec::new())
            }
        }

        pub fn next_calls(&self) -> usize {
            self.next_calls.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> Vec<String> {
            self.released.lock().unwrap().clone()
        }
    }

    pub fn record(n: usize) -> Record {
        Record::new(json!({ "_id": n.to_string(), "_source": { "n": n } }))
    }

    impl CursorSource for FakeSource {
        fn open_cursor<'a>(&'a self, _query: Option<&'a Value>) -> SourceFuture<'a, ScrollPage> {
            let first = self
                .first
                .lock()
                .unwrap()
                .take()
                .expect("open_cursor called twice");
            Box::pin(async move { first })
        }

        fn next_batch<'a>(&'a self, _cursor: &'a CursorToken) -> SourceFuture<'a, ScrollPage> {
            if self.panic_on_next {
                panic!("cursor source crashed");
            }
            let call = self.next_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let page = self.pages.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
            Box::pin(async move {
                page.map(|records| ScrollPage {
                    cursor: CursorToken::new(format!("cursor-{}", call)),
                    records,
                    total_hits: None,
                })
            })
        }

        fn release_cursor<'a>(&'a self, cursor: &'a CursorToken) -> SourceFuture<'a, ()> {
            self.released
                .lock()
                .unwrap()
                .push(cursor.as_str().to_string());
            Box::pin(async { Ok(()) })
        }
    }
}
