//! 📜 The scroll pager: many round trips in, one tidy `Vec` out.
//!
//! 🎬 COLD OPEN: INT. REPORT SERVICE, MONTH-END CLOSE
//!
//! Finance wants every process instance from last quarter. All 2.3 million of them. The
//! cluster hands them over a thousand at a time, behind a cursor that lives on a data node
//! and eats heap until someone says "thanks, I'm done". This module is the someone.
//!
//! ## Knowledge Graph 🧠
//! - [`ScrollPager::drain_to_limit`]: pull pages until the limit or the end, map every hit, release
//! - [`ScrollPager::scroll_query`]: submit the opening query, then drain. A missing index is an empty list
//! - [`ScrollPager::fetch_one_page`]: one caller-visible page per call, with a [`PagingState`] to resume
//! - [`ScrollPager::for_each_page`]: raw pages to a callback, for processors that don't want a `Vec`
//! - [`map_hits`]: one response already in hand, mapped up to a limit. No cursor involved
//! - `CursorLease`: the one place a cursor gets released, exactly once per session
//! - Every backend call goes through [`with_deadline`], which is where the optional timeout lives
//!
//! ⚠️ Pages are consumed strictly in order. No prefetch, no parallelism, no reordering.
//! The next page is not requested until every hit of the current one is mapped. 🦆

use std::any::type_name;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::backends::{ScrollBackend, ScrollConfig, ScrollRequest};
use crate::common::{Hit, Page, PageResult, PagingState, ResultLimit};
use crate::errors::{BackendError, ScrollError};
use crate::mappers::RecordMapper;

mod cursor_lease;

use cursor_lease::CursorLease;

/// ⏱️ Runs one backend round trip, with a deadline if there is one.
///
/// Backend errors become [`ScrollError::BackendFetch`]; a blown deadline becomes
/// [`ScrollError::TimedOut`] naming the `operation`.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Option<Duration>,
    call: F,
) -> Result<T, ScrollError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, call).await {
            Ok(outcome) => outcome.map_err(ScrollError::BackendFetch),
            Err(_elapsed) => Err(ScrollError::TimedOut { operation, after }),
        },
        None => call.await.map_err(ScrollError::BackendFetch),
    }
}

fn map_one<T, M>(mapper: &M, hit: &Hit) -> Result<T, ScrollError>
where
    M: RecordMapper<T> + ?Sized,
{
    mapper.map_hit(hit).map_err(|source| ScrollError::Mapping {
        target: type_name::<T>(),
        source,
    })
}

/// 🗺️ Maps the hits of one response the caller already holds, up to `limit`.
///
/// No backend, no cursor, no await. For the many places that ran a plain search and just
/// want typed records out of it. The first hit that refuses to map fails the whole batch.
pub fn map_hits<T, M>(hits: &[Hit], mapper: &M, limit: ResultLimit) -> Result<Vec<T>, ScrollError>
where
    M: RecordMapper<T> + ?Sized,
{
    let room = limit.remaining(0).unwrap_or(usize::MAX);
    hits.iter().take(room).map(|hit| map_one(mapper, hit)).collect()
}

// 🧺 How a caller page was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gathered {
    // Nothing left anywhere.
    Finished,
    // The backend may have more behind the cursor.
    MoreBehindCursor,
    // The backend is done, but hits pulled past the limit are still waiting in carry-over.
    OnlyCarryOver,
}

/// 🚪 Where a caller-driven page starts from.
#[derive(Debug, Clone)]
pub enum PageStart {
    /// 🆕 Open a fresh session with this query.
    Query(ScrollRequest),
    /// 🔁 Pick up where a previous [`PageResult::next`] left off.
    Resume(PagingState),
}

/// 📜 Pages through one backend's scroll API on behalf of a caller.
///
/// Borrows the backend; owns nothing but its settings. Every session it runs owns its
/// own cursor, so one pager can serve concurrent sessions without them stepping on each other.
#[derive(Debug)]
pub struct ScrollPager<'b, B: ScrollBackend + ?Sized> {
    backend: &'b B,
    keep_alive: Duration,
    round_trip_timeout: Option<Duration>,
}

impl<'b, B: ScrollBackend + ?Sized> ScrollPager<'b, B> {
    pub fn new(backend: &'b B, keep_alive: Duration) -> Self {
        Self {
            backend,
            keep_alive,
            round_trip_timeout: None,
        }
    }

    pub fn from_config(backend: &'b B, config: &ScrollConfig) -> Self {
        Self::new(backend, config.keep_alive()).with_round_trip_timeout(config.round_trip_timeout())
    }

    /// ⏱️ Every fetch and release gets at most this long. `None` trusts the backend's own timeout.
    pub fn with_round_trip_timeout(mut self, round_trip_timeout: Option<Duration>) -> Self {
        self.round_trip_timeout = round_trip_timeout;
        self
    }

    async fn submit(&self, request: &ScrollRequest) -> Result<Page, ScrollError> {
        trace!(index = %request.index, page_size = request.page_size, "📨 submitting scroll query");
        with_deadline("submit query", self.round_trip_timeout, self.backend.submit_query(request)).await
    }

    // 📡 The fetched page comes back as is. A page with no cursor is the last one; the lease
    // keeps the previous cursor so that one still gets released.
    async fn fetch_after(&self, lease: &mut CursorLease) -> Result<Option<Page>, ScrollError> {
        let Some(cursor) = lease.cursor().cloned() else {
            return Ok(None);
        };
        trace!(%cursor, "📡 fetching next page");
        let page = with_deadline(
            "fetch next page",
            self.round_trip_timeout,
            self.backend.fetch_next_page(&cursor, self.keep_alive),
        )
        .await?;
        lease.renew(page.cursor.clone());
        Ok(Some(page))
    }

    /// 🚰 Maps up to `limit` records, starting from an already-fetched first page.
    ///
    /// Fetches more pages only while the limit is not reached and the stream is not over.
    /// The cursor of the last page seen is released on every exit path, errors included.
    pub async fn drain_to_limit<T, M>(&self, initial: Page, mapper: &M, limit: ResultLimit) -> Result<Vec<T>, ScrollError>
    where
        M: RecordMapper<T> + ?Sized,
    {
        let mut lease = CursorLease::new(initial.cursor.clone());
        let outcome = self.drain_pages(initial, mapper, limit, &mut lease).await;
        lease.release(self.backend, self.round_trip_timeout).await;
        if let Ok(ref records) = outcome {
            info!(records = records.len(), limit = ?limit.max_records(), "✅ scroll session drained");
        }
        outcome
    }

    async fn drain_pages<T, M>(
        &self,
        initial: Page,
        mapper: &M,
        limit: ResultLimit,
        lease: &mut CursorLease,
    ) -> Result<Vec<T>, ScrollError>
    where
        M: RecordMapper<T> + ?Sized,
    {
        let total_hits = initial.total_hits;
        let mut hits_fetched = initial.hits.len() as u64;
        let mut records = Vec::new();
        let mut page = initial;

        while !page.is_exhausted() {
            let room = ResultLimit::from(limit.remaining(records.len()));
            records.extend(map_hits(&page.hits, mapper, room)?);
            debug!(page_hits = page.hits.len(), records = records.len(), "📄 mapped a page");

            if limit.is_reached(records.len()) {
                break;
            }
            if page.cursor.is_none() {
                trace!("🏁 the page came without a cursor, so it was the last one");
                break;
            }
            if total_hits.is_some_and(|total| hits_fetched >= total) {
                trace!(total = ?total_hits, "🏁 every hit the backend promised has arrived");
                break;
            }
            page = match self.fetch_after(lease).await? {
                Some(next) => next,
                None => break,
            };
            hits_fetched += page.hits.len() as u64;
        }
        Ok(records)
    }

    /// 🔍 Submits `request` and drains it up to `limit`.
    ///
    /// An index that doesn't exist yet is not an error here: no index, no records.
    pub async fn scroll_query<T, M>(
        &self,
        request: &ScrollRequest,
        mapper: &M,
        limit: ResultLimit,
    ) -> Result<Vec<T>, ScrollError>
    where
        M: RecordMapper<T> + ?Sized,
    {
        let initial = match self.submit(request).await {
            Ok(page) => page,
            Err(ScrollError::BackendFetch(source)) if BackendError::is_index_not_found(&source) => {
                info!(index = %request.index, "🔍 index does not exist, returning an empty result");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };
        self.drain_to_limit(initial, mapper, limit).await
    }

    /// 📬 One caller-visible page of at most `limit` records, plus a way back for more.
    ///
    /// `next` is `None` once the stream is over, and then the cursor is already released.
    /// Otherwise the live cursor travels inside `next` and it is the caller's to resume.
    /// Hits pulled past `limit` ride along in `next.carry_over` and come out first next time.
    ///
    /// The end of the stream is an empty page, a page without a cursor, or an exact backend
    /// total fully pulled. A short page on its own proves nothing. When the page fills up
    /// exactly and the backend gave no exact total, one more page is pulled to find out.
    /// If the backend is done but hits are still waiting, the cursor is released right away
    /// and `next` carries only those hits.
    pub async fn fetch_one_page<T, M>(&self, start: PageStart, mapper: &M, limit: usize) -> Result<PageResult<T>, ScrollError>
    where
        M: RecordMapper<T> + ?Sized,
    {
        let mut state = match start {
            PageStart::Query(request) => {
                let first = self.submit(&request).await?;
                if first.is_exhausted() {
                    CursorLease::new(first.cursor).release(self.backend, self.round_trip_timeout).await;
                    debug!(index = %request.index, "🏁 the very first page was empty");
                    return Ok(PageResult {
                        records: Vec::new(),
                        next: None,
                    });
                }
                PagingState {
                    cursor: first.cursor,
                    hits_fetched: first.hits.len() as u64,
                    carry_over: first.hits,
                    total_hits: first.total_hits,
                }
            }
            PageStart::Resume(state) => state,
        };

        let mut lease = CursorLease::new(state.cursor.take());
        let (records, gathered) = match self.gather_page(&mut state, mapper, limit, &mut lease).await {
            Ok(done) => done,
            Err(err) => {
                lease.release(self.backend, self.round_trip_timeout).await;
                return Err(err);
            }
        };

        if gathered == Gathered::Finished || records.is_empty() {
            lease.release(self.backend, self.round_trip_timeout).await;
            debug!(records = records.len(), "🏁 caller-driven session finished");
            return Ok(PageResult { records, next: None });
        }
        state.cursor = match gathered {
            Gathered::OnlyCarryOver => {
                // 🧹 The backend has nothing more to say. Close it now; the token only carries hits.
                lease.release(self.backend, self.round_trip_timeout).await;
                None
            }
            _ => lease.hand_over(),
        };
        debug!(
            records = records.len(),
            carry_over = state.carry_over.len(),
            live_cursor = state.cursor.is_some(),
            "🎟️ handing the session to the caller"
        );
        Ok(PageResult {
            records,
            next: Some(state),
        })
    }

    // 🧺 Fills one caller page and says what is left behind it.
    async fn gather_page<T, M>(
        &self,
        state: &mut PagingState,
        mapper: &M,
        limit: usize,
        lease: &mut CursorLease,
    ) -> Result<(Vec<T>, Gathered), ScrollError>
    where
        M: RecordMapper<T> + ?Sized,
    {
        let mut records = Vec::new();
        let mut stream_ended = false;
        loop {
            let mut buffered = std::mem::take(&mut state.carry_over).into_iter();
            for hit in buffered.by_ref().take(limit.saturating_sub(records.len())) {
                records.push(map_one(mapper, &hit)?);
            }
            state.carry_over = buffered.collect();

            let backend_drained = stream_ended
                || lease.cursor().is_none()
                || state.total_hits.is_some_and(|total| state.hits_fetched >= total);
            if records.len() >= limit {
                if backend_drained {
                    let gathered = if state.carry_over.is_empty() {
                        Gathered::Finished
                    } else {
                        Gathered::OnlyCarryOver
                    };
                    return Ok((records, gathered));
                }
                if !state.carry_over.is_empty() || state.total_hits.is_some() || records.is_empty() {
                    return Ok((records, Gathered::MoreBehindCursor));
                }
                // 🔭 Exactly full and no total to trust: one more page tells "done" from "more".
                trace!(records = records.len(), "🔭 page filled exactly, looking one page ahead");
            } else if backend_drained {
                return Ok((records, Gathered::Finished));
            }

            let Some(page) = self.fetch_after(lease).await? else {
                return Ok((records, Gathered::Finished));
            };
            if page.is_exhausted() {
                return Ok((records, Gathered::Finished));
            }
            state.hits_fetched += page.hits.len() as u64;
            if state.total_hits.is_none() {
                state.total_hits = page.total_hits;
            }
            stream_ended = page.cursor.is_none();
            state.carry_over = page.hits;
        }
    }

    /// 🏭 Streams raw pages to `consumer` until the stream ends, then releases the cursor.
    ///
    /// For processors that handle hits a page at a time instead of collecting them.
    /// A consumer error aborts the session as [`ScrollError::ConsumerAborted`].
    /// Returns how many hits the consumer saw.
    pub async fn for_each_page<F>(&self, initial: Page, mut consumer: F) -> Result<u64, ScrollError>
    where
        F: FnMut(&[Hit]) -> anyhow::Result<()>,
    {
        let mut lease = CursorLease::new(initial.cursor.clone());
        let total_hits = initial.total_hits;
        let mut page = initial;
        let mut seen: u64 = 0;

        let outcome = loop {
            if page.is_exhausted() {
                break Ok(seen);
            }
            if let Err(err) = consumer(&page.hits) {
                break Err(ScrollError::ConsumerAborted(err));
            }
            seen += page.hits.len() as u64;
            if total_hits.is_some_and(|total| seen >= total) || page.cursor.is_none() {
                break Ok(seen);
            }
            page = match self.fetch_after(&mut lease).await {
                Ok(Some(next)) => next,
                Ok(None) => break Ok(seen),
                Err(err) => break Err(err),
            };
        };
        lease.release(self.backend, self.round_trip_timeout).await;
        outcome
    }
}
