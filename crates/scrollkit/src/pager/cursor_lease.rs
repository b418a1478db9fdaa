//! 🔒 The cursor lease: one scroll context, one owner, one goodbye.
//!
//! A session opens a scroll context on the backend and then has to close it on every way
//! out: limit reached, stream exhausted, mapper exploded, network ghosted us. The lease
//! makes "exactly once" a property of the type. `release` and `hand_over` both take `self`,
//! so after either one there is nothing left to release twice.
//!
//! ⚠️ There is no async `Drop`. A lease dropped without being settled can't call the backend,
//! so it complains loudly in the logs instead. The scroll context will expire on its own
//! when the keep-alive runs out; the warning is there so someone notices before the heap does.

use std::time::Duration;

use tracing::{trace, warn};

use super::with_deadline;
use crate::backends::ScrollBackend;
use crate::common::ScrollCursor;

#[derive(Debug)]
pub(crate) struct CursorLease {
    // 🔖 `None` before the backend issued anything, and again after the lease is settled.
    cursor: Option<ScrollCursor>,
}

impl CursorLease {
    pub(crate) fn new(cursor: Option<ScrollCursor>) -> Self {
        Self { cursor }
    }

    pub(crate) fn cursor(&self) -> Option<&ScrollCursor> {
        self.cursor.as_ref()
    }

    /// 🔄 Tracks the latest cursor the backend handed out. A page without a cursor is the last
    /// page; the pager stops there, and the previous cursor is still the context to release.
    pub(crate) fn renew(&mut self, next: Option<ScrollCursor>) {
        if let Some(next) = next {
            self.cursor = Some(next);
        }
    }

    /// 🗑️ Releases the cursor. Failures and timeouts are logged, never returned: the outcome
    /// of the session already happened and a cleanup hiccup does not get to rewrite it.
    pub(crate) async fn release<B>(mut self, backend: &B, round_trip_timeout: Option<Duration>)
    where
        B: ScrollBackend + ?Sized,
    {
        let Some(cursor) = self.cursor.take() else {
            trace!("🗑️ no cursor was ever issued, nothing to release");
            return;
        };
        match with_deadline("release cursor", round_trip_timeout, backend.release_cursor(&cursor)).await {
            Ok(()) => trace!(%cursor, "🗑️ released scroll cursor"),
            Err(err) => warn!(%cursor, error = %err, "⚠️ could not release scroll cursor; it will expire on its own"),
        }
    }

    /// 🤝 Gives the cursor to the caller, who now owns the obligation to come back for it.
    pub(crate) fn hand_over(mut self) -> Option<ScrollCursor> {
        self.cursor.take()
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            warn!(%cursor, "⚠️ scroll cursor lease dropped without release; the context leaks until its keep-alive expires");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;

    #[tokio::test]
    async fn the_one_where_the_last_cursor_seen_is_the_one_released() {
        let backend = InMemoryBackend::new();
        let mut the_lease = CursorLease::new(Some(ScrollCursor::new("c1")));

        the_lease.renew(Some(ScrollCursor::new("c2")));
        the_lease.renew(None);
        the_lease.release(&backend, None).await;

        assert_eq!(backend.released_cursors(), vec![ScrollCursor::new("c2")]);
    }

    #[tokio::test]
    async fn the_one_where_a_lease_without_a_cursor_never_bothers_the_backend() {
        let backend = InMemoryBackend::new();
        CursorLease::new(None).release(&backend, None).await;
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn the_one_where_handing_over_leaves_nothing_to_release() {
        let the_lease = CursorLease::new(Some(ScrollCursor::new("c1")));
        assert_eq!(the_lease.hand_over(), Some(ScrollCursor::new("c1")));
    }
}
