//! 🎬 *[one config walks into a struct. it limits page size. it limits patience.]*
//! *["We belong together," it said. "In the backends module." The module system nodded.]*
//!
//! 📦 **Scroll config**: the knobs every paging session shares, whatever backend it talks to.
//!
//! 🧠 Knowledge graph:
//! - `page_size`: hits per round trip (`size=` on the initial scroll query)
//! - `keep_alive_secs`: how long the backend keeps the scroll context warm between fetches
//! - `round_trip_timeout_secs`: optional ceiling on each fetch/release, enforced by the pager
//! - `limit`: default cap on records per session, overridable per job
//! - Re-exported from `backends.rs` so callers can `use crate::backends::ScrollConfig`
//!
//! "He who sets size=100000, meets the max_result_window in production."
//!   Ancient Elasticsearch proverb, learned the hard way 💀

use std::time::Duration;

use serde::Deserialize;

use crate::common::ResultLimit;

/// 📏 The backend refuses to return more than this many hits per request.
/// Page sizes are capped here no matter what the config dreams about.
pub const MAX_RESPONSE_SIZE_LIMIT: usize = 10_000;

/// 📦 Shared paging configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScrollConfig {
    /// 📦 Hits per round trip. Capped at [`MAX_RESPONSE_SIZE_LIMIT`].
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// ⏳ Scroll keep-alive, sent with every fetch.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// ⏱️ Per round trip deadline. `None` trusts the HTTP client's own timeout.
    #[serde(default)]
    pub round_trip_timeout_secs: Option<u64>,
    /// 🛑 Default record cap. Absent means unbounded.
    #[serde(default)]
    pub limit: ResultLimit,
}

// 📦 1000 hits: big enough to be worth the round trip, small enough to not OOM the laptop.
fn default_page_size() -> usize {
    1000
}

// ⏳ 60 seconds between fetches before the backend forgets us. Plenty, unless the mapper is doing
// something it shouldn't.
fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            keep_alive_secs: default_keep_alive_secs(),
            round_trip_timeout_secs: None,
            limit: ResultLimit::unbounded(),
        }
    }
}

impl ScrollConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn round_trip_timeout(&self) -> Option<Duration> {
        self.round_trip_timeout_secs.map(Duration::from_secs)
    }

    /// 📐 The page size to actually ask for.
    ///
    /// No point asking for 1000 hits when the caller wants 5. No point asking for
    /// 50_000 when the backend caps at 10_000. And never 0: a zero-size scroll is a
    /// scroll that never ends, which is a different kind of bug.
    pub fn effective_page_size(&self, limit: ResultLimit) -> usize {
        let mut page_size = self.page_size.min(MAX_RESPONSE_SIZE_LIMIT);
        if let Some(max_records) = limit.max_records().filter(|max| *max > 0) {
            page_size = page_size.min(max_records);
        }
        page_size.max(1)
    }
}
