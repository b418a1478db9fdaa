//! 📦 Common data structures: the building blocks of scrollkit
//!
//! ---
//!
//! 🎬 COLD OPEN: INT. DATA CENTER, 3:47 AM
//!
//! 🌩️ The lights flicker. A lone cursor blinks. Not the terminal cursor. The OTHER
//! cursor. The one living on a search node, holding a scroll context open, eating heap,
//! waiting for someone to say goodbye. Nobody said goodbye. Nobody ever says goodbye.
//!
//! ✅ This module defines the humble structs that ferry pages of hits from the backend
//! to the pager: a [`Page`] of [`Hit`]s, the [`ScrollCursor`] that points at the next
//! one, the [`ResultLimit`] that says "enough", and the [`PagingState`] a caller keeps
//! between requests when paging is their problem instead of ours.
//!
//! 🦆
//!
//! ⚠️ NOTE: No sentinel integers were harmed in the making of this module.
//! "Unbounded" is `None`. It was always `None`. `i32::MAX` can go home.

use serde::{Deserialize, Serialize};

use crate::errors::ScrollError;

/// 🎯 A singular `Hit`: one document, one destiny, zero guarantees.
///
/// The raw shape of a search result before any mapper has had its way with it.
/// `source_buf` is the unparsed `_source` JSON. We do not parse it here because
/// parsing is the mapper's job, and the mapper has feelings about types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Hit {
    /// 🪪 The document id, if the backend bothered to tell us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// 📡 The index the hit came from. Aliases resolve to real names here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// 🔧 Custom routing key, for the three people who use custom routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,

    /// 📦 The raw document payload. Valid JSON until proven otherwise.
    pub source_buf: String,
}

impl Hit {
    /// 🏗️ A hit with nothing but a body. Identity is optional, like breakfast.
    pub fn new(source_buf: impl Into<String>) -> Self {
        Self {
            source_buf: source_buf.into(),
            ..Self::default()
        }
    }

    /// 🪪 Same as [`Hit::new`] but with a name tag.
    pub fn with_id(id: impl Into<String>, source_buf: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            source_buf: source_buf.into(),
            ..Self::default()
        }
    }
}

/// 🔖 An opaque, backend-issued scroll handle.
///
/// Owned by exactly one paging session at a time. We never look inside it.
/// Looking inside it would be rude, and also pointless: it's base64 soup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScrollCursor(String);

impl ScrollCursor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScrollCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 📄 One round trip's worth of hits, plus directions to the next round trip.
///
/// No hits means end of stream. A missing cursor means we can't ask for more
/// even if we wanted to, which is its own kind of end of stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub hits: Vec<Hit>,
    pub cursor: Option<ScrollCursor>,
    /// 📊 Exact total reported by the backend. `None` when unknown or only a lower bound.
    pub total_hits: Option<u64>,
}

impl Page {
    pub fn new(hits: Vec<Hit>, cursor: Option<ScrollCursor>) -> Self {
        Self {
            hits,
            cursor,
            total_hits: None,
        }
    }

    pub fn with_total_hits(mut self, total_hits: u64) -> Self {
        self.total_hits = Some(total_hits);
        self
    }

    /// 🏁 Zero hits. The well is dry.
    pub fn is_exhausted(&self) -> bool {
        self.hits.is_empty()
    }
}

/// 🛑 How many mapped records a session may return, across all pages.
///
/// `None` is unbounded. Deserialises from an optional integer so config files
/// can just say `limit = 500` or not say anything at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLimit(Option<usize>);

impl ResultLimit {
    pub const fn unbounded() -> Self {
        Self(None)
    }

    pub const fn at_most(max_records: usize) -> Self {
        Self(Some(max_records))
    }

    pub fn max_records(&self) -> Option<usize> {
        self.0
    }

    pub fn is_bounded(&self) -> bool {
        self.0.is_some()
    }

    /// 🔢 How many more records fit. `None` means "all of them, go wild".
    pub fn remaining(&self, taken: usize) -> Option<usize> {
        self.0.map(|max| max.saturating_sub(taken))
    }

    pub fn is_reached(&self, taken: usize) -> bool {
        self.0.is_some_and(|max| taken >= max)
    }
}

impl From<Option<usize>> for ResultLimit {
    fn from(value: Option<usize>) -> Self {
        Self(value)
    }
}

/// 🧳 Everything a caller-driven session needs to pick up where it left off.
///
/// Handed out by [`crate::pager::ScrollPager::fetch_one_page`] whenever the
/// stream is not exhausted. `carry_over` holds hits we already pulled off the
/// backend but could not return without blowing the limit. They get served
/// first next time, because dropping them on the floor is how reports lose rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingState {
    pub cursor: Option<ScrollCursor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carry_over: Vec<Hit>,
    pub hits_fetched: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u64>,
}

impl PagingState {
    /// 🎟️ Turns the state into an opaque token a REST client can hold onto.
    pub fn encode(&self) -> String {
        // 🐛 Serialising plain strings and integers into a String cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 🎟️ The reverse trip. Garbage in, `InvalidPagingToken` out.
    pub fn decode(token: &str) -> Result<Self, ScrollError> {
        serde_json::from_str(token).map_err(ScrollError::InvalidPagingToken)
    }
}

/// 📬 One caller-driven page: the records, and maybe a way back for more.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    pub records: Vec<T>,
    /// 🚪 `None` once the stream is exhausted. Don't knock, nobody's home.
    pub next: Option<PagingState>,
}

impl<T> PageResult<T> {
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    pub fn next_token(&self) -> Option<String> {
        self.next.as_ref().map(PagingState::encode)
    }
}
