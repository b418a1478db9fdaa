//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 The pager asks for pages. A backend hands them over. The pager says "I'm done with
//! this cursor". The backend lets it go. That's the whole relationship. Healthier than most.
//!
//! 🎭 This module is the casting agency. Need pages from an Elasticsearch cluster? Need
//! scripted pages that fail on cue for a test? We've got a backend for that. Both of them
//! play the same two roles:
//!
//! - [`ScrollBackend`]: submit a query, fetch the next page by cursor, release the cursor
//! - [`AggregationBackend`]: submit a (composite) aggregation query, get the raw response back
//!
//! The pager and the composite scroller only ever see these traits. They do not know HTTP
//! exists. They are happier that way.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::common::{Page, ScrollCursor};

pub mod common_config;
pub mod elasticsearch;
pub mod in_mem;

// 🎯 Re-exports so callers can do `backends::ScrollConfig` instead of spelunking.
pub use common_config::{MAX_RESPONSE_SIZE_LIMIT, ScrollConfig};
pub use elasticsearch::{ElasticsearchBackend, ElasticsearchBackendConfig};
pub use in_mem::{BackendCall, InMemoryBackend, InMemoryBackendConfig};

/// 📨 Everything needed to open a scroll session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollRequest {
    pub index: String,
    /// 🔍 The request body. Query DSL lives here and nowhere else in this crate.
    pub query: Value,
    pub page_size: usize,
    pub keep_alive: Duration,
}

impl ScrollRequest {
    pub fn new(index: impl Into<String>, query: Value, page_size: usize, keep_alive: Duration) -> Self {
        Self {
            index: index.into(),
            query,
            page_size,
            keep_alive,
        }
    }
}

// ===== Capability traits =====

/// 🚰 A backend that can hand out pages of hits behind a server-side cursor.
///
/// # Contract
/// - `submit_query` opens the cursor and returns the first page.
/// - `fetch_next_page` returns the page after `cursor`. Empty hits means the end.
/// - `release_cursor` frees server-side state. Best-effort: callers log its errors and move on.
///   Must tolerate a cursor the backend already closed on its own.
#[async_trait]
pub trait ScrollBackend: std::fmt::Debug + Send + Sync {
    async fn submit_query(&self, request: &ScrollRequest) -> Result<Page>;

    async fn fetch_next_page(&self, cursor: &ScrollCursor, keep_alive: Duration) -> Result<Page>;

    async fn release_cursor(&self, cursor: &ScrollCursor) -> Result<()>;
}

/// 🪣 A backend that can run aggregation queries.
///
/// Returns the raw response body. Digging the buckets out of it is the composite
/// scroller's job, because only it knows the aggregation path.
#[async_trait]
pub trait AggregationBackend: std::fmt::Debug + Send + Sync {
    async fn submit_aggregation(&self, index: &str, query: &Value) -> Result<Value>;
}

// ===== Config + dispatch =====

/// 🔧 Which backend to talk to. Externally tagged in TOML: `[backend.Elasticsearch]`.
#[derive(Debug, Deserialize, Clone)]
pub enum BackendConfig {
    Elasticsearch(ElasticsearchBackendConfig),
    InMemory(InMemoryBackendConfig),
}

/// 🎭 The many faces of a backend: a polymorphic casting call for data origins.
///
/// Dispatches by `match`, so callers never care whether pages come from a cluster of
/// overworked nodes or a `VecDeque`. Ancient proverb: "He who hardcodes the backend,
/// pages only once."
#[derive(Debug)]
pub enum SearchBackend {
    Elasticsearch(ElasticsearchBackend),
    InMemory(InMemoryBackend),
}

impl SearchBackend {
    /// 🏗️ Builds the backend the config asks for.
    pub async fn from_config(config: &BackendConfig) -> Result<Self> {
        Ok(match config {
            BackendConfig::Elasticsearch(es) => {
                SearchBackend::Elasticsearch(ElasticsearchBackend::new(es.clone()).await?)
            }
            BackendConfig::InMemory(mem) => SearchBackend::InMemory(InMemoryBackend::from_config(mem)),
        })
    }
}

#[async_trait]
impl ScrollBackend for SearchBackend {
    async fn submit_query(&self, request: &ScrollRequest) -> Result<Page> {
        match self {
            SearchBackend::Elasticsearch(es) => es.submit_query(request).await,
            SearchBackend::InMemory(mem) => mem.submit_query(request).await,
        }
    }

    async fn fetch_next_page(&self, cursor: &ScrollCursor, keep_alive: Duration) -> Result<Page> {
        match self {
            SearchBackend::Elasticsearch(es) => es.fetch_next_page(cursor, keep_alive).await,
            SearchBackend::InMemory(mem) => mem.fetch_next_page(cursor, keep_alive).await,
        }
    }

    async fn release_cursor(&self, cursor: &ScrollCursor) -> Result<()> {
        match self {
            SearchBackend::Elasticsearch(es) => es.release_cursor(cursor).await,
            SearchBackend::InMemory(mem) => mem.release_cursor(cursor).await,
        }
    }
}

#[async_trait]
impl AggregationBackend for SearchBackend {
    async fn submit_aggregation(&self, index: &str, query: &Value) -> Result<Value> {
        match self {
            SearchBackend::Elasticsearch(es) => es.submit_aggregation(index, query).await,
            SearchBackend::InMemory(mem) => mem.submit_aggregation(index, query).await,
        }
    }
}
