//! # Previously, on Scrollkit...
//!
//! 🎬 The cluster was down. Or never existed. Or existed but the VPN didn't. Someone still
//! had to test a pager that talks to it. Someone had to write a backend so simple it lives
//! entirely in RAM, gone the moment you blink.
//!
//! That someone was this module.
//!
//! [`InMemoryBackend`] plays back a script: a first page, then a queue of follow-up pages
//! or failures, plus a queue of aggregation responses. Every call it receives is written
//! down in a [`BackendCall`] log so tests can ask the important questions, like "how many
//! times did you release that cursor" (correct answer: once).
//!
//! It can also slice a plain list of documents into pages, which is what the CLI uses for
//! `[backend.InMemory]` and what the bench drains in a hot loop.
//!
//! 🦆
//!
//! ⚠️ Not for production. If you're deploying this to prod, please also deploy a therapist.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::backends::{AggregationBackend, ScrollBackend, ScrollRequest};
use crate::common::{Hit, Page, ScrollCursor};
use crate::errors::BackendError;

/// 🔧 `[backend.InMemory]`: documents to page through and canned aggregation responses.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InMemoryBackendConfig {
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default)]
    pub aggregation_responses: Vec<Value>,
}

/// 📝 One entry in the backend's diary.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SubmitQuery { index: String, page_size: usize },
    FetchNextPage(ScrollCursor),
    ReleaseCursor(ScrollCursor),
    SubmitAggregation { index: String, query: Value },
}

// 🎭 Ok(page) plays, Err(message) fails on cue.
type Scripted<T> = std::result::Result<T, String>;

#[derive(Debug, Default)]
struct Script {
    documents: Option<Vec<Hit>>,
    initial: Option<Scripted<Page>>,
    follow_ups: VecDeque<Scripted<Page>>,
    aggregations: VecDeque<Scripted<Value>>,
    failing_release: bool,
    missing_index: bool,
    latency: Option<Duration>,
    calls: Vec<BackendCall>,
}

/// 📦 A backend that never forgets, and never surprises. Unless you script it to.
///
/// Clone-able because tests hand one copy to the pager and keep another to interrogate.
/// The `Arc` means everyone shares the same script and the same diary.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    script: Arc<Mutex<Script>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📚 Pages through `documents` using whatever page size the query asks for.
    /// Cursors are `mem-cursor-1`, `mem-cursor-2`, ... and the total is exact.
    pub fn from_documents(documents: Vec<Value>) -> Self {
        let hits = documents
            .into_iter()
            .enumerate()
            .map(|(n, doc)| Hit::with_id(format!("mem-{}", n + 1), doc.to_string()))
            .collect();
        let backend = Self::new();
        backend.script().documents = Some(hits);
        backend
    }

    pub fn from_config(config: &InMemoryBackendConfig) -> Self {
        let backend = Self::from_documents(config.documents.clone());
        for response in &config.aggregation_responses {
            backend.script().aggregations.push_back(Ok(response.clone()));
        }
        backend
    }

    /// 🎬 What `submit_query` answers with.
    pub fn with_initial_page(self, page: Page) -> Self {
        self.script().initial = Some(Ok(page));
        self
    }

    /// 💥 `submit_query` fails with this message.
    pub fn with_failing_initial_page(self, message: impl Into<String>) -> Self {
        self.script().initial = Some(Err(message.into()));
        self
    }

    /// ➕ Queue a page for the next `fetch_next_page`.
    pub fn then_page(self, page: Page) -> Self {
        self.script().follow_ups.push_back(Ok(page));
        self
    }

    /// 💥 Queue a failure for the next `fetch_next_page`.
    pub fn then_failure(self, message: impl Into<String>) -> Self {
        self.script().follow_ups.push_back(Err(message.into()));
        self
    }

    /// 🪣 Queue a raw aggregation response.
    pub fn then_aggregation(self, response: Value) -> Self {
        self.script().aggregations.push_back(Ok(response));
        self
    }

    /// 💥 Queue an aggregation failure.
    pub fn then_aggregation_failure(self, message: impl Into<String>) -> Self {
        self.script().aggregations.push_back(Err(message.into()));
        self
    }

    /// 🔍 `submit_query` and `submit_aggregation` answer like the index was never created.
    pub fn with_missing_index(self) -> Self {
        self.script().missing_index = true;
        self
    }

    /// 🗑️ Every release fails. For testing that failures get swallowed, not escalated.
    pub fn with_failing_release(self) -> Self {
        self.script().failing_release = true;
        self
    }

    /// 🐌 Every call sleeps this long first. For timeout tests and for feeling like prod.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script().latency = Some(latency);
        self
    }

    /// 📝 The full diary, in call order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.script().calls.clone()
    }

    /// 🗑️ Just the releases. Tests assert this has exactly one entry. A lot.
    pub fn released_cursors(&self) -> Vec<ScrollCursor> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::ReleaseCursor(cursor) => Some(cursor.clone()),
                _ => None,
            })
            .collect()
    }

    /// 📡 How many follow-up fetches happened.
    pub fn fetch_count(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::FetchNextPage(_)))
            .count()
    }

    /// 🪣 The aggregation queries we received, in order.
    pub fn aggregation_queries(&self) -> Vec<Value> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::SubmitAggregation { query, .. } => Some(query.clone()),
                _ => None,
            })
            .collect()
    }

    // 🔒 A poisoned script is still a script. The panic that poisoned it already failed the test.
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let latency = self.script().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    // 📚 Slices the document list into a first page and a queue of follow-ups.
    fn paginate_documents(script: &mut Script, page_size: usize) -> Option<Page> {
        let documents = script.documents.as_ref()?;
        let total = documents.len() as u64;
        let mut chunks: Vec<Vec<Hit>> = documents
            .chunks(page_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        if chunks.is_empty() {
            chunks.push(Vec::new());
        }

        let mut pages = chunks.into_iter().enumerate().map(|(n, hits)| {
            Page::new(hits, Some(ScrollCursor::new(format!("mem-cursor-{}", n + 1))))
                .with_total_hits(total)
        });
        let first = pages.next();
        script.follow_ups = pages.map(Ok).collect();
        first
    }
}

fn scripted<T>(outcome: Scripted<T>) -> Result<T> {
    outcome.map_err(|message| BackendError::Scripted(message).into())
}

#[async_trait]
impl ScrollBackend for InMemoryBackend {
    async fn submit_query(&self, request: &ScrollRequest) -> Result<Page> {
        self.pause().await;
        let outcome = {
            let mut script = self.script();
            script.calls.push(BackendCall::SubmitQuery {
                index: request.index.clone(),
                page_size: request.page_size,
            });
            if script.missing_index {
                return Err(BackendError::IndexNotFound {
                    index: request.index.clone(),
                }
                .into());
            }
            match script.initial.take() {
                Some(outcome) => outcome,
                None => Ok(Self::paginate_documents(&mut script, request.page_size).unwrap_or_default()),
            }
        };
        trace!(index = %request.index, "🧪 in-memory backend served the opening page");
        scripted(outcome)
    }

    async fn fetch_next_page(&self, cursor: &ScrollCursor, _keep_alive: Duration) -> Result<Page> {
        self.pause().await;
        let outcome = {
            let mut script = self.script();
            script.calls.push(BackendCall::FetchNextPage(cursor.clone()));
            // 💤 Out of script: the stream is over, and there is no cursor to come back to.
            script.follow_ups.pop_front().unwrap_or_else(|| Ok(Page::default()))
        };
        scripted(outcome)
    }

    async fn release_cursor(&self, cursor: &ScrollCursor) -> Result<()> {
        self.pause().await;
        let failing = {
            let mut script = self.script();
            script.calls.push(BackendCall::ReleaseCursor(cursor.clone()));
            script.failing_release
        };
        if failing {
            return scripted(Err(format!("release of '{cursor}' refused on cue")));
        }
        Ok(())
    }
}

#[async_trait]
impl AggregationBackend for InMemoryBackend {
    async fn submit_aggregation(&self, index: &str, query: &Value) -> Result<Value> {
        self.pause().await;
        let outcome = {
            let mut script = self.script();
            script.calls.push(BackendCall::SubmitAggregation {
                index: index.to_string(),
                query: query.clone(),
            });
            if script.missing_index {
                return Err(BackendError::IndexNotFound {
                    index: index.to_string(),
                }
                .into());
            }
            script
                .aggregations
                .pop_front()
                .unwrap_or_else(|| Err("no more scripted aggregation responses".to_string()))
        };
        scripted(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn the_request(page_size: usize) -> ScrollRequest {
        ScrollRequest::new("docs", json!({}), page_size, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn the_one_where_five_documents_become_three_pages_and_a_silence() -> Result<()> {
        let backend = InMemoryBackend::from_documents((1..=5).map(|n| json!({ "doc": n })).collect());

        let first = backend.submit_query(&the_request(2)).await?;
        assert_eq!(first.hits.len(), 2);
        assert_eq!(first.total_hits, Some(5));
        assert_eq!(first.cursor, Some(ScrollCursor::new("mem-cursor-1")));

        let second = backend.fetch_next_page(&ScrollCursor::new("mem-cursor-1"), Duration::ZERO).await?;
        let third = backend.fetch_next_page(&ScrollCursor::new("mem-cursor-2"), Duration::ZERO).await?;
        let the_void = backend.fetch_next_page(&ScrollCursor::new("mem-cursor-3"), Duration::ZERO).await?;

        assert_eq!(second.hits.len(), 2);
        assert_eq!(third.hits.len(), 1);
        assert_eq!(third.hits[0].source_buf, r#"{"doc":5}"#);
        assert!(the_void.is_exhausted());
        assert_eq!(the_void.cursor, None);
        assert_eq!(backend.fetch_count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_script_fails_on_cue_and_the_diary_remembers() {
        let backend = InMemoryBackend::new()
            .then_failure("node left the cluster")
            .with_failing_release();

        let the_fetch = backend.fetch_next_page(&ScrollCursor::new("c1"), Duration::ZERO).await;
        let the_release = backend.release_cursor(&ScrollCursor::new("c1")).await;

        assert!(the_fetch.is_err());
        assert!(the_release.is_err());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::FetchNextPage(ScrollCursor::new("c1")),
                BackendCall::ReleaseCursor(ScrollCursor::new("c1")),
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_an_empty_document_list_is_one_empty_page() -> Result<()> {
        let backend = InMemoryBackend::from_documents(vec![]);
        let the_page = backend.submit_query(&the_request(10)).await?;
        assert!(the_page.is_exhausted());
        assert_eq!(the_page.total_hits, Some(0));
        Ok(())
    }
}
