//! 🪣 Composite aggregation scrolling: paging through buckets instead of documents.
//!
//! 🎬 COLD OPEN: INT. DASHBOARD BACKEND, TUESDAY
//!
//! "How many instances per process definition, per tenant, per version?" Forty thousand
//! combinations, and a terms aggregation that gives up after ten thousand. The composite
//! aggregation pages instead: every response ends with an `after_key`, and the next request
//! says "after that, please". No server-side cursor, no cleanup, just a key carried forward.
//!
//! 🧠 Knowledge graph:
//! - [`CompositeAggregationScroller`]: issues the query, walks the aggregation path, hands buckets out
//!   - `consume_page`: one page, returns "has more"
//!   - `scroll_all_buckets`: every page, returns how many buckets went by
//!   - `into_stream`: the same buckets as a lazy `Stream`, one pass, no callbacks
//! - [`CompositeQueryTemplate`]: a query body plus the path to its composite aggregation,
//!   rendered with the current after-key on every page
//! - The path is a list of aggregation names: `["filtered", "by_definition"]` means
//!   `aggregations.filtered.by_definition` in the response and `aggs.filtered.aggs.by_definition`
//!   in the request
//!
//! ⚠️ An error ends the scroll. Buckets already handed to the consumer stay handed; assume the
//! stream is incomplete.

use std::any::type_name;
use std::time::Duration;

use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::backends::AggregationBackend;
use crate::errors::ScrollError;
use crate::pager::with_deadline;

/// 🔑 The composite aggregation's position marker. Opaque to us, echoed back as `after`.
pub type AfterKey = Map<String, Value>;

/// 🪣 One bucket: its composite key, its count, and whatever sub-aggregations rode along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBucket {
    pub key: AfterKey,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(flatten)]
    pub sub_aggregations: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CompositePage {
    #[serde(default)]
    buckets: Vec<CompositeBucket>,
    #[serde(default)]
    after_key: Option<AfterKey>,
}

fn path_not_found(path: &[String], missing: &str) -> ScrollError {
    ScrollError::AggregationPathNotFound {
        path: path.join("/"),
        missing: missing.to_string(),
    }
}

// 🗺️ `aggregations.<name>.<name>...` down to the composite aggregation's result.
fn extract_page(response: &Value, path: &[String]) -> Result<CompositePage, ScrollError> {
    let mut node = response
        .get("aggregations")
        .ok_or_else(|| path_not_found(path, "aggregations"))?;
    for name in path {
        node = node.get(name).ok_or_else(|| path_not_found(path, name))?;
    }
    CompositePage::deserialize(node).map_err(|err| ScrollError::Mapping {
        target: type_name::<CompositeBucket>(),
        source: err.into(),
    })
}

/// 🪣 Scrolls one composite aggregation, page by page, after-key by after-key.
///
/// `build_query` gets the current after-key (`None` on the first page) and returns the
/// full request body. Each scroller owns its after-key; nothing is shared between scrollers.
pub struct CompositeAggregationScroller<'b, B: AggregationBackend + ?Sized, Q> {
    backend: &'b B,
    index: String,
    path: Vec<String>,
    build_query: Q,
    after_key: Option<AfterKey>,
    exhausted: bool,
    pages: u64,
    buckets_seen: u64,
    round_trip_timeout: Option<Duration>,
}

impl<B: AggregationBackend + ?Sized, Q> std::fmt::Debug for CompositeAggregationScroller<'_, B, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAggregationScroller")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("after_key", &self.after_key)
            .field("exhausted", &self.exhausted)
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

impl<'b, B, Q> CompositeAggregationScroller<'b, B, Q>
where
    B: AggregationBackend + ?Sized,
    Q: Fn(Option<&AfterKey>) -> Value + Send + Sync,
{
    pub fn new(backend: &'b B, index: impl Into<String>, path: Vec<String>, build_query: Q) -> Self {
        Self {
            backend,
            index: index.into(),
            path,
            build_query,
            after_key: None,
            exhausted: false,
            pages: 0,
            buckets_seen: 0,
            round_trip_timeout: None,
        }
    }

    pub fn with_round_trip_timeout(mut self, round_trip_timeout: Option<Duration>) -> Self {
        self.round_trip_timeout = round_trip_timeout;
        self
    }

    /// 🔑 The after-key the next page will be requested with.
    pub fn after_key(&self) -> Option<&AfterKey> {
        self.after_key.as_ref()
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    // 📡 One round trip. `None` once the aggregation has nothing left.
    async fn next_buckets(&mut self) -> Result<Option<Vec<CompositeBucket>>, ScrollError> {
        if self.exhausted {
            return Ok(None);
        }
        let query = (self.build_query)(self.after_key.as_ref());
        trace!(index = %self.index, after_key = ?self.after_key, "🪣 requesting composite page");
        let response = with_deadline(
            "submit aggregation",
            self.round_trip_timeout,
            self.backend.submit_aggregation(&self.index, &query),
        )
        .await?;
        let page = extract_page(&response, &self.path)?;
        self.pages += 1;

        if page.buckets.is_empty() {
            self.exhausted = true;
            debug!(pages = self.pages, buckets = self.buckets_seen, "🏁 composite aggregation ran dry");
            return Ok(None);
        }
        match page.after_key {
            Some(after_key) => self.after_key = Some(after_key),
            None => {
                self.exhausted = true;
                debug!(pages = self.pages, "🏁 no after_key, last composite page");
            }
        }
        self.buckets_seen += page.buckets.len() as u64;
        Ok(Some(page.buckets))
    }

    /// 📄 Fetches one page and feeds its buckets to `consumer`, in order.
    ///
    /// Returns whether another page may follow. Once it says `false`, further calls are
    /// no-ops that say `false` again.
    pub async fn consume_page<F>(&mut self, mut consumer: F) -> Result<bool, ScrollError>
    where
        F: FnMut(CompositeBucket) -> anyhow::Result<()>,
    {
        let Some(buckets) = self.next_buckets().await? else {
            return Ok(false);
        };
        for bucket in buckets {
            consumer(bucket).map_err(ScrollError::ConsumerAborted)?;
        }
        Ok(!self.exhausted)
    }

    /// 🚰 Every bucket of every page to `consumer`. Returns how many buckets it saw.
    pub async fn scroll_all_buckets<F>(mut self, mut consumer: F) -> Result<u64, ScrollError>
    where
        F: FnMut(CompositeBucket) -> anyhow::Result<()>,
    {
        while self.consume_page(&mut consumer).await? {}
        debug!(pages = self.pages, buckets = self.buckets_seen, index = %self.index, "✅ composite scroll finished");
        Ok(self.buckets_seen)
    }

    /// 🌊 The buckets as a lazy, single-pass stream. Nothing is fetched until polled.
    pub fn into_stream(self) -> impl Stream<Item = Result<CompositeBucket, ScrollError>> + 'b
    where
        Q: 'b,
    {
        stream::try_unfold(self, |mut scroller| async move {
            match scroller.next_buckets().await? {
                Some(buckets) => Ok::<_, ScrollError>(Some((
                    stream::iter(buckets.into_iter().map(Ok::<_, ScrollError>)),
                    scroller,
                ))),
                None => Ok(None),
            }
        })
        .try_flatten()
    }
}

/// 📝 A composite aggregation query body, and where in it the composite lives.
///
/// Validated once on construction; [`render`](Self::render) then only ever sets or clears
/// `composite.after`. Everything else about the query is the caller's business.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeQueryTemplate {
    body: Value,
    path: Vec<String>,
}

// 🔍 Requests spell it `aggs` or `aggregations`. Both work on the server, so both work here.
fn child_aggregations_key(node: &Value) -> &'static str {
    if node.get("aggs").is_some() { "aggs" } else { "aggregations" }
}

impl CompositeQueryTemplate {
    pub fn new(body: Value, path: Vec<String>) -> Result<Self, ScrollError> {
        let mut node = &body;
        for name in &path {
            node = node
                .get(child_aggregations_key(node))
                .and_then(|aggs| aggs.get(name))
                .ok_or_else(|| path_not_found(&path, name))?;
        }
        if !node.get("composite").is_some_and(Value::is_object) {
            return Err(path_not_found(&path, "composite"));
        }
        Ok(Self { body, path })
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// 🖨️ The body with `after` set to `after_key`, or without `after` when there is none.
    pub fn render(&self, after_key: Option<&AfterKey>) -> Value {
        let mut body = self.body.clone();
        if let Some(composite) = Self::composite_mut(&mut body, &self.path) {
            match after_key {
                Some(after_key) => {
                    composite.insert("after".to_string(), Value::Object(after_key.clone()));
                }
                None => {
                    composite.remove("after");
                }
            }
        }
        body
    }

    fn composite_mut<'v>(body: &'v mut Value, path: &[String]) -> Option<&'v mut Map<String, Value>> {
        let mut node = body;
        for name in path {
            let key = child_aggregations_key(node);
            node = node.get_mut(key)?.get_mut(name)?;
        }
        node.get_mut("composite")?.as_object_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use serde_json::json;

    fn by_name_template() -> CompositeQueryTemplate {
        CompositeQueryTemplate::new(
            json!({
                "size": 0,
                "aggs": {
                    "by_name": {
                        "composite": {
                            "size": 2,
                            "sources": [ { "name": { "terms": { "field": "name" } } } ]
                        }
                    }
                }
            }),
            vec!["by_name".to_string()],
        )
        .expect("a valid template")
    }

    fn bucket(name: &str, doc_count: u64) -> Value {
        json!({ "key": { "name": name }, "doc_count": doc_count })
    }

    fn response(buckets: Vec<Value>, after: Option<&str>) -> Value {
        let mut by_name = json!({ "buckets": buckets });
        if let Some(after) = after {
            by_name["after_key"] = json!({ "name": after });
        }
        json!({ "aggregations": { "by_name": by_name } })
    }

    fn name_of(bucket: &CompositeBucket) -> String {
        bucket.key["name"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn the_one_where_two_pages_of_buckets_arrive_in_order() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 3), bucket("B", 1)], Some("B")))
            .then_aggregation(response(vec![bucket("C", 7)], None));
        let template = by_name_template();
        let mut seen = Vec::new();

        let the_count = CompositeAggregationScroller::new(&backend, "variables", template.path().to_vec(), |after| {
            template.render(after)
        })
        .scroll_all_buckets(|bucket| {
            seen.push(name_of(&bucket));
            Ok(())
        })
        .await?;

        assert_eq!(seen, vec!["A", "B", "C"]);
        assert_eq!(the_count, 3);
        let the_queries = backend.aggregation_queries();
        assert_eq!(the_queries.len(), 2, "no third request after a page without an after_key");
        assert!(the_queries[0]["aggs"]["by_name"]["composite"].get("after").is_none());
        assert_eq!(the_queries[1]["aggs"]["by_name"]["composite"]["after"], json!({ "name": "B" }));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_first_page_ends_it_immediately() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new().then_aggregation(response(vec![], Some("ignored")));
        let template = by_name_template();

        let the_count = CompositeAggregationScroller::new(&backend, "variables", template.path().to_vec(), |after| {
            template.render(after)
        })
        .scroll_all_buckets(|_| Ok(()))
        .await?;

        assert_eq!(the_count, 0);
        assert_eq!(backend.aggregation_queries().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_pages_are_advanced_by_hand() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 1)], Some("A")))
            .then_aggregation(response(vec![bucket("B", 1)], None));
        let template = by_name_template();
        let mut scroller = CompositeAggregationScroller::new(&backend, "variables", template.path().to_vec(), |after| {
            template.render(after)
        });
        let mut seen = Vec::new();

        assert!(scroller.consume_page(|bucket| {
            seen.push(name_of(&bucket));
            Ok(())
        })
        .await?);
        assert_eq!(scroller.after_key(), Some(&json!({ "name": "A" }).as_object().cloned().unwrap_or_default()));
        assert!(!scroller.consume_page(|bucket| {
            seen.push(name_of(&bucket));
            Ok(())
        })
        .await?);
        assert!(!scroller.consume_page(|_| Ok(())).await?, "exhausted stays exhausted");

        assert_eq!(seen, vec!["A", "B"]);
        assert_eq!(backend.aggregation_queries().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_buckets_flow_as_a_stream() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 1), bucket("B", 2)], Some("B")))
            .then_aggregation(response(vec![bucket("C", 3)], Some("C")))
            .then_aggregation(response(vec![], None));
        let template = by_name_template();

        let the_buckets: Vec<CompositeBucket> =
            CompositeAggregationScroller::new(&backend, "variables", template.path().to_vec(), |after| {
                template.render(after)
            })
            .into_stream()
            .try_collect()
            .await?;

        assert_eq!(the_buckets.iter().map(name_of).collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(the_buckets.iter().map(|b| b.doc_count).sum::<u64>(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_path_leads_nowhere() {
        let backend = InMemoryBackend::new().then_aggregation(json!({ "aggregations": { "something_else": {} } }));

        let the_outcome = CompositeAggregationScroller::new(&backend, "variables", vec!["by_name".to_string()], |_| {
            json!({})
        })
        .scroll_all_buckets(|_| Ok(()))
        .await;

        match the_outcome {
            Err(ScrollError::AggregationPathNotFound { missing, .. }) => assert_eq!(missing, "by_name"),
            other => panic!("💀 expected a path error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_backend_fails_mid_scroll() {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 1)], Some("A")))
            .then_aggregation_failure("circuit_breaking_exception");
        let mut seen = 0;

        let the_outcome = CompositeAggregationScroller::new(&backend, "variables", vec!["by_name".to_string()], |_| {
            json!({})
        })
        .scroll_all_buckets(|_| {
            seen += 1;
            Ok(())
        })
        .await;

        assert!(matches!(the_outcome, Err(ScrollError::BackendFetch(_))));
        assert_eq!(seen, 1, "the first page was already consumed");
    }

    #[tokio::test]
    async fn the_one_where_a_slow_aggregation_runs_out_of_patience() {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 1)], None))
            .with_latency(Duration::from_millis(200));
        let mut seen = 0;

        let the_outcome = CompositeAggregationScroller::new(&backend, "variables", vec!["by_name".to_string()], |_| {
            json!({})
        })
        .with_round_trip_timeout(Some(Duration::from_millis(20)))
        .scroll_all_buckets(|_| {
            seen += 1;
            Ok(())
        })
        .await;

        match the_outcome {
            Err(ScrollError::TimedOut { operation, after }) => {
                assert_eq!(operation, "submit aggregation");
                assert_eq!(after, Duration::from_millis(20));
            }
            other => panic!("💀 expected a timeout, got {other:?}"),
        }
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn the_one_where_the_consumer_has_had_enough() {
        let backend = InMemoryBackend::new()
            .then_aggregation(response(vec![bucket("A", 1), bucket("B", 1)], Some("B")));

        let the_outcome = CompositeAggregationScroller::new(&backend, "variables", vec!["by_name".to_string()], |_| {
            json!({})
        })
        .scroll_all_buckets(|_| anyhow::bail!("no more, thank you"))
        .await;

        assert!(matches!(the_outcome, Err(ScrollError::ConsumerAborted(_))));
        assert_eq!(backend.aggregation_queries().len(), 1);
    }

    #[test]
    fn the_one_where_sub_aggregations_ride_along_with_the_bucket() -> anyhow::Result<()> {
        let the_bucket: CompositeBucket = serde_json::from_value(json!({
            "key": { "definition": "invoice", "version": 3 },
            "doc_count": 12,
            "avg_duration": { "value": 1500.5 }
        }))?;

        assert_eq!(the_bucket.doc_count, 12);
        assert_eq!(the_bucket.key["version"], json!(3));
        assert_eq!(the_bucket.sub_aggregations["avg_duration"]["value"], json!(1500.5));
        Ok(())
    }

    #[test]
    fn the_one_where_the_template_finds_a_nested_composite() -> anyhow::Result<()> {
        let the_template = CompositeQueryTemplate::new(
            json!({
                "query": { "term": { "state": "ACTIVE" } },
                "aggregations": {
                    "filtered": {
                        "filter": { "match_all": {} },
                        "aggs": {
                            "by_definition": { "composite": { "sources": [], "after": { "stale": true } } }
                        }
                    }
                }
            }),
            vec!["filtered".to_string(), "by_definition".to_string()],
        )?;

        let first = the_template.render(None);
        let after: AfterKey = serde_json::from_value(json!({ "definition": "invoice" }))?;
        let next = the_template.render(Some(&after));

        let composite = "/aggregations/filtered/aggs/by_definition/composite";
        assert!(first.pointer(composite).and_then(|c| c.get("after")).is_none());
        assert_eq!(next.pointer(&format!("{composite}/after")), Some(&json!({ "definition": "invoice" })));
        assert_eq!(next["query"], json!({ "term": { "state": "ACTIVE" } }), "the rest is left alone");
        Ok(())
    }

    #[test]
    fn the_one_where_a_template_without_a_composite_is_rejected() {
        let the_outcome = CompositeQueryTemplate::new(
            json!({ "aggs": { "by_name": { "terms": { "field": "name" } } } }),
            vec!["by_name".to_string()],
        );
        assert!(matches!(
            the_outcome,
            Err(ScrollError::AggregationPathNotFound { ref missing, .. }) if missing == "composite"
        ));
    }
}
