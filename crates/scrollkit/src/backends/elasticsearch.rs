//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! *Previously, on Scrollkit...*
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The heap graph on node-3 is a staircase going up. Somebody opened four hundred scroll
//! contexts this afternoon and closed none of them. "The report was slow," they explained,
//! "so I clicked it again." Each click, a cursor. Each cursor, a little bit of heap that
//! nobody will ever give back until the keep-alive runs out.
//!
//! 🚀 This module is the HTTP half of the paging story. It speaks the scroll API
//! (`_search?scroll=`, `_search/scroll`, `DELETE _search/scroll`) and plain `_search` for
//! composite aggregations. It does NOT decide when to stop, how many records are enough,
//! or when to let go of a cursor. The pager decides. This module just carries messages.
//!
//! 🧠 Knowledge graph:
//! - `ElasticsearchBackendConfig`: url + tri-modal auth (basic, api key, or hope) + timeouts
//! - `ElasticsearchBackend`: a `reqwest::Client` and the config, implements both backend traits
//! - `_source` stays raw (`RawValue`) all the way into `Hit::source_buf`; mappers parse it
//! - `hits.total` comes as a number (6.x) or `{value, relation}` (7.x+); `gte` means "unknown"
//! - 404 + `index_not_found_exception` becomes `BackendError::IndexNotFound` so callers can shrug
//!
//! ⚠️ No retries here. A failed page is a failed session. Retry policy belongs upstream.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use tracing::{debug, instrument, trace};

use crate::backends::{AggregationBackend, ScrollBackend, ScrollRequest};
use crate::common::{Hit, Page, ScrollCursor};
use crate::errors::BackendError;

/// 📡 `[backend.Elasticsearch]`: where the cluster lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchBackendConfig {
    /// 📡 Scheme + host + port. Yes, all of it. No, `localhost` alone is not enough.
    pub url: String,
    /// 🔒 Basic auth username. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Basic auth password. If this is plaintext in a config file, we've filed a complaint.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key. Wins over basic auth when both are set. Hierarchy.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// 🔧 10 seconds to handshake. If the cluster can't say hello by then, it's not having a good day.
fn default_connect_timeout_secs() -> u64 {
    10
}

// 🔧 30 seconds per request. Scroll pages can be meaty and we're not monsters.
fn default_request_timeout_secs() -> u64 {
    30
}

impl ElasticsearchBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 📦 Wire shapes. Only the fields we read; the cluster sends plenty more.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: SearchResponseHits,
}

#[derive(Debug, Deserialize)]
struct SearchResponseHits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<SearchResponseHit>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Detailed {
        value: u64,
        #[serde(default)]
        relation: Option<String>,
    },
}

impl TotalHits {
    // 📊 Only an exact total is useful to the pager. A lower bound is just a rumour.
    fn exact(&self) -> Option<u64> {
        match self {
            TotalHits::Count(count) => Some(*count),
            TotalHits::Detailed { value, relation } => match relation.as_deref() {
                None | Some("eq") => Some(*value),
                Some(_) => None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponseHit {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(rename = "_index", default)]
    index: Option<String>,
    #[serde(rename = "_routing", default)]
    routing: Option<String>,
    #[serde(rename = "_source", default)]
    source: Option<Box<RawValue>>,
}

impl From<SearchResponse> for Page {
    fn from(response: SearchResponse) -> Self {
        let total_hits = response.hits.total.as_ref().and_then(TotalHits::exact);
        let hits = response
            .hits
            .hits
            .into_iter()
            .map(|raw| Hit {
                id: raw.id,
                index: raw.index,
                routing: raw.routing,
                // 🔧 `_source` disabled or filtered to nothing still has to be valid JSON downstream.
                source_buf: raw
                    .source
                    .map(|source| source.get().to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            })
            .collect();
        Page {
            hits,
            cursor: response.scroll_id.map(ScrollCursor::new),
            total_hits,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScrollContinueRequest<'a> {
    scroll: String,
    scroll_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ClearScrollRequest<'a> {
    scroll_id: [&'a str; 1],
}

// ⏳ Elasticsearch time units. Seconds are enough; nobody needs a 1500ms scroll keep-alive.
fn keep_alive_param(keep_alive: Duration) -> String {
    format!("{}s", keep_alive.as_secs().max(1))
}

/// 📡 The cluster-facing backend. Holds one `reqwest::Client`, reused for every request,
/// because a new client per request is the networking equivalent of buying a new car
/// every time you need groceries.
#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    config: ElasticsearchBackendConfig,
}

impl ElasticsearchBackend {
    /// 🚀 Builds the HTTP client. No ping: the first query is ping enough, and it fails loudly.
    pub async fn new(config: ElasticsearchBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    // 🔒 Auth priority: API key wins over basic auth. This is not a democracy.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    // 📬 Turns a response into its body, or into a typed error with the body attached.
    async fn read_body(response: Response, index: Option<&str>) -> Result<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("💀 The cluster answered but the body got lost on the way. Like luggage.")?;
        if status.is_success() {
            return Ok(body);
        }
        if status == StatusCode::NOT_FOUND && body.contains("index_not_found_exception") {
            return Err(BackendError::IndexNotFound {
                index: index.unwrap_or("<unknown>").to_string(),
            }
            .into());
        }
        Err(BackendError::ServerResponse {
            status: status.as_u16(),
            body,
        }
        .into())
    }

    fn parse_page(body: &str, what: &str) -> Result<Page> {
        let response: SearchResponse = serde_json::from_str(body)
            .with_context(|| format!("💀 Could not parse the {what} response. The cluster speaks a dialect we don't."))?;
        Ok(response.into())
    }

    #[instrument(skip_all, name = "elasticsearch begin scroll", fields(index = %request.index, page_size = request.page_size))]
    async fn begin_scroll(&self, request: &ScrollRequest) -> Result<Page> {
        let url = self.endpoint(&format!(
            "{}/_search?scroll={}&size={}",
            request.index,
            keep_alive_param(request.keep_alive),
            request.page_size
        ));
        let response = self
            .authorize(self.client.post(&url))
            .json(&request.query)
            .send()
            .await
            .context("💀 The initial scroll query never made it to the cluster.")?;
        let body = Self::read_body(response, Some(&request.index)).await?;
        let page = Self::parse_page(&body, "initial scroll")?;
        debug!(hits = page.hits.len(), total = ?page.total_hits, "📡 opened a scroll context");
        Ok(page)
    }

    #[instrument(level = "debug", skip_all, name = "elasticsearch continue scroll")]
    async fn continue_scroll(&self, cursor: &ScrollCursor, keep_alive: Duration) -> Result<Page> {
        let response = self
            .authorize(self.client.post(self.endpoint("_search/scroll")))
            .json(&ScrollContinueRequest {
                scroll: keep_alive_param(keep_alive),
                scroll_id: cursor.as_str(),
            })
            .send()
            .await
            .context("💀 The next-page request never made it to the cluster.")?;
        let body = Self::read_body(response, None).await?;
        let page = Self::parse_page(&body, "scroll continuation")?;
        trace!(hits = page.hits.len(), "📡 scrolled one page further");
        Ok(page)
    }

    #[instrument(level = "debug", skip_all, name = "elasticsearch clear scroll")]
    async fn clear_scroll(&self, cursor: &ScrollCursor) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.endpoint("_search/scroll")))
            .json(&ClearScrollRequest {
                scroll_id: [cursor.as_str()],
            })
            .send()
            .await
            .context("💀 The clear-scroll request never made it to the cluster.")?;
        // 🗑️ 404 means the context is already gone (expired, or exhausted and auto-closed). Mission accomplished.
        if response.status() == StatusCode::NOT_FOUND {
            trace!("🗑️ scroll context was already gone, nothing to clear");
            return Ok(());
        }
        Self::read_body(response, None).await?;
        Ok(())
    }

    #[instrument(skip_all, name = "elasticsearch aggregation", fields(index = %index))]
    async fn aggregate(&self, index: &str, query: &Value) -> Result<Value> {
        let response = self
            .authorize(self.client.post(self.endpoint(&format!("{index}/_search"))))
            .json(query)
            .send()
            .await
            .context("💀 The aggregation query never made it to the cluster.")?;
        let body = Self::read_body(response, Some(index)).await?;
        serde_json::from_str(&body).context("💀 The aggregation response is not JSON. Bold choice, cluster.")
    }
}

#[async_trait]
impl ScrollBackend for ElasticsearchBackend {
    async fn submit_query(&self, request: &ScrollRequest) -> Result<Page> {
        self.begin_scroll(request).await
    }

    async fn fetch_next_page(&self, cursor: &ScrollCursor, keep_alive: Duration) -> Result<Page> {
        self.continue_scroll(cursor, keep_alive).await
    }

    async fn release_cursor(&self, cursor: &ScrollCursor) -> Result<()> {
        self.clear_scroll(cursor).await
    }
}

#[async_trait]
impl AggregationBackend for ElasticsearchBackend {
    async fn submit_aggregation(&self, index: &str, query: &Value) -> Result<Value> {
        self.aggregate(index, query).await
    }
}
