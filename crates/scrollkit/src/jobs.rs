//! 🏃 Jobs: one config, one thing to do, one report back.
//!
//! The CLI parses a subcommand into a [`Job`] and hands it here together with the loaded
//! [`AppConfig`]. This module wires the backend, the pager, or the composite scroller
//! together and returns a [`JobReport`] for the CLI to print. No printing happens here;
//! the library doesn't know what a terminal is.

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{AggregationBackend, ScrollBackend, ScrollRequest, SearchBackend};
use crate::common::{PagingState, ResultLimit};
use crate::composite::{CompositeAggregationScroller, CompositeBucket};
use crate::mappers::JsonMapper;
use crate::pager::{PageStart, ScrollPager};

/// 🎯 What the caller wants done.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// 🚰 Every record of `[query]`, up to `limit` (or the configured limit).
    Drain { limit: Option<usize> },
    /// 📬 One page of `[query]`, fresh or resumed from `token`.
    Page { limit: Option<usize>, token: Option<String> },
    /// 🪣 Every bucket of `[aggregation]`.
    Buckets,
}

/// 📋 What came back.
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    Records(Vec<Value>),
    Page {
        records: Vec<Value>,
        next_token: Option<String>,
    },
    Buckets(Vec<CompositeBucket>),
}

/// 🚀 Builds the configured backend and runs `job` against it.
pub async fn run(app_config: AppConfig, job: Job) -> Result<JobReport> {
    let backend = SearchBackend::from_config(&app_config.backend)
        .await
        .context("💀 Could not build the search backend from the [backend] config section.")?;
    run_with_backend(&app_config, &backend, job).await
}

/// 🔌 Same as [`run`], with a backend the caller already has.
pub async fn run_with_backend<B>(app_config: &AppConfig, backend: &B, job: Job) -> Result<JobReport>
where
    B: ScrollBackend + AggregationBackend + ?Sized,
{
    let scroll = &app_config.scroll;
    let pager = ScrollPager::from_config(backend, scroll);
    let mapper = JsonMapper::<Value>::new();

    match job {
        Job::Drain { limit } => {
            let limit = limit.map(ResultLimit::at_most).unwrap_or(scroll.limit);
            let request = query_request(app_config, scroll.effective_page_size(limit))?;
            info!(index = %request.index, limit = ?limit.max_records(), "🚰 draining query");
            let records = pager
                .scroll_query(&request, &mapper, limit)
                .await
                .with_context(|| format!("💀 Draining index '{}' failed.", request.index))?;
            Ok(JobReport::Records(records))
        }
        Job::Page { limit, token } => {
            let limit = limit
                .or(scroll.limit.max_records())
                .unwrap_or_else(|| scroll.effective_page_size(ResultLimit::unbounded()));
            let start = match token {
                Some(token) => PageStart::Resume(
                    PagingState::decode(&token).context("💀 The --token value could not be decoded.")?,
                ),
                None => PageStart::Query(query_request(
                    app_config,
                    scroll.effective_page_size(ResultLimit::at_most(limit)),
                )?),
            };
            let page = pager
                .fetch_one_page(start, &mapper, limit)
                .await
                .context("💀 Fetching a page failed.")?;
            Ok(JobReport::Page {
                next_token: page.next_token(),
                records: page.records,
            })
        }
        Job::Buckets => {
            let aggregation = app_config
                .aggregation
                .as_ref()
                .ok_or_else(|| anyhow!("💀 The buckets job needs an [aggregation] section in the config."))?;
            let template = aggregation
                .template()
                .context("💀 The [aggregation] body does not have a composite aggregation at the configured path.")?;
            let mut buckets = Vec::new();
            CompositeAggregationScroller::new(backend, aggregation.index.as_str(), template.path().to_vec(), |after| {
                template.render(after)
            })
            .with_round_trip_timeout(scroll.round_trip_timeout())
            .scroll_all_buckets(|bucket| {
                buckets.push(bucket);
                Ok(())
            })
            .await
            .with_context(|| format!("💀 Scrolling composite buckets of '{}' failed.", aggregation.index))?;
            Ok(JobReport::Buckets(buckets))
        }
    }
}

fn query_request(app_config: &AppConfig, page_size: usize) -> Result<ScrollRequest> {
    let query = app_config
        .query
        .as_ref()
        .ok_or_else(|| anyhow!("💀 This job needs a [query] section in the config."))?;
    Ok(ScrollRequest::new(
        query.index.clone(),
        query.body.clone(),
        page_size,
        app_config.scroll.keep_alive(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{AggregationConfig, QueryConfig};
    use crate::backends::{BackendCall, BackendConfig, InMemoryBackend, InMemoryBackendConfig, ScrollConfig};
    use serde_json::json;

    fn documents(n: u64) -> Vec<Value> {
        (1..=n).map(|n| json!({ "n": n })).collect()
    }

    fn in_memory_config(documents: Vec<Value>, aggregation_responses: Vec<Value>) -> AppConfig {
        AppConfig {
            backend: BackendConfig::InMemory(InMemoryBackendConfig {
                documents,
                aggregation_responses,
            }),
            scroll: ScrollConfig {
                page_size: 2,
                ..ScrollConfig::default()
            },
            query: Some(QueryConfig {
                index: "docs".to_string(),
                body: json!({ "query": { "match_all": {} } }),
            }),
            aggregation: Some(AggregationConfig {
                index: "docs".to_string(),
                path: vec!["by_n".to_string()],
                body: json!({ "size": 0, "aggs": { "by_n": { "composite": { "sources": [] } } } }),
            }),
        }
    }

    #[tokio::test]
    async fn the_one_where_drain_takes_everything_the_backend_has() -> Result<()> {
        let the_report = run(in_memory_config(documents(5), vec![]), Job::Drain { limit: None }).await?;
        assert_eq!(the_report, JobReport::Records(documents(5)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_command_line_limit_wins() -> Result<()> {
        let mut the_config = in_memory_config(documents(5), vec![]);
        the_config.scroll.limit = ResultLimit::at_most(4);

        let the_report = run(the_config, Job::Drain { limit: Some(3) }).await?;

        assert_eq!(the_report, JobReport::Records(documents(3)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_page_token_brings_us_back_for_the_rest() -> Result<()> {
        let the_config = in_memory_config(vec![], vec![]);
        let backend = InMemoryBackend::from_documents(documents(3));

        let first = run_with_backend(&the_config, &backend, Job::Page { limit: Some(2), token: None }).await?;
        let JobReport::Page { records, next_token } = first else {
            panic!("💀 expected a page report");
        };
        assert_eq!(records, documents(2));
        let the_token = next_token.expect("more records remain");

        let second = run_with_backend(&the_config, &backend, Job::Page { limit: Some(2), token: Some(the_token) }).await?;

        assert_eq!(
            second,
            JobReport::Page {
                records: vec![json!({ "n": 3 })],
                next_token: None,
            }
        );
        assert_eq!(backend.released_cursors().len(), 1);
        assert!(matches!(backend.calls()[0], BackendCall::SubmitQuery { page_size: 2, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_buckets_come_from_the_aggregation_section() -> Result<()> {
        let the_config = in_memory_config(
            vec![],
            vec![
                json!({ "aggregations": { "by_n": {
                    "buckets": [ { "key": { "n": 1 }, "doc_count": 4 } ],
                    "after_key": { "n": 1 }
                } } }),
                json!({ "aggregations": { "by_n": { "buckets": [] } } }),
            ],
        );

        let the_report = run(the_config, Job::Buckets).await?;

        let JobReport::Buckets(buckets) = the_report else {
            panic!("💀 expected a bucket report");
        };
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].doc_count, 4);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_mangled_token_is_sent_back() {
        let the_config = in_memory_config(documents(1), vec![]);
        let the_outcome = run(
            the_config,
            Job::Page {
                limit: None,
                token: Some("🦆".to_string()),
            },
        )
        .await;
        assert!(the_outcome.is_err());
    }

    #[tokio::test]
    async fn the_one_where_no_query_section_means_no_drain() {
        let mut the_config = in_memory_config(documents(1), vec![]);
        the_config.query = None;
        let the_outcome = run(the_config, Job::Drain { limit: None }).await;
        assert!(format!("{:#}", the_outcome.unwrap_err()).contains("[query]"));
    }
}
