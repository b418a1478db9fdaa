//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, scroll edition.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::backends::{BackendConfig, ScrollConfig};
use crate::composite::CompositeQueryTemplate;
use crate::errors::ScrollError;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Who we ask for pages.
    pub backend: BackendConfig,
    /// 📏 How we ask. Defaults are sane; that's the whole pitch.
    #[serde(default)]
    pub scroll: ScrollConfig,
    /// 🔍 What to scroll, for `drain` and `page`.
    #[serde(default)]
    pub query: Option<QueryConfig>,
    /// 🪣 What to aggregate, for `buckets`.
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
}

/// 🔍 `[query]`: an index and a request body. Query DSL is the caller's department.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueryConfig {
    pub index: String,
    #[serde(default = "match_everything")]
    pub body: Value,
}

// 🌍 No body means every document. Bold, but valid.
fn match_everything() -> Value {
    json!({ "query": { "match_all": {} } })
}

/// 🪣 `[aggregation]`: a composite aggregation body and the path down to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AggregationConfig {
    pub index: String,
    pub path: Vec<String>,
    pub body: Value,
}

impl AggregationConfig {
    /// 📝 Validates the body against the path and hands back a renderable template.
    pub fn template(&self) -> Result<CompositeQueryTemplate, ScrollError> {
        CompositeQueryTemplate::new(self.body.clone(), self.path.clone())
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`SCROLLKIT_*`, `__` for nesting, so
/// `SCROLLKIT_SCROLL__PAGE_SIZE=500` lands in `scroll.page_size`) with an optional TOML file.
///   - `None`: env vars only. No file. No assumptions.
///   - `Some`: env vars + TOML, merged. TOML wins on conflicts.
///
/// 💀 Returns an error if the config is unparseable, with the file named in the context.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:#?}", config_file_name.unwrap_or(Path::new("")));

    let config = Figment::new().merge(Env::prefixed("SCROLLKIT_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SCROLLKIT_*). \
             The file exists in our hearts, but apparently not in a shape serde recognises.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SCROLLKIT_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResultLimit;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 The filesystem said 'new phone who dis'.");
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        the_file
    }

    #[test]
    fn the_one_where_an_elasticsearch_config_parses_with_everything_spelled_out() -> anyhow::Result<()> {
        let the_file = write_test_config(
            r#"
            [backend.Elasticsearch]
            url = "http://localhost:9200"
            api_key = "c2VrcmV0"
            request_timeout_secs = 5

            [scroll]
            page_size = 250
            keep_alive_secs = 30
            round_trip_timeout_secs = 10
            limit = 1000

            [query]
            index = "process-instances"
            body = { query = { term = { state = "ACTIVE" } } }
            "#,
        );

        let app_config = load_config(Some(the_file.path()))?;

        match app_config.backend {
            BackendConfig::Elasticsearch(ref es) => {
                assert_eq!(es.url, "http://localhost:9200");
                assert_eq!(es.api_key.as_deref(), Some("c2VrcmV0"));
                assert_eq!(es.request_timeout_secs, 5);
                assert_eq!(es.connect_timeout_secs, 10, "unset knobs keep their defaults");
            }
            ref honestly_who_knows => panic!("💀 Expected Elasticsearch, serde took us to {honestly_who_knows:?}"),
        }
        assert_eq!(app_config.scroll.page_size, 250);
        assert_eq!(app_config.scroll.limit, ResultLimit::at_most(1000));
        assert_eq!(app_config.scroll.round_trip_timeout_secs, Some(10));
        let the_query = app_config.query.expect("query section was provided");
        assert_eq!(the_query.body["query"]["term"]["state"], "ACTIVE");
        Ok(())
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> anyhow::Result<()> {
        let the_file = write_test_config(
            r#"
            [backend.InMemory]
            documents = [ { n = 1 }, { n = 2 } ]

            [query]
            index = "docs"
            "#,
        );

        let app_config = load_config(Some(the_file.path()))?;

        assert_eq!(app_config.scroll, ScrollConfig::default());
        assert!(app_config.aggregation.is_none());
        assert_eq!(
            app_config.query.map(|query| query.body),
            Some(json!({ "query": { "match_all": {} } }))
        );
        match app_config.backend {
            BackendConfig::InMemory(mem) => assert_eq!(mem.documents.len(), 2),
            honestly_who_knows => panic!("💀 Expected InMemory, got {honestly_who_knows:?}"),
        }
        Ok(())
    }

    #[test]
    fn the_one_where_the_aggregation_section_becomes_a_template() -> anyhow::Result<()> {
        let the_file = write_test_config(
            r#"
            [backend.InMemory]

            [aggregation]
            index = "variables"
            path = ["by_name"]

            [aggregation.body]
            size = 0

            [aggregation.body.aggs.by_name.composite]
            size = 100
            sources = [ { name = { terms = { field = "name" } } } ]
            "#,
        );

        let app_config = load_config(Some(the_file.path()))?;
        let the_template = app_config
            .aggregation
            .expect("aggregation section was provided")
            .template()?;

        assert_eq!(the_template.path(), ["by_name".to_string()]);
        assert_eq!(the_template.render(None)["aggs"]["by_name"]["composite"]["size"], 100);
        Ok(())
    }

    #[test]
    fn the_one_where_a_config_without_a_backend_is_turned_away() {
        let the_file = write_test_config(
            r#"
            [scroll]
            page_size = 10
            "#,
        );

        let the_outcome = load_config(Some(the_file.path()));

        let the_error = the_outcome.expect_err("a backend is mandatory");
        assert!(format!("{the_error:#}").contains("SCROLLKIT_"));
    }
}
