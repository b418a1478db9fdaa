//! 💀 Errors: the taxonomy of sadness.
//!
//! Two families live here. [`ScrollError`] is what a paging session hands back when
//! it gives up: the mapper choked, the backend ghosted us, or a round trip took so
//! long we stopped waiting. [`BackendError`] is what the adapters stuff inside their
//! `anyhow::Error`s so that somebody upstream can `downcast_ref` and make a decision
//! ("index doesn't exist? fine, empty list") instead of just printing the chain.
//!
//! 🔒 Notice what's missing: a cursor release error. Releasing a cursor is best-effort.
//! When it fails we `warn!` about it and move on with our lives. A leaked scroll context
//! expires on its own. A masked original error haunts you forever.

use std::time::Duration;

use thiserror::Error;

/// 💀 Why a paging session ended without a result.
///
/// Every variant is fatal to the session it came from. There is no partial
/// result riding along with any of these. Callers get everything or an error.
#[derive(Debug, Error)]
pub enum ScrollError {
    /// 🧩 A raw hit refused to become a `target`. The whole session goes down with it.
    #[error("💀 Could not map a search hit into '{target}'. The JSON and the struct had creative differences.")]
    Mapping {
        target: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// 📡 The backend call for a page (first, next, or aggregation) failed.
    #[error("💀 The search backend failed to deliver a page. The session is aborted.")]
    BackendFetch(#[source] anyhow::Error),

    /// ⏱️ A round trip blew through the configured timeout.
    #[error("💀 '{operation}' took longer than {after:?}. We waited. Like a dog at the window. Nobody came home.")]
    TimedOut {
        operation: &'static str,
        after: Duration,
    },

    /// 🗺️ The aggregation path doesn't resolve in the response (or the query template).
    #[error("💀 Aggregation path '{path}' went nowhere: no aggregation named '{missing}'.")]
    AggregationPathNotFound { path: String, missing: String },

    /// 🛑 The bucket consumer said stop, loudly.
    #[error("💀 The bucket consumer bailed mid-scroll. The bucket stream is incomplete.")]
    ConsumerAborted(#[source] anyhow::Error),

    /// 🎟️ The paging token a caller handed back is not one of ours.
    #[error("💀 That paging token is not something we issued. Or it was, and someone edited it.")]
    InvalidPagingToken(#[source] serde_json::Error),
}

/// 📡 Typed causes raised by backend adapters, carried inside `anyhow::Error`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// 🔍 The target index (or alias) does not exist.
    #[error("💀 Index '{index}' does not exist. We knocked. Nobody answered.")]
    IndexNotFound { index: String },

    /// 📡 The backend answered, just not with good news.
    #[error("💀 The search backend answered {status}: {body}")]
    ServerResponse { status: u16, body: String },

    /// 🎭 A failure scripted into the in-memory backend.
    #[error("💀 Scripted backend failure: {0}")]
    Scripted(String),
}

impl BackendError {
    /// 🕵️ Sniffs an `anyhow` chain for a missing index.
    pub fn is_index_not_found(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<BackendError>(),
                Some(BackendError::IndexNotFound { .. })
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn the_one_where_a_missing_index_is_found_even_under_layers_of_context() {
        let the_onion = Err::<(), _>(anyhow::Error::new(BackendError::IndexNotFound {
            index: "process-instances".to_string(),
        }))
        .context("submitting the initial scroll query")
        .context("loading the report")
        .unwrap_err();

        assert!(BackendError::is_index_not_found(&the_onion));
    }

    #[test]
    fn the_one_where_other_failures_are_not_mistaken_for_a_missing_index() {
        let the_500 = anyhow::Error::new(BackendError::ServerResponse {
            status: 500,
            body: "shard failure".to_string(),
        });
        assert!(!BackendError::is_index_not_found(&the_500));
    }

    #[test]
    fn the_one_where_the_mapping_error_names_the_type_it_failed_to_become() {
        let the_error = ScrollError::Mapping {
            target: "ProcessInstanceIdDto",
            source: anyhow::anyhow!("missing field `id`"),
        };
        assert!(the_error.to_string().contains("ProcessInstanceIdDto"));
    }

    #[test]
    fn the_one_where_a_failed_submit_claims_no_cleanup_it_never_did() {
        let the_error = ScrollError::BackendFetch(anyhow::anyhow!("cluster is red"));
        let the_message = the_error.to_string();
        assert!(the_message.contains("aborted"));
        assert!(!the_message.contains("released"));
    }
}
