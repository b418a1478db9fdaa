//! 📦 JSON mapper: serde does the heavy lifting, we take the credit.
//!
//! `source_buf` is already JSON (the backend adapter kept `_source` raw on purpose),
//! so mapping is a single `serde_json::from_str`. When it fails, the error names the
//! target type so the log line at 3am says which struct lost the argument.

use std::any::type_name;
use std::marker::PhantomData;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

use super::RecordMapper;
use crate::common::Hit;

/// 📦 Deserialises each hit's `_source` into a `T`.
///
/// Zero-sized. `PhantomData<fn() -> T>` so the mapper is `Send + Sync` no matter what `T` is.
pub struct JsonMapper<T>(PhantomData<fn() -> T>);

impl<T> JsonMapper<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonMapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsonMapper<{}>", type_name::<T>())
    }
}

impl<T: DeserializeOwned> RecordMapper<T> for JsonMapper<T> {
    fn map_hit(&self, hit: &Hit) -> Result<T> {
        serde_json::from_str(&hit.source_buf).with_context(|| {
            format!(
                "💀 Hit '{}' would not deserialize into {}. The JSON had other plans.",
                hit.id.as_deref().unwrap_or("<no id>"),
                type_name::<T>()
            )
        })
    }
}
