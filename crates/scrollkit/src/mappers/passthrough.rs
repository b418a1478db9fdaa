//! 🚶 Passthrough mapper: the "I changed nothing and took credit" of mappers.
//!
//! "What did you map yesterday?" "A Hit into a Hit." "And today?" "Same."
//! Exists for raw dumps, tests, and the bench, where the mapping is not the point.

use anyhow::Result;

use super::RecordMapper;
use crate::common::Hit;

/// 🚶 Hands back a clone of the hit. The clone is the cost of the pager keeping its copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl RecordMapper<Hit> for Passthrough {
    fn map_hit(&self, hit: &Hit) -> Result<Hit> {
        Ok(hit.clone())
    }
}
