//! 📜 scrollkit: resumable, bounded paging over a search backend's scroll and composite APIs.
//!
//! A large result set comes back a page at a time behind a server-side cursor. This crate
//! turns that into either a bounded `Vec` of typed records or one caller-visible page plus
//! a token to come back with, and releases the cursor exactly once on the way out. Composite
//! aggregations get the same treatment with an after-key instead of a cursor.
//!
//! Start at [`pager::ScrollPager`] and [`composite::CompositeAggregationScroller`]. 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod composite;
pub mod errors;
pub mod jobs;
pub mod mappers;
pub mod pager;

pub use app_config::{AppConfig, load_config};
pub use backends::{AggregationBackend, ScrollBackend, ScrollRequest, SearchBackend};
pub use common::{Hit, Page, PageResult, PagingState, ResultLimit, ScrollCursor};
pub use composite::{AfterKey, CompositeAggregationScroller, CompositeBucket, CompositeQueryTemplate};
pub use errors::{BackendError, ScrollError};
pub use jobs::{Job, JobReport, run};
pub use mappers::{JsonMapper, Passthrough, RecordMapper, map_with};
pub use pager::{PageStart, ScrollPager, map_hits};
