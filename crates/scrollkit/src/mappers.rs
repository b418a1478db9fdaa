//! 🔄 Mappers: turning raw hits into records somebody actually wants 🎭
//!
//! 🎬 COLD OPEN: INT. CUSTOMS DESK, INTERNATIONAL ARRIVALS, 2:47 AM
//!
//! A `Hit` steps off the plane. It has a `source_buf` full of JSON and no idea what
//! it's supposed to be. The mapper looks at it over its reading glasses. "Purpose of
//! visit?" "I'm... a ProcessInstanceIdDto?" Stamp. Welcome to the result set.
//!
//! Or: the JSON is missing a field, the mapper says no, and the whole paging session
//! is deported. One bad hit, whole session gone. Harsh, but consistent: callers never
//! get a silently truncated list.
//!
//! ## Knowledge Graph 🧠
//! - Trait: [`RecordMapper<T>`], one method, pure, may fail
//! - [`JsonMapper<T>`]: serde straight from `source_buf` into any `DeserializeOwned`
//! - [`Passthrough`]: the identity mapper, returns the `Hit` itself
//! - [`MapWith<F>`]: wraps a closure, for the "I just need the id" crowd
//! - Used by: `pager::ScrollPager` (every drain and page call takes a mapper)
//!
//! ⚠️ Mappers must not do I/O. They run between network round trips and the pager
//! assumes they are quick and side-effect free. 🦆

use anyhow::Result;

use crate::common::Hit;

pub mod json;
pub mod passthrough;

pub use json::JsonMapper;
pub use passthrough::Passthrough;

/// 🧩 Raw hit in, typed record out. Or an error, and then nobody gets anything.
///
/// # Contract 📜
/// - Pure: same hit, same answer
/// - Borrows the hit, because the pager might still want it (carry-over, logging)
/// - Errors are fatal to the session; the pager wraps them in `ScrollError::Mapping`
pub trait RecordMapper<T>: Send + Sync {
    fn map_hit(&self, hit: &Hit) -> Result<T>;
}

/// 🪄 A closure wearing a `RecordMapper` costume.
#[derive(Debug, Clone, Copy)]
pub struct MapWith<F>(F);

/// 🪄 Adapts `Fn(&Hit) -> anyhow::Result<T>` into a mapper.
pub fn map_with<T, F>(f: F) -> MapWith<F>
where
    F: Fn(&Hit) -> Result<T> + Send + Sync,
{
    MapWith(f)
}

impl<T, F> RecordMapper<T> for MapWith<F>
where
    F: Fn(&Hit) -> Result<T> + Send + Sync,
{
    fn map_hit(&self, hit: &Hit) -> Result<T> {
        (self.0)(hit)
    }
}
