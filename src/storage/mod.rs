//! Storage backends.
//!
//! - [`traits`]: the [`BufferStore`](traits::BufferStore) and
//!   [`FreshnessCache`](traits::FreshnessCache) seams
//! - [`sql`]: durable store over SQLite / MySQL
//! - [`redis`]: freshness cache over Redis
//! - [`memory`]: in-process implementations of both

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
