//! Two-tier result caching
//!
//! The request tier is an in-process map owned by the optimizer; the
//! external tier is any tag-aware [`CacheStore`]. Both hold raw row sets,
//! decoded again on every read.

pub mod invalidation;
pub mod key;
pub mod request;
pub mod store;

pub use invalidation::{CacheInvalidator, ModelEvent, ModelObserver, ObserverRegistry};
pub use key::derive_cache_key;
pub use request::RequestCache;
pub use store::{CacheStore, MemoryCacheStore};
