//! Statement execution, caching and the safe-mode fallback

pub mod controller;
pub mod executor;
pub mod fallback;

pub use controller::{CacheTier, Execution, ExecutionController, ExecutionHandles, PerformanceReport};
pub use executor::{PostgresExecutor, SqlExecutor, SqliteExecutor};
pub use fallback::{FallbackLoader, FallbackResult};
