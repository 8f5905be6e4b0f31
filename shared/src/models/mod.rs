//! Data models
//!
//! Shared between the server and API clients.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (SQLite INTEGER PRIMARY KEY), money is `i64` minor
//! units and timestamps are Unix milliseconds.

pub mod catalog;
pub mod log;
pub mod order;
pub mod settings;
pub mod task;
pub mod vps;
pub mod wallet;

// Re-exports
pub use catalog::*;
pub use log::*;
pub use order::*;
pub use settings::*;
pub use task::*;
pub use vps::*;
pub use wallet::*;
