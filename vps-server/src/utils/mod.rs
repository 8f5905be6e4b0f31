//! Utilities

pub mod logger;
pub mod password;

pub use logger::init_logger;
