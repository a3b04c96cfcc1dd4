//! Infrastructure adapters and runtime bootstrap.

pub mod cms;
pub mod db;
pub mod error;
pub mod http;
pub mod notifier;
pub mod telemetry;
