//! Infrastructure adapters and runtime bootstrap.

pub mod cdp;
pub mod error;
pub mod http;
pub mod telemetry;
