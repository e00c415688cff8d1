pub mod backoff;
pub mod config;
pub mod crypto;
pub mod error;
pub mod rate_limit;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
