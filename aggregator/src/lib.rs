pub mod app;
pub mod auth;
pub mod bid;
pub mod browser;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod vault;
