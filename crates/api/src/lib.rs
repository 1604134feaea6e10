//! HTTP API: job intake, inspection, control and progress streaming.

pub mod app;
pub mod context;
pub mod middleware;
