//! Storage of React Native source maps and symbolication of crash stack traces.
//!
//! The entry point is [`SourceMapStore`](service::SourceMapStore), which keeps one source map per
//! container build or code push release and translates minified stack traces back to their
//! original sources.

#[macro_use]
pub mod metrics;

pub mod blobs;
pub mod config;
pub mod service;
pub mod stacktrace;
pub mod store;
pub mod symbolication;
pub mod types;
