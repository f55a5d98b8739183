//! A load generator for S3-compatible object storage.
//!
//! A run writes `count` objects of a fixed size through a pool of concurrent workers, reads them
//! back, and reduces the per-operation latencies into throughput figures and a percentile table.
//! All objects are built from one random [`ContentSource`] sample, which is logically repeated
//! to reach the object size, so large objects never have to be held in memory.
//!
//! Storage access goes through the [`Storage`](storage::Storage) trait. [`storage::S3Storage`]
//! talks to real endpoints, [`storage::InMemoryStorage`] backs tests and offline runs.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod content;
pub mod create;
pub mod error;
pub mod executor;
pub mod observability;
pub mod pool;
pub mod report;
pub mod runner;
pub mod storage;

pub use crate::content::ContentSource;
pub use crate::runner::run;
