#![forbid(unsafe_code)]
//! strata-engine: the lifecycle layer.
//!
//! `Engine` is the single entry point a transport talks to. It serializes
//! every structural change (targets, queries, fieldset registration) behind
//! one lock, hands query output to an `OutputSink`, and publishes a
//! `Catalog` snapshot for lock-free reads.

pub mod catalog;
pub mod engine;
pub mod metrics;
pub mod output;

pub use catalog::{Catalog, QueryInfo, QueryState, TargetInfo};
pub use engine::{Engine, SendOutcome};
pub use metrics::EngineStats;
pub use output::{OutputPool, OutputRecord, OutputSink};
