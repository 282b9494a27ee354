#![forbid(unsafe_code)]
//! strata-core: shared vocabulary of the strata schema layer.
//!
//! - `value`: the tagged value union events are converted into
//! - `schema`: field types and typed field declarations
//! - `ast`: the statement model a processor compiles queries into
//! - `processor`: the interface of the external continuous-query processor
//! - `error`, `hash`, `id`, `config`: ambient plumbing
//!
//! No locking, no processor state, no IO here.

pub mod ast;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod processor;
pub mod schema;
pub mod value;

pub use error::{Error, ErrorKind, Result};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
