#![forbid(unsafe_code)]
//! strata-query: the query side of the schema layer.
//!
//! A `Query` is a named, grouped expression compiled into a `QueryModel`.
//! The model answers which targets a query reads and which fields it needs
//! from each of them; `rewrite` swaps generic target names for the concrete
//! fieldset types the statement is finally created against.

pub mod model;
pub mod name;
pub mod query;
pub mod rewrite;

pub use model::{Bucket, QueryFields, QueryModel};
pub use query::{Query, SuspendedQuery};
pub use rewrite::rewrite_event_type_name;
