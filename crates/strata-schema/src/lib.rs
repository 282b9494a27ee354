#![forbid(unsafe_code)]
//! strata-schema: the fieldset lattice.
//!
//! Each target owns one base fieldset, the query fieldsets its registered
//! queries need, and the data fieldsets observed in traffic. `lattice` plans
//! how that graph changes; `TargetSchema` applies the plans to a processor's
//! type registry; `SchemaCoordinator` works across targets and keeps queries
//! that cannot be matched yet.

pub mod coordinator;
pub mod fieldset;
pub mod lattice;
pub mod target;

pub use coordinator::{Requirements, SchemaCoordinator};
pub use fieldset::{FieldSet, Level};
pub use lattice::{Graph, Plan, RegistryOp};
pub use target::{ApplyStats, BatchOverlay, FieldOrigin, KnownField, Referred, TargetSchema};
