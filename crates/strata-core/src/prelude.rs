//! Convenient re-exports for downstream crates.

pub use crate::ast::{Expr, FieldRef, Op, SelectItem, Statement, StreamRef};
pub use crate::config::EngineConfig;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::id::StatementId;
pub use crate::processor::{Compiler, Listener, Processor, SyntaxError};
pub use crate::schema::{Field, FieldType};
pub use crate::value::{Event, Record, Value};
