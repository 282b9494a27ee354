//! Interface of the continuous-query processor strata binds to.
//!
//! Concrete processors live outside core (`strata-processor` ships a
//! reference in-memory one). The schema and lifecycle layers only ever talk to
//! these traits, so any engine with a type registry that supports supertypes
//! can sit behind them.

use thiserror::Error;

use crate::ast::Statement;
use crate::error::{Error, Result};
use crate::id::StatementId;
use crate::schema::Field;
use crate::value::Record;

/// A rejected query text. Always the client's fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {position}")]
pub struct SyntaxError {
    pub message: String,
    pub position: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl From<SyntaxError> for Error {
    fn from(e: SyntaxError) -> Self {
        Error::Query(e.to_string())
    }
}

/// Result callback attached to a statement. Invoked synchronously from
/// `send_event` with every batch of matching output records.
pub type Listener = Box<dyn Fn(&[Record]) + Send + Sync>;

/// The grammar half of a processor.
pub trait Compiler {
    /// Compile query text into a statement model.
    fn compile(&self, expression: &str) -> std::result::Result<Statement, SyntaxError>;
}

/// The stateful half: a type registry, running statements, and ingestion.
///
/// Implementations report their own failures as `Error::Processor`.
pub trait Processor: Compiler + Send {
    /// Declare an event type. Every name in `supertypes` must already exist.
    fn register_type(&mut self, name: &str, fields: &[Field], supertypes: &[String]) -> Result<()>;

    /// Drop an event type. Returns `false` if it was not registered.
    fn unregister_type(&mut self, name: &str) -> Result<bool>;

    /// Start a statement over already-registered types.
    fn create_statement(&mut self, name: &str, model: &Statement) -> Result<StatementId>;

    fn add_listener(&mut self, id: StatementId, listener: Listener) -> Result<()>;

    fn stop(&mut self, id: StatementId) -> Result<()>;

    fn destroy(&mut self, id: StatementId) -> Result<()>;

    fn is_stopped(&self, id: StatementId) -> bool;

    fn is_destroyed(&self, id: StatementId) -> bool;

    /// Fire-and-forget ingestion of one record of the given type.
    fn send_event(&mut self, record: Record, type_name: &str) -> Result<()>;
}
