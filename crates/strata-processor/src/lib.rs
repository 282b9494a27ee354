#![forbid(unsafe_code)]
//! strata-processor: a small in-memory continuous-query processor.
//!
//! It implements the `Compiler`/`Processor` contract from `strata-core` with
//! just enough behavior to drive the schema layer end to end: an EPL-subset
//! grammar, a type registry with supertypes, and per-event statement
//! evaluation with synchronous listeners. Windows, joins and aggregation are
//! not evaluated.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod registry;

use std::collections::BTreeMap;

use strata_core::ast::{Expr, Statement};
use strata_core::error::{Error, Result};
use strata_core::id::StatementId;
use strata_core::processor::{Compiler, Listener, Processor, SyntaxError};
use strata_core::schema::Field;
use strata_core::value::Record;

pub use registry::{EventType, TypeRegistry};

/// The grammar alone, for callers that only need to compile.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser;

impl Compiler for Parser {
    fn compile(&self, expression: &str) -> std::result::Result<Statement, SyntaxError> {
        parser::parse_statement(expression)
    }
}

struct Running {
    name: String,
    statement: Statement,
    listeners: Vec<Listener>,
    stopped: bool,
}

#[derive(Default)]
pub struct InMemoryProcessor {
    registry: TypeRegistry,
    statements: BTreeMap<StatementId, Running>,
    last_id: StatementId,
    events: u64,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Names of statements that have not been destroyed.
    pub fn statement_names(&self) -> Vec<&str> {
        self.statements.values().map(|r| r.name.as_str()).collect()
    }

    pub fn statement(&self, id: StatementId) -> Option<&Statement> {
        self.statements.get(&id).map(|r| &r.statement)
    }

    /// Events accepted by `send_event` so far.
    pub fn events_received(&self) -> u64 {
        self.events
    }

    fn running_mut(&mut self, id: StatementId) -> Result<&mut Running> {
        self.statements
            .get_mut(&id)
            .ok_or_else(|| Error::Processor(format!("no live statement {id}")))
    }
}

/// Every stream type name of `stmt`, sub-queries included.
fn stream_types(stmt: &Statement, out: &mut Vec<String>) {
    out.extend(stmt.from.iter().map(|s| s.type_name.clone()));
    for e in stmt.expressions() {
        e.visit(&mut |node| {
            if let Expr::SubQuery(sub) = node {
                stream_types(sub, out);
            }
        });
    }
}

impl Compiler for InMemoryProcessor {
    fn compile(&self, expression: &str) -> std::result::Result<Statement, SyntaxError> {
        Parser.compile(expression)
    }
}

impl Processor for InMemoryProcessor {
    fn register_type(&mut self, name: &str, fields: &[Field], supertypes: &[String]) -> Result<()> {
        self.registry.register(name, fields, supertypes)?;
        #[cfg(feature = "tracing")]
        tracing::trace!(type_name = name, fields = fields.len(), supertypes = ?supertypes, "type registered");
        Ok(())
    }

    fn unregister_type(&mut self, name: &str) -> Result<bool> {
        for running in self.statements.values() {
            let mut types = Vec::new();
            stream_types(&running.statement, &mut types);
            if types.iter().any(|t| t == name) {
                return Err(Error::Processor(format!(
                    "type '{name}' is in use by statement '{}'",
                    running.name
                )));
            }
        }
        self.registry.unregister(name)
    }

    fn create_statement(&mut self, name: &str, model: &Statement) -> Result<StatementId> {
        let mut types = Vec::new();
        stream_types(model, &mut types);
        if let Some(missing) = types.iter().find(|t| !self.registry.contains(t)) {
            return Err(Error::Processor(format!(
                "statement '{name}' reads unregistered type '{missing}'"
            )));
        }
        self.last_id = self.last_id.next();
        let id = self.last_id;
        self.statements.insert(
            id,
            Running {
                name: name.to_string(),
                statement: model.clone(),
                listeners: Vec::new(),
                stopped: false,
            },
        );
        Ok(id)
    }

    fn add_listener(&mut self, id: StatementId, listener: Listener) -> Result<()> {
        self.running_mut(id)?.listeners.push(listener);
        Ok(())
    }

    fn stop(&mut self, id: StatementId) -> Result<()> {
        self.running_mut(id)?.stopped = true;
        Ok(())
    }

    fn destroy(&mut self, id: StatementId) -> Result<()> {
        self.statements
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::Processor(format!("no live statement {id}")))
    }

    fn is_stopped(&self, id: StatementId) -> bool {
        self.statements.get(&id).map_or(true, |r| r.stopped)
    }

    fn is_destroyed(&self, id: StatementId) -> bool {
        id <= self.last_id && !self.statements.contains_key(&id)
    }

    fn send_event(&mut self, record: Record, type_name: &str) -> Result<()> {
        let ty = self
            .registry
            .get(type_name)
            .ok_or_else(|| Error::Processor(format!("unknown event type '{type_name}'")))?;
        if let Some((n, _)) = record
            .iter()
            .find(|(n, _)| !ty.fields.iter().any(|f| f.name == *n))
        {
            return Err(Error::Processor(format!(
                "field '{n}' is not part of type '{type_name}'"
            )));
        }
        self.events += 1;

        for running in self.statements.values().filter(|r| !r.stopped) {
            let stream = running
                .statement
                .from
                .iter()
                .find(|s| self.registry.is_a(type_name, &s.type_name));
            let Some(stream) = stream else { continue };
            let row = eval::Row {
                stream: stream.reference_name(),
                record: &record,
            };
            if let Some(out) = eval::apply(&running.statement, &row) {
                let batch = [out];
                for listener in &running.listeners {
                    listener(&batch[..]);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use strata_core::schema::FieldType;
    use strata_core::value::Value;

    fn long(name: &str) -> Field {
        Field::required(name, FieldType::Long)
    }

    fn collecting(p: &mut InMemoryProcessor, id: StatementId) -> Arc<Mutex<Vec<Record>>> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&sink);
        p.add_listener(
            id,
            Box::new(move |rs: &[Record]| s.lock().unwrap().extend_from_slice(rs)),
        )
        .unwrap();
        sink
    }

    #[test]
    fn delivers_subtype_events_to_supertype_statements() {
        let mut p = InMemoryProcessor::new();
        p.register_type("base", &[], &[]).unwrap();
        p.register_type("q", &[long("a")], &["base".into()]).unwrap();
        p.register_type("d", &[long("a"), long("b")], &["base".into(), "q".into()])
            .unwrap();

        let stmt = p.compile("select a from q as t where a > 0").unwrap();
        let id = p.create_statement("s", &stmt).unwrap();
        let out = collecting(&mut p, id);

        let rec: Record = [("a".to_string(), Value::Long(1)), ("b".to_string(), Value::Long(2))]
            .into_iter()
            .collect();
        p.send_event(rec, "d").unwrap();
        assert_eq!(out.lock().unwrap().len(), 1);
        assert_eq!(p.events_received(), 1);
    }

    #[test]
    fn type_in_use_cannot_be_dropped() {
        let mut p = InMemoryProcessor::new();
        p.register_type("q", &[long("a")], &[]).unwrap();
        let stmt = p.compile("select a from q").unwrap();
        let id = p.create_statement("s", &stmt).unwrap();
        assert!(p.unregister_type("q").is_err());
        p.stop(id).unwrap();
        assert!(p.is_stopped(id));
        p.destroy(id).unwrap();
        assert!(p.is_destroyed(id));
        assert!(p.unregister_type("q").unwrap());
    }

    #[test]
    fn statements_need_registered_types() {
        let mut p = InMemoryProcessor::new();
        let stmt = p.compile("select a from nope").unwrap();
        assert!(matches!(
            p.create_statement("s", &stmt),
            Err(Error::Processor(_))
        ));
    }

    #[test]
    fn stopped_statements_receive_nothing() {
        let mut p = InMemoryProcessor::new();
        p.register_type("q", &[long("a")], &[]).unwrap();
        let stmt = p.compile("select a from q").unwrap();
        let id = p.create_statement("s", &stmt).unwrap();
        let out = collecting(&mut p, id);
        p.stop(id).unwrap();
        let rec: Record = [("a".to_string(), Value::Long(1))].into_iter().collect();
        p.send_event(rec, "q").unwrap();
        assert!(out.lock().unwrap().is_empty());
    }

    #[test]
    fn records_must_fit_their_type() {
        let mut p = InMemoryProcessor::new();
        p.register_type("q", &[long("a")], &[]).unwrap();
        let rec: Record = [("zz".to_string(), Value::Long(1))].into_iter().collect();
        assert!(p.send_event(rec.clone(), "q").is_err());
        assert!(p.send_event(rec, "missing").is_err());
    }
}
