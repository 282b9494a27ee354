//! Engine: owns the processor and the schema coordinator, and runs every
//! structural mutation under one lock.
//!
//! - `open`/`close`/`modify`/`reserve` manage targets.
//! - `register`/`deregister`/`replace`/`suspend`/`resume` manage queries.
//! - `send` validates, refers, formats and delivers a batch, then drains
//!   loopback output.
//! - `targets`/`queries`/`fields` read the published catalog and never wait
//!   on the lock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use strata_core::config::EngineConfig;
use strata_core::error::{Error, Result};
use strata_core::id::StatementId;
use strata_core::processor::{Listener, Processor};
use strata_core::schema::{Field, FieldType};
use strata_core::value::{Event, Record};
use strata_processor::InMemoryProcessor;
use strata_query::{rewrite_event_type_name, Query, SuspendedQuery};
use strata_schema::{KnownField, Requirements, SchemaCoordinator};

use crate::catalog::{Catalog, QueryInfo, QueryState, TargetInfo};
use crate::metrics::EngineStats;
use crate::output::{OutputPool, OutputSink};

type LoopbackQueue = Arc<Mutex<VecDeque<(String, Record)>>>;

struct ActiveQuery {
    query: Query,
    statement: StatementId,
}

struct Suspended {
    descriptor: SuspendedQuery,
    targets: Vec<String>,
}

impl Suspended {
    fn touches(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
            || self
                .descriptor
                .group
                .as_deref()
                .and_then(strata_query::name::loopback_target)
                == Some(target)
    }
}

fn touches(query: &Query, target: &str) -> bool {
    query.targets().iter().any(|t| t == target) || query.loopback_target() == Some(target)
}

struct State {
    processor: Box<dyn Processor>,
    schema: SchemaCoordinator,
    active: BTreeMap<String, ActiveQuery>,
    suspended: BTreeMap<String, Suspended>,
    stats: EngineStats,
}

impl State {
    /// Engine counters with the schema layer's totals folded in.
    fn totals(&self) -> EngineStats {
        self.stats.with_schema(self.schema.stats())
    }
}

/// Result of one `send` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    /// Events of the caller's batch delivered to the processor.
    pub accepted: usize,
    /// Loopback records re-injected before returning.
    pub looped_back: usize,
}

pub struct Engine {
    config: EngineConfig,
    state: Mutex<State>,
    output: Arc<dyn OutputSink>,
    catalog: RwLock<Arc<Catalog>>,
    loopback: LoopbackQueue,
}

/// Log server errors with context; client errors only at debug.
fn report<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_client_error() {
            debug!(op, error = %e, "request rejected");
        } else {
            error!(op, error = %e, "operation failed");
        }
    }
    result
}

impl Engine {
    /// Engine over `processor`, buffering output in an `OutputPool`.
    pub fn new(processor: Box<dyn Processor>, config: EngineConfig) -> Self {
        let output = Arc::new(OutputPool::new(config.output_pool_limit));
        Self::with_sink(processor, config, output)
    }

    pub fn with_sink(
        processor: Box<dyn Processor>,
        config: EngineConfig,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        let config = config.normalized();
        let state = State {
            processor,
            schema: SchemaCoordinator::new(config.type_name_digest_len),
            active: BTreeMap::new(),
            suspended: BTreeMap::new(),
            stats: EngineStats::default(),
        };
        let catalog = Catalog::build(&state.schema, Vec::new(), state.stats);
        Self {
            config,
            state: Mutex::new(state),
            output,
            catalog: RwLock::new(Arc::new(catalog)),
            loopback: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Engine over the bundled in-memory processor.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Box::new(InMemoryProcessor::new()), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn output(&self) -> &dyn OutputSink {
        self.output.as_ref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Invariant("engine state lock poisoned".into()))
    }

    fn publish(&self, st: &State) {
        let mut queries: Vec<QueryInfo> = st
            .active
            .values()
            .map(|a| QueryInfo::of(&a.query, QueryState::Active))
            .collect();
        queries.extend(
            st.schema
                .waiting()
                .map(|q| QueryInfo::of(q, QueryState::Waiting)),
        );
        queries.extend(st.suspended.values().map(|s| QueryInfo {
            name: s.descriptor.name.clone(),
            group: s.descriptor.group.clone(),
            expression: s.descriptor.expression.clone(),
            targets: s.targets.clone(),
            state: QueryState::Suspended,
        }));
        let catalog = Arc::new(Catalog::build(&st.schema, queries, st.totals()));
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
    }

    /// Run `op` under the lock and publish the resulting catalog.
    fn mutate<T>(&self, name: &'static str, op: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = report(name, self.lock())?;
        let result = op(&mut *guard);
        self.publish(&*guard);
        report(name, result)
    }

    // ---- read side ----

    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn targets(&self) -> Vec<TargetInfo> {
        self.catalog().targets.clone()
    }

    pub fn queries(&self) -> Vec<QueryInfo> {
        self.catalog().queries.clone()
    }

    pub fn fields(&self, target: &str) -> Option<Vec<KnownField>> {
        self.catalog().fields.get(target).cloned()
    }

    pub fn stats(&self) -> EngineStats {
        self.catalog().stats
    }

    // ---- targets ----

    /// Open `target`. Returns `false` if it already exists.
    pub fn open(&self, target: &str, fields: Option<&[Field]>, auto_field: bool) -> Result<bool> {
        self.mutate("open", |st| {
            let opened = st
                .schema
                .open(st.processor.as_mut(), target, fields, auto_field)?;
            if opened {
                self.activate_ready(st);
            }
            Ok(opened)
        })
    }

    /// Close `target`, deregistering every query that reads it or loops
    /// back into it.
    pub fn close(&self, target: &str) -> Result<bool> {
        self.mutate("close", |st| {
            if !st.schema.contains(target) {
                return Ok(false);
            }
            let mut doomed: Vec<String> = st
                .active
                .values()
                .filter(|a| touches(&a.query, target))
                .map(|a| a.query.name().to_string())
                .collect();
            doomed.extend(
                st.schema
                    .waiting()
                    .filter(|q| touches(q, target))
                    .map(|q| q.name().to_string()),
            );
            doomed.extend(
                st.suspended
                    .iter()
                    .filter(|(_, s)| s.touches(target))
                    .map(|(n, _)| n.clone()),
            );
            for name in &doomed {
                self.deregister_locked(st, name)?;
            }
            self.loopback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(t, _)| t != target);
            st.schema.close(st.processor.as_mut(), target)
        })
    }

    pub fn modify(&self, target: &str, auto_field: bool) -> Result<bool> {
        self.mutate("modify", |st| st.schema.modify(target, auto_field))
    }

    /// Declare a field ahead of traffic; may activate waiting queries.
    pub fn reserve(&self, target: &str, field: &str, data_type: FieldType) -> Result<bool> {
        self.mutate("reserve", |st| {
            let changed = st.schema.reserve(target, field, data_type)?;
            self.activate_ready(st);
            Ok(changed)
        })
    }

    // ---- queries ----

    /// Register a query. It starts right away when every field it needs is
    /// known, otherwise it waits for traffic or reservations.
    pub fn register(&self, name: &str, group: Option<&str>, expression: &str) -> Result<QueryState> {
        self.mutate("register", |st| self.register_locked(st, name, group, expression))
    }

    /// Returns `false` if no query by that name exists.
    pub fn deregister(&self, name: &str) -> Result<bool> {
        self.mutate("deregister", |st| self.deregister_locked(st, name))
    }

    /// Deregister then register under the same lock. Returns whether a
    /// query was replaced and the new query's state.
    pub fn replace(
        &self,
        name: &str,
        group: Option<&str>,
        expression: &str,
    ) -> Result<(bool, QueryState)> {
        self.mutate("replace", |st| {
            let existed = self.deregister_locked(st, name)?;
            let state = self.register_locked(st, name, group, expression)?;
            Ok((existed, state))
        })
    }

    /// Stop an active or waiting query, keeping its descriptor.
    pub fn suspend(&self, name: &str) -> Result<bool> {
        self.mutate("suspend", |st| {
            let query = if let Some(active) = Self::retire_active(st, name)? {
                active.query
            } else if let Some(query) = st.schema.unpark(name) {
                query
            } else {
                return Ok(false);
            };
            info!(query = name, "query suspended");
            st.suspended.insert(
                name.to_string(),
                Suspended {
                    descriptor: query.suspend(),
                    targets: query.targets().to_vec(),
                },
            );
            Ok(true)
        })
    }

    /// Register a suspended query again against the current schema.
    pub fn resume(&self, name: &str) -> Result<bool> {
        self.mutate("resume", |st| {
            let Some(suspended) = st.suspended.remove(name) else {
                return Ok(false);
            };
            let resumed = suspended
                .descriptor
                .resume(&*st.processor)
                .and_then(|query| self.admit(st, query));
            match resumed {
                Ok(state) => {
                    info!(query = name, ?state, "query resumed");
                    Ok(true)
                }
                Err(e) => {
                    st.suspended.insert(name.to_string(), suspended);
                    Err(e)
                }
            }
        })
    }

    fn register_locked(
        &self,
        st: &mut State,
        name: &str,
        group: Option<&str>,
        expression: &str,
    ) -> Result<QueryState> {
        if st.active.contains_key(name) || st.schema.is_waiting(name) || st.suspended.contains_key(name) {
            return Err(Error::Duplicate(format!("query '{name}' already exists")));
        }
        let query = Query::new(name, group.map(str::to_string), expression, &*st.processor)?;
        Requirements::of(&query)?;
        self.admit(st, query)
    }

    /// Open missing targets, then activate or park.
    fn admit(&self, st: &mut State, query: Query) -> Result<QueryState> {
        let needed: Vec<String> = query
            .targets()
            .iter()
            .map(String::as_str)
            .chain(query.loopback_target())
            .map(str::to_string)
            .collect();
        for target in &needed {
            if !st.schema.contains(target) {
                st.schema.open(
                    st.processor.as_mut(),
                    target,
                    None,
                    self.config.default_auto_field,
                )?;
            }
        }
        if st.schema.ready(&query)? {
            self.activate(st, query)?;
            Ok(QueryState::Active)
        } else {
            info!(query = query.name(), "query waiting for fields");
            st.schema.park(query);
            Ok(QueryState::Waiting)
        }
    }

    fn activate(&self, st: &mut State, query: Query) -> Result<()> {
        let mapping = st.schema.bind_query(st.processor.as_mut(), &query)?;
        let statement = match self.start_statement(st, &query, &mapping) {
            Ok(id) => id,
            Err(e) => {
                if let Err(undo) = st.schema.unbind_query(st.processor.as_mut(), query.name()) {
                    warn!(query = query.name(), error = %undo, "unbind after failed activation");
                }
                return Err(e);
            }
        };
        info!(query = query.name(), %statement, "query activated");
        st.stats.queries_activated += 1;
        st.active
            .insert(query.name().to_string(), ActiveQuery { query, statement });
        Ok(())
    }

    fn start_statement(
        &self,
        st: &mut State,
        query: &Query,
        mapping: &BTreeMap<String, String>,
    ) -> Result<StatementId> {
        let statement = rewrite_event_type_name(query.model().statement(), mapping)?;
        let id = st.processor.create_statement(query.name(), &statement)?;
        if let Err(e) = st.processor.add_listener(id, self.listener(query)) {
            if let Err(undo) = st.processor.destroy(id) {
                warn!(query = query.name(), error = %undo, "destroy after failed listener");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Activate every parked query that became ready. A query that fails to
    /// start is dropped and logged; the triggering operation still succeeds.
    fn activate_ready(&self, st: &mut State) -> usize {
        let mut started = 0;
        for query in st.schema.take_ready() {
            let name = query.name().to_string();
            match self.activate(st, query) {
                Ok(()) => started += 1,
                Err(e) => error!(query = %name, error = %e, "waiting query dropped"),
            }
        }
        started
    }

    fn listener(&self, query: &Query) -> Listener {
        match query.loopback_target() {
            Some(target) => {
                let target = target.to_string();
                let queue = Arc::clone(&self.loopback);
                Box::new(move |records: &[Record]| {
                    queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(records.iter().map(|r| (target.clone(), r.clone())));
                })
            }
            None => {
                let name = query.name().to_string();
                let group = query.group().map(str::to_string);
                let output = Arc::clone(&self.output);
                Box::new(move |records: &[Record]| output.push(&name, group.as_deref(), records))
            }
        }
    }

    /// Stop and destroy the statement, then release its fieldsets.
    fn retire(st: &mut State, active: &ActiveQuery) -> Result<()> {
        st.processor.stop(active.statement)?;
        st.processor.destroy(active.statement)?;
        st.schema
            .unbind_query(st.processor.as_mut(), active.query.name())
    }

    /// Retire the active query `name`. It stays active if retiring fails.
    fn retire_active(st: &mut State, name: &str) -> Result<Option<ActiveQuery>> {
        let Some(active) = st.active.remove(name) else {
            return Ok(None);
        };
        match Self::retire(st, &active) {
            Ok(()) => Ok(Some(active)),
            Err(e) => {
                st.active.insert(name.to_string(), active);
                Err(e)
            }
        }
    }

    fn deregister_locked(&self, st: &mut State, name: &str) -> Result<bool> {
        let group = if let Some(active) = Self::retire_active(st, name)? {
            active.query.group().map(str::to_string)
        } else if let Some(query) = st.schema.unpark(name) {
            query.group().map(str::to_string)
        } else if let Some(suspended) = st.suspended.remove(name) {
            suspended.descriptor.group
        } else {
            return Ok(false);
        };
        self.output.remove(name, group.as_deref());
        info!(query = name, "query deregistered");
        Ok(true)
    }

    // ---- events ----

    /// Deliver `events` to `target`. A batch that fails validation is
    /// rejected whole and changes nothing.
    pub fn send(&self, target: &str, events: &[Event]) -> Result<SendOutcome> {
        self.mutate("send", |st| {
            let accepted = self.ingest(st, target, events)?;
            let looped_back = self.drain_loopback(st);
            st.totals().emit("send");
            Ok(SendOutcome {
                accepted,
                looped_back,
            })
        })
    }

    fn ingest(&self, st: &mut State, target: &str, events: &[Event]) -> Result<usize> {
        if let Err(e) = st.schema.validate(target, events) {
            st.stats.events_rejected += events.len() as u64;
            return Err(e);
        }

        let mut referred = Vec::with_capacity(events.len());
        for event in events {
            let r = st.schema.refer(st.processor.as_mut(), target, event)?;
            if r.created || r.learned {
                self.activate_ready(st);
            }
            referred.push(r.event);
        }

        // Fieldsets may have been rebound by activations above, so the type
        // is looked up only now.
        for event in &referred {
            let fieldset = st.schema.lookup(target, event)?;
            let record = fieldset.format(event)?;
            let type_name = fieldset.type_name().to_string();
            st.processor.send_event(record, &type_name)?;
        }
        st.stats.events_accepted += referred.len() as u64;
        Ok(referred.len())
    }

    fn drain_loopback(&self, st: &mut State) -> usize {
        let mut looped = 0;
        for round in 0..self.config.max_loopback_rounds {
            let batch: Vec<(String, Record)> = self
                .loopback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if batch.is_empty() {
                break;
            }
            debug!(round, records = batch.len(), "loopback round");
            for (target, record) in batch {
                let event = record.to_event();
                match self.ingest(st, &target, std::slice::from_ref(&event)) {
                    Ok(n) => looped += n,
                    Err(e) => warn!(target_name = %target, error = %e, "loopback event dropped"),
                }
            }
        }
        let pending = self
            .loopback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if pending > 0 {
            warn!(pending, "loopback round limit reached; remaining records wait for the next send");
        }
        st.stats.events_looped_back += looped as u64;
        looped
    }
}
