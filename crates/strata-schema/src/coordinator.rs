//! Cross-target schema operations and the waiting-query list.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use strata_core::error::{Error, Result};
use strata_core::processor::Processor;
use strata_core::schema::{Field, FieldType};
use strata_core::value::Event;
use strata_query::name::validate_target_name;
use strata_query::{Bucket, Query};

use crate::fieldset::FieldSet;
use crate::target::{ApplyStats, BatchOverlay, KnownField, Referred, TargetSchema};

/// What a query needs, resolved per target: field name → nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub per_target: BTreeMap<String, BTreeMap<String, bool>>,
    /// Unqualified fields of a multi-target query.
    pub unqualified: BTreeMap<String, bool>,
}

impl Requirements {
    pub fn of(query: &Query) -> Result<Self> {
        let fields = query.fields()?;
        let targets = query.targets();
        let mut per_target: BTreeMap<String, BTreeMap<String, bool>> = targets
            .iter()
            .map(|t| (t.clone(), BTreeMap::new()))
            .collect();

        for (target, needs) in per_target.iter_mut() {
            let bucket = Bucket::Target(target.clone());
            for f in fields.target(target) {
                let nullable = fields.is_nullable(&bucket, &f);
                needs.insert(f, nullable);
            }
        }

        let unknown = fields.unknown();
        if !unknown.is_empty() {
            match targets {
                [sole] => {
                    let needs = per_target.entry(sole.clone()).or_default();
                    for f in unknown {
                        let nullable = fields.is_nullable(&Bucket::Unknown, &f);
                        needs.entry(f).or_insert(nullable);
                    }
                }
                _ => return Err(Error::UnknownQualifier(unknown.join(", "))),
            }
        }

        let unqualified = fields
            .unqualified()
            .into_iter()
            .map(|f| {
                let nullable = fields.is_nullable(&Bucket::Unqualified, &f);
                (f, nullable)
            })
            .collect();

        Ok(Self {
            per_target,
            unqualified,
        })
    }
}

#[derive(Debug)]
pub struct SchemaCoordinator {
    targets: BTreeMap<String, TargetSchema>,
    waiting: VecDeque<Query>,
    digest_len: usize,
    stats: ApplyStats,
}

impl SchemaCoordinator {
    pub fn new(digest_len: usize) -> Self {
        Self {
            targets: BTreeMap::new(),
            waiting: VecDeque::new(),
            digest_len,
            stats: ApplyStats::default(),
        }
    }

    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    pub fn contains(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    pub fn target(&self, target: &str) -> Option<&TargetSchema> {
        self.targets.get(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetSchema> {
        self.targets.values()
    }

    fn target_mut(&mut self, target: &str) -> Result<&mut TargetSchema> {
        self.targets
            .get_mut(target)
            .ok_or_else(|| Error::TargetNotFound(target.to_string()))
    }

    /// Open a target. Declared fields make it active right away; without
    /// them it stays lazy until its first event or query binding.
    /// Returns `false` if the target already exists.
    pub fn open(
        &mut self,
        processor: &mut dyn Processor,
        target: &str,
        fields: Option<&[Field]>,
        auto_field: bool,
    ) -> Result<bool> {
        validate_target_name(target)?;
        if self.targets.contains_key(target) {
            return Ok(false);
        }
        let declared = fields.unwrap_or(&[]);
        for (i, f) in declared.iter().enumerate() {
            if f.name.is_empty() {
                return Err(Error::InvalidName("empty field name".into()));
            }
            if declared[..i].iter().any(|g| g.name == f.name) {
                return Err(Error::Duplicate(format!("field '{}' declared twice", f.name)));
            }
        }

        let mut schema = TargetSchema::new(target, declared, auto_field, self.digest_len);
        if !declared.is_empty() {
            self.stats.add(schema.activate(processor)?);
        }
        info!(target_name = target, declared = declared.len(), auto_field, "target opened");
        self.targets.insert(target.to_string(), schema);
        Ok(true)
    }

    /// Unregister every type of `target` and forget it. Queries bound to it
    /// must have been unbound already.
    pub fn close(&mut self, processor: &mut dyn Processor, target: &str) -> Result<bool> {
        let Some(schema) = self.targets.get_mut(target) else {
            return Ok(false);
        };
        let holders = schema.holders();
        if !holders.is_empty() {
            return Err(Error::Invariant(format!(
                "target '{target}' still bound by {holders:?}"
            )));
        }
        self.stats.add(schema.teardown(processor)?);
        self.targets.remove(target);
        info!(target_name = target, "target closed");
        Ok(true)
    }

    pub fn modify(&mut self, target: &str, auto_field: bool) -> Result<bool> {
        let Some(schema) = self.targets.get_mut(target) else {
            return Ok(false);
        };
        let changed = schema.auto_field() != auto_field;
        schema.set_auto_field(auto_field);
        info!(target_name = target, auto_field, "target modified");
        Ok(changed)
    }

    pub fn reserve(&mut self, target: &str, field: &str, data_type: FieldType) -> Result<bool> {
        if field.is_empty() {
            return Err(Error::InvalidName("empty field name".into()));
        }
        self.target_mut(target)?.reserve(field, data_type)
    }

    pub fn fields(&self, target: &str) -> Option<Vec<KnownField>> {
        self.targets
            .get(target)
            .map(|t| t.known_fields().cloned().collect())
    }

    /// Check a whole batch without mutating anything.
    pub fn validate(&self, target: &str, events: &[Event]) -> Result<()> {
        let schema = self
            .targets
            .get(target)
            .ok_or_else(|| Error::TargetNotFound(target.to_string()))?;
        let mut overlay = BatchOverlay::default();
        for event in events {
            schema.validate(event, &mut overlay)?;
        }
        Ok(())
    }

    /// Match one event to its data fieldset, creating it when needed.
    pub fn refer(&mut self, processor: &mut dyn Processor, target: &str, event: &Event) -> Result<Referred> {
        let referred = self.target_mut(target)?.refer(processor, event)?;
        self.stats.add(referred.stats);
        Ok(referred)
    }

    /// Data fieldset a referred event currently belongs to.
    pub fn lookup(&self, target: &str, event: &Event) -> Result<&FieldSet> {
        let schema = self
            .targets
            .get(target)
            .ok_or_else(|| Error::TargetNotFound(target.to_string()))?;
        schema.lookup(event).ok_or_else(|| {
            Error::Invariant(format!("no data fieldset on '{target}' for a referred event"))
        })
    }

    /// Every referenced target exists and every required field is known.
    pub fn ready(&self, query: &Query) -> Result<bool> {
        let req = Requirements::of(query)?;
        for (target, needs) in &req.per_target {
            let Some(schema) = self.targets.get(target) else {
                return Ok(false);
            };
            if needs.keys().any(|f| schema.known(f).is_none()) {
                return Ok(false);
            }
        }
        let all_resolvable = req.unqualified.keys().all(|f| {
            req.per_target
                .keys()
                .filter_map(|t| self.targets.get(t))
                .any(|s| s.known(f).is_some())
        });
        Ok(all_resolvable)
    }

    /// Unbound query fieldsets, one per target the query reads.
    pub fn generate_fieldset_mapping(&self, query: &Query) -> Result<BTreeMap<String, FieldSet>> {
        let req = Requirements::of(query)?;
        let mut mapping = BTreeMap::new();
        for (target, needs) in &req.per_target {
            let schema = self
                .targets
                .get(target)
                .ok_or_else(|| Error::TargetNotFound(target.clone()))?;
            let mut needs = needs.clone();
            for (f, nullable) in &req.unqualified {
                if schema.known(f).is_some() {
                    needs.entry(f.clone()).or_insert(*nullable);
                }
            }
            mapping.insert(target.clone(), schema.query_fieldset(&needs)?);
        }
        Ok(mapping)
    }

    /// Bind the query's fieldsets; returns `target → type name`.
    pub fn bind_query(&mut self, processor: &mut dyn Processor, query: &Query) -> Result<BTreeMap<String, String>> {
        let mapping = self.generate_fieldset_mapping(query)?;
        let mut bound = BTreeMap::new();
        for (target, fieldset) in mapping {
            let result = self
                .target_mut(&target)
                .and_then(|s| s.bind_query(processor, query.name(), fieldset));
            match result {
                Ok((type_name, stats)) => {
                    self.stats.add(stats);
                    bound.insert(target, type_name);
                }
                Err(e) => {
                    if let Err(undo) = self.unbind_query(processor, query.name()) {
                        warn!(query = query.name(), error = %undo, "rollback of partial binding failed");
                    }
                    return Err(e);
                }
            }
        }
        Ok(bound)
    }

    pub fn unbind_query(&mut self, processor: &mut dyn Processor, query: &str) -> Result<()> {
        for schema in self.targets.values_mut() {
            let stats = schema.unbind_query(processor, query)?;
            self.stats.add(stats);
        }
        Ok(())
    }

    /// Park a query until its fields are known.
    pub fn park(&mut self, query: Query) {
        debug!(query = query.name(), "query parked");
        self.waiting.push_back(query);
    }

    pub fn unpark(&mut self, name: &str) -> Option<Query> {
        let pos = self.waiting.iter().position(|q| q.name() == name)?;
        self.waiting.remove(pos)
    }

    pub fn waiting(&self) -> impl Iterator<Item = &Query> {
        self.waiting.iter()
    }

    pub fn is_waiting(&self, name: &str) -> bool {
        self.waiting.iter().any(|q| q.name() == name)
    }

    /// Remove and return every parked query that is now ready, in the order
    /// they were parked.
    pub fn take_ready(&mut self) -> Vec<Query> {
        let mut ready = Vec::new();
        let mut still = VecDeque::with_capacity(self.waiting.len());
        while let Some(q) = self.waiting.pop_front() {
            if matches!(self.ready(&q), Ok(true)) {
                ready.push(q);
            } else {
                still.push_back(q);
            }
        }
        self.waiting = still;
        ready
    }
}
