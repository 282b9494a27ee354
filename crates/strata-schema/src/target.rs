//! One target's schema state: known fields and its fieldset graph.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, error, info};

use strata_core::error::{Error, Result};
use strata_core::processor::Processor;
use strata_core::schema::{Field, FieldType};
use strata_core::value::{Event, Value};

use crate::fieldset::{FieldSet, Level};
use crate::lattice::{self, Graph, Plan, RegistryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrigin {
    Declared,
    Reserved,
    Observed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: FieldType,
    pub origin: FieldOrigin,
}

/// What earlier events of the same batch would teach a target.
#[derive(Debug, Default, Clone)]
pub struct BatchOverlay {
    types: BTreeMap<String, FieldType>,
    validated: usize,
}

impl BatchOverlay {
    /// Type a field would be given by an earlier event of the batch.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.types.get(name).copied()
    }

    /// Events validated so far.
    pub fn validated(&self) -> usize {
        self.validated
    }
}

/// Counts of registry changes applied for a target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    pub registered: u64,
    pub rebound: u64,
    pub retired: u64,
}

impl ApplyStats {
    pub fn add(&mut self, other: ApplyStats) {
        self.registered += other.registered;
        self.rebound += other.rebound;
        self.retired += other.retired;
    }
}

#[derive(Debug)]
struct QueryBinding {
    type_name: String,
    holders: BTreeSet<String>,
}

#[derive(Debug)]
pub struct TargetSchema {
    name: String,
    auto_field: bool,
    known: BTreeMap<String, KnownField>,
    /// `None` while lazy.
    graph: Option<Graph>,
    bindings: Vec<QueryBinding>,
    digest_len: usize,
}

impl TargetSchema {
    /// Non-nullable declared fields form the base fieldset; nullable ones
    /// are known up front but optional, like reservations.
    pub fn new(name: impl Into<String>, declared: &[Field], auto_field: bool, digest_len: usize) -> Self {
        let known = declared
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    KnownField {
                        name: f.name.clone(),
                        data_type: f.data_type,
                        origin: if f.nullable {
                            FieldOrigin::Reserved
                        } else {
                            FieldOrigin::Declared
                        },
                    },
                )
            })
            .collect();
        Self {
            name: name.into(),
            auto_field,
            known,
            graph: None,
            bindings: Vec::new(),
            digest_len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_field(&self) -> bool {
        self.auto_field
    }

    pub fn set_auto_field(&mut self, auto_field: bool) {
        self.auto_field = auto_field;
    }

    pub fn is_active(&self) -> bool {
        self.graph.is_some()
    }

    /// Strict targets reject fields they have not declared or reserved.
    pub fn is_strict(&self) -> bool {
        !self.auto_field && self.is_active()
    }

    pub fn known_fields(&self) -> impl Iterator<Item = &KnownField> {
        self.known.values()
    }

    pub fn known(&self, name: &str) -> Option<&KnownField> {
        self.known.get(name)
    }

    pub fn base(&self) -> Option<&FieldSet> {
        self.graph.as_ref().map(|g| &g.base)
    }

    pub fn query_fieldsets(&self) -> &[FieldSet] {
        self.graph.as_ref().map(|g| g.queries.as_slice()).unwrap_or(&[])
    }

    pub fn data_fieldsets(&self) -> &[FieldSet] {
        self.graph.as_ref().map(|g| g.data.as_slice()).unwrap_or(&[])
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    fn declared(&self) -> Vec<Field> {
        self.known
            .values()
            .filter(|k| k.origin == FieldOrigin::Declared)
            .map(|k| Field::required(k.name.clone(), k.data_type))
            .collect()
    }

    /// Check one event against the known fields, learning into `overlay`
    /// the types a fresh field would be given. Mutates nothing.
    ///
    /// A lazy target without auto-field turns strict once its first event
    /// activates it, so later events of the same batch are held to the
    /// fields the earlier ones introduced.
    pub fn validate(&self, event: &Event, overlay: &mut BatchOverlay) -> Result<()> {
        let strict = self.is_strict() || (!self.auto_field && overlay.validated > 0);
        for k in self.known.values().filter(|k| k.origin == FieldOrigin::Declared) {
            if !event.contains_key(&k.name) {
                return Err(Error::MissingField {
                    target: self.name.clone(),
                    field: k.name.clone(),
                });
            }
        }
        for (name, value) in event {
            let Some(found) = value.field_type() else {
                continue;
            };
            let expected = self
                .known
                .get(name)
                .map(|k| k.data_type)
                .or_else(|| overlay.field_type(name));
            match expected {
                Some(ty) => {
                    if value.coerce(ty).is_none() {
                        return Err(Error::TypeMismatch {
                            field: name.clone(),
                            expected: ty,
                            found: found.as_str().to_string(),
                        });
                    }
                }
                None if strict => {
                    return Err(Error::UndeclaredField {
                        target: self.name.clone(),
                        field: name.clone(),
                    })
                }
                None => {
                    overlay.types.insert(name.clone(), found);
                }
            }
        }
        overlay.validated += 1;
        Ok(())
    }

    /// Event coerced to the known field types. Unknown fields are kept as-is.
    fn normalize(&self, event: &Event) -> Event {
        event
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(n, v)| {
                let v = self
                    .known
                    .get(n)
                    .and_then(|k| v.coerce(k.data_type))
                    .unwrap_or_else(|| v.clone());
                (n.clone(), v)
            })
            .collect()
    }

    /// Register the base fieldset of a lazy target.
    pub fn activate(&mut self, processor: &mut dyn Processor) -> Result<ApplyStats> {
        if self.graph.is_some() {
            return Ok(ApplyStats::default());
        }
        let base = FieldSet::new(self.name.clone(), Level::Base, self.declared()).bind(self.digest_len);
        let plan = lattice::plan_base(base);
        let stats = self.apply(processor, plan)?;
        info!(target_name = %self.name, "target activated");
        Ok(stats)
    }

    /// Learn the event's fields, then find or create its data fieldset.
    ///
    /// Returns the coerced event, the data fieldset's type name, and whether
    /// the call created a fieldset or learned a field.
    pub fn refer(&mut self, processor: &mut dyn Processor, event: &Event) -> Result<Referred> {
        let strict = self.is_strict();
        let mut stats = self.activate(processor)?;
        let mut learned = false;
        for (name, value) in event {
            let Some(ty) = value.field_type() else {
                continue;
            };
            if self.known.contains_key(name) {
                continue;
            }
            if strict {
                return Err(Error::UndeclaredField {
                    target: self.name.clone(),
                    field: name.clone(),
                });
            }
            debug!(target_name = %self.name, field = %name, field_type = %ty, "field observed");
            self.known.insert(
                name.clone(),
                KnownField {
                    name: name.clone(),
                    data_type: ty,
                    origin: FieldOrigin::Observed,
                },
            );
            learned = true;
        }

        let event = self.normalize(event);
        let present: BTreeSet<String> = event.keys().cloned().collect();
        if let Some(found) = self.lookup_present(&present) {
            let type_name = found.type_name().to_string();
            return Ok(Referred {
                event,
                type_name,
                created: false,
                learned,
                stats,
            });
        }

        let fields = present.iter().filter_map(|n| {
            self.known
                .get(n)
                .map(|k| Field::required(n.clone(), k.data_type))
        });
        let fresh = FieldSet::new(self.name.clone(), Level::Data, fields);
        let graph = self.active_graph()?;
        let plan = lattice::plan_data(graph, fresh, self.digest_len);
        let type_name = plan.subject.clone();
        stats.add(self.apply(processor, plan)?);
        info!(target_name = %self.name, type_name = %type_name, fields = present.len(), "data fieldset created");
        Ok(Referred {
            event,
            type_name,
            created: true,
            learned,
            stats,
        })
    }

    fn lookup_present(&self, present: &BTreeSet<String>) -> Option<&FieldSet> {
        lattice::select_candidate(self.data_fieldsets(), present)
    }

    /// The data fieldset an already-referred event currently maps to.
    pub fn lookup(&self, event: &Event) -> Option<&FieldSet> {
        let present: BTreeSet<String> = event
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Null))
            .map(|(n, _)| n.clone())
            .collect();
        self.lookup_present(&present)
    }

    /// Declare `field` explicitly. Returns `false` if it was already known
    /// with the same type.
    pub fn reserve(&mut self, field: &str, data_type: FieldType) -> Result<bool> {
        if let Some(k) = self.known.get(field).cloned() {
            if k.data_type == data_type {
                if k.origin == FieldOrigin::Observed {
                    self.known.insert(
                        field.to_string(),
                        KnownField {
                            origin: FieldOrigin::Reserved,
                            ..k
                        },
                    );
                }
                return Ok(false);
            }
            let in_use = k.origin == FieldOrigin::Declared
                || self
                    .data_fieldsets()
                    .iter()
                    .chain(self.query_fieldsets())
                    .any(|fs| fs.contains(field));
            if in_use {
                return Err(Error::TypeMismatch {
                    field: field.to_string(),
                    expected: k.data_type,
                    found: data_type.as_str().to_string(),
                });
            }
        }
        debug!(target_name = %self.name, field, field_type = %data_type, "field reserved");
        self.known.insert(
            field.to_string(),
            KnownField {
                name: field.to_string(),
                data_type,
                origin: FieldOrigin::Reserved,
            },
        );
        Ok(true)
    }

    /// Build an unbound query fieldset over the base fields plus `needs`
    /// (`name → nullable`). Fields must be known.
    pub fn query_fieldset(&self, needs: &BTreeMap<String, bool>) -> Result<FieldSet> {
        let mut fields = self.declared();
        for (name, nullable) in needs {
            if fields.iter().any(|f| &f.name == name) {
                continue;
            }
            let k = self.known.get(name).ok_or_else(|| {
                Error::Invariant(format!("field '{name}' of target '{}' is not known", self.name))
            })?;
            fields.push(Field::new(name.clone(), k.data_type, *nullable));
        }
        Ok(FieldSet::new(self.name.clone(), Level::Query, fields))
    }

    /// Bind `fieldset` for `query`, sharing an existing query fieldset with
    /// the same identity. Returns the bound type name.
    pub fn bind_query(
        &mut self,
        processor: &mut dyn Processor,
        query: &str,
        fieldset: FieldSet,
    ) -> Result<(String, ApplyStats)> {
        let mut stats = self.activate(processor)?;
        let identity = fieldset.identity();
        let shared = self
            .query_fieldsets()
            .iter()
            .find(|q| q.identity() == identity)
            .map(|q| q.type_name().to_string());

        let type_name = match shared {
            Some(type_name) => type_name,
            None => {
                let plan = lattice::plan_query_bind(self.active_graph()?, fieldset, self.digest_len);
                let type_name = plan.subject.clone();
                stats.add(self.apply(processor, plan)?);
                info!(target_name = %self.name, query, type_name = %type_name, "query fieldset bound");
                type_name
            }
        };

        match self.bindings.iter_mut().find(|b| b.type_name == type_name) {
            Some(b) => {
                b.holders.insert(query.to_string());
            }
            None => self.bindings.push(QueryBinding {
                type_name: type_name.clone(),
                holders: BTreeSet::from([query.to_string()]),
            }),
        }
        Ok((type_name, stats))
    }

    /// Drop `query`'s hold on its query fieldset; the last holder retires it.
    pub fn unbind_query(&mut self, processor: &mut dyn Processor, query: &str) -> Result<ApplyStats> {
        let Some(pos) = self.bindings.iter().position(|b| b.holders.contains(query)) else {
            return Ok(ApplyStats::default());
        };
        self.bindings[pos].holders.remove(query);
        if !self.bindings[pos].holders.is_empty() {
            return Ok(ApplyStats::default());
        }
        let binding = self.bindings.remove(pos);
        let plan = lattice::plan_query_unbind(self.active_graph()?, &binding.type_name);
        let stats = self.apply(processor, plan)?;
        info!(target_name = %self.name, query, type_name = %binding.type_name, "query fieldset retired");
        Ok(stats)
    }

    /// Queries holding a query fieldset on this target.
    pub fn holders(&self) -> BTreeSet<&str> {
        self.bindings
            .iter()
            .flat_map(|b| b.holders.iter().map(String::as_str))
            .collect()
    }

    /// Unregister every type of this target, data first and base last.
    pub fn teardown(&mut self, processor: &mut dyn Processor) -> Result<ApplyStats> {
        let Some(graph) = self.graph.take() else {
            return Ok(ApplyStats::default());
        };
        self.bindings.clear();
        let mut stats = ApplyStats::default();
        for op in lattice::plan_teardown(&graph) {
            self.execute(processor, &op)?;
            stats.retired += 1;
        }
        Ok(stats)
    }

    fn active_graph(&self) -> Result<&Graph> {
        self.graph
            .as_ref()
            .ok_or_else(|| Error::Invariant(format!("target '{}' is not active", self.name)))
    }

    fn execute(&self, processor: &mut dyn Processor, op: &RegistryOp) -> Result<()> {
        let result = match op {
            RegistryOp::Register {
                type_name,
                fields,
                supertypes,
            } => processor.register_type(type_name, fields, supertypes),
            RegistryOp::Unregister { type_name } => processor.unregister_type(type_name).map(|_| ()),
        };
        if let Err(e) = &result {
            error!(target_name = %self.name, type_name = op.type_name(), error = %e, "registry operation failed");
        }
        result
    }

    /// Apply `plan`'s ops in order, then adopt its graph.
    fn apply(&mut self, processor: &mut dyn Processor, plan: Plan) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        for op in &plan.ops {
            self.execute(processor, op)?;
            match op {
                RegistryOp::Register { .. } => stats.registered += 1,
                RegistryOp::Unregister { .. } => stats.retired += 1,
            }
        }
        for (old, new) in &plan.rebound {
            debug!(target_name = %self.name, from = %old, to = %new, "data fieldset rebound");
        }
        stats.rebound = plan.rebound.len() as u64;
        debug_assert!(lattice::is_consistent(&plan.graph));
        self.graph = Some(plan.graph);
        Ok(stats)
    }
}

/// Outcome of `TargetSchema::refer`.
#[derive(Debug, Clone)]
pub struct Referred {
    pub event: Event,
    pub type_name: String,
    pub created: bool,
    pub learned: bool,
    pub stats: ApplyStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_processor::InMemoryProcessor;

    fn event(pairs: &[(&str, Value)]) -> Event {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn lazy_target_activates_on_first_event() {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        assert!(!t.is_active());
        let r = t
            .refer(&mut p, &event(&[("a", Value::Long(1)), ("b", Value::from("x"))]))
            .unwrap();
        assert!(t.is_active());
        assert!(r.created && r.learned);
        assert_eq!(t.known("a").unwrap().data_type, FieldType::Long);
        assert_eq!(t.known("b").unwrap().origin, FieldOrigin::Observed);
        assert_eq!(p.registry().len(), 2);
    }

    #[test]
    fn same_shape_reuses_the_data_fieldset() {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        let first = t.refer(&mut p, &event(&[("a", Value::Long(1))])).unwrap();
        let again = t.refer(&mut p, &event(&[("a", Value::Double(2.0))])).unwrap();
        assert!(!again.created);
        assert_eq!(first.type_name, again.type_name);
        assert_eq!(again.event.get("a"), Some(&Value::Long(2)));
        assert_eq!(t.data_fieldsets().len(), 1);
    }

    #[test]
    fn strict_target_rejects_undeclared_fields() {
        let mut p = InMemoryProcessor::new();
        let declared = [Field::required("a", FieldType::Long)];
        let mut t = TargetSchema::new("t", &declared, false, 16);
        t.activate(&mut p).unwrap();
        let mut overlay = BatchOverlay::default();
        let bad = event(&[("a", Value::Long(1)), ("z", Value::Long(1))]);
        assert!(matches!(
            t.validate(&bad, &mut overlay),
            Err(Error::UndeclaredField { .. })
        ));
        assert!(matches!(
            t.validate(&event(&[]), &mut overlay),
            Err(Error::MissingField { .. })
        ));
        assert!(t.validate(&event(&[("a", Value::Long(1))]), &mut overlay).is_ok());
        assert!(t.data_fieldsets().is_empty());
    }

    #[test]
    fn nullable_declarations_are_optional() {
        let mut p = InMemoryProcessor::new();
        let declared = [
            Field::required("a", FieldType::Long),
            Field::nullable("b", FieldType::String),
        ];
        let mut t = TargetSchema::new("t", &declared, false, 16);
        t.activate(&mut p).unwrap();
        assert_eq!(t.base().unwrap().len(), 1);
        assert_eq!(t.known("b").unwrap().origin, FieldOrigin::Reserved);

        let mut overlay = BatchOverlay::default();
        assert!(t.validate(&event(&[("a", Value::Long(1))]), &mut overlay).is_ok());
        let r = t
            .refer(&mut p, &event(&[("a", Value::Long(1)), ("b", Value::from("x"))]))
            .unwrap();
        assert!(r.created);
        assert!(!r.learned);
    }

    #[test]
    fn validate_tracks_types_within_a_batch() {
        let t = TargetSchema::new("t", &[], true, 16);
        let mut overlay = BatchOverlay::default();
        t.validate(&event(&[("a", Value::Long(1))]), &mut overlay).unwrap();
        assert!(matches!(
            t.validate(&event(&[("a", Value::from("x"))]), &mut overlay),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn lazy_target_without_auto_field_is_strict_after_first_event() {
        let t = TargetSchema::new("t", &[], false, 16);
        let mut overlay = BatchOverlay::default();
        t.validate(&event(&[("a", Value::Long(1))]), &mut overlay).unwrap();
        assert!(t.validate(&event(&[("a", Value::Long(2))]), &mut overlay).is_ok());
        assert!(matches!(
            t.validate(&event(&[("b", Value::Long(2))]), &mut overlay),
            Err(Error::UndeclaredField { .. })
        ));
        assert_eq!(overlay.validated(), 2);
        assert!(!t.is_active());
    }

    #[test]
    fn reserve_overrides_unused_observed_types_only() {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[Field::required("d", FieldType::String)], true, 16);
        assert!(t.reserve("x", FieldType::Double).unwrap());
        assert!(!t.reserve("x", FieldType::Double).unwrap());
        assert!(t.reserve("d", FieldType::Long).is_err());

        t.refer(&mut p, &event(&[("d", Value::from("k")), ("n", Value::Long(1))]))
            .unwrap();
        assert!(t.reserve("n", FieldType::String).is_err());
        assert!(!t.reserve("n", FieldType::Long).unwrap());
        assert_eq!(t.known("n").unwrap().origin, FieldOrigin::Reserved);
    }

    #[test]
    fn shared_query_fieldsets_are_refcounted() {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        t.refer(&mut p, &event(&[("a", Value::Long(1))])).unwrap();
        let needs = BTreeMap::from([("a".to_string(), false)]);

        let fs = t.query_fieldset(&needs).unwrap();
        let (n1, s1) = t.bind_query(&mut p, "q1", fs.clone()).unwrap();
        let (n2, s2) = t.bind_query(&mut p, "q2", fs).unwrap();
        assert_eq!(n1, n2);
        assert_eq!(s1.rebound, 1);
        assert_eq!(s2, ApplyStats::default());

        t.unbind_query(&mut p, "q1").unwrap();
        assert_eq!(t.query_fieldsets().len(), 1);
        t.unbind_query(&mut p, "q2").unwrap();
        assert!(t.query_fieldsets().is_empty());
        assert!(!p.registry().contains(&n1));
    }

    #[test]
    fn teardown_unregisters_everything() {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        t.refer(&mut p, &event(&[("a", Value::Long(1))])).unwrap();
        let needs = BTreeMap::from([("a".to_string(), false)]);
        let fs = t.query_fieldset(&needs).unwrap();
        t.bind_query(&mut p, "q", fs).unwrap();
        t.teardown(&mut p).unwrap();
        assert!(p.registry().is_empty());
        assert!(!t.is_active());
    }
}
