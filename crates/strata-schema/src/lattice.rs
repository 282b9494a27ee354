//! Pure planning over one target's fieldset graph.
//!
//! Every function takes the current `Graph` and returns the next one plus the
//! registry operations that move the processor from the old state to the new
//! one. Nothing here touches a processor; `TargetSchema` applies the ops in
//! order. Ops always register a replacement before retiring what it replaces.

use std::collections::BTreeSet;

use crate::fieldset::{FieldSet, Level};
use strata_core::schema::Field;

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryOp {
    Register {
        type_name: String,
        fields: Vec<Field>,
        supertypes: Vec<String>,
    },
    Unregister {
        type_name: String,
    },
}

impl RegistryOp {
    pub fn type_name(&self) -> &str {
        match self {
            RegistryOp::Register { type_name, .. } | RegistryOp::Unregister { type_name } => {
                type_name
            }
        }
    }

    fn register(fs: &FieldSet, supertypes: Vec<String>) -> Self {
        RegistryOp::Register {
            type_name: fs.type_name().to_string(),
            fields: fs.definition(),
            supertypes,
        }
    }

    fn unregister(fs: &FieldSet) -> Self {
        RegistryOp::Unregister {
            type_name: fs.type_name().to_string(),
        }
    }
}

/// Bound fieldsets of one active target.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub base: FieldSet,
    pub queries: Vec<FieldSet>,
    pub data: Vec<FieldSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub graph: Graph,
    pub ops: Vec<RegistryOp>,
    /// Type name of the fieldset the plan was made for.
    pub subject: String,
    /// Data fieldsets replaced by a successor, as (old, new) type names.
    pub rebound: Vec<(String, String)>,
}

/// `query` can feed on events of `data`: each field `query` requires is
/// required in `data` with the same type.
pub fn admits(query: &FieldSet, data: &FieldSet) -> bool {
    query.fields().filter(|f| !f.nullable).all(|f| {
        data.get(&f.name)
            .is_some_and(|d| !d.nullable && d.data_type == f.data_type)
    })
}

/// `query` is a declared supertype of `data`.
pub fn is_supertype(query: &FieldSet, data: &FieldSet) -> bool {
    admits(query, data) && data.is_superset_of(query)
}

/// Base first, then every query fieldset that is a supertype of `data`,
/// sorted by type name.
pub fn supertypes_of(data: &FieldSet, base: &FieldSet, queries: &[FieldSet]) -> Vec<String> {
    let mut names: Vec<String> = queries
        .iter()
        .filter(|q| is_supertype(q, data))
        .map(|q| q.type_name().to_string())
        .collect();
    names.sort();
    names.insert(0, base.type_name().to_string());
    names
}

/// Widen `data` with the nullable fields of every query it admits.
fn widen(data: &FieldSet, queries: &[FieldSet], update_type_name: bool) -> FieldSet {
    let mut next = data.clone();
    for q in queries.iter().filter(|q| admits(q, data)) {
        next = next.rebind(false, Some(q));
    }
    if update_type_name {
        next = next.rebind(true, None);
    }
    next
}

/// Whether an event carrying exactly `present` fits `data`: every present
/// field is a required field of `data` and everything else in `data` is
/// nullable.
pub fn fits(data: &FieldSet, present: &BTreeSet<String>) -> bool {
    present
        .iter()
        .all(|n| data.get(n).is_some_and(|f| !f.nullable))
        && data.fields().all(|f| f.nullable || present.contains(&f.name))
}

/// The tightest data fieldset for an event: fewest extra fields, then the
/// lexicographically smallest type name.
pub fn select_candidate<'a>(
    data: &'a [FieldSet],
    present: &BTreeSet<String>,
) -> Option<&'a FieldSet> {
    data.iter()
        .filter(|d| fits(d, present))
        .min_by(|a, b| {
            (a.len() - present.len(), a.type_name()).cmp(&(b.len() - present.len(), b.type_name()))
        })
}

/// Register the base fieldset of a target being activated.
pub fn plan_base(base: FieldSet) -> Plan {
    let ops = vec![RegistryOp::register(&base, Vec::new())];
    Plan {
        subject: base.type_name().to_string(),
        graph: Graph {
            base,
            queries: Vec::new(),
            data: Vec::new(),
        },
        ops,
        rebound: Vec::new(),
    }
}

/// Add a new data fieldset (unbound, `Level::Data`).
///
/// It is widened against all query fieldsets before it is bound, so that
/// every query it admits becomes one of its supertypes.
pub fn plan_data(graph: &Graph, data: FieldSet, digest_len: usize) -> Plan {
    let widened = widen(&data, &graph.queries, false).bind(digest_len);
    let supertypes = supertypes_of(&widened, &graph.base, &graph.queries);
    let mut next = graph.clone();
    let ops = vec![RegistryOp::register(&widened, supertypes)];
    let subject = widened.type_name().to_string();
    next.data.push(widened);
    Plan {
        graph: next,
        ops,
        subject,
        rebound: Vec::new(),
    }
}

/// Bind a new query fieldset (unbound, `Level::Query`).
///
/// Every data fieldset it admits is widened and rebound under a fresh name
/// that lists it as a supertype; the old data type is retired afterwards.
pub fn plan_query_bind(graph: &Graph, query: FieldSet, digest_len: usize) -> Plan {
    let query = query.bind(digest_len);
    let mut next = graph.clone();
    let mut ops = vec![RegistryOp::register(&query, vec![graph.base.type_name().to_string()])];
    next.queries.push(query.clone());

    let mut rebound = Vec::new();
    for slot in next.data.iter_mut() {
        if !admits(&query, slot) {
            continue;
        }
        let successor = widen(slot, std::slice::from_ref(&query), true);
        let supertypes = supertypes_of(&successor, &next.base, &next.queries);
        ops.push(RegistryOp::register(&successor, supertypes));
        ops.push(RegistryOp::unregister(slot));
        rebound.push((slot.type_name().to_string(), successor.type_name().to_string()));
        *slot = successor;
    }

    Plan {
        graph: next,
        ops,
        subject: query.type_name().to_string(),
        rebound,
    }
}

/// Retire a query fieldset. Data fieldsets listing it as a supertype are
/// rebound without it first. Fields added by widening stay, as nullable.
pub fn plan_query_unbind(graph: &Graph, type_name: &str) -> Plan {
    let mut next = graph.clone();
    let Some(pos) = next.queries.iter().position(|q| q.type_name() == type_name) else {
        return Plan {
            graph: next,
            ops: Vec::new(),
            subject: type_name.to_string(),
            rebound: Vec::new(),
        };
    };
    let query = next.queries.remove(pos);

    let mut ops = Vec::new();
    let mut rebound = Vec::new();
    for slot in next.data.iter_mut() {
        if !is_supertype(&query, slot) {
            continue;
        }
        let successor = slot.rebind(true, None);
        let supertypes = supertypes_of(&successor, &next.base, &next.queries);
        ops.push(RegistryOp::register(&successor, supertypes));
        ops.push(RegistryOp::unregister(slot));
        rebound.push((slot.type_name().to_string(), successor.type_name().to_string()));
        *slot = successor;
    }
    ops.push(RegistryOp::unregister(&query));

    Plan {
        graph: next,
        ops,
        subject: type_name.to_string(),
        rebound,
    }
}

/// Every type of the graph, leaves first.
pub fn plan_teardown(graph: &Graph) -> Vec<RegistryOp> {
    graph
        .data
        .iter()
        .chain(graph.queries.iter())
        .map(RegistryOp::unregister)
        .chain(std::iter::once(RegistryOp::unregister(&graph.base)))
        .collect()
}

/// Structural check used by tests and debug assertions: every query fieldset
/// a data fieldset admits is among its supertypes, and each data fieldset is
/// a superset of all of them.
pub fn is_consistent(graph: &Graph) -> bool {
    let levels_ok = graph.base.level() == Level::Base
        && graph.queries.iter().all(|q| q.level() == Level::Query)
        && graph.data.iter().all(|d| d.level() == Level::Data);
    levels_ok
        && graph.data.iter().all(|d| {
            graph
                .queries
                .iter()
                .filter(|q| admits(q, d))
                .all(|q| d.is_superset_of(q))
                && d.is_superset_of(&graph.base)
        })
}
