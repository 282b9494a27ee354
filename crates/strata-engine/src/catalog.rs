//! Read-only snapshot of targets and queries.
//!
//! Published by the engine after each structural mutation; readers clone the
//! `Arc` and never wait on the mutation lock, so what they see may lag by one
//! operation.

use std::collections::BTreeMap;

use serde::Serialize;

use strata_query::Query;
use strata_schema::{KnownField, SchemaCoordinator};

use crate::metrics::EngineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Active,
    Waiting,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInfo {
    pub name: String,
    pub auto_field: bool,
    pub active: bool,
    pub data_fieldsets: usize,
    pub query_fieldsets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryInfo {
    pub name: String,
    pub group: Option<String>,
    pub expression: String,
    pub targets: Vec<String>,
    pub state: QueryState,
}

impl QueryInfo {
    pub fn of(query: &Query, state: QueryState) -> Self {
        Self {
            name: query.name().to_string(),
            group: query.group().map(str::to_string),
            expression: query.expression().to_string(),
            targets: query.targets().to_vec(),
            state,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub targets: Vec<TargetInfo>,
    /// Sorted by name.
    pub queries: Vec<QueryInfo>,
    pub fields: BTreeMap<String, Vec<KnownField>>,
    pub stats: EngineStats,
}

impl Catalog {
    pub fn build(
        schema: &SchemaCoordinator,
        mut queries: Vec<QueryInfo>,
        stats: EngineStats,
    ) -> Self {
        let targets = schema
            .targets()
            .map(|t| TargetInfo {
                name: t.name().to_string(),
                auto_field: t.auto_field(),
                active: t.is_active(),
                data_fieldsets: t.data_fieldsets().len(),
                query_fieldsets: t.query_fieldsets().len(),
            })
            .collect();
        let fields = schema
            .targets()
            .map(|t| (t.name().to_string(), t.known_fields().cloned().collect()))
            .collect();
        queries.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            targets,
            queries,
            fields,
            stats: stats.with_schema(schema.stats()),
        }
    }

    pub fn query(&self, name: &str) -> Option<&QueryInfo> {
        self.queries.iter().find(|q| q.name == name)
    }

    pub fn target(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.iter().find(|t| t.name == name)
    }
}
