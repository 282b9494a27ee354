//! Parsed query model: targets, sub-queries and per-target field requirements.
//!
//! Everything here is derived from the compiled `Statement` and memoized on
//! first access; a model never changes after it is parsed.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::OnceCell;
use serde::Serialize;

use strata_core::ast::{Expr, FieldRef, Op, Statement};
use strata_core::error::{Error, Result};
use strata_core::processor::Compiler;

/// Where a field reference was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Target(String),
    /// Unqualified reference in a multi-stream statement: applies to every
    /// target that knows the field.
    Unqualified,
    /// Qualifier is neither a target nor an alias; kept as `qualifier.name`.
    Unknown,
}

impl Bucket {
    /// Key in the flat map form: the target name, `""` for unqualified and
    /// `"?"` for unknown.
    pub fn key(&self) -> &str {
        match self {
            Bucket::Target(t) => t,
            Bucket::Unqualified => "",
            Bucket::Unknown => "?",
        }
    }
}

/// Fields-by-target map produced by `QueryModel::explore`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFields {
    buckets: BTreeMap<Bucket, BTreeSet<String>>,
    nullable: BTreeSet<(Bucket, String)>,
}

impl QueryFields {
    pub fn insert(&mut self, bucket: Bucket, name: impl Into<String>, nullable: bool) {
        let name = name.into();
        if nullable {
            self.nullable.insert((bucket.clone(), name.clone()));
        }
        self.buckets.entry(bucket).or_default().insert(name);
    }

    /// Fields of one target, sorted; empty when the target has none.
    pub fn target(&self, target: &str) -> Vec<String> {
        self.bucket(&Bucket::Target(target.to_string()))
    }

    pub fn unqualified(&self) -> Vec<String> {
        self.bucket(&Bucket::Unqualified)
    }

    pub fn unknown(&self) -> Vec<String> {
        self.bucket(&Bucket::Unknown)
    }

    pub fn bucket(&self, bucket: &Bucket) -> Vec<String> {
        self.buckets
            .get(bucket)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A field is nullable for the query only if every reference to it in
    /// that bucket is wrapped in `nullable(...)`.
    pub fn is_nullable(&self, bucket: &Bucket, name: &str) -> bool {
        self.nullable.contains(&(bucket.clone(), name.to_string()))
    }

    /// Targets with at least one qualified field.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().filter_map(|b| match b {
            Bucket::Target(t) => Some(t.as_str()),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(BTreeSet::is_empty)
    }

    /// Flat `{key → fields}` form, keyed as in `Bucket::key`.
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.buckets
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.key().to_string(), v.iter().cloned().collect()))
            .collect()
    }

    /// Union with `other`. A field stays nullable only if neither side
    /// references it plainly.
    pub fn merge(&mut self, other: QueryFields) {
        let mut nullable: BTreeSet<(Bucket, String)> = self
            .nullable
            .iter()
            .filter(|(b, n)| !other.is_plain(b, n))
            .cloned()
            .collect();
        nullable.extend(
            other
                .nullable
                .iter()
                .filter(|(b, n)| !self.is_plain(b, n))
                .cloned(),
        );
        for (bucket, names) in other.buckets {
            self.buckets.entry(bucket).or_default().extend(names);
        }
        self.nullable = nullable;
    }

    fn is_plain(&self, bucket: &Bucket, name: &str) -> bool {
        self.buckets.get(bucket).is_some_and(|s| s.contains(name))
            && !self.is_nullable(bucket, name)
    }

    /// Drop nullable marks for fields that are also referenced plainly.
    fn settle(&mut self, plain: &BTreeSet<(Bucket, String)>) {
        self.nullable.retain(|entry| !plain.contains(entry));
    }
}

/// A compiled statement plus memoized derived facts.
#[derive(Debug, Clone)]
pub struct QueryModel {
    statement: Statement,
    targets: OnceCell<Vec<String>>,
    sub_queries: OnceCell<Vec<QueryModel>>,
}

impl QueryModel {
    /// Compile `expression` through the processor grammar.
    pub fn parse<C: Compiler + ?Sized>(expression: &str, compiler: &C) -> Result<Self> {
        let statement = compiler.compile(expression).map_err(Error::from)?;
        Ok(Self::from_statement(statement))
    }

    pub fn from_statement(statement: Statement) -> Self {
        Self {
            statement,
            targets: OnceCell::new(),
            sub_queries: OnceCell::new(),
        }
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Every stream target named anywhere in the statement, sorted and
    /// deduplicated.
    pub fn targets(&self) -> &[String] {
        self.targets.get_or_init(|| {
            let mut set: BTreeSet<String> = self
                .statement
                .from
                .iter()
                .map(|s| s.type_name.clone())
                .collect();
            for sub in self.sub_queries() {
                set.extend(sub.targets().iter().cloned());
            }
            set.into_iter().collect()
        })
    }

    /// Direct sub-queries; each is explorable the same way.
    pub fn sub_queries(&self) -> &[QueryModel] {
        self.sub_queries.get_or_init(|| {
            self.statement
                .sub_queries()
                .into_iter()
                .map(|s| QueryModel::from_statement(s.clone()))
                .collect()
        })
    }

    /// Field requirements of the whole statement, sub-queries included.
    pub fn fields(&self) -> Result<QueryFields> {
        self.explore(&[], &BTreeMap::new())
    }

    /// Resolve every field reference into a bucket.
    ///
    /// `outer_targets` and `alias_overrides` carry the enclosing statement's
    /// context when exploring a sub-query.
    pub fn explore(
        &self,
        outer_targets: &[String],
        alias_overrides: &BTreeMap<String, String>,
    ) -> Result<QueryFields> {
        let stmt = &self.statement;

        let mut known: BTreeSet<String> = outer_targets.iter().cloned().collect();
        known.extend(stmt.from.iter().map(|s| s.type_name.clone()));

        let mut aliases = alias_overrides.clone();
        for stream in &stmt.from {
            if let Some(alias) = &stream.alias {
                if alias != &stream.type_name && known.contains(alias) {
                    return Err(Error::AliasCollision {
                        alias: alias.clone(),
                    });
                }
                aliases.insert(alias.clone(), stream.type_name.clone());
            }
        }

        let own: BTreeSet<&str> = stmt.from.iter().map(|s| s.type_name.as_str()).collect();
        let sole = if own.len() == 1 {
            own.iter().next().copied()
        } else {
            None
        };

        let mut refs = Vec::new();
        for expr in stmt.expressions() {
            collect_refs(expr, false, &mut refs);
        }

        let mut fields = QueryFields::default();
        let mut plain = BTreeSet::new();
        for (r, nullable) in refs {
            let (bucket, name) = classify(r, &known, &aliases, sole);
            if !nullable {
                plain.insert((bucket.clone(), name.clone()));
            }
            fields.insert(bucket, name, nullable);
        }
        fields.settle(&plain);

        let context: Vec<String> = known.into_iter().collect();
        for sub in self.sub_queries() {
            fields.merge(sub.explore(&context, &aliases)?);
        }
        Ok(fields)
    }
}

fn classify(
    r: &FieldRef,
    known: &BTreeSet<String>,
    aliases: &BTreeMap<String, String>,
    sole: Option<&str>,
) -> (Bucket, String) {
    match &r.qualifier {
        Some(q) => {
            if let Some(target) = aliases.get(q) {
                (Bucket::Target(target.clone()), r.name.clone())
            } else if known.contains(q) {
                (Bucket::Target(q.clone()), r.name.clone())
            } else {
                (Bucket::Unknown, r.dotted())
            }
        }
        None => match sole {
            Some(t) => (Bucket::Target(t.to_string()), r.name.clone()),
            None => (Bucket::Unqualified, r.name.clone()),
        },
    }
}

/// Field references of one expression tree, with the `nullable(...)` marker
/// state. Sub-query bodies are explored separately.
fn collect_refs<'a>(expr: &'a Expr, nullable: bool, out: &mut Vec<(&'a FieldRef, bool)>) {
    match expr {
        Expr::Field(r) => out.push((r, nullable)),
        Expr::Literal(_) | Expr::SubQuery(_) => {}
        Expr::Generic { op, args } => {
            let nullable = nullable || matches!(op, Op::Call(name) if name.eq_ignore_ascii_case("nullable"));
            for a in args {
                collect_refs(a, nullable, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_processor::Parser;

    fn model(text: &str) -> QueryModel {
        QueryModel::parse(text, &Parser).unwrap()
    }

    #[test]
    fn syntax_errors_become_query_errors() {
        let err = QueryModel::parse("select from", &Parser).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn single_stream_owns_unqualified_fields() {
        let f = model("select a, b from t where c > 1").fields().unwrap();
        assert_eq!(f.target("t"), vec!["a", "b", "c"]);
        assert!(f.unqualified().is_empty());
    }

    #[test]
    fn aliases_and_qualifiers_resolve_to_targets() {
        let f = model("select x.a, t2.b, c from t1 as x, t2").fields().unwrap();
        assert_eq!(f.target("t1"), vec!["a"]);
        assert_eq!(f.target("t2"), vec!["b"]);
        assert_eq!(f.unqualified(), vec!["c"]);
    }

    #[test]
    fn unknown_qualifier_is_kept_dotted() {
        let f = model("select z.a from t").fields().unwrap();
        assert_eq!(f.unknown(), vec!["z.a"]);
        assert!(f.target("t").is_empty());
    }

    #[test]
    fn alias_colliding_with_other_target_fails() {
        let err = model("select a from t1 as t2, t2").fields().unwrap_err();
        assert!(matches!(err, Error::AliasCollision { .. }));
        assert!(model("select a from t as t").fields().is_ok());
    }

    #[test]
    fn sub_query_targets_are_collected_and_sorted() {
        let m = model("select * from t1 where x in (select y from t2)");
        assert_eq!(m.targets(), ["t1".to_string(), "t2".to_string()]);
        assert_eq!(m.sub_queries().len(), 1);
        let f = m.fields().unwrap();
        assert_eq!(f.target("t1"), vec!["x"]);
        assert_eq!(f.target("t2"), vec!["y"]);
    }

    #[test]
    fn sub_query_resolves_outer_streams() {
        let f = model("select a from t1 as o where a in (select b from t2 where t2.c = o.d)")
            .fields()
            .unwrap();
        assert_eq!(f.target("t1"), vec!["a", "d"]);
        assert_eq!(f.target("t2"), vec!["b", "c"]);
    }

    #[test]
    fn nullable_marks_survive_only_without_plain_use() {
        let f = model("select a, nullable(b), nullable(c) from t where c > 0").fields().unwrap();
        let t = Bucket::Target("t".into());
        assert!(!f.is_nullable(&t, "a"));
        assert!(f.is_nullable(&t, "b"));
        assert!(!f.is_nullable(&t, "c"));
    }

    #[test]
    fn plain_outer_use_beats_nullable_sub_query_use() {
        let t = Bucket::Target("t".into());
        let f = model("select a from t where a in (select nullable(a) from t)")
            .fields()
            .unwrap();
        assert!(!f.is_nullable(&t, "a"));

        let f = model("select nullable(a) from t where b in (select a from t)")
            .fields()
            .unwrap();
        assert!(!f.is_nullable(&t, "a"));

        let f = model("select nullable(a) from t where b in (select nullable(a) from t)")
            .fields()
            .unwrap();
        assert!(f.is_nullable(&t, "a"));
        assert!(!f.is_nullable(&t, "b"));
    }

    #[test]
    fn flat_map_uses_empty_key_for_unqualified() {
        let map = model("select a, t1.b from t1, t2").fields().unwrap().to_map();
        assert_eq!(map.get(""), Some(&vec!["a".to_string()]));
        assert_eq!(map.get("t1"), Some(&vec!["b".to_string()]));
    }
}
