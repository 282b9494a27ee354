//! Rewriting generic target names into bound fieldset type names.

use std::collections::BTreeMap;

use strata_core::ast::{Expr, Statement};
use strata_core::error::{Error, Result};

/// Replace every stream's target name (sub-queries included) with the type
/// name bound for it in `mapping`.
///
/// Streams without an alias get the original target name as alias, so that
/// `t.a` style references keep resolving after the rename. A target without a
/// mapping entry is an internal error: matching guarantees one exists.
pub fn rewrite_event_type_name(
    statement: &Statement,
    mapping: &BTreeMap<String, String>,
) -> Result<Statement> {
    let mut out = statement.clone();
    rewrite_in_place(&mut out, mapping)?;
    Ok(out)
}

fn rewrite_in_place(stmt: &mut Statement, mapping: &BTreeMap<String, String>) -> Result<()> {
    for stream in &mut stmt.from {
        let bound = mapping.get(&stream.type_name).ok_or_else(|| {
            Error::Invariant(format!("no bound type for target '{}'", stream.type_name))
        })?;
        if stream.alias.is_none() {
            stream.alias = Some(stream.type_name.clone());
        }
        stream.type_name = bound.clone();
    }

    let mut failure = None;
    for expr in stmt.expressions_mut() {
        expr.visit_mut(&mut |node| {
            if failure.is_some() {
                return;
            }
            if let Expr::SubQuery(sub) = node {
                if let Err(e) = rewrite_in_place(sub, mapping) {
                    failure = Some(e);
                }
            }
        });
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::processor::Compiler;
    use strata_processor::Parser;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renames_nested_streams_and_keeps_aliases() {
        let stmt = Parser
            .compile("select * from t1 as x where a in (select b from t2)")
            .unwrap();
        let out =
            rewrite_event_type_name(&stmt, &mapping(&[("t1", "t1_query_aa"), ("t2", "t2_query_bb")]))
                .unwrap();
        assert_eq!(out.from[0].type_name, "t1_query_aa");
        assert_eq!(out.from[0].alias.as_deref(), Some("x"));
        let sub = out.sub_queries()[0];
        assert_eq!(sub.from[0].type_name, "t2_query_bb");
        assert_eq!(sub.from[0].alias.as_deref(), Some("t2"));
    }

    #[test]
    fn missing_mapping_is_an_invariant_failure() {
        let stmt = Parser
            .compile("select a from t1 where a in (select b from t2)")
            .unwrap();
        let err = rewrite_event_type_name(&stmt, &mapping(&[("t1", "x")])).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert!(!err.is_client_error());
    }
}
