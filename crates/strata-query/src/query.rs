use std::fmt;

use serde::{Deserialize, Serialize};

use strata_core::error::{Error, Result};
use strata_core::processor::Compiler;

use crate::model::{QueryFields, QueryModel};
use crate::name;

/// A registered continuous query.
#[derive(Debug, Clone)]
pub struct Query {
    name: String,
    group: Option<String>,
    expression: String,
    model: QueryModel,
}

impl Query {
    /// Validate names and compile `expression`.
    pub fn new<C: Compiler + ?Sized>(
        name: impl Into<String>,
        group: Option<String>,
        expression: impl Into<String>,
        compiler: &C,
    ) -> Result<Self> {
        let name = name.into();
        let expression = expression.into();
        name::validate_query_name(&name)?;
        if let Some(g) = &group {
            name::validate_group(g)?;
        }
        let model = QueryModel::parse(&expression, compiler)?;
        for target in model.targets() {
            name::validate_target_name(target)?;
        }
        Ok(Self {
            name,
            group,
            expression,
            model,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn model(&self) -> &QueryModel {
        &self.model
    }

    pub fn targets(&self) -> &[String] {
        self.model.targets()
    }

    pub fn fields(&self) -> Result<QueryFields> {
        self.model.fields()
    }

    /// Target this query's output is fed back into, for `LOOPBACK(t)` groups.
    pub fn loopback_target(&self) -> Option<&str> {
        self.group.as_deref().and_then(name::loopback_target)
    }

    pub fn suspend(&self) -> SuspendedQuery {
        SuspendedQuery {
            name: self.name.clone(),
            group: self.group.clone(),
            expression: self.expression.clone(),
        }
    }

    /// Copy of this query reading from `actual` instead of its first `FROM`
    /// target. The swap is textual; the result is recompiled and checked.
    pub fn dup_with_stream_name<C: Compiler + ?Sized>(&self, actual: &str, compiler: &C) -> Result<Query> {
        name::validate_target_name(actual)?;
        let first = self
            .model
            .statement()
            .from
            .first()
            .map(|s| s.type_name.clone())
            .ok_or_else(|| Error::Query("statement has no FROM target".into()))?;

        let at = first_from_target(&self.expression)
            .filter(|&pos| {
                let rest = &self.expression[pos..];
                rest.starts_with(&first)
                    && !rest[first.len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            })
            .ok_or_else(|| {
                Error::Query(format!(
                    "cannot locate first FROM target '{first}' in query '{}'",
                    self.name
                ))
            })?;

        let mut expression = String::with_capacity(self.expression.len() + actual.len());
        expression.push_str(&self.expression[..at]);
        expression.push_str(actual);
        expression.push_str(&self.expression[at + first.len()..]);

        let dup = Query::new(self.name.clone(), self.group.clone(), expression, compiler)?;
        match dup.model.statement().from.first() {
            Some(s) if s.type_name == actual => Ok(dup),
            _ => Err(Error::Query(format!(
                "stream replacement in query '{}' did not land on the first target",
                self.name
            ))),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(g) = &self.group {
            write!(f, "[{g}]")?;
        }
        write!(f, ": {}", self.expression)
    }
}

/// Byte offset of the first token after the first `FROM` keyword outside
/// string literals.
fn first_from_target(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'\'' || b == b'"' {
            quote = Some(b);
            i += 1;
            continue;
        }
        let boundary_before = i == 0 || !is_ident(bytes[i - 1]);
        if boundary_before
            && bytes.len() >= i + 4
            && bytes[i..i + 4].eq_ignore_ascii_case(b"from")
            && bytes.get(i + 4).map_or(true, |c| !is_ident(*c))
        {
            let mut j = i + 4;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            return (j < bytes.len()).then_some(j);
        }
        i += 1;
    }
    None
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// What survives a `suspend`: enough to re-run `register` later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedQuery {
    pub name: String,
    pub group: Option<String>,
    pub expression: String,
}

impl SuspendedQuery {
    pub fn resume<C: Compiler + ?Sized>(&self, compiler: &C) -> Result<Query> {
        Query::new(
            self.name.clone(),
            self.group.clone(),
            self.expression.clone(),
            compiler,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_processor::Parser;

    fn query(name: &str, group: Option<&str>, text: &str) -> Query {
        Query::new(name, group.map(str::to_string), text, &Parser).unwrap()
    }

    #[test]
    fn rejects_bad_names() {
        assert!(Query::new("", None, "select a from t", &Parser).is_err());
        assert!(Query::new("q", Some("LOOPBACK(1x)".into()), "select a from t", &Parser).is_err());
        assert!(matches!(
            Query::new("q", None, "select a from _t", &Parser),
            Err(Error::InvalidName(_)) | Err(Error::Query(_))
        ));
    }

    #[test]
    fn loopback_group_names_target() {
        let q = query("q", Some("LOOPBACK(t2)"), "select a from t1");
        assert_eq!(q.loopback_target(), Some("t2"));
        assert_eq!(query("q", Some("web"), "select a from t1").loopback_target(), None);
    }

    #[test]
    fn suspend_and_resume_round_trip() {
        let q = query("q", Some("g"), "select a from t");
        let s = q.suspend();
        let json = serde_json::to_string(&s).unwrap();
        let back: SuspendedQuery = serde_json::from_str(&json).unwrap();
        let r = back.resume(&Parser).unwrap();
        assert_eq!(r.name(), "q");
        assert_eq!(r.group(), Some("g"));
        assert_eq!(r.targets(), q.targets());
    }

    #[test]
    fn dup_replaces_first_target_only() {
        let q = query("q", None, "select a from tt where a in (select b from t)");
        let d = q.dup_with_stream_name("real", &Parser).unwrap();
        assert_eq!(d.expression(), "select a from real where a in (select b from t)");
        assert_eq!(d.targets(), ["real".to_string(), "t".to_string()]);
    }

    #[test]
    fn dup_ignores_from_inside_literals() {
        let q = query("q", None, "select a from t where s = 'from x'");
        let d = q.dup_with_stream_name("u", &Parser).unwrap();
        assert_eq!(d.expression(), "select a from u where s = 'from x'");
    }

    #[test]
    fn dup_fails_when_first_textual_from_is_a_sub_query() {
        let q = query("q", None, "select (select max(b) from t2) as m from t1");
        let err = q.dup_with_stream_name("x", &Parser).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }
}
