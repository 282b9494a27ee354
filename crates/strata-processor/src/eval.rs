//! Per-event evaluation of filters and projections.
//!
//! Each arriving record is evaluated on its own: there are no windows, so
//! aggregates, sub-queries and references to other streams yield null.

use std::cmp::Ordering;

use strata_core::ast::{Expr, Op, SelectItem, Statement};
use strata_core::value::{Record, Value};

/// One arriving record as seen from a statement: the stream's reference name
/// (alias or type name) and the record itself.
pub struct Row<'a> {
    pub stream: &'a str,
    pub record: &'a Record,
}

impl Row<'_> {
    fn field(&self, qualifier: Option<&str>, name: &str) -> Value {
        match qualifier {
            Some(q) if q != self.stream => Value::Null,
            _ => self.record.get(name).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Evaluate `stmt` against `row`: `None` when the filter rejects it, the
/// projected output record otherwise.
pub fn apply(stmt: &Statement, row: &Row<'_>) -> Option<Record> {
    if let Some(filter) = &stmt.filter {
        if !matches!(eval(filter, row), Value::Bool(true)) {
            return None;
        }
    }
    let mut out = Record::new();
    for item in &stmt.select {
        match item {
            SelectItem::Wildcard => {
                for (n, v) in row.record.iter() {
                    out.push(n, v.clone());
                }
            }
            SelectItem::QualifiedWildcard(q) if q == row.stream => {
                for (n, v) in row.record.iter() {
                    out.push(n, v.clone());
                }
            }
            SelectItem::QualifiedWildcard(_) => {}
            SelectItem::Expr { expr, alias } => {
                let name = match (alias, expr) {
                    (Some(a), _) => a.clone(),
                    (None, Expr::Field(r)) => r.name.clone(),
                    (None, other) => other.to_string(),
                };
                out.push(name, eval(expr, row));
            }
        }
    }
    Some(out)
}

pub fn eval(expr: &Expr, row: &Row<'_>) -> Value {
    match expr {
        Expr::Field(r) => row.field(r.qualifier.as_deref(), &r.name),
        Expr::Literal(v) => v.clone(),
        Expr::SubQuery(_) => Value::Null,
        Expr::Generic { op, args } => eval_op(op, args, row),
    }
}

fn eval_op(op: &Op, args: &[Expr], row: &Row<'_>) -> Value {
    let arg = |i: usize| args.get(i).map_or(Value::Null, |e| eval(e, row));
    match op {
        Op::And => match (truth(&arg(0)), truth(&arg(1))) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        Op::Or => match (truth(&arg(0)), truth(&arg(1))) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        Op::Not => truth(&arg(0)).map_or(Value::Null, |b| Value::Bool(!b)),
        Op::Eq | Op::NotEq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq => {
            match compare(&arg(0), &arg(1)) {
                None => Value::Null,
                Some(ord) => Value::Bool(match op {
                    Op::Eq => ord == Ordering::Equal,
                    Op::NotEq => ord != Ordering::Equal,
                    Op::Lt => ord == Ordering::Less,
                    Op::LtEq => ord != Ordering::Greater,
                    Op::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }),
            }
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => arithmetic(op, &arg(0), &arg(1)),
        Op::Neg => match arg(0) {
            Value::Int(i) => Value::Long(-i64::from(i)),
            Value::Long(l) => l.checked_neg().map_or(Value::Null, Value::Long),
            Value::Float(f) => Value::Double(-f64::from(f)),
            Value::Double(d) => Value::Double(-d),
            _ => Value::Null,
        },
        Op::IsNull => Value::Bool(arg(0).is_null()),
        Op::IsNotNull => Value::Bool(!arg(0).is_null()),
        Op::In | Op::NotIn => {
            let lhs = arg(0);
            if lhs.is_null() {
                return Value::Null;
            }
            let mut saw_null = false;
            for e in &args[1.min(args.len())..] {
                let v = eval(e, row);
                match compare(&lhs, &v) {
                    Some(Ordering::Equal) => return Value::Bool(*op == Op::In),
                    None => saw_null = true,
                    _ => {}
                }
            }
            if saw_null {
                Value::Null
            } else {
                Value::Bool(*op == Op::NotIn)
            }
        }
        Op::Like | Op::NotLike => match (arg(0), arg(1)) {
            (Value::String(s), Value::String(p)) => {
                Value::Bool(like(&s, &p) == (*op == Op::Like))
            }
            _ => Value::Null,
        },
        Op::Call(name) => call(name, args, row),
        Op::Period(unit) => period_millis(unit, &arg(0)),
        Op::Star => Value::Null,
    }
}

fn call(name: &str, args: &[Expr], row: &Row<'_>) -> Value {
    let values: Vec<Value> = args.iter().map(|e| eval(e, row)).collect();
    match (name, values.as_slice()) {
        ("nullable", [v]) => v.clone(),
        ("coalesce", vs) => vs.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
        ("abs", [v]) => match v {
            Value::Int(i) => Value::Long(i64::from(*i).abs()),
            Value::Long(l) => l.checked_abs().map_or(Value::Null, Value::Long),
            Value::Float(f) => Value::Double(f64::from(f.abs())),
            Value::Double(d) => Value::Double(d.abs()),
            _ => Value::Null,
        },
        ("upper", [Value::String(s)]) => Value::String(s.to_uppercase()),
        ("lower", [Value::String(s)]) => Value::String(s.to_lowercase()),
        ("length", [Value::String(s)]) => Value::Long(s.chars().count() as i64),
        _ => Value::Null,
    }
}

fn truth(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(i) => Some(Num::I(i64::from(*i))),
        Value::Long(l) => Some(Num::I(*l)),
        Value::Float(f) => Some(Num::F(f64::from(*f))),
        Value::Double(d) => Some(Num::F(*d)),
        _ => None,
    }
}

fn as_f64(n: &Num) -> f64 {
    match n {
        Num::I(i) => *i as f64,
        Num::F(f) => *f,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (num(a)?, num(b)?) {
            (Num::I(x), Num::I(y)) => Some(x.cmp(&y)),
            (x, y) => as_f64(&x).partial_cmp(&as_f64(&y)),
        },
    }
}

fn arithmetic(op: &Op, a: &Value, b: &Value) -> Value {
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Value::Null;
    };
    match (x, y) {
        (Num::I(x), Num::I(y)) => {
            let r = match op {
                Op::Add => x.checked_add(y),
                Op::Sub => x.checked_sub(y),
                Op::Mul => x.checked_mul(y),
                Op::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            r.map_or(Value::Null, Value::Long)
        }
        (x, y) => {
            let (x, y) = (as_f64(&x), as_f64(&y));
            match op {
                Op::Add => Value::Double(x + y),
                Op::Sub => Value::Double(x - y),
                Op::Mul => Value::Double(x * y),
                Op::Div if y == 0.0 => Value::Null,
                Op::Div => Value::Double(x / y),
                _ if y == 0.0 => Value::Null,
                _ => Value::Double(x % y),
            }
        }
    }
}

fn period_millis(unit: &str, amount: &Value) -> Value {
    let factor = match unit {
        "msec" | "millisecond" | "milliseconds" => 1.0,
        "sec" | "second" | "seconds" => 1_000.0,
        "min" | "minute" | "minutes" => 60_000.0,
        "hour" | "hours" => 3_600_000.0,
        _ => 86_400_000.0,
    };
    match num(amount) {
        Some(n) => Value::Long((as_f64(&n) * factor) as i64),
        None => Value::Null,
    }
}

/// SQL `LIKE`: `%` matches any run, `_` exactly one character.
fn like(s: &str, pattern: &str) -> bool {
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut i, mut j) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while i < s.len() {
        if j < p.len() && (p[j] == '_' || p[j] == s[i]) {
            i += 1;
            j += 1;
        } else if j < p.len() && p[j] == '%' {
            backtrack = Some((j, i));
            j += 1;
        } else if let Some((pj, si)) = backtrack {
            j = pj + 1;
            i = si + 1;
            backtrack = Some((pj, si + 1));
        } else {
            return false;
        }
    }
    p[j..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_statement;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    fn run(text: &str, rec: &Record) -> Option<Record> {
        let stmt = parse_statement(text).unwrap();
        apply(
            &stmt,
            &Row {
                stream: stmt.from[0].reference_name(),
                record: rec,
            },
        )
    }

    #[test]
    fn filters_and_projects() {
        let rec = record(&[("a", Value::Long(5)), ("b", Value::from("x"))]);
        let out = run("select a, a * 2 as d from t where a > 3", &rec).unwrap();
        assert_eq!(out.get("a"), Some(&Value::Long(5)));
        assert_eq!(out.get("d"), Some(&Value::Long(10)));
        assert!(run("select a from t where a > 7", &rec).is_none());
    }

    #[test]
    fn null_comparisons_do_not_match() {
        let rec = record(&[("a", Value::Null)]);
        assert!(run("select a from t where a > 1", &rec).is_none());
        assert!(run("select a from t where a is null", &rec).is_some());
    }

    #[test]
    fn qualified_references_use_the_alias() {
        let rec = record(&[("a", Value::Long(1))]);
        let out = run("select x.a, t.a as other from t as x", &rec).unwrap();
        assert_eq!(out.get("a"), Some(&Value::Long(1)));
        assert_eq!(out.get("other"), Some(&Value::Null));
    }

    #[test]
    fn aggregates_and_sub_queries_are_null() {
        let rec = record(&[("a", Value::Long(1))]);
        let out = run("select count(*) as n, (select b from u) as s from t", &rec).unwrap();
        assert_eq!(out.get("n"), Some(&Value::Null));
        assert_eq!(out.get("s"), Some(&Value::Null));
    }

    #[test]
    fn in_and_like() {
        let rec = record(&[("a", Value::Long(2)), ("s", Value::from("hello"))]);
        assert!(run("select a from t where a in (1, 2.0, 3)", &rec).is_some());
        assert!(run("select a from t where a not in (1, 3)", &rec).is_some());
        assert!(run("select a from t where s like 'h%l_o'", &rec).is_some());
        assert!(run("select a from t where s not like '%z%'", &rec).is_some());
    }

    #[test]
    fn like_matcher() {
        assert!(like("abc", "abc"));
        assert!(like("abc", "%"));
        assert!(like("abc", "a%c"));
        assert!(like("abc", "_b_"));
        assert!(!like("abc", "a_"));
        assert!(like("aXbXc", "%b%c"));
        assert!(!like("", "_"));
    }
}
