//! Statement model: the typed tree a processor compiles query text into.
//!
//! Only four node kinds matter to the schema layer: stream references,
//! field references, sub-queries, and everything else (`Expr::Generic`).
//! Visitors here are explicit recursive descent; nothing is introspected.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<StreamRef>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard(String),
    Expr { expr: Expr, alias: Option<String> },
}

/// A stream in `FROM`: the event type it filters on plus optional views/alias.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRef {
    pub type_name: String,
    pub views: Vec<View>,
    pub alias: Option<String>,
}

/// A data window or view such as `win:time(10 sec)`.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub namespace: String,
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    pub qualifier: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldRef),
    Literal(Value),
    SubQuery(Box<Statement>),
    Generic { op: Op, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Or,
    And,
    Not,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Like,
    NotLike,
    /// Function call by name, e.g. `count`, `nullable`.
    Call(String),
    /// Time period literal; the single argument is the amount.
    Period(String),
    /// `*` as a function argument (`count(*)`).
    Star,
}

impl StreamRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            views: Vec::new(),
            alias: None,
        }
    }

    /// The name field references use to qualify this stream.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.type_name)
    }
}

impl FieldRef {
    pub fn new(qualifier: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.map(str::to_string),
            name: name.into(),
        }
    }

    /// Full dotted form, e.g. `t.a` or `a`.
    pub fn dotted(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{q}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl Expr {
    pub fn field(name: &str) -> Self {
        Expr::Field(FieldRef::new(None, name))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Generic {
            op: Op::Call(name.to_string()),
            args,
        }
    }

    /// Pre-order walk that reports sub-query nodes but does not enter them.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        if let Expr::Generic { args, .. } = self {
            for a in args {
                a.visit(f);
            }
        }
    }

    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        if let Expr::Generic { args, .. } = self {
            for a in args {
                a.visit_mut(f);
            }
        }
    }
}

impl Statement {
    /// Every top-level expression of this statement (select list, view args,
    /// where, group by, having, order by). Sub-query bodies are not included.
    pub fn expressions(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        for item in &self.select {
            if let SelectItem::Expr { expr, .. } = item {
                out.push(expr);
            }
        }
        for s in &self.from {
            for v in &s.views {
                out.extend(v.args.iter());
            }
        }
        out.extend(self.filter.iter());
        out.extend(self.group_by.iter());
        out.extend(self.having.iter());
        out.extend(self.order_by.iter().map(|o| &o.expr));
        out
    }

    pub fn expressions_mut(&mut self) -> Vec<&mut Expr> {
        let mut out = Vec::new();
        for item in &mut self.select {
            if let SelectItem::Expr { expr, .. } = item {
                out.push(expr);
            }
        }
        for s in &mut self.from {
            for v in &mut s.views {
                out.extend(v.args.iter_mut());
            }
        }
        out.extend(self.filter.iter_mut());
        out.extend(self.group_by.iter_mut());
        out.extend(self.having.iter_mut());
        out.extend(self.order_by.iter_mut().map(|o| &mut o.expr));
        out
    }

    /// Sub-queries nested directly in this statement's expressions.
    pub fn sub_queries(&self) -> Vec<&Statement> {
        let mut out = Vec::new();
        for e in self.expressions() {
            e.visit(&mut |node| {
                if let Expr::SubQuery(s) = node {
                    out.push(s.as_ref());
                }
            });
        }
        out
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        join(f, &self.select)?;
        f.write_str(" FROM ")?;
        join(f, &self.from)?;
        if let Some(w) = &self.filter {
            write!(f, " WHERE {w}")?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            join(f, &self.group_by)?;
        }
        if let Some(h) = &self.having {
            write!(f, " HAVING {h}")?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            join(f, &self.order_by)?;
        }
        if let Some(n) = self.limit {
            write!(f, " LIMIT {n}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::Wildcard => f.write_str("*"),
            SelectItem::QualifiedWildcard(q) => write!(f, "{q}.*"),
            SelectItem::Expr { expr, alias: None } => write!(f, "{expr}"),
            SelectItem::Expr {
                expr,
                alias: Some(a),
            } => write!(f, "{expr} AS {a}"),
        }
    }
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        for v in &self.views {
            write!(f, ".{}:{}(", v.namespace, v.name)?;
            join(f, &v.args)?;
            f.write_str(")")?;
        }
        if let Some(a) = &self.alias {
            write!(f, " AS {a}")?;
        }
        Ok(())
    }
}

impl fmt::Display for OrderItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.descending {
            f.write_str(" DESC")?;
        }
        Ok(())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl Op {
    fn infix(&self) -> Option<&'static str> {
        Some(match self {
            Op::Or => "OR",
            Op::And => "AND",
            Op::Eq => "=",
            Op::NotEq => "!=",
            Op::Lt => "<",
            Op::LtEq => "<=",
            Op::Gt => ">",
            Op::GtEq => ">=",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            _ => return None,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(r) => write!(f, "{r}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::SubQuery(s) => write!(f, "({s})"),
            Expr::Generic { op, args } => {
                if let (Some(sym), [l, r]) = (op.infix(), args.as_slice()) {
                    return write!(f, "({l} {sym} {r})");
                }
                match (op, args.as_slice()) {
                    (Op::Not, [a]) => write!(f, "(NOT {a})"),
                    (Op::Neg, [a]) => write!(f, "(-{a})"),
                    (Op::IsNull, [a]) => write!(f, "({a} IS NULL)"),
                    (Op::IsNotNull, [a]) => write!(f, "({a} IS NOT NULL)"),
                    (Op::In | Op::NotIn, [lhs, rest @ ..]) => {
                        let kw = if *op == Op::In { "IN" } else { "NOT IN" };
                        if let [Expr::SubQuery(s)] = rest {
                            write!(f, "({lhs} {kw} ({s}))")
                        } else {
                            write!(f, "({lhs} {kw} (")?;
                            join(f, rest)?;
                            f.write_str("))")
                        }
                    }
                    (Op::Period(unit), [a]) => write!(f, "{a} {unit}"),
                    (Op::Star, _) => f.write_str("*"),
                    (Op::Call(name), _) => {
                        write!(f, "{name}(")?;
                        join(f, args)?;
                        f.write_str(")")
                    }
                    (op, _) => {
                        write!(f, "{op:?}(")?;
                        join(f, args)?;
                        f.write_str(")")
                    }
                }
            }
        }
    }
}
