//! Recursive-descent parser for the EPL subset.
//!
//! ```text
//! statement := SELECT [DISTINCT] items FROM stream {, stream}
//!              [WHERE expr] [GROUP BY exprs] [HAVING expr]
//!              [ORDER BY expr [ASC|DESC] {, ...}] [LIMIT int]
//! stream    := ident {. ns:view(args)} [[AS] ident]
//! ```
//! Expressions follow the usual precedence: OR < AND < NOT < comparison <
//! additive < multiplicative < unary.

use strata_core::ast::{Expr, FieldRef, Op, OrderItem, SelectItem, Statement, StreamRef, View};
use strata_core::processor::SyntaxError;
use strata_core::value::Value;

use crate::lexer::{tokenize, Spanned, Token};

const RESERVED: &[&str] = &[
    "select", "distinct", "from", "where", "group", "by", "having", "order", "limit", "as", "and",
    "or", "not", "is", "null", "in", "like", "true", "false", "asc", "desc",
];

const PERIOD_UNITS: &[&str] = &[
    "msec", "millisecond", "milliseconds", "sec", "second", "seconds", "min", "minute", "minutes",
    "hour", "hours", "day", "days",
];

type PResult<T> = Result<T, SyntaxError>;

pub fn parse_statement(source: &str) -> PResult<Statement> {
    let tokens = tokenize(source)?;
    let mut cursor = Cursor {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let stmt = cursor.statement()?;
    if let Some(t) = cursor.peek() {
        return Err(SyntaxError::new(
            format!("unexpected trailing input {:?}", t.token),
            t.start,
        ));
    }
    Ok(stmt)
}

struct Cursor {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.start)
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(SyntaxError::new(message, self.offset()))
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|t| t.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at(&self, token: &Token) -> bool {
        self.peek_at(0) == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> PResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            self.error(format!("expected {token:?}"))
        }
    }

    fn at_keyword_n(&self, n: usize, kw: &str) -> bool {
        matches!(self.peek_at(n), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.at_keyword_n(0, kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            self.error(format!("expected {}", kw.to_ascii_uppercase()))
        }
    }

    /// A non-reserved identifier.
    fn ident(&mut self) -> PResult<String> {
        match self.peek_at(0) {
            Some(Token::Ident(s)) if !is_reserved(s) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => self.error("expected identifier"),
        }
    }

    fn at_plain_ident(&self) -> bool {
        matches!(self.peek_at(0), Some(Token::Ident(s)) if !is_reserved(s))
    }

    fn statement(&mut self) -> PResult<Statement> {
        self.expect_keyword("select")?;
        let distinct = self.eat_keyword("distinct");

        let mut select = vec![self.select_item()?];
        while self.eat(&Token::Comma) {
            select.push(self.select_item()?);
        }

        self.expect_keyword("from")?;
        let mut from = vec![self.stream()?];
        while self.eat(&Token::Comma) {
            from.push(self.stream()?);
        }

        let filter = if self.eat_keyword("where") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat_keyword("group") {
            self.expect_keyword("by")?;
            group_by.push(self.expr()?);
            while self.eat(&Token::Comma) {
                group_by.push(self.expr()?);
            }
        }

        let having = if self.eat_keyword("having") {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword("desc") {
                    true
                } else {
                    self.eat_keyword("asc");
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword("limit") {
            match self.bump() {
                Some(Token::Integer(n)) if n >= 0 => Some(n as u64),
                _ => return self.error("expected row count after LIMIT"),
            }
        } else {
            None
        };

        Ok(Statement {
            distinct,
            select,
            from,
            filter,
            group_by,
            having,
            order_by,
            limit,
        })
    }

    fn select_item(&mut self) -> PResult<SelectItem> {
        if self.eat(&Token::Star) {
            return Ok(SelectItem::Wildcard);
        }
        if self.at_plain_ident()
            && self.peek_at(1) == Some(&Token::Dot)
            && self.peek_at(2) == Some(&Token::Star)
        {
            let q = self.ident()?;
            self.pos += 2;
            return Ok(SelectItem::QualifiedWildcard(q));
        }
        let expr = self.expr()?;
        let alias = if self.eat_keyword("as") {
            Some(self.ident()?)
        } else if self.at_plain_ident() {
            Some(self.ident()?)
        } else {
            None
        };
        Ok(SelectItem::Expr { expr, alias })
    }

    fn stream(&mut self) -> PResult<StreamRef> {
        let mut stream = StreamRef::new(self.ident()?);
        while self.at(&Token::Dot) {
            self.pos += 1;
            let namespace = self.ident()?;
            self.expect(&Token::Colon)?;
            let name = self.ident()?;
            self.expect(&Token::LParen)?;
            let args = self.args()?;
            stream.views.push(View {
                namespace,
                name,
                args,
            });
        }
        if self.eat_keyword("as") || self.at_plain_ident() {
            stream.alias = Some(self.ident()?);
        }
        Ok(stream)
    }

    /// Arguments after an opening paren, through the closing one.
    fn args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            if self.at(&Token::Star)
                && matches!(self.peek_at(1), Some(Token::RParen) | Some(Token::Comma))
            {
                self.pos += 1;
                args.push(Expr::Generic {
                    op: Op::Star,
                    args: vec![],
                });
            } else {
                args.push(self.expr()?);
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn expr(&mut self) -> PResult<Expr> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = binary(Op::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") {
            let rhs = self.not_expr()?;
            lhs = binary(Op::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> PResult<Expr> {
        if self.eat_keyword("not") {
            let inner = self.not_expr()?;
            return Ok(Expr::Generic {
                op: Op::Not,
                args: vec![inner],
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let lhs = self.additive()?;

        let op = match self.peek_at(0) {
            Some(Token::Eq) => Some(Op::Eq),
            Some(Token::NotEq) => Some(Op::NotEq),
            Some(Token::Lt) => Some(Op::Lt),
            Some(Token::LtEq) => Some(Op::LtEq),
            Some(Token::Gt) => Some(Op::Gt),
            Some(Token::GtEq) => Some(Op::GtEq),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.additive()?;
            return Ok(binary(op, lhs, rhs));
        }

        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            self.expect_keyword("null")?;
            let op = if negated { Op::IsNotNull } else { Op::IsNull };
            return Ok(Expr::Generic {
                op,
                args: vec![lhs],
            });
        }

        let negated = self.at_keyword("not")
            && (self.at_keyword_n(1, "in") || self.at_keyword_n(1, "like"));
        if negated {
            self.pos += 1;
        }
        if self.eat_keyword("in") {
            self.expect(&Token::LParen)?;
            let mut args = vec![lhs];
            if self.at_keyword("select") {
                args.push(Expr::SubQuery(Box::new(self.statement()?)));
                self.expect(&Token::RParen)?;
            } else {
                args.extend(self.args()?);
            }
            let op = if negated { Op::NotIn } else { Op::In };
            return Ok(Expr::Generic { op, args });
        }
        if self.eat_keyword("like") {
            let rhs = self.additive()?;
            let op = if negated { Op::NotLike } else { Op::Like };
            return Ok(binary(op, lhs, rhs));
        }
        if negated {
            return self.error("expected IN or LIKE after NOT");
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_at(0) {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_at(0) {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                Some(Token::Percent) => Op::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.eat(&Token::Minus) {
            let inner = self.unary()?;
            return Ok(match inner {
                Expr::Literal(Value::Long(n)) => Expr::Literal(Value::Long(-n)),
                Expr::Literal(Value::Double(d)) => Expr::Literal(Value::Double(-d)),
                other => Expr::Generic {
                    op: Op::Neg,
                    args: vec![other],
                },
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> PResult<Expr> {
        let start = self.offset();
        match self.bump() {
            Some(Token::Integer(n)) => Ok(self.maybe_period(Expr::Literal(Value::Long(n)))),
            Some(Token::Float(f)) => Ok(self.maybe_period(Expr::Literal(Value::Double(f)))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = if self.at_keyword("select") {
                    Expr::SubQuery(Box::new(self.statement()?))
                } else {
                    self.expr()?
                };
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => {
                if word.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if word.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if word.eq_ignore_ascii_case("null") {
                    return Ok(Expr::Literal(Value::Null));
                }
                if is_reserved(&word) {
                    return Err(SyntaxError::new(
                        format!("unexpected keyword {}", word.to_ascii_uppercase()),
                        start,
                    ));
                }
                if self.eat(&Token::LParen) {
                    let args = self.args()?;
                    return Ok(Expr::Generic {
                        op: Op::Call(word.to_ascii_lowercase()),
                        args,
                    });
                }
                if self.at(&Token::Dot) && self.at_plain_ident_n(1) {
                    self.pos += 1;
                    let name = self.ident()?;
                    return Ok(Expr::Field(FieldRef::new(Some(&word), name)));
                }
                Ok(Expr::Field(FieldRef::new(None, word)))
            }
            Some(other) => Err(SyntaxError::new(format!("unexpected {other:?}"), start)),
            None => Err(SyntaxError::new("unexpected end of input", start)),
        }
    }

    fn at_plain_ident_n(&self, n: usize) -> bool {
        matches!(self.peek_at(n), Some(Token::Ident(s)) if !is_reserved(s))
    }

    fn maybe_period(&mut self, amount: Expr) -> Expr {
        if let Some(Token::Ident(unit)) = self.peek_at(0) {
            let unit = unit.to_ascii_lowercase();
            if PERIOD_UNITS.contains(&unit.as_str()) {
                self.pos += 1;
                return Expr::Generic {
                    op: Op::Period(unit),
                    args: vec![amount],
                };
            }
        }
        amount
    }
}

fn binary(op: Op, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Generic {
        op,
        args: vec![lhs, rhs],
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Statement {
        parse_statement(s).unwrap()
    }

    #[test]
    fn parses_select_with_views_and_alias() {
        let s = parse("SELECT count(*) AS n, t.a FROM t.win:time(10 sec) AS x WHERE a > 1");
        assert_eq!(s.from[0].type_name, "t");
        assert_eq!(s.from[0].alias.as_deref(), Some("x"));
        assert_eq!(s.from[0].views[0].name, "time");
        assert_eq!(s.select.len(), 2);
        assert_eq!(
            s.to_string(),
            "SELECT count(*) AS n, t.a FROM t.win:time(10 sec) AS x WHERE (a > 1)"
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let s = parse("select distinct a from t where b is not null order by a desc limit 5");
        assert!(s.distinct);
        assert_eq!(s.limit, Some(5));
        assert!(s.order_by[0].descending);
    }

    #[test]
    fn parses_sub_queries_in_where_and_select() {
        let s = parse("select (select max(y) from t2) m, * from t1 where x in (select y from t2)");
        assert_eq!(s.sub_queries().len(), 2);
        assert!(matches!(s.select[1], SelectItem::Wildcard));
    }

    #[test]
    fn implicit_aliases() {
        let s = parse("select x.a from t1 x, t2");
        assert_eq!(s.from[0].alias.as_deref(), Some("x"));
        assert_eq!(s.from[1].alias, None);
    }

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let s = parse("select a from t where a = 1 or b = 2 and c = 3");
        assert_eq!(
            s.filter.unwrap().to_string(),
            "((a = 1) OR ((b = 2) AND (c = 3)))"
        );
    }

    #[test]
    fn negative_literals_fold() {
        let s = parse("select a from t where a > -3");
        assert_eq!(s.filter.unwrap().to_string(), "(a > -3)");
    }

    #[test]
    fn rejects_malformed_text() {
        for bad in [
            "select from t",
            "select a",
            "select a from",
            "select a from t where",
            "select a from t limit x",
            "select a from t t2 t3",
            "select a from t where a not b",
        ] {
            assert!(parse_statement(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn error_positions_point_at_the_problem() {
        let err = parse_statement("select a from t where and").unwrap_err();
        assert_eq!(err.position, 22);
    }
}
