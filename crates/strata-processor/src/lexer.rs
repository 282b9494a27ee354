//! Tokens of the EPL subset, lexed with logos.
//!
//! Keywords are not tokens of their own: they lex as `Ident` and the parser
//! matches them case-insensitively.

use logos::Logos;
use strata_core::processor::SyntaxError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("*")]
    Star,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    #[token("==")]
    Eq,
    #[token("!=")]
    #[token("<>")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| unescape(lex.slice()))]
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn unescape(quoted: &str) -> String {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
}

/// Lex the whole input up front. The parser needs two tokens of lookahead.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut lexer = Token::lexer(source);
    let mut out = Vec::new();
    while let Some(tok) = lexer.next() {
        let start = lexer.span().start;
        match tok {
            Ok(token) => out.push(Spanned { token, start }),
            Err(()) => {
                return Err(SyntaxError::new(
                    format!("unexpected character sequence '{}'", lexer.slice()),
                    start,
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<Token> {
        tokenize(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn lexes_a_statement() {
        assert_eq!(
            tokens("select t.a, 1.5 from t where b <> 'x'"),
            vec![
                Token::Ident("select".into()),
                Token::Ident("t".into()),
                Token::Dot,
                Token::Ident("a".into()),
                Token::Comma,
                Token::Float(1.5),
                Token::Ident("from".into()),
                Token::Ident("t".into()),
                Token::Ident("where".into()),
                Token::Ident("b".into()),
                Token::NotEq,
                Token::Str("x".into()),
            ]
        );
    }

    #[test]
    fn unescapes_strings_and_skips_comments() {
        assert_eq!(
            tokens("'it\\'s' -- trailing\n\"q\""),
            vec![Token::Str("it's".into()), Token::Str("q".into())]
        );
    }

    #[test]
    fn reports_offsets_of_bad_input() {
        let err = tokenize("select a # b").unwrap_err();
        assert_eq!(err.position, 9);
    }
}
