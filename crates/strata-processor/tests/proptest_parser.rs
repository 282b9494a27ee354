use proptest::prelude::*;
use strata_core::ast::{Expr, Op};
use strata_core::value::Value;
use strata_processor::parser::parse_statement;

fn field_name() -> impl Strategy<Value = String> {
    "f_[a-z0-9]{0,6}"
}

fn type_name() -> impl Strategy<Value = String> {
    "t_[a-z0-9]{0,6}"
}

proptest! {
    #[test]
    fn simple_selects_parse(t in type_name(), f in field_name(), n in 0u32..1_000_000) {
        let s = parse_statement(&format!("select {f} from {t} where {f} > {n}")).unwrap();
        prop_assert_eq!(&s.from[0].type_name, &t);
        prop_assert_eq!(s.sub_queries().len(), 0);
        let expected = Expr::Generic {
            op: Op::Gt,
            args: vec![Expr::field(&f), Expr::Literal(Value::Long(n as i64))],
        };
        prop_assert_eq!(s.filter, Some(expected));
    }

    #[test]
    fn display_reparses_to_same_statement(
        t in type_name(),
        fields in prop::collection::vec(field_name(), 1..4),
        n in 0u32..1000,
    ) {
        let text = format!("select {} from {t} where {} = {n}", fields.join(", "), fields[0]);
        let first = parse_statement(&text).unwrap();
        let again = parse_statement(&first.to_string()).unwrap();
        prop_assert_eq!(first, again);
    }

    #[test]
    fn garbage_never_panics(s in "\\PC{0,40}") {
        let _ = parse_statement(&s);
    }
}
