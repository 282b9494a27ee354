use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use strata_core::schema::{Field, FieldType};
use strata_core::value::{Event, Value};
use strata_processor::InMemoryProcessor;
use strata_schema::lattice::{self, is_supertype};
use strata_schema::{FieldSet, Level, TargetSchema};

const NAMES: [&str; 5] = ["a", "b", "c", "d", "e"];

fn names() -> impl Strategy<Value = BTreeSet<usize>> {
    proptest::collection::btree_set(0..NAMES.len(), 0..=NAMES.len())
}

fn fieldset(level: Level, idx: &BTreeSet<usize>, nullable: &BTreeSet<usize>) -> FieldSet {
    FieldSet::new(
        "t",
        level,
        idx.iter()
            .map(|i| Field::new(NAMES[*i], FieldType::Long, nullable.contains(i))),
    )
}

fn event(idx: &BTreeSet<usize>) -> Event {
    idx.iter()
        .map(|i| (NAMES[*i].to_string(), Value::Long(*i as i64)))
        .collect()
}

proptest! {
    #[test]
    fn mutual_supersets_share_a_summary(
        a in names(), b in names(), na in names(), nb in names()
    ) {
        let fa = fieldset(Level::Data, &a, &na);
        let fb = fieldset(Level::Data, &b, &nb);
        if fa.is_superset_of(&fb) && fb.is_superset_of(&fa) {
            prop_assert_eq!(fa.summary(), fb.summary());
        }
    }

    #[test]
    fn referring_a_shape_twice_creates_one_fieldset(shapes in proptest::collection::vec(names(), 1..12)) {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        for s in shapes.iter().chain(shapes.iter()) {
            t.refer(&mut p, &event(s)).unwrap();
        }
        let identities: BTreeSet<_> = t.data_fieldsets().iter().map(FieldSet::identity).collect();
        prop_assert_eq!(identities.len(), t.data_fieldsets().len());
        let distinct: BTreeSet<_> = shapes.iter().collect();
        prop_assert_eq!(t.data_fieldsets().len(), distinct.len());
    }

    #[test]
    fn widening_keeps_query_supertypes_resolvable(
        before in proptest::collection::vec(names(), 0..6),
        queries in proptest::collection::vec((names(), names()), 1..4),
        after in proptest::collection::vec(names(), 1..8),
    ) {
        let mut p = InMemoryProcessor::new();
        let mut t = TargetSchema::new("t", &[], true, 16);
        for s in &before {
            t.refer(&mut p, &event(s)).unwrap();
        }
        // Make every field known so query fieldsets can be built.
        for n in NAMES {
            t.reserve(n, FieldType::Long).unwrap();
        }
        for (i, (fields, nullable)) in queries.iter().enumerate() {
            let needs: BTreeMap<String, bool> = fields
                .iter()
                .map(|f| (NAMES[*f].to_string(), nullable.contains(f)))
                .collect();
            let fs = t.query_fieldset(&needs).unwrap();
            t.bind_query(&mut p, &format!("q{i}"), fs).unwrap();
        }

        for s in &after {
            t.refer(&mut p, &event(s)).unwrap();
            let graph = t.graph().unwrap();
            prop_assert!(lattice::is_consistent(graph));
            for q in &graph.queries {
                prop_assert!(p.registry().contains(q.type_name()));
                for d in graph.data.iter().filter(|d| is_supertype(q, d)) {
                    let registered = p.registry().get(d.type_name()).unwrap();
                    prop_assert!(registered.supertypes.iter().any(|n| n == q.type_name()));
                }
            }
        }
    }
}

#[test]
fn tie_break_prefers_fewest_extras_then_smallest_type_name() {
    let present: BTreeSet<String> = ["a".to_string()].into();
    let wide = fieldset(Level::Data, &[0, 1, 2].into(), &[1, 2].into()).bind(16);
    let x = fieldset(Level::Data, &[0, 3].into(), &[3].into()).bind(16);
    let y = fieldset(Level::Data, &[0, 4].into(), &[4].into()).bind(16);
    let all = vec![wide, x.clone(), y.clone()];
    let chosen = lattice::select_candidate(&all, &present).unwrap();
    let smallest = std::cmp::min(x.type_name(), y.type_name());
    assert_eq!(chosen.type_name(), smallest);
}
