//! Property tests: parse/unparse round-trip over the query grammar.

use proptest::prelude::*;

use cortex_core::row::Valu;
use cortex_meta::QuerySpec;

fn arb_scalar() -> impl Strategy<Value = Valu> {
    prop_oneof![
        (-1_000_000i64..1_000_000).prop_map(Valu::Int),
        "[a-z0-9._ -]{0,12}".prop_map(Valu::Str),
    ]
}

fn arb_valu() -> impl Strategy<Value = Option<Valu>> {
    prop_oneof![
        Just(None),
        arb_scalar().prop_map(Some),
        prop::collection::vec(arb_scalar(), 0..4).prop_map(|items| Some(Valu::List(items))),
    ]
}

fn arb_times() -> impl Strategy<Value = (Option<i64>, Option<i64>)> {
    prop_oneof![
        Just((None, None)),
        (-1_000_000i64..1_000_000).prop_map(|min| (Some(min), None)),
        ((-1_000_000i64..1_000_000), (-1_000_000i64..1_000_000))
            .prop_map(|(min, max)| (Some(min), Some(max))),
    ]
}

fn arb_by() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        prop::sample::select(vec!["eq", "ge", "le", "gt", "lt", "has", "range"])
            .prop_map(|by| Some(by.to_string())),
    ]
}

fn arb_spec() -> impl Strategy<Value = QuerySpec> {
    (
        "[a-z][a-z0-9.]{0,8}",
        "[a-z][a-z0-9._:]{0,10}",
        arb_valu(),
        arb_times(),
        prop::option::of(0usize..10_000),
        arb_by(),
    )
        .prop_map(|(tag, prop, valu, (mintime, maxtime), limit, by)| QuerySpec {
            tag,
            prop,
            valu,
            mintime,
            maxtime,
            limit,
            by,
        })
}

proptest! {
    #[test]
    fn parse_unparse_round_trips(spec in arb_spec()) {
        let text = spec.unparse();
        let parsed = QuerySpec::parse(&text).unwrap();
        prop_assert_eq!(parsed, spec, "{}", text);
    }
}
