//! Property tests: insert→query visibility and fold/flatten inverses
//! across both backends.

use proptest::prelude::*;

use cortex_core::row::{Guid, Row, Valu};
use cortex_core::tufo::{fold_rows, tufo_rows};
use cortex_storage::Cortex;

fn arb_valu() -> impl Strategy<Value = Valu> {
    prop_oneof![
        any::<i64>().prop_map(Valu::Int),
        "[a-z0-9.]{0,16}".prop_map(Valu::Str),
    ]
}

proptest! {
    #[test]
    fn inserted_rows_are_immediately_visible(
        valus in prop::collection::vec(arb_valu(), 1..8),
        time in 0i64..1_000_000,
    ) {
        for core in [Cortex::open_ram(), Cortex::open_sqlite_in_memory(None).unwrap()] {
            let id = Guid::new();
            let rows: Vec<Row> = valus
                .iter()
                .enumerate()
                .map(|(off, valu)| Row::new(id.clone(), format!("foo:p{off}"), valu.clone(), time))
                .collect();
            core.add_rows(rows.clone()).unwrap();
            let got = core.get_rows_by_id(&id).unwrap();
            prop_assert_eq!(got.len(), rows.len());
            for want in &rows {
                prop_assert!(got.contains(want));
            }
        }
    }

    #[test]
    fn fold_then_flatten_preserves_tufos(
        valus in prop::collection::vec(arb_valu(), 1..8),
        time in 0i64..1_000_000,
    ) {
        let id = Guid::new();
        let mut rows = vec![Row::new(id.clone(), "tufo:form", "foo", time)];
        for (off, valu) in valus.iter().enumerate() {
            rows.push(Row::new(id.clone(), format!("foo:p{off}"), valu.clone(), time));
        }
        let tufos = fold_rows(rows);
        prop_assert_eq!(tufos.len(), 1);
        let flat = tufo_rows(&tufos[0], time);
        let refolded = fold_rows(flat);
        prop_assert_eq!(refolded, tufos);
    }
}
