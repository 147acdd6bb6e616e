//! Cortex contract tests run against both backends: row queries,
//! by-strategies, joins, sizes, tufo formation, and the ratchet policy.

use cortex_core::row::{Guid, Row, Valu};
use cortex_core::traits::ICoreXact;
use cortex_core::types::TypePolicy;
use cortex_storage::Cortex;

fn cores() -> Vec<Cortex> {
    vec![
        Cortex::open_ram(),
        Cortex::open_sqlite_in_memory(None).unwrap(),
    ]
}

fn row(id: &Guid, prop: &str, valu: impl Into<Valu>, time: i64) -> Row {
    Row::new(id.clone(), prop, valu, time)
}

// ── Row queries ───────────────────────────────────────────────────────

#[test]
fn inserted_rows_are_visible_by_id() {
    for core in cores() {
        let id = Guid::new();
        let rows = vec![row(&id, "foo:bar", 10, 0), row(&id, "foo:baz", "x", 1)];
        core.add_rows(rows.clone()).unwrap();
        let got = core.get_rows_by_id(&id).unwrap();
        assert_eq!(got.len(), 2);
        for want in &rows {
            assert!(got.contains(want), "missing {want:?}");
        }
    }
}

#[test]
fn prop_queries_filter_by_valu_time_and_limit() {
    for core in cores() {
        let id = Guid::new();
        core.add_rows(vec![
            row(&id, "foo:bar", 10, 100),
            row(&id, "foo:bar", 10, 200),
            row(&id, "foo:bar", 20, 300),
        ])
        .unwrap();

        let hits = core
            .get_rows_by_prop("foo:bar", Some(&Valu::Int(10)), None, None, None)
            .unwrap();
        assert_eq!(hits.len(), 2);

        // [mintime, maxtime) bounds.
        let hits = core
            .get_rows_by_prop("foo:bar", None, Some(200), Some(300), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].time, 200);

        let hits = core
            .get_rows_by_prop("foo:bar", None, None, None, Some(1))
            .unwrap();
        assert_eq!(hits.len(), 1);

        let hits = core
            .get_rows_by_prop("newp:newp", None, None, None, None)
            .unwrap();
        assert!(hits.is_empty());
    }
}

#[test]
fn props_are_case_folded_on_insert() {
    for core in cores() {
        let id = Guid::new();
        core.add_rows(vec![row(&id, "Foo:Bar", 1, 0)]).unwrap();
        let hits = core
            .get_rows_by_prop("foo:bar", None, None, None, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}

#[test]
fn list_values_fail_canstor() {
    for core in cores() {
        let id = Guid::new();
        let err = core
            .add_rows(vec![row(&id, "foo:bar", Valu::List(vec![Valu::Int(1)]), 0)])
            .unwrap_err();
        assert_eq!(err.kind(), "BadStorValu");
    }
}

// ── By-strategies ─────────────────────────────────────────────────────

#[test]
fn by_strategies_select_rows() {
    for core in cores() {
        let id = Guid::new();
        core.add_rows(vec![
            row(&id, "foo:bar", 10, 0),
            row(&id, "foo:bar", 20, 0),
            row(&id, "foo:bar", 30, 0),
        ])
        .unwrap();

        let ge = core
            .get_rows_by("ge", "foo:bar", &Valu::Int(20), None)
            .unwrap();
        assert_eq!(ge.len(), 2);

        let le = core
            .get_rows_by("le", "foo:bar", &Valu::Int(20), None)
            .unwrap();
        assert_eq!(le.len(), 2);

        let has = core
            .get_rows_by("has", "foo:bar", &Valu::Int(0), None)
            .unwrap();
        assert_eq!(has.len(), 3);

        // range is half-open: [10, 30).
        let range = core
            .get_rows_by(
                "range",
                "foo:bar",
                &Valu::List(vec![Valu::Int(10), Valu::Int(30)]),
                None,
            )
            .unwrap();
        assert_eq!(range.len(), 2);

        assert_eq!(
            core.get_rows_by("newp", "foo:bar", &Valu::Int(0), None)
                .unwrap_err()
                .kind(),
            "NoSuchBy"
        );
        assert_eq!(
            core.get_size_by("range", "foo:bar", &Valu::Int(0))
                .unwrap_err()
                .kind(),
            "InvalidParam"
        );
    }
}

// ── Joins ─────────────────────────────────────────────────────────────

#[test]
fn join_expands_matched_rows_to_full_entities() {
    for core in cores() {
        let ida = Guid::new();
        let idb = Guid::new();
        core.add_rows(vec![
            row(&ida, "foo:bar", 10, 0),
            row(&ida, "foo:baz", "a", 0),
            row(&idb, "foo:bar", 10, 0),
            row(&idb, "foo:baz", "b", 0),
        ])
        .unwrap();

        let joined = core
            .get_join_by_prop("foo:bar", Some(&Valu::Int(10)), None, None, None)
            .unwrap();
        assert_eq!(joined.len(), 4);

        let joined = core.get_join_by_id(&ida).unwrap();
        assert_eq!(joined.len(), 2);

        let joined = core
            .get_join_by("ge", "foo:bar", &Valu::Int(10), None)
            .unwrap();
        assert_eq!(joined.len(), 4);
    }
}

// ── Sizes ─────────────────────────────────────────────────────────────

#[test]
fn sizes_match_row_counts() {
    for core in cores() {
        let id = Guid::new();
        core.add_rows(vec![
            row(&id, "foo:bar", 10, 100),
            row(&id, "foo:bar", 20, 200),
        ])
        .unwrap();

        assert_eq!(core.get_size_by_id(&id).unwrap(), 2);
        assert_eq!(
            core.get_size_by_prop("foo:bar", None, None, None).unwrap(),
            2
        );
        assert_eq!(
            core.get_size_by_prop("foo:bar", Some(&Valu::Int(10)), None, None)
                .unwrap(),
            1
        );
        assert_eq!(
            core.get_size_by_prop("foo:bar", None, Some(200), None).unwrap(),
            1
        );
        assert_eq!(
            core.get_size_by("ge", "foo:bar", &Valu::Int(15)).unwrap(),
            1
        );
    }
}

// ── Tufo formation ────────────────────────────────────────────────────

#[test]
fn form_tufo_creates_then_deconflicts() {
    for core in cores() {
        core.add_tufo_form("foo", "str").unwrap();
        core.add_tufo_prop("foo", "size", "int").unwrap();

        let tufo = core
            .form_tufo_by_frob("foo", "a", &[("size", Valu::Str("0x10".into()))])
            .unwrap();
        assert_eq!(tufo.form(), Some("foo"));
        assert_eq!(tufo.get("foo"), Some(&Valu::Str("a".into())));
        // Frobbed to the declared int type.
        assert_eq!(tufo.get("foo:size"), Some(&Valu::Int(16)));

        // Same ident returns the same entity, props not re-applied.
        let again = core
            .form_tufo_by_frob("foo", "a", &[("size", Valu::Int(99))])
            .unwrap();
        assert_eq!(again.id, tufo.id);
        assert_eq!(again.get("foo:size"), Some(&Valu::Int(16)));

        // A different ident forms a new entity.
        let other = core.form_tufo_by_frob("foo", "b", &[]).unwrap();
        assert_ne!(other.id, tufo.id);
    }
}

#[test]
fn form_tufo_requires_a_declared_form() {
    for core in cores() {
        let err = core.form_tufo_by_frob("newp", "a", &[]).unwrap_err();
        assert_eq!(err.kind(), "NoSuchForm");
    }
}

// ── Type policy ───────────────────────────────────────────────────────

#[test]
fn time_minmax_ratchet() {
    for core in cores() {
        core.add_type("foo:min", Some("time"), TypePolicy::Min).unwrap();
        core.add_type("foo:max", Some("time"), TypePolicy::Max).unwrap();
        core.add_tufo_form("foo", "str").unwrap();
        core.add_tufo_prop("foo", "earliest", "foo:min").unwrap();
        core.add_tufo_prop("foo", "latest", "foo:max").unwrap();

        let mut tufo = core
            .form_tufo_by_frob(
                "foo",
                "a",
                &[("earliest", Valu::Int(10)), ("latest", Valu::Int(10))],
            )
            .unwrap();
        assert_eq!(tufo.get("foo:earliest"), Some(&Valu::Int(10)));
        assert_eq!(tufo.get("foo:latest"), Some(&Valu::Int(10)));

        core.set_tufo_prop(&mut tufo, "earliest", 100).unwrap();
        assert_eq!(tufo.get("foo:earliest"), Some(&Valu::Int(10)));
        core.set_tufo_prop(&mut tufo, "earliest", 1).unwrap();
        assert_eq!(tufo.get("foo:earliest"), Some(&Valu::Int(1)));

        core.set_tufo_prop(&mut tufo, "latest", 100).unwrap();
        assert_eq!(tufo.get("foo:latest"), Some(&Valu::Int(100)));
        core.set_tufo_prop(&mut tufo, "latest", 1).unwrap();
        assert_eq!(tufo.get("foo:latest"), Some(&Valu::Int(100)));
    }
}

#[test]
fn accepted_writes_persist_and_rejected_writes_do_not() {
    for core in cores() {
        core.add_type("foo:max", Some("int"), TypePolicy::Max).unwrap();
        core.add_tufo_form("foo", "str").unwrap();
        core.add_tufo_prop("foo", "best", "foo:max").unwrap();

        let mut tufo = core
            .form_tufo_by_frob("foo", "a", &[("best", Valu::Int(10))])
            .unwrap();

        assert!(core.set_tufo_prop(&mut tufo, "best", 20).unwrap());
        assert!(!core.set_tufo_prop(&mut tufo, "best", 5).unwrap());

        // The store agrees with the in-memory tufo on reload.
        let reloaded = core.form_tufo_by_frob("foo", "a", &[]).unwrap();
        assert_eq!(reloaded.get("foo:best"), Some(&Valu::Int(20)));
        // The replaced value left no extra rows behind.
        assert_eq!(
            core.get_size_by_prop("foo:best", None, None, None).unwrap(),
            1
        );
    }
}

#[test]
fn tufo_api_expands_short_prop_names() {
    for core in cores() {
        core.add_tufo_form("foo", "str").unwrap();
        core.add_tufo_prop("foo", "size", "int").unwrap();

        let mut tufo = core
            .form_tufo_by_frob("foo", "a", &[("size", Valu::Int(1))])
            .unwrap();
        let mut tapi = core.tufo_api(&mut tufo);
        assert_eq!(tapi.get("size"), Some(&Valu::Int(1)));
        tapi.set("size", 2).unwrap();
        assert_eq!(tapi.get("size"), Some(&Valu::Int(2)));
    }
}

// ── Transactions ──────────────────────────────────────────────────────

#[test]
fn core_xact_scopes_writes() {
    for core in cores() {
        let id = Guid::new();
        {
            let mut xact = core.get_core_xact().unwrap();
            xact.add_rows(&[row(&id, "foo:bar", 1, 0)]).unwrap();
            xact.commit().unwrap();
        }
        assert_eq!(core.get_size_by_id(&id).unwrap(), 1);

        let other = Guid::new();
        {
            let mut xact = core.get_core_xact().unwrap();
            xact.add_rows(&[row(&other, "foo:bar", 2, 0)]).unwrap();
            // Dropped without commit: rolled back.
        }
        assert_eq!(core.get_size_by_id(&other).unwrap(), 0);
    }
}

// ── Async call surface ────────────────────────────────────────────────

#[tokio::test]
async fn async_calls_return_values_or_errors() {
    for core in cores() {
        let id = Guid::new();
        core.add_rows(vec![row(&id, "foo:bar", 10, 0)]).unwrap();

        let job = core.call_async_api(cortex_storage::ApiCall::GetSizeByProp {
            prop: "foo:bar".to_string(),
            valu: None,
            mintime: None,
            maxtime: None,
        });
        match core.get_async_return(&job).await.unwrap() {
            cortex_storage::ApiReturn::Size(size) => assert_eq!(size, 1),
            other => panic!("unexpected return {other:?}"),
        }

        // Errors surface on retrieve, not submit.
        let job = core.call_async_api(cortex_storage::ApiCall::GetRowsBy {
            by: "newp".to_string(),
            prop: "foo:bar".to_string(),
            valu: Valu::Int(0),
            limit: None,
        });
        let err = core.get_async_return(&job).await.unwrap_err();
        assert_eq!(err.kind(), "NoSuchBy");

        // Each job retrieves once.
        let unknown = core.get_async_return(&job).await.unwrap_err();
        assert_eq!(unknown.kind(), "NoSuchJob");
    }
}

#[tokio::test]
async fn add_rows_async_persists() {
    for core in cores() {
        let id = Guid::new();
        let job = core.add_rows_async(vec![row(&id, "foo:bar", 10, 0)]);
        core.get_async_return(&job).await.unwrap();
        assert_eq!(core.get_size_by_id(&id).unwrap(), 1);
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────────

#[test]
fn fini_is_idempotent() {
    for core in cores() {
        core.fini();
        core.fini();
        assert!(core.is_fini());
    }
}
