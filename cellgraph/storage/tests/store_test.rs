mod common;

use cellgraph_common::types::{Direction, ElementKey, ElementType};
use cellgraph_common::value::Value;
use cellgraph_security::{Authorizations, Visibility};
use cellgraph_storage::history::{HistoricalEventKind, HistoricalEventsFetchHints, SortDirection};
use cellgraph_storage::model::extended_data::ExtendedDataCellId;
use cellgraph_storage::model::fetch_hints::FetchHints;
use cellgraph_storage::model::metadata::Metadata;
use cellgraph_storage::model::property::PropertyIdentity;
use cellgraph_storage::mutation::{ElementMutation, ElementMutationBuilder};
use cellgraph_storage::{MemoryStore, StorageError, StorageResult};
use common::*;

fn vertex(store: &MemoryStore, id: &str, hints: &FetchHints, auths: &Authorizations) -> bool {
    store
        .get_element(&ElementKey::vertex(id), hints, None, auths)
        .unwrap()
        .is_some()
}

#[test]
fn test_property_value_round_trip() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(
        &ElementMutation::vertex("v1", vis("a"))
            .set_property("k1", "p", "x", vis("a"))
            .build()?,
    )?;

    let element = store
        .get_element(&ElementKey::vertex("v1"), &FetchHints::ALL, None, &auths(&["a"]))?
        .unwrap();
    assert_eq!(element.property_value("p")?, Some(&Value::from("x")));
    assert!(
        store
            .get_element(&ElementKey::vertex("v1"), &FetchHints::ALL, None, &auths(&[]))?
            .is_none()
    );
    Ok(())
}

#[test]
fn test_property_visibility_is_per_cell() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "p", "v1a", vis("a"))
            .set_property("", "p", "v1b", vis("b"))
            .build()?,
    )?;
    let values = |labels: &[&str]| -> Vec<Value> {
        let element = store
            .get_element(&ElementKey::vertex("v1"), &FetchHints::ALL, None, &auths(labels))
            .unwrap()
            .unwrap();
        element.property_values("p").unwrap().into_iter().cloned().collect()
    };
    assert_eq!(values(&["a"]), vec![Value::from("v1a")]);
    assert_eq!(values(&["b"]), vec![Value::from("v1b")]);
    assert_eq!(values(&["a", "b"]), vec![Value::from("v1a"), Value::from("v1b")]);
    Ok(())
}

#[test]
fn test_multivalued_properties_order_by_key() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let mut mutation = ElementMutation::vertex("v1", Visibility::empty());
    for key in ["a", "aa", "b", "0", "A", "Z"] {
        mutation = mutation.set_property(key, "p", key, Visibility::empty());
    }
    store.apply(&mutation.build()?)?;

    let element = store
        .get_element(&ElementKey::vertex("v1"), &FetchHints::ALL, None, &auths(&[]))?
        .unwrap();
    let keys: Vec<&str> = element
        .properties_named("p")?
        .map(|p| p.key().as_str())
        .collect();
    assert_eq!(keys, vec!["0", "A", "Z", "a", "aa", "b"]);
    Ok(())
}

#[test]
fn test_soft_deleted_edge_can_be_restored() -> StorageResult<()> {
    let (store, _cleaner) = create_test_store();
    let everyone = auths(&["geo"]);
    let knows_count = |id: &str| {
        store
            .edge_refs(
                &ElementKey::vertex(id),
                Direction::Both,
                &FetchHints::ALL,
                &everyone,
                None,
            )
            .iter()
            .filter(|r| r.label == "knows")
            .count()
    };
    assert_eq!(knows_count("alice"), 1);

    store.apply(
        &ElementMutation::edge("e1", "alice", "bob", "knows", Visibility::empty())
            .soft_delete()
            .build()?,
    )?;
    assert_eq!(knows_count("alice"), 0);
    assert_eq!(knows_count("bob"), 0);
    let hints = FetchHints::ALL_INCLUDING_HIDDEN;
    assert!(
        store
            .get_element(&ElementKey::edge("e1"), &hints, None, &everyone)?
            .is_none()
    );

    store.apply(
        &ElementMutation::edge("e1", "alice", "bob", "knows", Visibility::empty()).build()?,
    )?;
    assert_eq!(knows_count("alice"), 1);
    assert_eq!(knows_count("bob"), 1);
    assert_replay_matches(&store, &ElementKey::edge("e1"), None);
    Ok(())
}

#[test]
fn test_hidden_vertex_is_only_reachable_with_hidden_hints() -> StorageResult<()> {
    let (store, _cleaner) = create_test_store();
    let a = auths(&["a"]);
    let count = |hints: &FetchHints| {
        store
            .elements(ElementType::Vertex, hints, &a)
            .collect::<StorageResult<Vec<_>>>()
            .unwrap()
            .len()
    };
    let before = count(&FetchHints::ALL);
    assert_eq!(before, 2);

    let hide = ElementMutation::vertex("alice", Visibility::empty())
        .mark_hidden(vis("a"))
        .build()?;
    store.apply(&hide)?;
    assert_eq!(count(&FetchHints::ALL), before - 1);
    assert!(!vertex(&store, "alice", &FetchHints::ALL, &a));
    let hidden = store
        .get_element(&ElementKey::vertex("alice"), &FetchHints::ALL_INCLUDING_HIDDEN, None, &a)?
        .unwrap();
    assert!(hidden.is_hidden(&a));
    // Callers who cannot read the marker still see the vertex.
    assert!(vertex(&store, "alice", &FetchHints::ALL, &auths(&[])));

    store.apply(
        &ElementMutation::vertex("alice", Visibility::empty())
            .mark_visible(vis("a"))
            .build()?,
    )?;
    assert_eq!(count(&FetchHints::ALL), before);
    assert_replay_matches(&store, &ElementKey::vertex("alice"), None);
    Ok(())
}

#[test]
fn test_edge_refs_require_visible_other_vertex() -> StorageResult<()> {
    let (store, _cleaner) = create_test_store();
    let hints = FetchHints::ALL;
    let alice = |labels: &[&str]| {
        store
            .get_element(&ElementKey::vertex("alice"), &hints, None, &auths(labels))
            .unwrap()
            .unwrap()
            .into_vertex()
            .unwrap()
    };

    let plain = alice(&[]);
    assert_eq!(plain.edge_count(Direction::Out)?, 1);
    assert_eq!(plain.vertex_ids(Direction::Out)?, vec!["bob"]);

    let geo = alice(&["geo"]);
    assert_eq!(geo.edge_count(Direction::Out)?, 2);
    let labels: Vec<&str> = geo
        .edge_labels(Direction::Both)?
        .into_iter()
        .map(|l| l.as_str())
        .collect();
    assert_eq!(labels, vec!["knows", "lives_in"]);
    assert_eq!(geo.edge_count(Direction::In)?, 0);
    Ok(())
}

#[test]
fn test_edge_label_change_moves_adjacency() -> StorageResult<()> {
    let (store, _cleaner) = create_test_store();
    store.apply(
        &ElementMutation::edge("e1", "alice", "bob", "knows", Visibility::empty())
            .alter_edge_label("likes")
            .build()?,
    )?;
    let refs = store.edge_refs(
        &ElementKey::vertex("bob"),
        Direction::In,
        &FetchHints::ALL,
        &auths(&[]),
        None,
    );
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].label, "likes");
    assert_eq!(refs[0].other_vertex_id, "alice");

    let moved = ElementMutation::edge("e1", "alice", "paris", "likes", Visibility::empty())
        .build()?;
    assert!(matches!(store.apply(&moved), Err(StorageError::InvalidMutation(_))));
    Ok(())
}

#[test]
fn test_resubmitting_a_mutation_keeps_one_property() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let mutation = ElementMutation::vertex("v1", vis("a"))
        .set_property("k", "p", 1i64, vis("a"))
        .add_additional_visibility(vis("b"))
        .build()?;
    let first = store.apply(&mutation)?;
    let second = store.apply(&mutation)?;
    assert_eq!(first.events.len(), 3);
    assert_eq!(second.events.len(), 1);
    assert!(matches!(second.events[0].kind, HistoricalEventKind::AddProperty { .. }));
    assert_eq!(second.record.properties.len(), 1);
    let values: Vec<&Value> = second.record.properties.values().map(|p| &p.value).collect();
    assert_eq!(values, vec![&Value::from(1i64)]);
    assert_eq!(second.record.additional_visibilities, first.record.additional_visibilities);

    let all = auths(&["a", "b"]);
    let events = store.historical_events(
        &[ElementKey::vertex("v1")],
        None,
        &HistoricalEventsFetchHints::ALL,
        &all,
    );
    assert_eq!(events.len(), 4);
    Ok(())
}

#[test]
fn test_replay_matches_every_version() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let key = ElementKey::vertex("v1");
    let cell = ExtendedDataCellId::new("notes", "r1", "text", "", Visibility::empty());
    let mutations = vec![
        ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "name", "first", Visibility::empty())
            .add_extended_data(cell.clone(), "hello")
            .build()?,
        ElementMutation::vertex("v1", vis("a"))
            .mark_property_hidden("", "name", Visibility::empty(), vis("x"))
            .build()?,
        ElementMutation::vertex("v1", vis("a"))
            .set_property("", "name", "second", Visibility::empty())
            .mark_extended_data_hidden(cell.clone(), vis("x"))
            .build()?,
        ElementMutation::vertex("v1", vis("a"))
            .soft_delete_property("", "name", Visibility::empty())
            .add_additional_visibility(vis("b"))
            .build()?,
        ElementMutation::vertex("v1", vis("a")).soft_delete().build()?,
        ElementMutation::vertex("v1", vis("c"))
            .set_property("", "name", "third", vis("c"))
            .build()?,
    ];
    let mut timestamps = Vec::new();
    for mutation in &mutations {
        timestamps.push(store.apply(mutation)?.timestamp);
    }
    for ts in timestamps {
        assert_replay_matches(&store, &key, Some(ts));
    }
    assert_replay_matches(&store, &key, None);

    let record = store.element_record(&key, None).unwrap();
    assert_eq!(record.visibility, vis("c"));
    assert_eq!(record.properties.len(), 1);
    Ok(())
}

#[test]
fn test_historical_events_paging_and_filtering() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "public", "p", Visibility::empty())
            .set_property("", "secret", "s", vis("s"))
            .build()?,
    )?;
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "public", "q", Visibility::empty())
            .build()?,
    )?;
    let keys = [ElementKey::vertex("v1")];

    let all = HistoricalEventsFetchHints::ALL;
    let public = store.historical_events(&keys, None, &all, &auths(&[]));
    assert_eq!(public.len(), 3);
    assert!(public.iter().all(|e| e.kind.property().is_none_or(|p| p.name == "public")));

    let page_hints = HistoricalEventsFetchHints::ALL.with_limit(2);
    let everyone = auths(&["s"]);
    let first = store.historical_events(&keys, None, &page_hints, &everyone);
    assert_eq!(first.len(), 2);
    let cursor = first.last_event_id();
    let rest = store.historical_events(&keys, cursor.as_ref(), &page_hints, &everyone);
    assert_eq!(rest.len(), 2);
    assert!(rest.events()[0].id > first.events()[1].id);

    let newest = store.historical_events(
        &keys,
        None,
        &HistoricalEventsFetchHints::ALL
            .with_sort_direction(SortDirection::Descending)
            .with_limit(1),
        &everyone,
    );
    match &newest.events()[0].kind {
        HistoricalEventKind::AddProperty {
            previous_value,
            value,
            ..
        } => {
            assert_eq!(previous_value.as_ref(), Some(&Value::from("p")));
            assert_eq!(value.as_ref(), Some(&Value::from("q")));
        }
        other => panic!("unexpected event {other:?}"),
    }
    Ok(())
}

#[test]
fn test_extended_data_rows() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let cell = |row: &str, column: &str, visibility: &str| {
        ExtendedDataCellId::new("table1", row, column, "", vis(visibility))
    };
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .add_extended_data(cell("r1", "name", ""), "one")
            .add_extended_data(cell("r1", "size", "a"), 10i64)
            .add_extended_data(cell("r2", "name", "a"), "two")
            .build()?,
    )?;
    let key = ElementKey::vertex("v1");

    let rows = store.extended_data(&key, Some("table1"), None, &auths(&[]), false);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value("name"), Some(&Value::from("one")));
    assert_eq!(rows[0].value("size"), None);

    let rows = store.extended_data(&key, None, None, &auths(&["a"]), false);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value("size"), Some(&Value::from(10i64)));

    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .delete_extended_data_row("table1", "r1")
            .build()?,
    )?;
    let rows = store.extended_data(&key, None, None, &auths(&["a"]), false);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id().row_id, "r2");
    assert_replay_matches(&store, &key, None);
    Ok(())
}

#[test]
fn test_concurrent_writers_on_one_element() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(&ElementMutation::vertex("v1", Visibility::empty()).build()?)?;

    std::thread::scope(|scope| {
        for writer in 0..8 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..25i64 {
                    let key = format!("{writer}-{i}");
                    let mutation = ElementMutation::vertex("v1", Visibility::empty())
                        .set_property(key, "p", i, Visibility::empty())
                        .build()
                        .unwrap();
                    store.apply(&mutation).unwrap();
                }
            });
        }
    });

    let key = ElementKey::vertex("v1");
    let record = store.element_record(&key, None).unwrap();
    assert_eq!(record.properties.len(), 200);
    assert_replay_matches(&store, &key, None);
    let events = store.historical_events(
        &[key],
        None,
        &HistoricalEventsFetchHints::ALL,
        &auths(&[]),
    );
    assert_eq!(events.len(), 201);
    assert!(events.events().windows(2).all(|w| w[0].id < w[1].id));
    Ok(())
}

#[test]
fn test_delete_vertex_removes_attached_edges() -> StorageResult<()> {
    let (store, _cleaner) = create_test_store();
    let deleted = store.delete_element(&ElementKey::vertex("paris"))?;
    assert_eq!(deleted.len(), 3);
    assert!(store.element_record(&ElementKey::edge("e2"), None).is_none());
    assert!(store.element_record(&ElementKey::edge("e1"), None).is_some());

    let alice = store
        .get_element(&ElementKey::vertex("alice"), &FetchHints::ALL, None, &auths(&["geo"]))?
        .unwrap()
        .into_vertex()
        .unwrap();
    assert_eq!(alice.edge_count(Direction::Both)?, 1);
    assert!(
        store
            .historical_events(
                &[ElementKey::vertex("paris")],
                None,
                &HistoricalEventsFetchHints::ALL,
                &auths(&["geo"]),
            )
            .is_empty()
    );
    Ok(())
}

#[test]
fn test_history_filters_property_metadata() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property_with_metadata(
                "",
                "name",
                "alice",
                Metadata::create()
                    .with("source", "census", Visibility::empty())
                    .with("ssn", "123-45-6789", vis("secret")),
                Visibility::empty(),
            )
            .build()?,
    )?;
    let key = ElementKey::vertex("v1");
    let metadata_len = |labels: &[&str]| -> usize {
        store
            .historical_events(
                &[key.clone()],
                None,
                &HistoricalEventsFetchHints::ALL,
                &auths(labels),
            )
            .iter()
            .find_map(|event| match &event.kind {
                HistoricalEventKind::AddProperty { metadata, .. } => Some(metadata.len()),
                _ => None,
            })
            .unwrap()
    };
    assert_eq!(metadata_len(&[]), 1);
    assert_eq!(metadata_len(&["secret"]), 2);

    let element = store
        .get_element(&key, &FetchHints::ALL, None, &auths(&[]))?
        .unwrap();
    let name = element.property(None, "name", None)?.unwrap();
    assert_eq!(name.metadata()?.len(), 1);
    assert_eq!(name.metadata_value("ssn")?, None);
    Ok(())
}

#[test]
fn test_additional_visibility_gates_history() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property("", "name", "alice", Visibility::empty())
            .add_additional_visibility(vis("b"))
            .build()?,
    )?;
    let key = ElementKey::vertex("v1");
    let history = |labels: &[&str]| {
        store
            .historical_events(
                &[key.clone()],
                None,
                &HistoricalEventsFetchHints::ALL,
                &auths(labels),
            )
            .len()
    };
    assert!(!vertex(&store, "v1", &FetchHints::ALL, &auths(&[])));
    assert_eq!(history(&[]), 0);
    assert_eq!(history(&["b"]), 3);

    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .delete_additional_visibility(vis("b"))
            .build()?,
    )?;
    assert!(vertex(&store, "v1", &FetchHints::ALL, &auths(&[])));
    // The event that added the requirement is still gated by it.
    assert_eq!(history(&[]), 3);
    assert_eq!(history(&["b"]), 4);
    Ok(())
}

#[test]
fn test_set_property_metadata_keeps_value() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let key = ElementKey::vertex("v1");
    let identity = PropertyIdentity::new("k", "name", Visibility::empty());
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property_with_metadata(
                "k",
                "name",
                "alice",
                Metadata::create().with("source", "census", Visibility::empty()),
                Visibility::empty(),
            )
            .build()?,
    )?;
    let applied = store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property_metadata(identity.clone(), "confidence", 0.9, Visibility::empty())
            .build()?,
    )?;
    assert_eq!(applied.events.len(), 1);
    let property = &applied.record.properties[&identity];
    assert_eq!(property.value, Value::from("alice"));
    assert_eq!(property.metadata.value("source"), Some(&Value::from("census")));
    assert_eq!(property.metadata.value("confidence"), Some(&Value::from(0.9)));

    let hints = FetchHints::builder()
        .include_all_properties(true)
        .metadata_keys_to_include(["source"])
        .build()?;
    let element = store.get_element(&key, &hints, None, &auths(&[]))?.unwrap();
    let name = element.property(Some("k"), "name", None)?.unwrap();
    assert_eq!(name.metadata_value("source")?, Some(&Value::from("census")));
    assert!(matches!(
        name.metadata_value("confidence"),
        Err(StorageError::FetchHintsMismatch(_))
    ));

    // A plain overwrite replaces the metadata wholesale.
    let applied = store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .set_property("k", "name", "alicia", Visibility::empty())
            .build()?,
    )?;
    assert!(applied.record.properties[&identity].metadata.is_empty());
    assert_replay_matches(&store, &key, None);
    Ok(())
}

#[test]
fn test_apply_as_requires_readable_element() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let key = ElementKey::vertex("v1");
    store.apply(&ElementMutation::vertex("v1", vis("a")).build()?)?;
    let update = ElementMutation::vertex("v1", vis("a"))
        .set_property("", "p", "x", Visibility::empty())
        .build()?;
    assert!(matches!(
        store.apply_as(&update, &auths(&[])),
        Err(StorageError::SecurityViolation(_))
    ));
    assert!(store.element_record(&key, None).unwrap().properties.is_empty());

    store.apply_as(&update, &auths(&["a"]))?;
    assert_eq!(store.element_record(&key, None).unwrap().properties.len(), 1);
    Ok(())
}

#[test]
fn test_hidden_markers_follow_authorizations() -> StorageResult<()> {
    let (store, _cleaner) = create_empty_store();
    let key = ElementKey::vertex("v1");
    store.apply(
        &ElementMutation::vertex("v1", Visibility::empty())
            .mark_hidden(vis("h1"))
            .mark_hidden(vis("h2"))
            .build()?,
    )?;
    let read = |labels: &[&str]| {
        store
            .get_element(&key, &FetchHints::ALL_INCLUDING_HIDDEN, None, &auths(labels))
            .unwrap()
            .unwrap()
    };

    assert_eq!(read(&["h1"]).hidden_visibilities(), &[vis("h1")]);
    assert_eq!(read(&["h1", "h2"]).hidden_visibilities().len(), 2);
    assert!(read(&[]).hidden_visibilities().is_empty());
    Ok(())
}
