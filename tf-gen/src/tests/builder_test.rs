use std::collections::BTreeMap;

use assertables::*;
use rstest::*;
use tf_core::errors::BuildError;

use super::*;
use crate::builder::*;
use crate::model::{
    GraphRecord,
    NetNode,
};

#[rstest]
fn test_sequential_net(sequential: BuiltNet) {
    let net = &sequential.net;
    assert_eq!(net.place_count(), 4);
    assert_eq!(net.transition_count(), 3);
    assert_eq!(net.graph().edge_count(), 6);

    let start = net.resolve("p1").unwrap();
    assert_eq!(sequential.initial_marking.iter().collect::<Vec<_>>(), vec![(start, 1)]);
    assert_eq!(sequential.place_names[&start], "start");
}

#[rstest]
fn test_endpoints_resolve_by_name(sequential: BuiltNet) {
    let net = &sequential.net;
    assert_eq!(net.resolve("end"), net.resolve("p4"));
    assert_eq!(net.resolve("B"), net.resolve("t2"));
    assert_none!(net.resolve("nowhere"));
}

#[rstest]
fn test_transition_records(sequential: BuiltNet) {
    let net = &sequential.net;
    let t2 = net.transition(net.resolve("t2").unwrap()).unwrap();
    assert_eq!(t2.label.as_deref(), Some("B"));
    assert_eq!(t2.mean_duration, 120.0);
    assert!(t2.is_visible());
}

#[rstest]
fn test_record_defaults() {
    let records = records(
        r#"[
            {"type": "Place", "id": 1, "name": "idle"},
            {"type": "Transition", "id": 2, "name": ""},
            {"type": "Arc", "source": {"id": 1}, "target": 2}
        ]"#,
    );
    let GraphRecord::Place(place) = &records[0] else { panic!("expected place") };
    assert_eq!((place.id.as_str(), place.tokens), ("1", 0));
    let GraphRecord::Transition(t) = &records[1] else { panic!("expected transition") };
    assert_eq!(t.exectime, 0.0);
    let GraphRecord::Link(link) = &records[2] else { panic!("expected link") };
    assert_eq!((link.source.as_str(), link.target.as_str(), link.prob), ("1", "2", 1.0));

    let built = build_net(&records).unwrap();
    let t = built.net.transition(built.net.resolve("2").unwrap()).unwrap();
    assert!(!t.is_visible());
    assert!(built.initial_marking.is_empty());
}

#[rstest]
fn test_negative_exectime_is_rejected() {
    let res: Result<Vec<GraphRecord>, _> =
        serde_json::from_str(r#"[{"type": "Transition", "id": "t", "name": "A", "exectime": -5}]"#);
    assert_contains!(res.unwrap_err().to_string(), "exectime");
}

#[rstest]
fn test_guards_and_attributes_are_parsed() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "in", "tokens": 1},
            {"type": "Transition", "id": "t1", "name": "approve", "conditions": ["amount > 10", ""],
             "eventattrs": ["amount = randint(1, 100)", "level = 'high'"]},
            {"type": "Link", "source": "p1", "target": "t1"}
        ]"#,
    );
    let net = &built.net;
    let t = net.transition(net.resolve("t1").unwrap()).unwrap();
    assert_eq!(t.guards.len(), 1);
    assert_eq!(t.guards[0].source, "amount > 10");
    assert_eq!(net.event_attribute_names(), vec!["amount".to_owned(), "level".to_owned()]);
}

#[rstest]
#[case::unknown_source(
    r#"[{"type": "Transition", "id": "t1", "name": "A"}, {"type": "Link", "source": "ghost", "target": "t1"}]"#,
    BuildError::UnknownEndpoint("ghost".into())
)]
#[case::place_to_place(
    r#"[{"type": "Place", "id": "a", "name": "a"}, {"type": "Place", "id": "b", "name": "b"},
        {"type": "Link", "source": "a", "target": "b"}]"#,
    BuildError::InvalidArc { source_id: "a".into(), target: "b".into() }
)]
#[case::duplicate_id(
    r#"[{"type": "Place", "id": "x", "name": "a"}, {"type": "Transition", "id": "x", "name": "b"}]"#,
    BuildError::DuplicateId("x".into())
)]
fn test_build_errors(#[case] json: &str, #[case] expected: BuildError) {
    let err = build_net(&records(json)).unwrap_err();
    assert_eq!(err.downcast_ref::<BuildError>(), Some(&expected));
}

#[rstest]
fn test_bad_guard_fails_the_build() {
    let json = r#"[{"type": "Transition", "id": "t1", "name": "A", "conditions": ["amount >"]}]"#;
    let err = build_net(&records(json)).unwrap_err();
    let Some(BuildError::InvalidExpression { transition, expression, .. }) = err.downcast_ref::<BuildError>() else {
        panic!("expected InvalidExpression, got {err}");
    };
    assert_eq!((transition.as_str(), expression.as_str()), ("A", "amount >"));
}

#[rstest]
fn test_inferred_final_marking(sequential: BuiltNet, choice: BuiltNet) {
    let fm = final_marking(&sequential.net);
    assert_eq!(fm.iter().collect::<Vec<_>>(), vec![(sequential.net.resolve("end").unwrap(), 1)]);

    let fm = final_marking(&choice.net);
    assert_eq!(fm.total_tokens(), 1);
    assert_eq!(fm.tokens(choice.net.resolve("p2").unwrap()), 1);
}

#[rstest]
fn test_isolated_place_is_not_final() {
    let built = net_from(r#"[{"type": "Place", "id": "p", "name": "lonely", "tokens": 1}]"#);
    assert!(final_marking(&built.net).is_empty());
}

#[rstest]
fn test_resolve_marking(sequential: BuiltNet) {
    let net = &sequential.net;
    let m = resolve_marking(net, &BTreeMap::from([("end".to_owned(), 1), ("p3".to_owned(), 2)])).unwrap();
    assert_eq!(m.total_tokens(), 3);
    assert_eq!(m.display(net).to_string(), "[p3:2, end:1]");

    assert_eq!(
        resolve_marking(net, &BTreeMap::from([("A".to_owned(), 1)])).unwrap_err(),
        BuildError::UnknownPlace("A".into())
    );
}

#[rstest]
fn test_nodes_keep_their_kind(sequential: BuiltNet) {
    let net = &sequential.net;
    assert!(matches!(net.graph()[net.resolve("p2").unwrap()], NetNode::Place(_)));
    assert!(matches!(net.graph()[net.resolve("t1").unwrap()], NetNode::Transition(_)));
}
