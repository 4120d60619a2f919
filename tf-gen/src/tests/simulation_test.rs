use std::collections::BTreeMap;

use assertables::*;
use chrono::{
    DateTime,
    NaiveDate,
    TimeDelta,
    Timelike,
    Utc,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rstest::*;
use tf_core::errors::ConfigurationError;
use tracing_test::traced_test;

use super::*;
use crate::config::RunConfig;
use crate::context::CaseAttribute;
use crate::log::EventLog;
use crate::noise::{
    NoiseKind,
    NoisePass,
};
use crate::simulation::*;
use crate::value::Value;

const ACTIVITY: &str = "concept:name";
const TIMESTAMP: &str = "time:timestamp";
const CASE: &str = "case:concept:name";

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap().and_utc()
}

fn params(num_traces: usize) -> PlayoutParams {
    PlayoutParams { num_traces, seed: 17, ..PlayoutParams::default() }
}

fn activities(log: &EventLog) -> Vec<Vec<&str>> {
    log.traces.iter().map(|t| t.activities(ACTIVITY)).collect()
}

/// `p1 -> t1 -> p1` with one token: never deadlocks and never reaches a final marking.
fn self_loop(name: &str) -> BuiltNet {
    net_from(&format!(
        r#"[
            {{"type": "Place", "id": "p1", "name": "loop", "tokens": 1}},
            {{"type": "Transition", "id": "t1", "name": "{name}", "exectime": 10}},
            {{"type": "Link", "source": "p1", "target": "t1"}},
            {{"type": "Link", "source": "t1", "target": "p1"}}
        ]"#
    ))
}

#[rstest]
fn test_sequential_playout(sequential: BuiltNet) {
    let log = playout(&sequential.net, &sequential.initial_marking, &params(5), None).unwrap();

    assert_eq!(log.len(), 5);
    assert_eq!(activities(&log), vec![vec!["A", "B", "C"]; 5]);
    let ids: Vec<_> = log.traces.iter().map(|t| log.case_id(t).cloned().unwrap()).collect();
    assert_eq!(ids, (1..=5).map(Value::Int).collect::<Vec<_>>());
}

#[rstest]
fn test_round_trip_through_single_transition() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "P1", "name": "P1", "tokens": 1},
            {"type": "Place", "id": "P2", "name": "P2"},
            {"type": "Transition", "id": "T1", "name": "T1", "exectime": 60},
            {"type": "Link", "source": "P1", "target": "T1", "prob": 1},
            {"type": "Link", "source": "T1", "target": "P2"}
        ]"#,
    );
    let log = playout(&built.net, &built.initial_marking, &params(1), None).unwrap();

    let trace = &log.traces[0];
    assert_eq!(trace.activities(ACTIVITY), vec!["T1"]);
    let start = DateTime::from_timestamp(10_000_000, 0).unwrap();
    let elapsed = (trace.events[0].timestamp(TIMESTAMP).unwrap() - start).num_seconds();
    assert_ge!(elapsed, 54);
    assert_le!(elapsed, 66);
}

#[rstest]
fn test_net_without_transitions_gives_empty_traces() {
    let built = net_from(r#"[{"type": "Place", "id": "p1", "name": "idle", "tokens": 1}]"#);
    let sim_params = params(4);
    let sim = Simulator::new(&built.net, &built.initial_marking, &sim_params).unwrap();

    let (trace, termination) = sim.playout_trace(0, None).unwrap();
    assert!(trace.is_empty());
    assert_eq!(termination, Termination::Deadlock);

    let log = sim.playout(None, None).unwrap();
    assert_eq!(log.len(), 4);
    assert_eq!(log.event_count(), 0);
}

#[rstest]
fn test_timestamps_never_decrease(choice: BuiltNet) {
    let mut p = params(50);
    p.case_interval_secs = 3600;
    let log = playout(&choice.net, &choice.initial_marking, &p, None).unwrap();
    for trace in &log.traces {
        let ts: Vec<_> = trace.events.iter().map(|e| e.timestamp(TIMESTAMP).unwrap()).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[rstest]
fn test_case_interval_offsets_start_times(sequential: BuiltNet) {
    let mut p = params(3);
    p.case_interval_secs = 86_400;
    let log = playout(&sequential.net, &sequential.initial_marking, &p, None).unwrap();

    for (i, trace) in log.traces.iter().enumerate() {
        let start = DateTime::from_timestamp(10_000_000 + 86_400 * i64::try_from(i).unwrap(), 0).unwrap();
        let first = trace.events[0].timestamp(TIMESTAMP).unwrap();
        assert_ge!(first, start);
        assert_lt!(first, start + TimeDelta::hours(1));
    }
}

#[rstest]
fn test_length_cap() {
    let built = self_loop("spin");
    let mut p = params(2);
    p.max_trace_length = 5;
    let sim = Simulator::new(&built.net, &built.initial_marking, &p).unwrap();

    let (trace, termination) = sim.playout_trace(1, None).unwrap();
    assert_eq!(trace.len(), 5);
    assert_eq!(termination, Termination::LengthCap);
}

#[rstest]
fn test_silent_cap() {
    let built = self_loop("");
    let mut p = params(1);
    p.max_silent_steps = 25;
    let sim = Simulator::new(&built.net, &built.initial_marking, &p).unwrap();

    let (trace, termination) = sim.playout_trace(0, None).unwrap();
    assert!(trace.is_empty());
    assert_eq!(termination, Termination::SilentCap);
}

#[rstest]
fn test_playout_is_reproducible(choice: BuiltNet) {
    let generate = |seed| {
        let p = PlayoutParams { seed, ..params(40) };
        playout(&choice.net, &choice.initial_marking, &p, None).unwrap()
    };
    assert_eq!(generate(5), generate(5));
    assert_ne!(activities(&generate(5)), activities(&generate(6)));
}

#[rstest]
fn test_explicit_final_marking_allows_stopping(sequential: BuiltNet) {
    let net = &sequential.net;
    let mut p = params(200);
    p.final_marking = Some(sequential.initial_marking.clone());
    let log = playout(net, &sequential.initial_marking, &p, None).unwrap();

    let traces = activities(&log);
    assert!(traces.iter().all(|t| t.is_empty() || *t == ["A", "B", "C"]));
    assert!(traces.iter().any(Vec::is_empty));
    assert!(traces.iter().any(|t| !t.is_empty()));
}

#[rstest]
fn test_inferred_final_marking_stops_loops() {
    // `work` loops back; `finish` moves the token to a sink.
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "busy", "tokens": 1},
            {"type": "Place", "id": "p2", "name": "done"},
            {"type": "Transition", "id": "t1", "name": "work", "exectime": 5},
            {"type": "Transition", "id": "t2", "name": "finish", "exectime": 5},
            {"type": "Link", "source": "p1", "target": "t1"},
            {"type": "Link", "source": "t1", "target": "p1"},
            {"type": "Link", "source": "p1", "target": "t2"},
            {"type": "Link", "source": "t2", "target": "p2"}
        ]"#,
    );
    let p = params(30);
    let sim = Simulator::new(&built.net, &built.initial_marking, &p).unwrap();
    assert_eq!(sim.final_marking().tokens(built.net.resolve("done").unwrap()), 1);

    for i in 0..30 {
        let (trace, _) = sim.playout_trace(i, None).unwrap();
        assert_eq!(trace.activities(ACTIVITY).last(), Some(&"finish"));
    }
}

#[rstest]
fn test_attributes_on_events_and_traces() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "in", "tokens": 1},
            {"type": "Place", "id": "p2", "name": "out"},
            {"type": "Transition", "id": "t1", "name": "approve (auto)", "exectime": 30,
             "conditions": ["amount >= 10"], "eventattrs": ["amount = randint(10, 20)"]},
            {"type": "Link", "source": "p1", "target": "t1"},
            {"type": "Link", "source": "t1", "target": "p2"}
        ]"#,
    );
    let mut p = params(3);
    p.case_attributes = vec![
        CaseAttribute::parse("region: north").unwrap(),
        CaseAttribute::parse("priority: randint(1, 3)").unwrap(),
    ];
    let log = playout(&built.net, &built.initial_marking, &p, None).unwrap();

    for trace in &log.traces {
        assert_eq!(trace.attributes["region"], Value::from("north"));
        assert!(matches!(trace.attributes["priority"], Value::Int(1..=3)));
        assert_eq!(trace.len(), 1);

        let event = &trace.events[0];
        assert_eq!(event.activity(ACTIVITY), Some("approve"));
        assert!(matches!(event.get("amount"), Some(Value::Int(10..=20))));
        assert_eq!(event.get("region"), Some(&Value::from("north")));
        assert_eq!(event.get("priority"), trace.attributes.get("priority"));
    }
}

#[rstest]
fn test_case_data_supplier(sequential: BuiltNet) {
    let table = CaseDataTable(vec![
        BTreeMap::from([
            ("customer".to_owned(), SuppliedValue::Constant(Value::from("alice"))),
            (
                "cost".to_owned(),
                SuppliedValue::PerActivity(BTreeMap::from([("B".to_owned(), Value::Int(30))])),
            ),
        ]),
        BTreeMap::from([("customer".to_owned(), SuppliedValue::Constant(Value::from("bob")))]),
    ]);
    let log = playout(&sequential.net, &sequential.initial_marking, &params(3), Some(&table)).unwrap();

    let customers: Vec<_> = log.traces.iter().map(|t| t.events[0].get("customer").cloned()).collect();
    assert_eq!(customers, ["alice", "bob", "alice"].map(|c| Some(Value::from(c))));

    let costs: Vec<_> = log.traces[0].events.iter().map(|e| e.get("cost").cloned()).collect();
    assert_eq!(costs, vec![None, Some(Value::Int(30)), None]);
}

#[rstest]
fn test_closure_supplier_errors_abort(sequential: BuiltNet) {
    let failing = |i: usize| -> anyhow::Result<CaseData> {
        if i == 2 {
            anyhow::bail!("no data for case {i}");
        }
        Ok(CaseData::new())
    };
    let err = playout(&sequential.net, &sequential.initial_marking, &params(4), Some(&failing)).unwrap_err();
    assert_contains!(err.to_string(), "no data for case 2");
}

#[rstest]
fn test_case_data_table_json() {
    let table: CaseDataTable =
        serde_json::from_str(r#"[{"customer": "carol", "cost": {"B": 12.5}}, {}]"#).unwrap();
    assert_eq!(table.supply(0).unwrap()["customer"], SuppliedValue::Constant(Value::from("carol")));
    assert!(matches!(table.supply(2).unwrap()["cost"], SuppliedValue::PerActivity(_)));
    assert!(table.supply(1).unwrap().is_empty());
    assert!(CaseDataTable::default().supply(7).unwrap().is_empty());
}

#[rstest]
fn test_validation_happens_before_playout() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "sink"},
            {"type": "Transition", "id": "t1", "name": "spawn"},
            {"type": "Link", "source": "t1", "target": "p1"}
        ]"#,
    );
    let p = params(1);
    let err = Simulator::new(&built.net, &built.initial_marking, &p).err().unwrap();
    assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::MissingWeight("spawn".into())));
}

#[rstest]
#[case::bad_hours(PlayoutParams { working_hours: Some(WorkingHours { start: 17, end: 9 }), ..PlayoutParams::default() })]
#[case::zero_length(PlayoutParams { max_trace_length: 0, ..PlayoutParams::default() })]
fn test_invalid_parameters(sequential: BuiltNet, #[case] p: PlayoutParams) {
    let err = Simulator::new(&sequential.net, &sequential.initial_marking, &p).err().unwrap();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
}

#[rstest]
fn test_evaluation_errors_abort_the_run() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "in", "tokens": 1},
            {"type": "Transition", "id": "t1", "name": "A", "conditions": ["ghost > 1"]},
            {"type": "Link", "source": "p1", "target": "t1"}
        ]"#,
    );
    assert!(playout(&built.net, &built.initial_marking, &params(3), None).is_err());
}

#[rstest]
#[case::overflow_next_day(at(2024, 1, 3, 19), at(2024, 1, 4, 11))]
#[case::inside_hours(at(2024, 1, 3, 12), at(2024, 1, 3, 12))]
#[case::end_of_day(at(2024, 1, 3, 17), at(2024, 1, 3, 17))]
#[case::friday_overflow(at(2024, 1, 5, 19), at(2024, 1, 8, 11))]
#[case::saturday(at(2024, 1, 6, 10), at(2024, 1, 8, 10))]
#[case::sunday(at(2024, 1, 7, 10), at(2024, 1, 8, 10))]
fn test_working_hours_fold(#[case] input: DateTime<Utc>, #[case] expected: DateTime<Utc>) {
    let hours = WorkingHours { start: 9, end: 17 };
    assert_eq!(hours.fold(input), expected);
}

#[rstest]
fn test_working_hours_fold_repeats() {
    // A one-hour working day absorbs only one hour of overflow per day.
    let hours = WorkingHours { start: 9, end: 10 };
    assert_eq!(hours.fold(at(2024, 1, 3, 23)), at(2024, 1, 16, 10));
}

#[rstest]
#[case(9, 17, true)]
#[case(0, 24, true)]
#[case(9, 9, false)]
#[case(17, 9, false)]
#[case(8, 25, false)]
fn test_working_hours_validate(#[case] start: u32, #[case] end: u32, #[case] valid: bool) {
    assert_eq!(WorkingHours { start, end }.validate().is_ok(), valid);
}

#[rstest]
fn test_playout_respects_working_hours(sequential: BuiltNet) {
    let mut p = params(20);
    p.working_hours = Some(WorkingHours { start: 9, end: 17 });
    p.case_interval_secs = 5 * 3600;
    let log = playout(&sequential.net, &sequential.initial_marking, &p, None).unwrap();

    for event in log.traces.iter().flat_map(|t| &t.events) {
        let ts = event.timestamp(TIMESTAMP).unwrap();
        assert!(ts.hour() < 17 || (ts.hour() == 17 && ts.minute() == 0 && ts.second() == 0));
    }
}

#[rstest]
#[case("Approve (2)", "Approve")]
#[case("Ship [express] ", "Ship")]
#[case("Check", "Check")]
#[case("Pay (card) now", "Pay (card) now")]
#[case("(only)", "(only)")]
fn test_strip_label_suffix(#[case] label: &str, #[case] expected: &str) {
    assert_eq!(strip_label_suffix(label), expected);
}

#[rstest]
fn test_jittered_duration_bounds() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..500 {
        let secs = jittered_duration(100.0, &mut rng);
        assert_ge!(secs, 90);
        assert_le!(secs, 110);
    }
    assert_eq!(jittered_duration(0.0, &mut rng), 0);
    assert_eq!(jittered_duration(-3.0, &mut rng), 0);
}

#[rstest]
fn test_trace_seeds_differ() {
    let seeds: Vec<_> = (0..100).map(|i| trace_seed(9, i)).collect();
    let mut unique = seeds.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), seeds.len());
    assert_ne!(trace_seed(9, 0), trace_seed(10, 0));
}

#[rstest]
#[traced_test]
fn test_run_applies_noise() {
    let config = RunConfig {
        num_traces: 6,
        seed: Some(3),
        noise: vec![NoisePass { kind: NoiseKind::StripPrefix, probability: 1.0, count: 1 }],
        ..RunConfig::default()
    };
    let log = run(&records(SEQUENTIAL), &config, None).unwrap();

    assert_eq!(log.len(), 6);
    assert!(log.traces.iter().all(|t| t.activities(ACTIVITY) == ["B", "C"]));
    assert!(log.traces.iter().all(|t| t.attributes.contains_key(CASE)));
    assert!(logs_contain("starting playout"));
}

#[rstest]
fn test_run_rejects_bad_noise_before_playout() {
    let config = RunConfig {
        noise: vec![NoisePass { kind: NoiseKind::SwapTimestamps, probability: 1.5, count: 1 }],
        ..RunConfig::default()
    };
    let err = run(&records(SEQUENTIAL), &config, None).unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigurationError>(), Some(&ConfigurationError::InvalidProbability(1.5)));
}

#[rstest]
fn test_out_of_range_execution_time_is_an_error() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "start", "tokens": 1},
            {"type": "Place", "id": "p2", "name": "end"},
            {"type": "Transition", "id": "t1", "name": "forever", "exectime": 1e300},
            {"type": "Link", "source": "p1", "target": "t1"},
            {"type": "Link", "source": "t1", "target": "p2"}
        ]"#,
    );
    let err = playout(&built.net, &built.initial_marking, &params(2), None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigurationError>(),
        Some(ConfigurationError::InvalidParameter { name, reason }) if name == "exectime" && reason.contains("forever")
    ));
}

#[rstest]
fn test_jitter_stays_within_ten_percent_for_short_durations() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..200 {
        assert_eq!(jittered_duration(1.0, &mut rng), 1);
        let secs = jittered_duration(10.0, &mut rng);
        assert_ge!(secs, 9);
        assert_le!(secs, 11);
    }
}

#[rstest]
fn test_guards_see_supplied_values_as_null_until_bound() {
    let built = net_from(
        r#"[
            {"type": "Place", "id": "p1", "name": "start", "tokens": 1},
            {"type": "Place", "id": "p2", "name": "mid"},
            {"type": "Place", "id": "p3", "name": "end"},
            {"type": "Transition", "id": "t1", "name": "A", "exectime": 10},
            {"type": "Transition", "id": "t2", "name": "B", "conditions": ["cost > 10"]},
            {"type": "Transition", "id": "t3", "name": "C", "conditions": ["tier == 'gold'"]},
            {"type": "Link", "source": "p1", "target": "t1"},
            {"type": "Link", "source": "t1", "target": "p2"},
            {"type": "Link", "source": "p2", "target": "t2"},
            {"type": "Link", "source": "p2", "target": "t3"},
            {"type": "Link", "source": "t2", "target": "p3"},
            {"type": "Link", "source": "t3", "target": "p3"}
        ]"#,
    );
    let supplier = |_: usize| -> anyhow::Result<CaseData> {
        Ok(CaseData::from([
            ("cost".to_owned(), SuppliedValue::PerActivity(BTreeMap::from([("C".to_owned(), Value::Int(20))]))),
            ("tier".to_owned(), SuppliedValue::Constant(Value::from("gold"))),
        ]))
    };
    let log = playout(&built.net, &built.initial_marking, &params(5), Some(&supplier)).unwrap();

    assert_eq!(activities(&log), vec![vec!["A", "C"]; 5]);
    let events = &log.traces[0].events;
    assert_none!(events[0].get("cost"));
    assert_eq!(events[1].get("cost"), Some(&Value::Int(20)));
}
