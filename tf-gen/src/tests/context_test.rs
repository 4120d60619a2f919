use assertables::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rstest::*;
use tf_core::errors::ConfigurationError;

use crate::context::*;
use crate::value::Value;

#[rstest]
#[case::expression("priority: randint(1, 3)", "priority", false)]
#[case::bare_word("region: north", "region", true)]
#[case::unparseable("note: call me @ 5", "note", true)]
#[case::string_literal("channel: 'web'", "channel", false)]
fn test_parse_case_attribute(#[case] spec: &str, #[case] name: &str, #[case] raw: bool) {
    let attr = CaseAttribute::parse(spec).unwrap();
    assert_eq!(attr.name, name);
    assert_eq!(matches!(attr.value, CaseAttributeValue::Raw(_)), raw);
}

#[rstest]
#[case("no separator")]
#[case(": 5")]
fn test_parse_case_attribute_errors(#[case] spec: &str) {
    assert_eq!(CaseAttribute::parse(spec).unwrap_err(), ConfigurationError::InvalidCaseAttribute(spec.into()));
}

#[rstest]
fn test_event_attributes_start_null() {
    let ctx = EvaluationContext::new(["fee", "risk", "fee"]);
    assert_eq!(ctx.get("fee"), Some(&Value::Null));
    assert_eq!(ctx.event_attributes().count(), 0);
}

#[rstest]
fn test_case_attributes_see_earlier_ones() {
    let mut rng = StdRng::seed_from_u64(3);
    let specs = ["base: 10", "double: base * 2", "region: north"].map(|s| CaseAttribute::parse(s).unwrap());

    let mut ctx = EvaluationContext::new(Vec::<String>::new());
    ctx.set_case_attributes(&specs, &mut rng).unwrap();

    let attrs: Vec<_> = ctx.case_attributes().map(|(n, v)| (n.to_owned(), v.clone())).collect();
    assert_eq!(
        attrs,
        vec![
            ("base".to_owned(), Value::Int(10)),
            ("double".to_owned(), Value::Int(20)),
            ("region".to_owned(), Value::from("north")),
        ]
    );
}

#[rstest]
fn test_reset_forgets_previous_trace() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut ctx = EvaluationContext::new(["fee"]);
    ctx.set_case_attributes(&[CaseAttribute::parse("vip: true").unwrap()], &mut rng).unwrap();
    ctx.bind("fee", Value::Int(4));
    ctx.bind("external", Value::from("x"));

    ctx.reset();

    assert_eq!(ctx.get("fee"), Some(&Value::Null));
    assert_none!(ctx.get("vip"));
    assert_none!(ctx.get("external"));
    assert_eq!(ctx.case_attributes().count(), 0);
}

#[rstest]
fn test_evaluate_str_uses_bindings() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut ctx = EvaluationContext::new(["fee"]);
    ctx.bind("fee", Value::Float(2.5));
    assert_eq!(ctx.evaluate_str("fee * 2", &mut rng).unwrap(), Value::Float(5.0));
    assert_eq!(ctx.event_attributes().collect::<Vec<_>>(), vec![("fee", &Value::Float(2.5))]);
}

#[rstest]
fn test_declare_keeps_existing_bindings() {
    let mut ctx = EvaluationContext::new(["fee"]);
    ctx.bind("cost", Value::Int(5));
    ctx.declare("cost");
    ctx.declare("discount");
    assert_eq!(ctx.get("cost"), Some(&Value::Int(5)));
    assert_eq!(ctx.get("discount"), Some(&Value::Null));
    assert_eq!(ctx.event_attributes().count(), 0);
}
