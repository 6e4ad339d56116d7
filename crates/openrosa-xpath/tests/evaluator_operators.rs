use openrosa_xpath::DataNode;
use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::runtime::{Error, EvalContext, EvalContextBuilder};
use openrosa_xpath::tree::{TreeNode, doc, elem, text};
use openrosa_xpath::value::Value;
use rstest::rstest;

fn empty_ctx() -> EvalContext<TreeNode> {
    EvalContextBuilder::new().build()
}

// The document node must stay alive while evaluating: parent links are
// weak, so dropping it would detach the tree from its root.
fn data_fixture() -> (TreeNode, EvalContext<TreeNode>) {
    let document = doc()
        .child(
            elem("data")
                .child(elem("a").child(text("1")))
                .child(elem("b").child(text("2")))
                .child(elem("c")),
        )
        .build();
    let data = document.children()[0].clone();
    let ctx = EvalContextBuilder::new().with_context_node(data).build();
    (document, ctx)
}

fn eval_number(expr: &str) -> f64 {
    evaluate_str(expr, &empty_ctx()).expect(expr).number_value()
}

fn eval_bool(expr: &str) -> bool {
    let (_doc, ctx) = data_fixture();
    match evaluate_str(expr, &ctx).expect(expr) {
        Value::Boolean(b) => b,
        other => panic!("expected boolean for '{expr}', got {other:?}"),
    }
}

#[rstest]
#[case("1 + 2", 3.0)]
#[case("3 - 1", 2.0)]
#[case("2 * 3", 6.0)]
#[case("1 div 2", 0.5)]
#[case("7 mod 2", 1.0)]
#[case("-2", -2.0)]
#[case("--2", 2.0)]
#[case("1 + 2 * 3", 7.0)]
#[case("(1 + 2) * 3", 9.0)]
#[case("'3' + '4'", 7.0)]
fn arithmetic(#[case] expr: &str, #[case] expected: f64) {
    let n = eval_number(expr);
    assert!((n - expected).abs() < 1e-9, "'{expr}' evaluated to {n}");
}

#[test]
fn division_by_zero_yields_infinity() {
    assert!(eval_number("1 div 0").is_infinite());
    assert_eq!(evaluate_str("string(1 div 0)", &empty_ctx()).unwrap().string_value(), "Infinity");
}

#[test]
fn arithmetic_on_garbage_yields_nan() {
    assert!(eval_number("'x' + 1").is_nan());
    assert_eq!(evaluate_str("string('x' + 1)", &empty_ctx()).unwrap().string_value(), "NaN");
}

#[rstest]
#[case("1 < 2", true)]
#[case("2 <= 2", true)]
#[case("3 > 4", false)]
#[case("4 >= 4", true)]
#[case("1 = 1", true)]
#[case("1 != 1", false)]
#[case("'abc' = 'abc'", true)]
#[case("'abc' != 'abd'", true)]
#[case("4 = '4'", true)]
#[case("true() = 1", true)]
#[case("false() = 0", true)]
#[case("false() = 1", false)]
#[case("true() and true()", true)]
#[case("true() and false()", false)]
#[case("false() or true()", true)]
#[case("false() or false()", false)]
#[case("not(1 = 2)", true)]
fn comparisons_and_logic(#[case] expr: &str, #[case] expected: bool) {
    assert_eq!(eval_bool(expr), expected, "expression: {expr}");
}

#[rstest]
#[case("/data/a = '1'", true)]
#[case("/data/a != '1'", false)]
#[case("/data/a = '2'", false)]
#[case("/data/a < 2", true)]
#[case("/data/a >= 1", true)]
#[case("2 > /data/a", true)]
#[case("/data/a = /data/b", false)]
#[case("/data/missing = ''", false)]
#[case("/data/c = ''", true)]
fn node_set_comparisons_are_existential(#[case] expr: &str, #[case] expected: bool) {
    assert_eq!(eval_bool(expr), expected, "expression: {expr}");
}

#[test]
fn boolean_context_treats_empty_node_set_as_false() {
    assert!(!eval_bool("boolean(/data/missing)"));
    assert!(eval_bool("boolean(/data/a)"));
}

#[test]
fn union_merges_in_document_order() {
    let (_doc, ctx) = data_fixture();
    let Value::NodeSet(nodes) = evaluate_str("/data/b | /data/a", &ctx).unwrap() else {
        panic!("expected node-set");
    };
    assert_eq!(nodes.len(), 2);
    // First node in document order is <a>.
    assert_eq!(evaluate_str("string(/data/b | /data/a)", &ctx).unwrap().string_value(), "1");
}

#[test]
fn union_deduplicates() {
    let (_doc, ctx) = data_fixture();
    assert_eq!(
        evaluate_str("count(/data/a | /data/a)", &ctx).unwrap().number_value(),
        1.0
    );
}

#[test]
fn union_of_non_node_sets_fails() {
    match evaluate_str("1 | 2", &empty_ctx()) {
        Err(Error::Evaluation(_)) => {}
        other => panic!("expected an evaluation error, got {other:?}"),
    }
}

#[test]
fn short_circuit_skips_the_right_operand() {
    // instance() would fail with UnknownInstance if evaluated.
    let (_doc, ctx) = data_fixture();
    let value = evaluate_str("false() and instance('nope')", &ctx).unwrap();
    assert_eq!(value, Value::Boolean(false));
    let value = evaluate_str("true() or instance('nope')", &ctx).unwrap();
    assert_eq!(value, Value::Boolean(true));
}
