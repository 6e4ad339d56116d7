use openrosa_xpath::DataNode;
use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::runtime::{Error, EvalContext, EvalContextBuilder};
use openrosa_xpath::tree::{TreeNode, doc, elem, text};
use rstest::rstest;

// The document node must stay alive while evaluating: parent links are
// weak, so dropping it would detach the tree from its root.
fn fixture() -> (TreeNode, EvalContext<TreeNode>) {
    let document = doc()
        .child(elem("data").child(elem("a").child(text("1"))).child(elem("b").child(text("2"))))
        .build();
    let data = document.children()[0].clone();
    let ctx = EvalContextBuilder::new().with_context_node(data).build();
    (document, ctx)
}

#[rstest]
#[case("selected(/data/a)", 1)]
#[case("selected(/data/a, /data/b, 4)", 3)]
#[case("floor()", 0)]
#[case("floor(4, 5)", 2)]
#[case("concat('a')", 1)]
#[case("translate('a', 'b')", 2)]
#[case("jr:choice-name('yes')", 1)]
#[case("jr:choice-name('yes', '/data/a', 3)", 3)]
fn out_of_range_argument_counts_fail(#[case] expr: &str, #[case] actual: usize) {
    match evaluate_str(expr, &fixture().1) {
        Err(Error::Arity { actual: reported, .. }) => {
            assert_eq!(reported, actual, "expression: {expr}");
        }
        other => panic!("expected an arity error for '{expr}', got {other:?}"),
    }
}

#[rstest]
#[case("selected(/data/a, /data/b)")]
#[case("floor(4)")]
#[case("concat('a', 'b')")]
#[case("concat('a', 'b', 'c', 'd', 'e')")]
#[case("string()")]
#[case("string(/data/a)")]
fn in_range_argument_counts_succeed(#[case] expr: &str) {
    let result = evaluate_str(expr, &fixture().1);
    assert!(result.is_ok(), "'{expr}' failed: {:?}", result.err());
}

#[test]
fn arity_message_names_the_function_and_range() {
    let err = evaluate_str("selected(/data/a)", &fixture().1).unwrap_err();
    let message = format!("{err}");
    assert!(
        message.contains("selected() expects exactly 2 arguments, got 1"),
        "unexpected message: {message}"
    );

    let err = evaluate_str("floor()", &fixture().1).unwrap_err();
    let message = format!("{err}");
    assert!(
        message.contains("floor() expects exactly 1 argument, got 0"),
        "unexpected message: {message}"
    );
}

#[test]
fn variadic_minimum_is_enforced() {
    let err = evaluate_str("join(',')", &fixture().1);
    assert!(err.is_ok(), "join with only a separator is allowed");
    match evaluate_str("concat('a')", &fixture().1) {
        Err(Error::Arity { min: 2, max: None, .. }) => {}
        other => panic!("expected an arity error, got {other:?}"),
    }
}

#[rstest]
#[case("not-supported-fn(/data/a)")]
#[case("definitely-not-a-function()")]
fn unregistered_functions_fail(#[case] expr: &str) {
    match evaluate_str(expr, &fixture().1) {
        Err(Error::NotSupportedFunction(name)) => {
            assert!(expr.starts_with(&name), "reported name: {name}");
        }
        other => panic!("expected NotSupportedFunction for '{expr}', got {other:?}"),
    }
}

#[test]
fn unknown_namespace_prefix_is_not_supported() {
    match evaluate_str("zz:mystery(1)", &fixture().1) {
        Err(Error::NotSupportedFunction(name)) => assert_eq!(name, "zz:mystery"),
        other => panic!("expected NotSupportedFunction, got {other:?}"),
    }
}

#[test]
fn known_prefix_with_unknown_local_name_is_not_supported() {
    match evaluate_str("jr:mystery(1)", &fixture().1) {
        Err(Error::NotSupportedFunction(name)) => assert_eq!(name, "jr:mystery"),
        other => panic!("expected NotSupportedFunction, got {other:?}"),
    }
}
