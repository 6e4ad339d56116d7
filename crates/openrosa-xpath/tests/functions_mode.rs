use openrosa_xpath::DataNode;
use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::runtime::{Error, EvalContext, EvalContextBuilder, EvalMode};
use openrosa_xpath::tree::{TreeNode, attr, doc, elem, text};
use openrosa_xpath::value::Value;

// The document node must stay alive while evaluating: parent links are
// weak, so dropping it would detach the tree from its root.
fn fixture(openclinica: bool) -> (TreeNode, EvalContext<TreeNode>) {
    let document = doc()
        .child(
            elem("data")
                .child(elem("a").attr(attr("status", "updated")).child(text("1")))
                .child(elem("b").child(text("2"))),
        )
        .build();
    let data = document.children()[0].clone();
    let mut builder = EvalContextBuilder::new().with_context_node(data);
    if openclinica {
        builder = builder.with_mode(EvalMode::OpenClinica);
    }
    (document, builder.build())
}

#[test]
fn comment_status_requires_openclinica_mode() {
    match evaluate_str("comment-status(/data/a)", &fixture(false).1) {
        Err(Error::ModeNotEnabled { name, mode }) => {
            assert_eq!(name, "comment-status");
            assert_eq!(mode, EvalMode::OpenClinica);
        }
        other => panic!("expected ModeNotEnabled, got {other:?}"),
    }
}

#[test]
fn comment_status_succeeds_in_openclinica_mode() {
    // Same expression; the mode is the only variable.
    let value = evaluate_str("comment-status(/data/a)", &fixture(true).1).unwrap();
    assert_eq!(value, Value::String("updated".to_string()));
}

#[test]
fn comment_status_on_a_node_without_status_is_empty() {
    let value = evaluate_str("comment-status(/data/b)", &fixture(true).1).unwrap();
    assert_eq!(value, Value::String(String::new()));
}

#[test]
fn gated_functions_still_validate_arity_when_enabled() {
    match evaluate_str("comment-status(/data/a, /data/b)", &fixture(true).1) {
        Err(Error::Arity { actual: 2, .. }) => {}
        other => panic!("expected an arity error, got {other:?}"),
    }
}

#[test]
fn mode_does_not_change_ungated_functions() {
    assert_eq!(evaluate_str("floor(4.5)", &fixture(true).1).unwrap(), Value::Number(4.0));
    assert_eq!(evaluate_str("floor(4.5)", &fixture(false).1).unwrap(), Value::Number(4.0));
}

#[test]
fn unknown_functions_stay_unknown_in_every_mode() {
    for openclinica in [false, true] {
        match evaluate_str("not-supported-fn(/data/a)", &fixture(openclinica).1) {
            Err(Error::NotSupportedFunction(_)) => {}
            other => panic!("expected NotSupportedFunction, got {other:?}"),
        }
    }
}
