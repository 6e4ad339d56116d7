//! Expression evaluation battery against a model-only form, in both the
//! default and the OpenClinica configuration.

use openrosa_form::{Error, FormModel, FormOptions};
use rstest::rstest;

const MODEL_ONLY: &str = include_str!("fixtures/model-only.xml");

fn form() -> FormModel {
    FormModel::parse(MODEL_ONLY).unwrap()
}

fn openclinica_form() -> FormModel {
    FormModel::parse_with(MODEL_ONLY, FormOptions { openclinica: true }).unwrap()
}

// ===== Function calls with an insufficient number of parameters =====

#[rstest]
#[case("selected(/data/a)")]
#[case("floor()")]
fn too_few_arguments_fail(#[case] expr: &str) {
    match form().evaluate(expr) {
        Err(Error::Arity { .. }) => {}
        other => panic!("expected an arity error for '{expr}', got {other:?}"),
    }
}

// ===== Function calls with an excessive number of parameters =====

#[rstest]
#[case("selected(/data/a, /data/b, 4)")]
#[case("floor(4, 5)")]
fn too_many_arguments_fail(#[case] expr: &str) {
    match form().evaluate(expr) {
        Err(Error::Arity { .. }) => {}
        other => panic!("expected an arity error for '{expr}', got {other:?}"),
    }
}

// ===== Function calls with a correct number of parameters =====

#[rstest]
#[case("selected(/data/a, /data/b)")]
#[case("floor(4)")]
fn correct_argument_counts_succeed(#[case] expr: &str) {
    let result = form().evaluate(expr);
    assert!(result.is_ok(), "'{expr}' failed: {:?}", result.err());
}

// ===== Calls to functions that are not supported =====

#[test]
fn not_supported_function_fails() {
    match form().evaluate("not-supported-fn(/data/a)") {
        Err(Error::NotSupportedFunction(name)) => assert_eq!(name, "not-supported-fn"),
        other => panic!("expected NotSupportedFunction, got {other:?}"),
    }
}

// ===== instance() calls =====

#[test]
fn instance_that_does_not_exist_fails() {
    match form().evaluate("instance(\"not-there\")") {
        Err(Error::UnknownInstance(id)) => assert_eq!(id, "not-there"),
        other => panic!("expected UnknownInstance, got {other:?}"),
    }
}

#[test]
fn existing_internal_instance_succeeds() {
    let result = form().evaluate("instance(\"existing-internal\")/item");
    assert!(result.is_ok(), "failed: {:?}", result.err());
    assert_eq!(result.unwrap().string_value(), "internal-item");
}

#[test]
fn existing_external_instance_succeeds() {
    let result = form().evaluate("instance(\"existing-external\")/item");
    assert!(result.is_ok(), "failed: {:?}", result.err());
}

// ===== jr:choice-name() calls =====

#[rstest]
#[case("jr:choice-name(\"yes\", \"/data/a\")")]
#[case("jr:choice-name(\"yes\", '/data/a')")]
#[case("if(string-length(/K/p/i/a) !=0, jr:choice-name(/K/p/i/a,'/K/p/i/a'),'unspecified')")]
#[case("if(string-length(/K/p/i/a) !=0, jr:choice-name(concat(\"a\", \"b\"),'/K/p/i/a'),'unspecified')")]
fn choice_name_usages_succeed(#[case] expr: &str) {
    let result = form().evaluate(expr);
    assert!(result.is_ok(), "'{expr}' failed: {:?}", result.err());
}

// ===== Self-references =====

const FULL_PATH_TO_SELF: &str = "/data/a";

#[rstest]
#[case(". + 1")]
#[case("/data/a + 1")]
#[case("string-length(.)")]
#[case("string-length(/data/a)")]
#[case("../a + 1")]
#[case("string-length(../a)")]
#[case(".")]
#[case(" .")]
#[case("../*")]
#[case("weighted-checklist(/data/a, 9, /thedata/somenodes/*, /thedata/someweights/*)")]
#[case("concat(/thedata/somenodes/*, sum(/data/*))")]
#[case("concat(/thedata/somenodes/*, sum(/data/b)) + 1 */data/a")]
#[case("something -/data/a *5")]
fn self_references_are_detected(#[case] expr: &str) {
    assert!(
        form().has_self_reference(expr, FULL_PATH_TO_SELF),
        "should be detected: {expr}"
    );
}

#[test]
fn entity_laden_comparison_text_does_not_error() {
    let garbage = "/unhcr-fail-a4fwaePSGR9RnMuA2vMvoz/B/b1_isregistered =&quot;No,_it_is_the_first_PCP_and-or_CSI_initiated_by_this_community&quot; or  /unhcr-fail-a4fwaePSGR9RnMuA2vMvoz/B/b1_isregistered =&quot;Yes,_this_community_is_already_recorded_but_needs_to_be_updated&quot;";
    // Best-effort contract: unparseable input is "no self-reference found".
    assert!(!form().has_self_reference(garbage, FULL_PATH_TO_SELF));
}

#[rstest]
#[case("/data/b + 1")]
#[case("string-length(/data/b)")]
#[case("'/data/a'")]
fn other_references_are_not_detected(#[case] expr: &str) {
    assert!(
        !form().has_self_reference(expr, FULL_PATH_TO_SELF),
        "should not be detected: {expr}"
    );
}

// ===== comment-status() and the OpenClinica mode =====

#[test]
fn comment_status_fails_without_openclinica_mode() {
    match form().evaluate("comment-status(/data/a)") {
        Err(Error::ModeNotEnabled { name, .. }) => assert_eq!(name, "comment-status"),
        other => panic!("expected ModeNotEnabled, got {other:?}"),
    }
}

#[test]
fn comment_status_succeeds_in_openclinica_mode() {
    // The same expression; the mode is the only variable.
    let result = openclinica_form().evaluate("comment-status(/data/a)");
    assert!(result.is_ok(), "failed: {:?}", result.err());
}

#[test]
fn openclinica_mode_leaves_other_failures_unchanged() {
    let form = openclinica_form();
    assert!(matches!(form.evaluate("floor()"), Err(Error::Arity { .. })));
    assert!(matches!(
        form.evaluate("not-supported-fn(/data/a)"),
        Err(Error::NotSupportedFunction(_))
    ));
    assert!(matches!(
        form.evaluate("instance('not-there')"),
        Err(Error::UnknownInstance(_))
    ));
}
