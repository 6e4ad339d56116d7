use openrosa_form::{Error, FormError, FormModel, FormOptions};
use openrosa_xpath::DataNode;

const MODEL_ONLY: &str = include_str!("fixtures/model-only.xml");

#[test]
fn parses_the_primary_instance() {
    let form = FormModel::parse(MODEL_ONLY).unwrap();
    let root = form.primary_root();
    assert_eq!(root.name().unwrap().local, "data");
    assert_eq!(form.evaluate("/data/a").unwrap().string_value(), "yes");
    assert_eq!(form.evaluate("/data/b").unwrap().number_value(), 2.0);
    assert_eq!(form.evaluate("string(/data/@id)").unwrap().string_value(), "model-only");
}

#[test]
fn collects_internal_and_external_instances() {
    let form = FormModel::parse(MODEL_ONLY).unwrap();
    let mut ids = form.instance_ids();
    ids.sort();
    assert_eq!(ids, ["existing-external", "existing-internal"]);
    assert_eq!(form.external_declarations().len(), 1);
    assert_eq!(form.external_declarations()[0].src, "jr://file/external.xml");
}

#[test]
fn collects_binds() {
    let form = FormModel::parse(MODEL_ONLY).unwrap();
    assert_eq!(form.binds().len(), 3);
    let b = &form.binds()[1];
    assert_eq!(b.nodeset, "/data/b");
    assert_eq!(b.data_type.as_deref(), Some("int"));
    assert_eq!(b.relevant.as_deref(), Some("/data/a = 'yes'"));
}

#[test]
fn missing_primary_instance_is_an_error() {
    let xml = r#"<h:html xmlns:h="http://www.w3.org/1999/xhtml"><h:head><model>
        <instance id="only-secondary"><root><item/></root></instance>
    </model></h:head></h:html>"#;
    match FormModel::parse(xml) {
        Err(FormError::MissingPrimaryInstance) => {}
        other => panic!("expected MissingPrimaryInstance, got {:?}", other.err()),
    }
}

#[test]
fn duplicate_instance_ids_are_an_error() {
    let xml = r#"<html><head><model>
        <instance><data><a/></data></instance>
        <instance id="dup"><root><item/></root></instance>
        <instance id="dup"><root><item/></root></instance>
    </model></head></html>"#;
    match FormModel::parse(xml) {
        Err(FormError::DuplicateInstance(id)) => assert_eq!(id, "dup"),
        other => panic!("expected DuplicateInstance, got {:?}", other.err()),
    }
}

#[test]
fn second_unnamed_instance_is_an_error() {
    let xml = r#"<html><head><model>
        <instance><data><a/></data></instance>
        <instance><other/></instance>
    </model></head></html>"#;
    match FormModel::parse(xml) {
        Err(FormError::MissingInstanceId) => {}
        other => panic!("expected MissingInstanceId, got {:?}", other.err()),
    }
}

#[test]
fn external_instances_resolve_as_placeholders_until_attached() {
    let mut form = FormModel::parse(MODEL_ONLY).unwrap();
    // Declared, so it resolves; the placeholder has no items yet.
    assert_eq!(form.evaluate("count(instance('existing-external')/item)").unwrap().number_value(), 0.0);

    form.attach_external("existing-external", "<root><item>ext-one</item><item>ext-two</item></root>")
        .unwrap();
    assert_eq!(form.evaluate("count(instance('existing-external')/item)").unwrap().number_value(), 2.0);
    assert_eq!(
        form.evaluate("instance('existing-external')/item[1]").unwrap().string_value(),
        "ext-one"
    );
}

#[test]
fn attaching_an_undeclared_external_fails() {
    let mut form = FormModel::parse(MODEL_ONLY).unwrap();
    match form.attach_external("nope", "<root/>") {
        Err(FormError::UndeclaredExternal(id)) => assert_eq!(id, "nope"),
        other => panic!("expected UndeclaredExternal, got {:?}", other.err()),
    }
}

#[test]
fn evaluate_at_changes_the_context_node() {
    let form = FormModel::parse(MODEL_ONLY).unwrap();
    assert_eq!(form.evaluate_at("../b", "/data/a").unwrap().string_value(), "2");
    assert_eq!(form.evaluate_at(".", "/data/b").unwrap().string_value(), "2");
    match form.evaluate_at(".", "/data/missing") {
        Err(Error::Evaluation(_)) => {}
        other => panic!("expected an evaluation error, got {other:?}"),
    }
}

#[test]
fn options_are_fixed_at_construction() {
    let form = FormModel::parse_with(MODEL_ONLY, FormOptions { openclinica: true }).unwrap();
    assert!(form.options().openclinica);
    let form = FormModel::parse(MODEL_ONLY).unwrap();
    assert!(!form.options().openclinica);
}

#[test]
fn self_referencing_binds_are_flagged() {
    let xml = r#"<html><head><model>
        <instance><data><a/><b/></data></instance>
        <bind nodeset="/data/a" calculate="../a + 1"/>
        <bind nodeset="/data/b" calculate="/data/a * 2"/>
    </model></head></html>"#;
    let form = FormModel::parse(xml).unwrap();
    let flagged = form.self_referencing_binds();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].nodeset, "/data/a");
}
