//! Event-reader for XForm model documents.
//!
//! Extracts the primary instance tree, internal secondary instances,
//! external secondary instance declarations, and `<bind>` entries. The
//! form body (labels, widgets, itemsets) is outside the data model and is
//! skipped entirely.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use openrosa_xpath::tree::TreeNode;

use crate::error::FormError;

/// A `<instance id src>` declaration whose content lives in a separate
/// resource. Declared instances are registered with a placeholder root so
/// `instance(id)` resolves before the content is attached.
#[derive(Debug, Clone)]
pub struct ExternalInstance {
    pub id: String,
    pub src: String,
}

/// One `<bind>` entry from the model.
#[derive(Debug, Clone, Default)]
pub struct Bind {
    pub nodeset: String,
    pub calculate: Option<String>,
    pub constraint: Option<String>,
    pub relevant: Option<String>,
    pub required: Option<String>,
    pub readonly: Option<String>,
    pub data_type: Option<String>,
}

impl Bind {
    /// The expressions that are evaluated in the context of the bound node
    /// and may therefore not reference it.
    pub fn own_context_expressions(&self) -> impl Iterator<Item = &str> {
        [self.calculate.as_deref(), self.constraint.as_deref(), self.relevant.as_deref()]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug)]
pub struct ParsedModel {
    /// Document node wrapping the primary instance root element.
    pub primary: TreeNode,
    pub internal: Vec<(String, TreeNode)>,
    pub external: Vec<ExternalInstance>,
    pub binds: Vec<Bind>,
}

/// Parse an XForm model document (a "model-only" form is enough: only
/// `<model>` content is read).
pub fn parse_model(xml: &str) -> Result<ParsedModel, FormError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut in_model = false;
    let mut primary: Option<TreeNode> = None;
    let mut internal: Vec<(String, TreeNode)> = Vec::new();
    let mut external: Vec<ExternalInstance> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();
    let mut seen_ids: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(FormError::from)? {
            Event::Start(e) => {
                let local = local_name(&e);
                if local == "model" {
                    in_model = true;
                } else if in_model && local == "instance" {
                    let (id, src) = instance_attributes(&e);
                    let tree = read_instance_tree(&mut reader)?;
                    record_instance(
                        id,
                        src,
                        tree,
                        &mut primary,
                        &mut internal,
                        &mut external,
                        &mut seen_ids,
                    )?;
                } else if in_model && local == "bind" {
                    binds.push(read_bind(&e)?);
                }
            }
            Event::Empty(e) => {
                let local = local_name(&e);
                if in_model && local == "instance" {
                    let (id, src) = instance_attributes(&e);
                    record_instance(
                        id,
                        src,
                        None,
                        &mut primary,
                        &mut internal,
                        &mut external,
                        &mut seen_ids,
                    )?;
                } else if in_model && local == "bind" {
                    binds.push(read_bind(&e)?);
                }
            }
            Event::End(e) => {
                if String::from_utf8_lossy(e.local_name().as_ref()) == "model" {
                    in_model = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let primary = primary.ok_or(FormError::MissingPrimaryInstance)?;
    tracing::debug!(
        internal = internal.len(),
        external = external.len(),
        binds = binds.len(),
        "parsed form model"
    );
    Ok(ParsedModel { primary, internal, external, binds })
}

/// Parse a standalone XML document (an external instance resource) into
/// its root element tree.
pub fn parse_instance_document(xml: &str) -> Result<TreeNode, FormError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    read_instance_tree(&mut reader)?
        .ok_or_else(|| FormError::Xml("document has no root element".to_string()))
}

#[allow(clippy::too_many_arguments)]
fn record_instance(
    id: Option<String>,
    src: Option<String>,
    tree: Option<TreeNode>,
    primary: &mut Option<TreeNode>,
    internal: &mut Vec<(String, TreeNode)>,
    external: &mut Vec<ExternalInstance>,
    seen_ids: &mut Vec<String>,
) -> Result<(), FormError> {
    match id {
        None => {
            let root = tree.ok_or(FormError::MissingPrimaryInstance)?;
            if primary.is_some() {
                return Err(FormError::MissingInstanceId);
            }
            *primary = Some(TreeNode::document().child(root).build());
            Ok(())
        }
        Some(id) => {
            if seen_ids.contains(&id) {
                return Err(FormError::DuplicateInstance(id));
            }
            seen_ids.push(id.clone());
            match (tree, src) {
                (Some(root), _) => internal.push((id, root)),
                (None, Some(src)) => external.push(ExternalInstance { id, src }),
                (None, None) => {
                    // Declared but empty: register an empty root so the
                    // instance still resolves.
                    internal.push((id, TreeNode::element("root").build()));
                }
            }
            Ok(())
        }
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn instance_attributes(e: &BytesStart) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut src = None;
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
        match key.as_str() {
            "id" => id = Some(value),
            "src" => src = Some(value),
            _ => {}
        }
    }
    (id, src)
}

fn read_bind(e: &BytesStart) -> Result<Bind, FormError> {
    let mut bind = Bind::default();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| FormError::Xml(err.to_string()))?
            .into_owned();
        match key.as_str() {
            "nodeset" | "ref" => bind.nodeset = value,
            "calculate" => bind.calculate = Some(value),
            "constraint" => bind.constraint = Some(value),
            "relevant" => bind.relevant = Some(value),
            "required" => bind.required = Some(value),
            "readonly" => bind.readonly = Some(value),
            "type" => bind.data_type = Some(value),
            _ => {}
        }
    }
    Ok(bind)
}

struct PendingElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<TreeNode>,
}

impl PendingElement {
    fn from_start(e: &BytesStart) -> Self {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            // Namespace declarations are not data.
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            attributes.push((key, value));
        }
        Self { name, attributes, children: Vec::new() }
    }

    fn build(self) -> TreeNode {
        let mut builder = TreeNode::element(&self.name);
        for (key, value) in &self.attributes {
            builder = builder.attr(openrosa_xpath::tree::attr(key, value));
        }
        for child in self.children {
            builder = builder.child(child);
        }
        builder.build()
    }
}

/// Consume events up to (and including) the end tag of the enclosing
/// element, returning the first root-level element subtree found inside
/// it. Reading a whole document behaves the same because EOF terminates
/// the scan.
fn read_instance_tree(reader: &mut Reader<&[u8]>) -> Result<Option<TreeNode>, FormError> {
    let mut buf = Vec::new();
    let mut stack: Vec<PendingElement> = Vec::new();
    let mut root: Option<TreeNode> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(FormError::from)? {
            Event::Start(e) => stack.push(PendingElement::from_start(&e)),
            Event::Empty(e) => {
                let node = PendingElement::from_start(&e).build();
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    let value = t.decode().map_err(|err| FormError::Xml(err.to_string()))?;
                    top.children.push(TreeNode::text(&value));
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    top.children.push(TreeNode::text(&value));
                }
            }
            Event::End(_) => {
                let Some(done) = stack.pop() else {
                    // The enclosing element's own end tag.
                    return Ok(root);
                };
                let node = done.build();
                attach(&mut stack, &mut root, node);
            }
            Event::Eof => return Ok(root),
            _ => {}
        }
        buf.clear();
    }
}

fn attach(stack: &mut [PendingElement], root: &mut Option<TreeNode>, node: TreeNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    } else {
        tracing::debug!("ignoring extra root-level element in instance content");
    }
}
