//! The form-data model and its evaluation entry points.

use std::sync::Arc;

use openrosa_xpath::evaluator::evaluate_str;
use openrosa_xpath::model::DataNode;
use openrosa_xpath::parser::parse_expression;
use openrosa_xpath::runtime::{
    Error, EvalContext, EvalContextBuilder, EvalModes, FunctionRegistry, InstanceSet,
};
use openrosa_xpath::tree::TreeNode;
use openrosa_xpath::value::Value;
use openrosa_xpath::{analyzer, default_function_registry};

use crate::error::FormError;
use crate::model_xml::{Bind, ExternalInstance, ParsedModel, parse_instance_document, parse_model};

/// Evaluation options, set once at construction and immutable afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormOptions {
    /// Enables the OpenClinica extension function set.
    pub openclinica: bool,
}

/// A parsed XForm model: the primary instance, pre-registered secondary
/// instances (internal and external), and bind entries.
pub struct FormModel {
    options: FormOptions,
    primary: TreeNode,
    instances: InstanceSet<TreeNode>,
    externals: Vec<ExternalInstance>,
    binds: Vec<Bind>,
    functions: Arc<FunctionRegistry<TreeNode>>,
}

impl FormModel {
    pub fn parse(xml: &str) -> Result<Self, FormError> {
        Self::parse_with(xml, FormOptions::default())
    }

    pub fn parse_with(xml: &str, options: FormOptions) -> Result<Self, FormError> {
        let ParsedModel { primary, internal, external, binds } = parse_model(xml)?;
        let mut instances = InstanceSet::new();
        for (id, root) in internal {
            instances.register(id, root);
        }
        for decl in &external {
            // Declared external content is attached separately; a
            // placeholder root keeps instance(id) resolvable meanwhile.
            instances.register(decl.id.clone(), TreeNode::element("root").build());
        }
        Ok(Self {
            options,
            primary,
            instances,
            externals: external,
            binds,
            functions: Arc::new(default_function_registry()),
        })
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    /// The primary instance's root element.
    pub fn primary_root(&self) -> TreeNode {
        self.primary
            .children()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.primary.clone())
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.ids().map(str::to_string).collect()
    }

    pub fn binds(&self) -> &[Bind] {
        &self.binds
    }

    pub fn external_declarations(&self) -> &[ExternalInstance] {
        &self.externals
    }

    /// Replace a declared external instance's placeholder content with the
    /// actual resource body.
    pub fn attach_external(&mut self, id: &str, xml: &str) -> Result<(), FormError> {
        if !self.externals.iter().any(|e| e.id == id) {
            return Err(FormError::UndeclaredExternal(id.to_string()));
        }
        let root = parse_instance_document(xml)?;
        self.instances.register(id.to_string(), root);
        Ok(())
    }

    /// Evaluate an expression with the primary instance root as the
    /// context node.
    pub fn evaluate(&self, expr: &str) -> Result<Value<TreeNode>, Error> {
        let ctx = self.context(self.primary_root());
        evaluate_str(expr, &ctx)
    }

    /// Evaluate an expression in the context of the node selected by an
    /// absolute path (the first match).
    pub fn evaluate_at(&self, expr: &str, context_path: &str) -> Result<Value<TreeNode>, Error> {
        let root_ctx = self.context(self.primary_root());
        let nodes = evaluate_str(context_path, &root_ctx)?.into_node_set()?;
        let node = nodes.into_iter().next().ok_or_else(|| {
            Error::Evaluation(format!("context path \"{context_path}\" selects no node"))
        })?;
        evaluate_str(expr, &self.context(node))
    }

    /// Best-effort self-reference check. This deliberately has no failure
    /// channel: input that does not parse as an expression (HTML-entity
    /// fragments, arbitrary comparison text) yields `false`, never an
    /// error.
    pub fn has_self_reference(&self, expr: &str, self_path: &str) -> bool {
        match parse_expression(expr) {
            Ok(ast) => analyzer::has_self_reference(&ast, self_path),
            Err(e) => {
                tracing::trace!(expr, error = %e, "self-reference check on unparseable input");
                false
            }
        }
    }

    /// Binds whose calculate/constraint/relevant expression references the
    /// bound node itself — circular definitions flagged, not evaluated.
    pub fn self_referencing_binds(&self) -> Vec<&Bind> {
        self.binds
            .iter()
            .filter(|bind| {
                bind.own_context_expressions()
                    .any(|expr| self.has_self_reference(expr, &bind.nodeset))
            })
            .collect()
    }

    fn context(&self, node: TreeNode) -> EvalContext<TreeNode> {
        EvalContextBuilder::new()
            .with_context_node(node)
            .with_modes(EvalModes { openclinica: self.options.openclinica })
            .with_functions(Arc::clone(&self.functions))
            .with_instances(Arc::new(self.instances.clone()))
            .build()
    }
}
