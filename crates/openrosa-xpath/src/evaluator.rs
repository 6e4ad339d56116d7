//! Recursive AST reduction with XPath 1.0 type coercion.
//!
//! Path steps delegate to the data-model axes, function calls go through
//! the registry (resolve, mode gate, arity, then invocation with fully
//! evaluated arguments), and failures propagate immediately — an
//! expression either yields a value or fails as a unit.

use smallvec::SmallVec;

use crate::model::{DataNode, NodeKind, sort_document_order};
use crate::parser::ast::{
    Axis, BinaryOp, Expr, KindTest, Literal, NameTest, NodeTest, PathExpr, PathStart, Step,
};
use crate::parser::parse_expression;
use crate::runtime::{Error, EvalContext, ExpandedName};
use crate::value::Value;

/// Parse and evaluate in one call.
pub fn evaluate_str<N: DataNode + 'static>(
    input: &str,
    ctx: &EvalContext<N>,
) -> Result<Value<N>, Error> {
    let ast = parse_expression(input)?;
    tracing::debug!(expression = input, "evaluating");
    evaluate(&ast, ctx)
}

pub fn evaluate<N: DataNode + 'static>(
    expr: &Expr,
    ctx: &EvalContext<N>,
) -> Result<Value<N>, Error> {
    match expr {
        Expr::Literal(Literal::Number(n)) => Ok(Value::Number(*n)),
        Expr::Literal(Literal::String(s)) => Ok(Value::String(s.clone())),
        Expr::VarRef(name) => {
            let key = expand_name(ctx, &name.prefix, &name.local)
                .ok_or_else(|| Error::Evaluation(format!("unknown prefix in ${}", name.as_written())))?;
            ctx.variables
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::Evaluation(format!("unknown variable ${}", name.as_written())))
        }
        Expr::FunctionCall { name, args } => {
            let shown = name.as_written();
            let key = expand_name(ctx, &name.prefix, &name.local)
                .ok_or_else(|| Error::NotSupportedFunction(shown.clone()))?;
            let descriptor = ctx.functions.resolve(&key, &shown)?;
            descriptor.check_mode(&shown, ctx.modes)?;
            descriptor.validate_arity(&shown, args.len())?;
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(evaluate(a, ctx)?);
            }
            tracing::trace!(function = %shown, argc = values.len(), "function dispatch");
            descriptor.invoke(ctx, &values)
        }
        Expr::Binary { left, op, right } => eval_binary(*op, left, right, ctx),
        Expr::Negate(inner) => {
            let n = evaluate(inner, ctx)?.number_value();
            Ok(Value::Number(-n))
        }
        Expr::Path(path) => eval_path(path, ctx),
    }
}

fn expand_name<N>(
    ctx: &EvalContext<N>,
    prefix: &Option<String>,
    local: &str,
) -> Option<ExpandedName> {
    match prefix {
        Some(p) => {
            let uri = ctx.namespaces.resolve(p)?;
            Some(ExpandedName::new(Some(uri), local))
        }
        None => Some(ExpandedName::local(local)),
    }
}

fn eval_binary<N: DataNode + 'static>(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<N>,
) -> Result<Value<N>, Error> {
    match op {
        BinaryOp::And => {
            if !evaluate(left, ctx)?.boolean_value() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(evaluate(right, ctx)?.boolean_value()))
        }
        BinaryOp::Or => {
            if evaluate(left, ctx)?.boolean_value() {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(evaluate(right, ctx)?.boolean_value()))
        }
        BinaryOp::Union => {
            let mut nodes = evaluate(left, ctx)?.into_node_set()?;
            nodes.extend(evaluate(right, ctx)?.into_node_set()?);
            sort_document_order(&mut nodes)?;
            Ok(Value::NodeSet(nodes))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let a = evaluate(left, ctx)?.number_value();
            let b = evaluate(right, ctx)?.number_value();
            let n = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => unreachable!("arithmetic op"),
            };
            Ok(Value::Number(n))
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = evaluate(left, ctx)?;
            let r = evaluate(right, ctx)?;
            Ok(Value::Boolean(compare_values(op, &l, &r)))
        }
    }
}

fn num_cmp(op: BinaryOp, a: f64, b: f64) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        _ => false,
    }
}

fn is_equality(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Eq | BinaryOp::Ne)
}

/// XPath 1.0 comparison semantics: node-sets compare existentially, and
/// scalar comparisons pick their type by operand types (booleans beat
/// numbers beat strings for `=`/`!=`; relational operators always compare
/// numbers).
fn compare_values<N: DataNode>(op: BinaryOp, left: &Value<N>, right: &Value<N>) -> bool {
    match (left, right) {
        (Value::NodeSet(a), Value::NodeSet(b)) => {
            if is_equality(op) {
                a.iter().any(|na| {
                    let sa = na.string_value();
                    b.iter().any(|nb| match op {
                        BinaryOp::Eq => sa == nb.string_value(),
                        _ => sa != nb.string_value(),
                    })
                })
            } else {
                a.iter().any(|na| {
                    let x = crate::value::parse_number(&na.string_value());
                    b.iter()
                        .any(|nb| num_cmp(op, x, crate::value::parse_number(&nb.string_value())))
                })
            }
        }
        (Value::NodeSet(nodes), other) => compare_node_set(op, nodes, other, false),
        (other, Value::NodeSet(nodes)) => compare_node_set(op, nodes, other, true),
        (l, r) => {
            if is_equality(op) {
                if matches!(l, Value::Boolean(_)) || matches!(r, Value::Boolean(_)) {
                    num_cmp_bool(op, l.boolean_value(), r.boolean_value())
                } else if matches!(l, Value::Number(_)) || matches!(r, Value::Number(_)) {
                    num_cmp(op, l.number_value(), r.number_value())
                } else {
                    match op {
                        BinaryOp::Eq => l.string_value() == r.string_value(),
                        _ => l.string_value() != r.string_value(),
                    }
                }
            } else {
                num_cmp(op, l.number_value(), r.number_value())
            }
        }
    }
}

fn num_cmp_bool(op: BinaryOp, a: bool, b: bool) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        _ => a != b,
    }
}

/// Existential comparison between a node-set and a scalar. `flipped` is
/// true when the node-set was the right operand.
fn compare_node_set<N: DataNode>(
    op: BinaryOp,
    nodes: &[N],
    other: &Value<N>,
    flipped: bool,
) -> bool {
    let apply = |op: BinaryOp, node_side: f64, other_side: f64| {
        if flipped {
            num_cmp(op, other_side, node_side)
        } else {
            num_cmp(op, node_side, other_side)
        }
    };
    match other {
        Value::Boolean(b) => {
            if is_equality(op) {
                num_cmp_bool(op, !nodes.is_empty(), *b)
            } else {
                let other_n = if *b { 1.0 } else { 0.0 };
                nodes
                    .iter()
                    .any(|n| apply(op, crate::value::parse_number(&n.string_value()), other_n))
            }
        }
        Value::Number(x) => nodes
            .iter()
            .any(|n| apply(op, crate::value::parse_number(&n.string_value()), *x)),
        Value::String(s) => {
            if is_equality(op) {
                nodes.iter().any(|n| match op {
                    BinaryOp::Eq => n.string_value() == *s,
                    _ => n.string_value() != *s,
                })
            } else {
                let other_n = crate::value::parse_number(s);
                nodes
                    .iter()
                    .any(|n| apply(op, crate::value::parse_number(&n.string_value()), other_n))
            }
        }
        Value::NodeSet(_) => false, // handled by the caller
    }
}

fn eval_path<N: DataNode + 'static>(
    path: &PathExpr,
    ctx: &EvalContext<N>,
) -> Result<Value<N>, Error> {
    let mut nodes: Vec<N> = match &path.start {
        PathStart::Root => {
            let node = require_context(ctx)?;
            vec![node.root()]
        }
        PathStart::Relative => vec![require_context(ctx)?],
        PathStart::Primary(e) => evaluate(e, ctx)?.into_node_set()?,
    };
    if !path.start_predicates.is_empty() {
        nodes = apply_predicates(nodes, &path.start_predicates, ctx)?;
    }
    for step in &path.steps {
        nodes = eval_step(&nodes, step, ctx)?;
    }
    Ok(Value::NodeSet(nodes))
}

fn require_context<N: DataNode>(ctx: &EvalContext<N>) -> Result<N, Error> {
    ctx.context_node
        .clone()
        .ok_or_else(|| Error::Evaluation("path expression requires a context node".to_string()))
}

fn eval_step<N: DataNode + 'static>(
    input: &[N],
    step: &Step,
    ctx: &EvalContext<N>,
) -> Result<Vec<N>, Error> {
    let mut result: Vec<N> = Vec::new();
    for node in input {
        let mut candidates: Vec<N> = axis_nodes(node, step.axis)
            .into_iter()
            .filter(|n| matches_test(n, step.axis, &step.test))
            .collect();
        if !step.predicates.is_empty() {
            candidates = apply_predicates(candidates, &step.predicates, ctx)?;
        }
        result.extend(candidates);
    }
    sort_document_order(&mut result)?;
    Ok(result)
}

/// Apply predicates in order. A numeric predicate selects by proximity
/// position; anything else is coerced to boolean.
fn apply_predicates<N: DataNode + 'static>(
    nodes: Vec<N>,
    predicates: &[Expr],
    ctx: &EvalContext<N>,
) -> Result<Vec<N>, Error> {
    let mut current = nodes;
    for predicate in predicates {
        let size = current.len();
        let mut kept = Vec::with_capacity(size);
        for (i, node) in current.into_iter().enumerate() {
            let focus = ctx.with_focus(node.clone(), i + 1, size);
            let value = evaluate(predicate, &focus)?;
            let keep = match value {
                #[allow(clippy::cast_precision_loss)]
                Value::Number(n) => (i + 1) as f64 == n,
                other => other.boolean_value(),
            };
            if keep {
                kept.push(node);
            }
        }
        current = kept;
    }
    Ok(current)
}

/// Nodes reachable from `node` along `axis`, in axis order: forward axes
/// yield document order, reverse axes proximity order (nearest first).
fn axis_nodes<N: DataNode>(node: &N, axis: Axis) -> Vec<N> {
    match axis {
        Axis::Child => node.children(),
        Axis::Parent => node.parent().into_iter().collect(),
        Axis::SelfAxis => vec![node.clone()],
        Axis::Attribute => node.attributes(),
        Axis::Descendant => {
            let mut out = Vec::new();
            collect_descendants(node, &mut out);
            out
        }
        Axis::DescendantOrSelf => {
            let mut out = vec![node.clone()];
            collect_descendants(node, &mut out);
            out
        }
        Axis::Ancestor => ancestors(node),
        Axis::AncestorOrSelf => {
            let mut out = vec![node.clone()];
            out.extend(ancestors(node));
            out
        }
        Axis::FollowingSibling => siblings(node, true),
        Axis::PrecedingSibling => siblings(node, false),
        Axis::Following => {
            let mut out = Vec::new();
            let mut chain: SmallVec<[N; 8]> = SmallVec::new();
            chain.push(node.clone());
            chain.extend(ancestors(node));
            for link in &chain {
                for sibling in siblings(link, true) {
                    out.push(sibling.clone());
                    collect_descendants(&sibling, &mut out);
                }
            }
            out
        }
        Axis::Preceding => {
            let mut out = Vec::new();
            let mut chain: SmallVec<[N; 8]> = SmallVec::new();
            chain.push(node.clone());
            chain.extend(ancestors(node));
            for link in &chain {
                for sibling in siblings(link, false) {
                    // Proximity order: each preceding subtree in reverse
                    // document order.
                    let mut subtree = vec![sibling.clone()];
                    collect_descendants(&sibling, &mut subtree);
                    subtree.reverse();
                    out.extend(subtree);
                }
            }
            out
        }
    }
}

fn collect_descendants<N: DataNode>(node: &N, out: &mut Vec<N>) {
    for child in node.children() {
        out.push(child.clone());
        collect_descendants(&child, out);
    }
}

/// Nearest first.
fn ancestors<N: DataNode>(node: &N) -> Vec<N> {
    let mut out = Vec::new();
    let mut cur = node.parent();
    while let Some(p) = cur {
        out.push(p.clone());
        cur = p.parent();
    }
    out
}

/// Siblings after (`forward`) or before (nearest first) the node. Nodes
/// without a parent, and attribute nodes, have no siblings.
fn siblings<N: DataNode>(node: &N, forward: bool) -> Vec<N> {
    let Some(parent) = node.parent() else {
        return Vec::new();
    };
    let children = parent.children();
    let Some(pos) = children.iter().position(|c| c == node) else {
        return Vec::new();
    };
    if forward {
        children[pos + 1..].to_vec()
    } else {
        let mut before = children[..pos].to_vec();
        before.reverse();
        before
    }
}

fn matches_test<N: DataNode>(node: &N, axis: Axis, test: &NodeTest) -> bool {
    match test {
        NodeTest::Kind(kind) => match kind {
            KindTest::AnyKind => true,
            KindTest::Text => node.kind() == NodeKind::Text,
            KindTest::Comment => node.kind() == NodeKind::Comment,
            KindTest::ProcessingInstruction(target) => {
                node.kind() == NodeKind::ProcessingInstruction
                    && target
                        .as_ref()
                        .is_none_or(|t| node.name().is_some_and(|n| n.local.as_str() == t))
            }
        },
        NodeTest::Name(name_test) => {
            let principal = if axis == Axis::Attribute {
                NodeKind::Attribute
            } else {
                NodeKind::Element
            };
            if node.kind() != principal {
                return false;
            }
            match name_test {
                NameTest::Any => true,
                NameTest::NsWildcard(prefix) => node
                    .name()
                    .is_some_and(|n| n.prefix.as_deref() == Some(prefix.as_str())),
                NameTest::QName(q) => node.name().is_some_and(|n| {
                    n.local.as_str() == q.local
                        && match (&n.prefix, &q.prefix) {
                            (Some(a), Some(b)) => a.as_str() == b,
                            (None, None) => true,
                            _ => false,
                        }
                }),
            }
        }
    }
}
