use pest::Parser;
use pest::iterators::Pair;

use crate::runtime::Error;

pub mod ast;

use ast::{
    Axis, BinaryOp, Expr, KindTest, Literal, NameTest, NodeTest, PathExpr, PathStart, QName, Step,
};

#[derive(pest_derive::Parser)]
#[grammar = "openrosa.pest"]
pub struct ExpressionParser;

/// Parse an expression string into its AST.
///
/// Parsing is pure: no side effects, and the same input always produces a
/// structurally identical tree. Failures carry the byte offset of the
/// offending token.
pub fn parse_expression(input: &str) -> Result<Expr, Error> {
    ExpressionParser::parse_to_ast(input)
}

impl ExpressionParser {
    pub fn parse_to_ast(input: &str) -> Result<Expr, Error> {
        let mut pairs = Self::parse(Rule::xpath, input).map_err(syntax_error)?;
        let root = pairs.next().ok_or_else(|| malformed("empty parse result"))?;
        let expr = root
            .into_inner()
            .find(|p| p.as_rule() == Rule::expr)
            .ok_or_else(|| malformed("missing expression root"))?;
        let ast = build_expr(expr)?;
        tracing::trace!(?ast, "parsed expression");
        Ok(ast)
    }
}

fn syntax_error(e: pest::error::Error<Rule>) -> Error {
    let offset = match e.location {
        pest::error::InputLocation::Pos(p) => p,
        pest::error::InputLocation::Span((start, _)) => start,
    };
    let message = match e.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } => {
            if positives.is_empty() {
                "unexpected token".to_string()
            } else {
                format!("expected {positives:?}")
            }
        }
        pest::error::ErrorVariant::CustomError { message } => message,
    };
    Error::Syntax { offset, message }
}

/// Internal invariant breach: the grammar accepted a shape the builder does
/// not know. Surfaced as a syntax failure rather than a panic.
fn malformed(what: &str) -> Error {
    Error::Syntax { offset: 0, message: format!("malformed expression: {what}") }
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, Error> {
    match pair.as_rule() {
        Rule::expr => {
            let inner = only_inner(pair)?;
            build_expr(inner)
        }
        Rule::group_expr => {
            let inner = pair
                .into_inner()
                .find(|p| p.as_rule() == Rule::expr)
                .ok_or_else(|| malformed("empty parenthesized expression"))?;
            build_expr(inner)
        }
        Rule::or_expr
        | Rule::and_expr
        | Rule::equality_expr
        | Rule::relational_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr
        | Rule::union_expr => fold_binary(pair),
        Rule::unary_expr => build_unary(pair),
        Rule::path_expr => build_path_expr(pair),
        Rule::primary_expr => {
            let inner = only_inner(pair)?;
            build_expr(inner)
        }
        Rule::var_ref => {
            let name = only_inner(pair)?;
            Ok(Expr::VarRef(qname_from_str(name.as_str())))
        }
        Rule::string_literal => {
            let inner = only_inner(pair)?;
            Ok(Expr::Literal(Literal::String(inner.as_str().to_string())))
        }
        Rule::number_literal => {
            let value: f64 = pair
                .as_str()
                .parse()
                .map_err(|_| malformed("unreadable number literal"))?;
            Ok(Expr::Literal(Literal::Number(value)))
        }
        Rule::function_call => build_function_call(pair),
        other => Err(malformed(&format!("unexpected rule {other:?}"))),
    }
}

fn only_inner(pair: Pair<Rule>) -> Result<Pair<Rule>, Error> {
    pair.into_inner().next().ok_or_else(|| malformed("missing inner pair"))
}

fn fold_binary(pair: Pair<Rule>) -> Result<Expr, Error> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or_else(|| malformed("empty operator chain"))?;
    let mut expr = build_expr(first)?;
    while let Some(op_pair) = inner.next() {
        let op = map_binary_op(&op_pair)?;
        let right = inner.next().ok_or_else(|| malformed("operator without right operand"))?;
        let right = build_expr(right)?;
        expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right) };
    }
    Ok(expr)
}

fn map_binary_op(pair: &Pair<Rule>) -> Result<BinaryOp, Error> {
    let rule = match pair.as_rule() {
        Rule::equality_op
        | Rule::relational_op
        | Rule::additive_op
        | Rule::multiplicative_op => pair
            .clone()
            .into_inner()
            .next()
            .map(|p| p.as_rule())
            .ok_or_else(|| malformed("empty operator"))?,
        other => other,
    };
    let op = match rule {
        Rule::K_OR => BinaryOp::Or,
        Rule::K_AND => BinaryOp::And,
        Rule::OP_NE => BinaryOp::Ne,
        Rule::OP_EQ => BinaryOp::Eq,
        Rule::OP_LE => BinaryOp::Le,
        Rule::OP_LT => BinaryOp::Lt,
        Rule::OP_GE => BinaryOp::Ge,
        Rule::OP_GT => BinaryOp::Gt,
        Rule::OP_PLUS => BinaryOp::Add,
        Rule::OP_MINUS => BinaryOp::Sub,
        Rule::OP_STAR => BinaryOp::Mul,
        Rule::K_DIV => BinaryOp::Div,
        Rule::K_MOD => BinaryOp::Mod,
        Rule::OP_PIPE => BinaryOp::Union,
        other => return Err(malformed(&format!("unknown operator rule {other:?}"))),
    };
    Ok(op)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expr, Error> {
    let mut negations = 0usize;
    let mut operand = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::OP_MINUS => negations += 1,
            _ => operand = Some(p),
        }
    }
    let operand = operand.ok_or_else(|| malformed("unary sign without operand"))?;
    let mut expr = build_expr(operand)?;
    for _ in 0..negations {
        expr = Expr::Negate(Box::new(expr));
    }
    Ok(expr)
}

fn build_function_call(pair: Pair<Rule>) -> Result<Expr, Error> {
    let mut name = None;
    let mut args = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::function_name => name = Some(qname_from_str(p.as_str())),
            Rule::expr => args.push(build_expr(p)?),
            _ => {}
        }
    }
    let name = name.ok_or_else(|| malformed("function call without name"))?;
    Ok(Expr::FunctionCall { name, args })
}

fn build_path_expr(pair: Pair<Rule>) -> Result<Expr, Error> {
    let inner = only_inner(pair)?;
    match inner.as_rule() {
        Rule::filter_path => build_filter_path(inner),
        Rule::absolute_path => build_absolute_path(inner),
        Rule::relative_path => {
            let steps = collect_steps(inner)?;
            Ok(Expr::Path(PathExpr {
                start: PathStart::Relative,
                start_predicates: Vec::new(),
                steps,
            }))
        }
        other => Err(malformed(&format!("unexpected path rule {other:?}"))),
    }
}

fn build_filter_path(pair: Pair<Rule>) -> Result<Expr, Error> {
    let mut primary = None;
    let mut predicates = Vec::new();
    let mut steps = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::primary_expr => primary = Some(build_expr(p)?),
            Rule::predicate => predicates.push(build_predicate(p)?),
            Rule::path_tail => steps = build_path_tail(p)?,
            _ => {}
        }
    }
    let primary = primary.ok_or_else(|| malformed("filter path without primary"))?;
    if predicates.is_empty() && steps.is_empty() {
        // A bare primary expression is not a path at all.
        return Ok(primary);
    }
    Ok(Expr::Path(PathExpr {
        start: PathStart::Primary(Box::new(primary)),
        start_predicates: predicates,
        steps,
    }))
}

fn build_path_tail(pair: Pair<Rule>) -> Result<Vec<Step>, Error> {
    let mut steps = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::OP_DSLASH => steps.push(Step::descendant_or_self()),
            Rule::OP_SLASH => {}
            Rule::relative_path => steps.extend(collect_steps(p)?),
            other => return Err(malformed(&format!("unexpected tail rule {other:?}"))),
        }
    }
    Ok(steps)
}

fn build_absolute_path(pair: Pair<Rule>) -> Result<Expr, Error> {
    let mut steps = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::OP_DSLASH => steps.push(Step::descendant_or_self()),
            Rule::OP_SLASH => {}
            Rule::relative_path => steps.extend(collect_steps(p)?),
            other => return Err(malformed(&format!("unexpected path rule {other:?}"))),
        }
    }
    Ok(Expr::Path(PathExpr { start: PathStart::Root, start_predicates: Vec::new(), steps }))
}

fn collect_steps(pair: Pair<Rule>) -> Result<Vec<Step>, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::relative_path);
    let mut steps = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::OP_DSLASH => steps.push(Step::descendant_or_self()),
            Rule::OP_SLASH => {}
            Rule::step => steps.push(build_step(p)?),
            other => return Err(malformed(&format!("unexpected step rule {other:?}"))),
        }
    }
    Ok(steps)
}

fn build_step(pair: Pair<Rule>) -> Result<Step, Error> {
    let inner = only_inner(pair)?;
    match inner.as_rule() {
        Rule::abbrev_parent_step => {
            Ok(Step::new(Axis::Parent, NodeTest::Kind(KindTest::AnyKind)))
        }
        Rule::axis_step => {
            let mut step = None;
            let mut predicates = Vec::new();
            for p in inner.into_inner() {
                match p.as_rule() {
                    Rule::step_basis => step = Some(build_step_basis(p)?),
                    Rule::predicate => predicates.push(build_predicate(p)?),
                    _ => {}
                }
            }
            let mut step = step.ok_or_else(|| malformed("step without basis"))?;
            step.predicates = predicates;
            Ok(step)
        }
        other => Err(malformed(&format!("unexpected step rule {other:?}"))),
    }
}

fn build_step_basis(pair: Pair<Rule>) -> Result<Step, Error> {
    let mut axis = Axis::Child;
    let mut test = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::axis_spec => axis = map_axis(&p)?,
            Rule::OP_AT => axis = Axis::Attribute,
            Rule::abbrev_self_step => {
                return Ok(Step::new(Axis::SelfAxis, NodeTest::Kind(KindTest::AnyKind)));
            }
            Rule::node_test => test = Some(build_node_test(p)?),
            _ => {}
        }
    }
    let test = test.ok_or_else(|| malformed("step without node test"))?;
    Ok(Step::new(axis, test))
}

fn map_axis(pair: &Pair<Rule>) -> Result<Axis, Error> {
    let name = pair
        .clone()
        .into_inner()
        .find(|p| p.as_rule() == Rule::axis_name)
        .ok_or_else(|| malformed("axis without name"))?;
    let token = name
        .into_inner()
        .next()
        .map(|p| p.as_rule())
        .ok_or_else(|| malformed("empty axis name"))?;
    let axis = match token {
        Rule::K_ANCESTOR_OR_SELF => Axis::AncestorOrSelf,
        Rule::K_ANCESTOR => Axis::Ancestor,
        Rule::K_ATTRIBUTE => Axis::Attribute,
        Rule::K_CHILD => Axis::Child,
        Rule::K_DESCENDANT_OR_SELF => Axis::DescendantOrSelf,
        Rule::K_DESCENDANT => Axis::Descendant,
        Rule::K_FOLLOWING_SIBLING => Axis::FollowingSibling,
        Rule::K_FOLLOWING => Axis::Following,
        Rule::K_PARENT => Axis::Parent,
        Rule::K_PRECEDING_SIBLING => Axis::PrecedingSibling,
        Rule::K_PRECEDING => Axis::Preceding,
        Rule::K_SELF => Axis::SelfAxis,
        other => return Err(malformed(&format!("unknown axis {other:?}"))),
    };
    Ok(axis)
}

fn build_node_test(pair: Pair<Rule>) -> Result<NodeTest, Error> {
    let inner = only_inner(pair)?;
    match inner.as_rule() {
        Rule::kind_test => build_kind_test(inner).map(NodeTest::Kind),
        Rule::wildcard_name => {
            let s = inner.as_str();
            if s == "*" {
                Ok(NodeTest::Name(NameTest::Any))
            } else if let Some(prefix) = s.strip_suffix(":*") {
                Ok(NodeTest::Name(NameTest::NsWildcard(prefix.to_string())))
            } else {
                Err(malformed("unreadable wildcard"))
            }
        }
        Rule::qname => Ok(NodeTest::Name(NameTest::QName(qname_from_str(inner.as_str())))),
        other => Err(malformed(&format!("unexpected node test {other:?}"))),
    }
}

fn build_kind_test(pair: Pair<Rule>) -> Result<KindTest, Error> {
    let inner = only_inner(pair)?;
    match inner.as_rule() {
        Rule::simple_kind_test => {
            let kind = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::kind_name)
                .and_then(|p| p.into_inner().next())
                .map(|p| p.as_rule())
                .ok_or_else(|| malformed("empty kind test"))?;
            match kind {
                Rule::K_NODE => Ok(KindTest::AnyKind),
                Rule::K_TEXT => Ok(KindTest::Text),
                Rule::K_COMMENT => Ok(KindTest::Comment),
                other => Err(malformed(&format!("unknown kind test {other:?}"))),
            }
        }
        Rule::pi_test => {
            let target = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::string_literal)
                .and_then(|p| p.into_inner().next())
                .map(|p| p.as_str().to_string());
            Ok(KindTest::ProcessingInstruction(target))
        }
        other => Err(malformed(&format!("unexpected kind test {other:?}"))),
    }
}

fn build_predicate(pair: Pair<Rule>) -> Result<Expr, Error> {
    debug_assert_eq!(pair.as_rule(), Rule::predicate);
    let inner = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| malformed("empty predicate"))?;
    build_expr(inner)
}

fn qname_from_str(s: &str) -> QName {
    match s.find(':') {
        Some(idx) => QName {
            prefix: Some(s[..idx].to_string()),
            local: s[idx + 1..].to_string(),
        },
        None => QName { prefix: None, local: s.to_string() },
    }
}
