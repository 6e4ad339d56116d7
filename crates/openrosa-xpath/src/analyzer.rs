//! Static self-reference detection over parsed expressions.
//!
//! Used to flag circular constraint/calculation definitions: an expression
//! evaluated in the context of node N must not read N's own value. The
//! check is purely syntactic and deliberately best-effort — it has no
//! failure channel and answers `false` for anything it cannot normalize.

use crate::parser::ast::{Axis, Expr, NameTest, NodeTest, PathExpr, PathStart, Step};

/// True when the expression contains a path that resolves, syntactically,
/// to `self_path`: the exact absolute path, `.`, or a relative path that
/// normalizes to it. Nested occurrences inside function arguments,
/// predicates, and binary operands are found too.
///
/// `self_path` is an absolute slash-separated element path such as
/// `/data/a`; surrounding whitespace is tolerated. A non-absolute or empty
/// `self_path` finds nothing.
pub fn has_self_reference(expr: &Expr, self_path: &str) -> bool {
    let Some(target) = parse_self_path(self_path) else {
        return false;
    };
    references_target(expr, &target)
}

fn parse_self_path(self_path: &str) -> Option<Vec<String>> {
    let trimmed = self_path.trim();
    let rest = trimmed.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments)
}

fn references_target(expr: &Expr, target: &[String]) -> bool {
    match expr {
        Expr::Literal(_) | Expr::VarRef(_) => false,
        Expr::FunctionCall { args, .. } => args.iter().any(|a| references_target(a, target)),
        Expr::Binary { left, right, .. } => {
            references_target(left, target) || references_target(right, target)
        }
        Expr::Negate(inner) => references_target(inner, target),
        Expr::Path(path) => {
            path_matches(path, target)
                || path
                    .start_predicates
                    .iter()
                    .any(|p| references_target(p, target))
                || path
                    .steps
                    .iter()
                    .flat_map(|s| &s.predicates)
                    .any(|p| references_target(p, target))
                || match &path.start {
                    PathStart::Primary(inner) => references_target(inner, target),
                    _ => false,
                }
        }
    }
}

#[derive(Clone, PartialEq)]
enum Segment {
    Name(String),
    Any,
}

/// Normalize the path against the self node and compare segment-wise.
/// `.` keeps the position, `..` pops, a name or wildcard appends. Paths
/// using `//`, named non-child axes, attributes, or a primary start are
/// treated as not matching rather than guessed at.
fn path_matches(path: &PathExpr, target: &[String]) -> bool {
    let mut stack: Vec<Segment> = match path.start {
        PathStart::Root => Vec::new(),
        PathStart::Relative => target.iter().map(|s| Segment::Name(s.clone())).collect(),
        PathStart::Primary(_) => return false,
    };
    for step in &path.steps {
        if !apply_step(&mut stack, step) {
            return false;
        }
    }
    if stack.len() != target.len() {
        return false;
    }
    stack
        .iter()
        .zip(target)
        .all(|(seg, want)| match seg {
            Segment::Any => true,
            Segment::Name(name) => name == want,
        })
}

fn apply_step(stack: &mut Vec<Segment>, step: &Step) -> bool {
    match step.axis {
        Axis::SelfAxis => true,
        Axis::Parent => stack.pop().is_some(),
        Axis::Child => match &step.test {
            NodeTest::Name(NameTest::QName(q)) if q.prefix.is_none() => {
                stack.push(Segment::Name(q.local.clone()));
                true
            }
            NodeTest::Name(NameTest::Any | NameTest::NsWildcard(_)) => {
                stack.push(Segment::Any);
                true
            }
            _ => false,
        },
        _ => false,
    }
}
