//! Built-in function families: the XPath 1.0 core set plus the
//! OpenRosa/ODK extensions, registered into a [`FunctionRegistry`] at
//! construction time.
//!
//! Registration conventions:
//! - One registration per function with its documented arity range; optional
//!   trailing arguments dispatch on `args.len()` inside the closure.
//! - Variadic families (`concat`, `join`, ...) register with
//!   `max_args: None`.
//! - Mode-gated functions (`comment-status`) register through
//!   `register_gated` and are invisible to arity errors until their mode
//!   check passes.

use chrono::{NaiveDate, TimeDelta};

use crate::model::DataNode;
use crate::runtime::{Error, EvalContext, EvalMode, FunctionRegistry, JAVAROSA_NS};
use crate::value::{Value, parse_number};

fn context_string<N: DataNode>(ctx: &EvalContext<N>) -> String {
    ctx.context_node.as_ref().map(DataNode::string_value).unwrap_or_default()
}

fn node_set_arg<'a, N: DataNode>(
    shown: &str,
    args: &'a [Value<N>],
    index: usize,
) -> Result<&'a [N], Error> {
    match &args[index] {
        Value::NodeSet(nodes) => Ok(nodes),
        other => Err(Error::Evaluation(format!(
            "{shown}() expects a node-set argument, got a {}",
            other.type_name()
        ))),
    }
}

/// XPath 1.0 `round`: nearest integer, halves round toward positive
/// infinity.
fn xpath_round(n: f64) -> f64 {
    (n + 0.5).floor()
}

/// JavaRosa boolean lexical space: `"true"` and `"1"` are true, everything
/// else is false.
fn boolean_from_string(s: &str) -> bool {
    s == "true" || s == "1"
}

const EPOCH_DAY_FORMAT: &str = "%Y-%m-%d";

fn to_iso_date<N: DataNode>(value: &Value<N>) -> Result<String, Error> {
    let s = value.string_value();
    let trimmed = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, EPOCH_DAY_FORMAT) {
        return Ok(d.format(EPOCH_DAY_FORMAT).to_string());
    }
    let n = value.number_value();
    if n.is_finite() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
        #[allow(clippy::cast_possible_truncation)]
        let days = n.floor() as i64;
        let date = epoch
            .checked_add_signed(TimeDelta::days(days))
            .ok_or_else(|| Error::Evaluation(format!("date value out of range: {n}")))?;
        return Ok(date.format(EPOCH_DAY_FORMAT).to_string());
    }
    Err(Error::Evaluation(format!("not a valid date: \"{trimmed}\"")))
}

/// Whether `node` is `scope` itself or one of its descendants.
fn within_scope<N: DataNode>(node: &N, scope: &N) -> bool {
    let mut cur = Some(node.clone());
    while let Some(n) = cur {
        if &n == scope {
            return true;
        }
        cur = n.parent();
    }
    false
}

/// The default registry: every built-in with its documented arity, shared
/// read-only by every context built on top of it.
pub fn default_function_registry<N: DataNode + 'static>() -> FunctionRegistry<N> {
    let mut reg: FunctionRegistry<N> = FunctionRegistry::new();

    // ===== Booleans =====
    reg.register_local("true", 0, Some(0), |_ctx, _args| Ok(Value::Boolean(true)));
    reg.register_local("false", 0, Some(0), |_ctx, _args| Ok(Value::Boolean(false)));
    reg.register_local("boolean", 1, Some(1), |_ctx, args| {
        Ok(Value::Boolean(args[0].boolean_value()))
    });
    reg.register_local("not", 1, Some(1), |_ctx, args| {
        Ok(Value::Boolean(!args[0].boolean_value()))
    });
    reg.register_local("boolean-from-string", 1, Some(1), |_ctx, args| {
        Ok(Value::Boolean(boolean_from_string(&args[0].string_value())))
    });

    // ===== Context =====
    reg.register_local("position", 0, Some(0), |ctx, _args| {
        #[allow(clippy::cast_precision_loss)]
        Ok(Value::Number(ctx.position as f64))
    });
    reg.register_local("last", 0, Some(0), |ctx, _args| {
        #[allow(clippy::cast_precision_loss)]
        Ok(Value::Number(ctx.size as f64))
    });
    reg.register_local("count", 1, Some(1), |_ctx, args| {
        let nodes = node_set_arg("count", args, 0)?;
        #[allow(clippy::cast_precision_loss)]
        Ok(Value::Number(nodes.len() as f64))
    });
    reg.register_local("local-name", 0, Some(1), |ctx, args| {
        let name = match args.first() {
            Some(_) => {
                let nodes = node_set_arg("local-name", args, 0)?;
                nodes.first().and_then(DataNode::name).map(|n| n.local.to_string())
            }
            None => ctx.context_node.as_ref().and_then(DataNode::name).map(|n| n.local.to_string()),
        };
        Ok(Value::String(name.unwrap_or_default()))
    });
    reg.register_local("name", 0, Some(1), |ctx, args| {
        let name = match args.first() {
            Some(_) => {
                let nodes = node_set_arg("name", args, 0)?;
                nodes.first().and_then(DataNode::name).map(|n| n.as_written())
            }
            None => ctx.context_node.as_ref().and_then(DataNode::name).map(|n| n.as_written()),
        };
        Ok(Value::String(name.unwrap_or_default()))
    });

    // ===== Strings =====
    reg.register_local("string", 0, Some(1), |ctx, args| {
        let s = match args.first() {
            Some(v) => v.string_value(),
            None => context_string(ctx),
        };
        Ok(Value::String(s))
    });
    reg.register_local("concat", 2, None, |_ctx, args| {
        let mut out = String::new();
        for a in args {
            out.push_str(&a.string_value());
        }
        Ok(Value::String(out))
    });
    reg.register_local("starts-with", 2, Some(2), |_ctx, args| {
        Ok(Value::Boolean(args[0].string_value().starts_with(&args[1].string_value())))
    });
    reg.register_local("contains", 2, Some(2), |_ctx, args| {
        Ok(Value::Boolean(args[0].string_value().contains(&args[1].string_value())))
    });
    reg.register_local("substring-before", 2, Some(2), |_ctx, args| {
        let s = args[0].string_value();
        let sub = args[1].string_value();
        let out = s.find(&sub).map(|i| s[..i].to_string()).unwrap_or_default();
        Ok(Value::String(out))
    });
    reg.register_local("substring-after", 2, Some(2), |_ctx, args| {
        let s = args[0].string_value();
        let sub = args[1].string_value();
        let out = s.find(&sub).map(|i| s[i + sub.len()..].to_string()).unwrap_or_default();
        Ok(Value::String(out))
    });
    reg.register_local("substring", 2, Some(3), |_ctx, args| {
        let s = args[0].string_value();
        let start = xpath_round(args[1].number_value());
        let len = args.get(2).map(Value::number_value).map(xpath_round);
        let mut out = String::new();
        for (i, c) in s.chars().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let pos = (i + 1) as f64;
            let after_start = pos >= start;
            let before_end = len.is_none_or(|l| pos < start + l);
            if after_start && before_end {
                out.push(c);
            }
        }
        Ok(Value::String(out))
    });
    reg.register_local("string-length", 0, Some(1), |ctx, args| {
        let s = match args.first() {
            Some(v) => v.string_value(),
            None => context_string(ctx),
        };
        #[allow(clippy::cast_precision_loss)]
        Ok(Value::Number(s.chars().count() as f64))
    });
    reg.register_local("normalize-space", 0, Some(1), |ctx, args| {
        let s = match args.first() {
            Some(v) => v.string_value(),
            None => context_string(ctx),
        };
        Ok(Value::String(s.split_whitespace().collect::<Vec<_>>().join(" ")))
    });
    reg.register_local("translate", 3, Some(3), |_ctx, args| {
        let s = args[0].string_value();
        let from: Vec<char> = args[1].string_value().chars().collect();
        let to: Vec<char> = args[2].string_value().chars().collect();
        let mut out = String::new();
        for c in s.chars() {
            match from.iter().position(|f| *f == c) {
                Some(i) => {
                    if let Some(r) = to.get(i) {
                        out.push(*r);
                    }
                    // dropped when the replacement string is shorter
                }
                None => out.push(c),
            }
        }
        Ok(Value::String(out))
    });

    // ===== Numbers =====
    reg.register_local("number", 0, Some(1), |ctx, args| {
        let n = match args.first() {
            Some(v) => v.number_value(),
            None => parse_number(&context_string(ctx)),
        };
        Ok(Value::Number(n))
    });
    reg.register_local("sum", 1, Some(1), |_ctx, args| {
        let nodes = node_set_arg("sum", args, 0)?;
        let total = nodes.iter().map(|n| parse_number(&n.string_value())).sum();
        Ok(Value::Number(total))
    });
    reg.register_local("floor", 1, Some(1), |_ctx, args| {
        Ok(Value::Number(args[0].number_value().floor()))
    });
    reg.register_local("ceiling", 1, Some(1), |_ctx, args| {
        Ok(Value::Number(args[0].number_value().ceil()))
    });
    reg.register_local("round", 1, Some(1), |_ctx, args| {
        Ok(Value::Number(xpath_round(args[0].number_value())))
    });
    reg.register_local("int", 1, Some(1), |_ctx, args| {
        Ok(Value::Number(args[0].number_value().trunc()))
    });
    reg.register_local("abs", 1, Some(1), |_ctx, args| {
        Ok(Value::Number(args[0].number_value().abs()))
    });
    reg.register_local("pow", 2, Some(2), |_ctx, args| {
        Ok(Value::Number(args[0].number_value().powf(args[1].number_value())))
    });

    // ===== Select lists =====
    reg.register_local("selected", 2, Some(2), |_ctx, args| {
        let list = args[0].string_value();
        let value = args[1].string_value();
        let value = value.trim();
        Ok(Value::Boolean(list.split_whitespace().any(|item| item == value)))
    });
    reg.register_local("selected-at", 2, Some(2), |_ctx, args| {
        let list = args[0].string_value();
        let index = args[1].number_value();
        if !index.is_finite() || index < 0.0 {
            return Ok(Value::String(String::new()));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = xpath_round(index) as usize;
        let item = list.split_whitespace().nth(index).unwrap_or_default();
        Ok(Value::String(item.to_string()))
    });
    reg.register_local("count-selected", 1, Some(1), |_ctx, args| {
        let list = args[0].string_value();
        #[allow(clippy::cast_precision_loss)]
        Ok(Value::Number(list.split_whitespace().count() as f64))
    });

    // ===== Conditionals =====
    reg.register_local("if", 3, Some(3), |_ctx, args| {
        let pick = if args[0].boolean_value() { &args[1] } else { &args[2] };
        Ok(pick.clone())
    });
    reg.register_local("coalesce", 2, Some(2), |_ctx, args| {
        let first = args[0].string_value();
        if first.is_empty() {
            Ok(Value::String(args[1].string_value()))
        } else {
            Ok(Value::String(first))
        }
    });
    reg.register_local("join", 1, None, |_ctx, args| {
        let separator = args[0].string_value();
        let mut parts: Vec<String> = Vec::new();
        for a in &args[1..] {
            match a {
                Value::NodeSet(nodes) => {
                    parts.extend(nodes.iter().map(DataNode::string_value));
                }
                other => parts.push(other.string_value()),
            }
        }
        Ok(Value::String(parts.join(&separator)))
    });

    // ===== Dates =====
    reg.register_local("date", 1, Some(1), |_ctx, args| {
        Ok(Value::String(to_iso_date(&args[0])?))
    });
    reg.register_local("today", 0, Some(0), |ctx, _args| {
        Ok(Value::String(ctx.current_now().date_naive().format(EPOCH_DAY_FORMAT).to_string()))
    });
    reg.register_local("now", 0, Some(0), |ctx, _args| {
        Ok(Value::String(ctx.current_now().to_rfc3339()))
    });

    // ===== Pattern matching =====
    reg.register_local("regex", 2, Some(2), |ctx, args| {
        let provider = ctx
            .regex
            .as_ref()
            .ok_or_else(|| Error::Evaluation("no regular expression provider configured".to_string()))?;
        let text = args[0].string_value();
        let pattern = args[1].string_value();
        Ok(Value::Boolean(provider.is_match(&pattern, &text)?))
    });

    // ===== Secondary instances =====
    reg.register_local("instance", 1, Some(1), |ctx, args| {
        let id = args[0].string_value();
        let root = ctx.instances.resolve(&id)?;
        Ok(Value::NodeSet(vec![root.clone()]))
    });

    // ===== Repeats =====
    reg.register_local("indexed-repeat", 3, None, |_ctx, args| {
        if (args.len() - 1) % 2 != 0 {
            return Err(Error::Evaluation(
                "indexed-repeat() expects a target followed by repeat/index pairs".to_string(),
            ));
        }
        let targets = node_set_arg("indexed-repeat", args, 0)?;
        let mut scope: Option<N> = None;
        let mut i = 1;
        while i < args.len() {
            let repeats = node_set_arg("indexed-repeat", args, i)?;
            let index = args[i + 1].number_value();
            if !index.is_finite() || index < 1.0 {
                return Ok(Value::empty_node_set());
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = xpath_round(index) as usize;
            let candidates: Vec<&N> = match &scope {
                Some(s) => repeats.iter().filter(|r| within_scope(*r, s)).collect(),
                None => repeats.iter().collect(),
            };
            match candidates.get(index - 1) {
                Some(chosen) => scope = Some((*chosen).clone()),
                None => return Ok(Value::empty_node_set()),
            }
            i += 2;
        }
        let result = match scope {
            Some(s) => targets.iter().filter(|t| within_scope(*t, &s)).cloned().collect(),
            None => targets.to_vec(),
        };
        Ok(Value::NodeSet(result))
    });

    // ===== Checklists =====
    reg.register_local("checklist", 2, None, |_ctx, args| {
        let min = args[0].number_value();
        let max = args[1].number_value();
        let mut count = 0.0;
        for a in &args[2..] {
            match a {
                Value::NodeSet(nodes) => {
                    for n in nodes {
                        if boolean_from_string(n.string_value().trim()) {
                            count += 1.0;
                        }
                    }
                }
                other => {
                    if other.boolean_value() {
                        count += 1.0;
                    }
                }
            }
        }
        let min_ok = min < 0.0 || count >= min;
        let max_ok = max < 0.0 || count <= max;
        Ok(Value::Boolean(min_ok && max_ok))
    });
    reg.register_local("weighted-checklist", 2, None, |_ctx, args| {
        if (args.len() - 2) % 2 != 0 {
            return Err(Error::Evaluation(
                "weighted-checklist() expects min, max, then value/weight pairs".to_string(),
            ));
        }
        let min = args[0].number_value();
        let max = args[1].number_value();
        let mut total = 0.0;
        let mut i = 2;
        while i < args.len() {
            match (&args[i], &args[i + 1]) {
                (Value::NodeSet(values), Value::NodeSet(weights))
                    if values.len() == weights.len() =>
                {
                    for (v, w) in values.iter().zip(weights) {
                        if boolean_from_string(v.string_value().trim()) {
                            total += parse_number(&w.string_value());
                        }
                    }
                }
                (value, weight) => {
                    if value.boolean_value() {
                        total += weight.number_value();
                    }
                }
            }
            i += 2;
        }
        let min_ok = min < 0.0 || total >= min;
        let max_ok = max < 0.0 || total <= max;
        Ok(Value::Boolean(min_ok && max_ok))
    });

    // ===== JavaRosa namespace =====
    // Choice labels live in the form body, which is outside the data model;
    // the lookup degrades to the choice value itself.
    reg.register_ns(JAVAROSA_NS, "choice-name", 2, Some(2), |_ctx, args| {
        let _path = args[1].string_value();
        Ok(Value::String(args[0].string_value()))
    });

    // ===== OpenClinica mode =====
    reg.register_gated(EvalMode::OpenClinica, "comment-status", 1, Some(1), |_ctx, args| {
        let nodes = node_set_arg("comment-status", args, 0)?;
        let status = nodes.first().and_then(|n| {
            n.attributes()
                .into_iter()
                .find(|a| a.name().is_some_and(|name| name.local == "status"))
                .map(|a| a.string_value())
        });
        Ok(Value::String(status.unwrap_or_default()))
    });

    tracing::debug!(functions = reg.len(), "built default function registry");
    reg
}
