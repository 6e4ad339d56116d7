//! The four XPath 1.0 value types and their coercion rules.

use crate::model::DataNode;
use crate::runtime::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value<N> {
    /// Ordered, deduplicated document-order node sequence.
    NodeSet(Vec<N>),
    Number(f64),
    String(String),
    Boolean(bool),
}

impl<N> Value<N> {
    pub fn empty_node_set() -> Self {
        Value::NodeSet(Vec::new())
    }

    pub fn is_node_set(&self) -> bool {
        matches!(self, Value::NodeSet(_))
    }
}

impl<N: DataNode> Value<N> {
    /// String coercion: a node-set yields its first node's string value
    /// (empty string when the set is empty).
    pub fn string_value(&self) -> String {
        match self {
            Value::NodeSet(nodes) => {
                nodes.first().map(DataNode::string_value).unwrap_or_default()
            }
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
        }
    }

    /// Numeric coercion: strings parse by the XPath number lexical rules
    /// (NaN when malformed), booleans map to 0/1, node-sets go through
    /// their string value.
    pub fn number_value(&self) -> f64 {
        match self {
            Value::NodeSet(_) => parse_number(&self.string_value()),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Boolean coercion: an empty node-set is false, zero and NaN are
    /// false, the empty string is false.
    pub fn boolean_value(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Boolean(b) => *b,
        }
    }

    pub fn into_node_set(self) -> Result<Vec<N>, Error> {
        match self {
            Value::NodeSet(nodes) => Ok(nodes),
            other => Err(Error::Evaluation(format!(
                "expected a node-set, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::NodeSet(_) => "node-set",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
        }
    }
}

/// XPath 1.0 number lexical space: optional minus, digits with an optional
/// fractional part, surrounded by optional whitespace. Anything else is NaN.
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return f64::NAN;
    }
    let body = t.strip_prefix('-').unwrap_or(t);
    let mut parts = body.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();
    let int_ok = int_part.chars().all(|c| c.is_ascii_digit());
    let frac_ok = frac_part.is_none_or(|f| f.chars().all(|c| c.is_ascii_digit()));
    let has_digits = !int_part.is_empty() || frac_part.is_some_and(|f| !f.is_empty());
    if !int_ok || !frac_ok || !has_digits {
        return f64::NAN;
    }
    t.parse().unwrap_or(f64::NAN)
}

/// XPath 1.0 number-to-string: integers print without a decimal point,
/// NaN and the infinities by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(clippy::cast_possible_truncation)]
        return format!("{}", n as i64);
    }
    format!("{n}")
}
