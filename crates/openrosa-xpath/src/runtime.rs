use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::model::DataNode;
use crate::value::Value;

/// JavaRosa extension function namespace (the `jr:` prefix).
pub const JAVAROSA_NS: &str = "http://openrosa.org/javarosa";
/// OpenRosa XForms namespace (the `orx:` prefix).
pub const OPENROSA_XFORMS_NS: &str = "http://openrosa.org/xforms";

/// All evaluation failure kinds. Failures propagate immediately; evaluation
/// has no partial-result semantics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("function {name}() expects {}, got {actual}", arity_range(.min, .max))]
    Arity { name: String, min: usize, max: Option<usize>, actual: usize },
    #[error("unknown function: {0}()")]
    NotSupportedFunction(String),
    #[error("no instance with id \"{0}\" exists in the form")]
    UnknownInstance(String),
    #[error("function {name}() is only available in {mode} mode")]
    ModeNotEnabled { name: String, mode: EvalMode },
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

fn arity_range(min: &usize, max: &Option<usize>) -> String {
    match max {
        Some(max) if max == min => {
            format!("exactly {min} argument{}", if *min == 1 { "" } else { "s" })
        }
        Some(max) => format!("{min} to {max} arguments"),
        None => format!("at least {min} argument{}", if *min == 1 { "" } else { "s" }),
    }
}

/// Named optional capability sets gating extension functions. Disabled by
/// default; fixed at context construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalMode {
    OpenClinica,
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMode::OpenClinica => write!(f, "OpenClinica"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalModes {
    pub openclinica: bool,
}

impl EvalModes {
    pub fn enabled(self, mode: EvalMode) -> bool {
        match mode {
            EvalMode::OpenClinica => self.openclinica,
        }
    }
}

/// Registry key: function names are looked up by (namespace URI, local
/// name), never by prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<&str>, local: impl Into<String>) -> Self {
        Self { ns_uri: ns_uri.map(str::to_string), local: local.into() }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self { ns_uri: None, local: local.into() }
    }
}

pub type FunctionImpl<N> =
    Arc<dyn Fn(&EvalContext<N>, &[Value<N>]) -> Result<Value<N>, Error> + Send + Sync>;

/// A registered function: arity bounds, an optional mode gate, and the
/// evaluation procedure. `max_args: None` means unbounded.
#[derive(Clone)]
pub struct FunctionDescriptor<N> {
    pub name: ExpandedName,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub mode: Option<EvalMode>,
    imp: FunctionImpl<N>,
}

impl<N> FunctionDescriptor<N> {
    /// Fails with [`Error::Arity`] when the call site's argument count is
    /// outside the registered range. `shown` is the name as written in the
    /// expression, for the message.
    pub fn validate_arity(&self, shown: &str, actual: usize) -> Result<(), Error> {
        let below = actual < self.min_args;
        let above = self.max_args.is_some_and(|max| actual > max);
        if below || above {
            return Err(Error::Arity {
                name: shown.to_string(),
                min: self.min_args,
                max: self.max_args,
                actual,
            });
        }
        Ok(())
    }

    /// Fails with [`Error::ModeNotEnabled`] when this descriptor is gated
    /// behind a mode the context was constructed without.
    pub fn check_mode(&self, shown: &str, modes: EvalModes) -> Result<(), Error> {
        match self.mode {
            Some(mode) if !modes.enabled(mode) => {
                Err(Error::ModeNotEnabled { name: shown.to_string(), mode })
            }
            _ => Ok(()),
        }
    }

    pub fn invoke(&self, ctx: &EvalContext<N>, args: &[Value<N>]) -> Result<Value<N>, Error> {
        (self.imp)(ctx, args)
    }
}

/// Static mapping from (namespace, name) to a function descriptor.
/// Configured once at construction and shared read-only between contexts;
/// registering an existing name overwrites the previous descriptor.
pub struct FunctionRegistry<N> {
    fns: HashMap<ExpandedName, FunctionDescriptor<N>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self { fns: HashMap::new() }
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        ns_uri: Option<&str>,
        local: &str,
        min_args: usize,
        max_args: Option<usize>,
        mode: Option<EvalMode>,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&EvalContext<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        let name = ExpandedName::new(ns_uri, local);
        let descriptor = FunctionDescriptor {
            name: name.clone(),
            min_args,
            max_args,
            mode,
            imp: Arc::new(f),
        };
        if self.fns.insert(name, descriptor).is_some() {
            tracing::debug!(local, ?ns_uri, "overwrote function registration");
        }
    }

    /// Convenience: unnamespaced function with an exact or ranged arity.
    pub fn register_local<F>(&mut self, local: &str, min_args: usize, max_args: Option<usize>, f: F)
    where
        F: 'static + Send + Sync + Fn(&EvalContext<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register(None, local, min_args, max_args, None, f);
    }

    /// Convenience: namespaced function.
    pub fn register_ns<F>(
        &mut self,
        ns_uri: &str,
        local: &str,
        min_args: usize,
        max_args: Option<usize>,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&EvalContext<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register(Some(ns_uri), local, min_args, max_args, None, f);
    }

    /// Convenience: mode-gated function.
    pub fn register_gated<F>(
        &mut self,
        mode: EvalMode,
        local: &str,
        min_args: usize,
        max_args: Option<usize>,
        f: F,
    ) where
        F: 'static + Send + Sync + Fn(&EvalContext<N>, &[Value<N>]) -> Result<Value<N>, Error>,
    {
        self.register(None, local, min_args, max_args, Some(mode), f);
    }

    /// Look up a descriptor. Unregistered (namespace, name) pairs fail with
    /// [`Error::NotSupportedFunction`] at call time, not parse time.
    pub fn resolve(&self, name: &ExpandedName, shown: &str) -> Result<&FunctionDescriptor<N>, Error> {
        self.fns
            .get(name)
            .ok_or_else(|| Error::NotSupportedFunction(shown.to_string()))
    }

    pub fn contains(&self, name: &ExpandedName) -> bool {
        self.fns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fns.is_empty()
    }
}

/// Pre-registered secondary instances. Internal (form-embedded) and
/// external (resource-loaded) instances alike must be registered before
/// evaluation; there is no lazy fetch at evaluation time.
#[derive(Debug, Clone)]
pub struct InstanceSet<N> {
    by_id: HashMap<String, N>,
}

impl<N> Default for InstanceSet<N> {
    fn default() -> Self {
        Self { by_id: HashMap::new() }
    }
}

impl<N> InstanceSet<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, root: N) {
        let id = id.into();
        tracing::debug!(%id, "registered secondary instance");
        self.by_id.insert(id, root);
    }

    /// The root node of the named instance, or [`Error::UnknownInstance`]
    /// when no instance with that identifier was declared.
    pub fn resolve(&self, id: &str) -> Result<&N, Error> {
        self.by_id
            .get(id)
            .ok_or_else(|| Error::UnknownInstance(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }
}

/// Prefix → namespace URI bindings used to expand namespaced function
/// names. `jr` and `orx` are bound by default.
#[derive(Debug, Clone)]
pub struct NamespaceBindings {
    by_prefix: HashMap<String, String>,
}

impl Default for NamespaceBindings {
    fn default() -> Self {
        let mut by_prefix = HashMap::new();
        by_prefix.insert("jr".to_string(), JAVAROSA_NS.to_string());
        by_prefix.insert("orx".to_string(), OPENROSA_XFORMS_NS.to_string());
        Self { by_prefix }
    }
}

impl NamespaceBindings {
    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.by_prefix.insert(prefix.into(), uri.into());
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }
}

/// Regular expression evaluation behind a trait so the engine does not
/// commit to a particular backend.
pub trait RegexProvider: Send + Sync {
    fn is_match(&self, pattern: &str, text: &str) -> Result<bool, Error>;
}

/// Backtracking provider based on fancy-regex.
pub struct FancyRegexProvider;

impl RegexProvider for FancyRegexProvider {
    fn is_match(&self, pattern: &str, text: &str) -> Result<bool, Error> {
        let re = fancy_regex::Regex::new(pattern)
            .map_err(|_| Error::Evaluation(format!("invalid regular expression: {pattern}")))?;
        re.is_match(text)
            .map_err(|_| Error::Evaluation("regular expression evaluation failed".to_string()))
    }
}

/// Everything one `evaluate` call sees: the context node, proximity
/// position, immutable mode flags, variables, and the shared registry and
/// instance set. Created per evaluation call and discarded after.
#[derive(Clone)]
pub struct EvalContext<N> {
    pub context_node: Option<N>,
    /// 1-based proximity position of the context node.
    pub position: usize,
    pub size: usize,
    pub modes: EvalModes,
    pub variables: HashMap<ExpandedName, Value<N>>,
    pub functions: Arc<FunctionRegistry<N>>,
    pub instances: Arc<InstanceSet<N>>,
    pub namespaces: NamespaceBindings,
    /// Fixed instant for `today()`/`now()`; wall clock when unset.
    pub now: Option<DateTime<FixedOffset>>,
    pub regex: Option<Arc<dyn RegexProvider>>,
}

impl<N: DataNode + 'static> Default for EvalContext<N> {
    fn default() -> Self {
        Self {
            context_node: None,
            position: 1,
            size: 1,
            modes: EvalModes::default(),
            variables: HashMap::new(),
            functions: Arc::new(crate::functions::default_function_registry()),
            instances: Arc::new(InstanceSet::new()),
            namespaces: NamespaceBindings::default(),
            now: None,
            regex: Some(Arc::new(FancyRegexProvider)),
        }
    }
}

impl<N: DataNode> EvalContext<N> {
    /// Derived context for predicate evaluation: same configuration, new
    /// focus.
    pub fn with_focus(&self, node: N, position: usize, size: usize) -> Self {
        let mut ctx = self.clone();
        ctx.context_node = Some(node);
        ctx.position = position;
        ctx.size = size;
        ctx
    }

    pub fn current_now(&self) -> DateTime<FixedOffset> {
        self.now.unwrap_or_else(|| chrono::Local::now().fixed_offset())
    }
}

pub struct EvalContextBuilder<N> {
    ctx: EvalContext<N>,
}

impl<N: DataNode + 'static> Default for EvalContextBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: DataNode + 'static> EvalContextBuilder<N> {
    pub fn new() -> Self {
        Self { ctx: EvalContext::default() }
    }

    pub fn with_context_node(mut self, node: N) -> Self {
        self.ctx.context_node = Some(node);
        self
    }

    pub fn with_position(mut self, position: usize, size: usize) -> Self {
        self.ctx.position = position;
        self.ctx.size = size;
        self
    }

    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        match mode {
            EvalMode::OpenClinica => self.ctx.modes.openclinica = true,
        }
        self
    }

    pub fn with_modes(mut self, modes: EvalModes) -> Self {
        self.ctx.modes = modes;
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: Value<N>) -> Self {
        self.ctx.variables.insert(name, value);
        self
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry<N>>) -> Self {
        self.ctx.functions = functions;
        self
    }

    pub fn with_instances(mut self, instances: Arc<InstanceSet<N>>) -> Self {
        self.ctx.instances = instances;
        self
    }

    pub fn with_instance(mut self, id: impl Into<String>, root: N) -> Self
    where
        N: Clone,
    {
        Arc::make_mut(&mut self.ctx.instances).register(id, root);
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.ctx.namespaces.bind(prefix, uri);
        self
    }

    pub fn with_now(mut self, now: DateTime<FixedOffset>) -> Self {
        self.ctx.now = Some(now);
        self
    }

    pub fn with_regex(mut self, provider: Arc<dyn RegexProvider>) -> Self {
        self.ctx.regex = Some(provider);
        self
    }

    pub fn build(self) -> EvalContext<N> {
        self.ctx
    }
}
