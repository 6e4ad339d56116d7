pub mod analyzer;
pub mod evaluator;
pub mod functions;
pub mod model;
pub mod parser;
pub mod runtime;
pub mod tree;
pub mod value;

pub use analyzer::has_self_reference;
pub use evaluator::{evaluate, evaluate_str};
pub use functions::default_function_registry;
pub use model::{DataNode, NodeKind, QName};
pub use parser::{ExpressionParser, parse_expression};
pub use runtime::{
    Error, EvalContext, EvalContextBuilder, EvalMode, EvalModes, ExpandedName, FunctionDescriptor,
    FunctionRegistry, InstanceSet, NamespaceBindings, RegexProvider, JAVAROSA_NS,
};
pub use tree::{TreeNode, TreeNodeBuilder, attr, comment, doc, elem, text};
pub use value::Value;
