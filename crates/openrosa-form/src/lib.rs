pub mod error;
pub mod form;
pub mod model_xml;

pub use error::FormError;
pub use form::{FormModel, FormOptions};
pub use model_xml::{Bind, ExternalInstance};

// Re-exported so downstream callers can match on evaluation results
// without a direct engine dependency.
pub use openrosa_xpath::{Error, Value};
