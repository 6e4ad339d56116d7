/// Failures while reading a form model document or managing its instances.
/// Expression-evaluation failures pass through from the engine unchanged.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("malformed form document: {0}")]
    Xml(String),
    #[error("form model has no primary instance")]
    MissingPrimaryInstance,
    #[error("secondary instance is missing an id attribute")]
    MissingInstanceId,
    #[error("duplicate instance id \"{0}\"")]
    DuplicateInstance(String),
    #[error("instance \"{0}\" is not declared as an external instance")]
    UndeclaredExternal(String),
    #[error(transparent)]
    Eval(#[from] openrosa_xpath::Error),
}

impl From<quick_xml::Error> for FormError {
    fn from(e: quick_xml::Error) -> Self {
        FormError::Xml(e.to_string())
    }
}
