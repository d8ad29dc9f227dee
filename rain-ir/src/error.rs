use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IrError {
    #[error("builder error: {0}")]
    #[diagnostic(code(rain::ir::builder))]
    Builder(String),

    #[error("layout error: {0}")]
    #[diagnostic(code(rain::ir::layout))]
    Layout(String),

    #[error("IR verification failed in '{function}': {message}")]
    #[diagnostic(code(rain::ir::verify))]
    Verify { function: String, message: String },
}

impl IrError {
    pub(crate) fn builder(message: impl Into<String>) -> Self {
        IrError::Builder(message.into())
    }
}
