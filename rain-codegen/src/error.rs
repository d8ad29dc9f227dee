#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use miette::Diagnostic;
use rain_ast::Span;
use rain_ir::{IrError, Trap};
use rain_sema::SemanticError;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CodegenError {
    /// A validated tree that the generator cannot lower. Always a compiler
    /// bug, never a user error.
    #[error("internal code generation error: {message}")]
    #[diagnostic(code(rain::codegen::internal))]
    Internal {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("compile-time evaluation failed: {message}")]
    #[diagnostic(code(rain::codegen::comptime))]
    CompileTime {
        message: String,
        #[label]
        span: Span,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ir(#[from] IrError),
}

impl CodegenError {
    pub fn internal(message: impl Into<String>, span: Span) -> Self {
        CodegenError::Internal {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn compile_time(message: impl Into<String>, span: Span) -> Self {
        CodegenError::CompileTime {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn trap(trap: Trap, span: Span) -> Self {
        CodegenError::compile_time(trap.to_string(), span)
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CodegenError::Internal { span, .. } => *span,
            CodegenError::CompileTime { span, .. } => Some(*span),
            CodegenError::Ir(_) => None,
        }
    }
}

impl From<SemanticError> for CodegenError {
    fn from(err: SemanticError) -> Self {
        CodegenError::Internal {
            span: err.span(),
            message: err.to_string(),
        }
    }
}
