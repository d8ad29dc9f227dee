#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;

use miette::Diagnostic;
use rain_ast::Span;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind {
    Type,
    Variable,
    Member,
    Method,
    Function,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NameKind::Type => "type",
            NameKind::Variable => "variable",
            NameKind::Member => "member",
            NameKind::Method => "method",
            NameKind::Function => "function",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Error, Diagnostic)]
pub enum SemanticError {
    #[error("{message}")]
    #[diagnostic(code(rain::syntax))]
    Syntax {
        message: String,
        #[label]
        span: Span,
    },

    #[error("undefined {kind} `{name}`")]
    #[diagnostic(code(rain::undefined))]
    UndefinedName {
        kind: NameKind,
        name: String,
        #[label("not found in this scope")]
        span: Span,
    },

    #[error("no matching operator method `{op}` for ({operands})")]
    #[diagnostic(code(rain::operator))]
    OperatorResolution {
        op: String,
        operands: String,
        #[label("operand")]
        lhs: Span,
        #[label("operand")]
        rhs: Option<Span>,
    },

    #[error("if branches produce different types `{then_ty}` and `{else_ty}`")]
    #[diagnostic(code(rain::if_mismatch))]
    IfTypeMismatch {
        then_ty: String,
        else_ty: String,
        #[label("this is `{then_ty}`")]
        then_span: Span,
        #[label("this is `{else_ty}`")]
        else_span: Span,
    },

    #[error("expected `{expected}`, found `{found}`")]
    #[diagnostic(code(rain::type_mismatch))]
    TypeMismatch {
        expected: String,
        found: String,
        #[label]
        span: Span,
    },

    #[error("internal compiler error: {message}")]
    #[diagnostic(code(rain::internal))]
    Internal {
        message: String,
        #[label]
        span: Option<Span>,
    },
}

impl SemanticError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        SemanticError::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn undefined(kind: NameKind, name: impl Into<String>, span: Span) -> Self {
        SemanticError::UndefinedName {
            kind,
            name: name.into(),
            span,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SemanticError::Internal {
            message: message.into(),
            span: None,
        }
    }

    /// Primary source location, if the error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            SemanticError::Syntax { span, .. }
            | SemanticError::UndefinedName { span, .. }
            | SemanticError::TypeMismatch { span, .. } => Some(*span),
            SemanticError::OperatorResolution { lhs, .. } => Some(*lhs),
            SemanticError::IfTypeMismatch { then_span, .. } => Some(*then_span),
            SemanticError::Internal { span, .. } => *span,
        }
    }

    /// Attach a location to an error raised without one.
    pub(crate) fn at(self, at: Span) -> Self {
        match self {
            SemanticError::Internal { message, span: None } => SemanticError::Internal {
                message,
                span: Some(at),
            },
            other => other,
        }
    }
}
