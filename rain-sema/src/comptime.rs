#![forbid(unsafe_code)]

//! Which expressions may be evaluated while compiling.

use rain_ast::{Expr, ExprKind, TypeId, VariableId};

use crate::error::SemanticError;
use crate::scope::ScopeTree;
use crate::types::TypeKind;
use crate::var::{Storage, VariableKind};

/// Decides whether an extern import can run inside the compile-time
/// interpreter, given its import keys.
pub trait CompileTimeEligibility {
    fn is_eligible(&self, keys: &[String]) -> bool;
}

/// Policy that keeps every extern out of compile-time evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCompileTimeExterns;

impl CompileTimeEligibility for NoCompileTimeExterns {
    fn is_eligible(&self, _keys: &[String]) -> bool {
        false
    }
}

/// Reject `expr` if it reads runtime state, returns, or declares items.
/// Locals bound inside `expr` itself are fine.
pub(crate) fn check_compile_time(tree: &ScopeTree, expr: &Expr) -> Result<(), SemanticError> {
    let mut own = Vec::new();
    collect_lets(expr, &mut own);
    walk(tree, expr, &own)
}

/// Reject a compile-time value of type `ty` that carries slices unless
/// `expr` is a string literal or a slice literal of constant elements.
/// Any other slice would point into the evaluator's memory.
pub(crate) fn check_constant_slices(tree: &ScopeTree, expr: &Expr, ty: TypeId) -> Result<(), SemanticError> {
    if !tree.types().contains_slice(ty) || is_constant_slice(tree, expr)? {
        return Ok(());
    }
    Err(SemanticError::syntax(
        format!(
            "a compile-time `{}` must be a string literal or a slice literal of constants",
            tree.display(ty)
        ),
        expr.span,
    ))
}

fn is_constant_slice(tree: &ScopeTree, expr: &Expr) -> Result<bool, SemanticError> {
    match &expr.kind {
        ExprKind::Parenthesis(inner) | ExprKind::CompileTime(inner) => is_constant_slice(tree, inner),
        ExprKind::String(_) => Ok(true),
        ExprKind::SliceLiteral(literal) => {
            let Some(ty) = expr.ty else { return Ok(false) };
            let TypeKind::Slice(element) = tree.types().kind(tree.types().resolve(ty, expr.span)?)? else {
                return Ok(false);
            };
            Ok(literal.elements.iter().all(|item| is_constant_element(item, *element)))
        }
        _ => Ok(false),
    }
}

/// Elements that lower straight to constants without a conversion.
fn is_constant_element(expr: &Expr, element: TypeId) -> bool {
    match &expr.kind {
        ExprKind::Parenthesis(inner) => expr.ty == Some(element) && is_constant_element(inner, element),
        ExprKind::Integer(_)
        | ExprKind::Float(_)
        | ExprKind::Boolean(_)
        | ExprKind::String(_)
        | ExprKind::CompileTime(_) => expr.ty == Some(element),
        _ => false,
    }
}

fn collect_lets(expr: &Expr, out: &mut Vec<VariableId>) {
    if let ExprKind::Let(l) = &expr.kind {
        out.extend(l.variable);
    }
    for child in expr.children() {
        collect_lets(child, out);
    }
}

fn walk(tree: &ScopeTree, expr: &Expr, own: &[VariableId]) -> Result<(), SemanticError> {
    match &expr.kind {
        ExprKind::Identifier(id) => {
            let variable = id
                .variable
                .ok_or_else(|| SemanticError::internal("unresolved identifier").at(expr.span))?;
            if !capable(tree, variable, own)? {
                return Err(SemanticError::syntax(
                    format!("`{}` is not available at compile time", id.name.node),
                    expr.span,
                ));
            }
        }
        ExprKind::Call(call) => {
            if let Some(target) = call.target {
                if !capable(tree, target.method, own)? {
                    let name = &tree.variable(target.method)?.name;
                    return Err(SemanticError::syntax(
                        format!("`{name}` cannot be called at compile time"),
                        call.callee.span,
                    ));
                }
            }
        }
        ExprKind::Return(_) => {
            return Err(SemanticError::syntax(
                "`return` is not allowed in a compile-time expression",
                expr.span,
            ));
        }
        ExprKind::Function(_)
        | ExprKind::FunctionDeclaration(_)
        | ExprKind::Export(_)
        | ExprKind::Extern(_)
        | ExprKind::Type(_)
        | ExprKind::Implementation(_) => {
            return Err(SemanticError::syntax(
                format!("{} is not allowed in a compile-time expression", expr.kind_name()),
                expr.span,
            ));
        }
        _ => {}
    }
    for child in expr.children() {
        walk(tree, child, own)?;
    }
    Ok(())
}

fn capable(tree: &ScopeTree, variable: VariableId, own: &[VariableId]) -> Result<bool, SemanticError> {
    if own.contains(&variable) {
        return Ok(true);
    }
    Ok(match &tree.variable(variable)?.kind {
        VariableKind::Local { storage, .. } => *storage == Storage::Global,
        VariableKind::Function { .. } | VariableKind::Builtin(_) => true,
        VariableKind::External { compile_time, .. } => *compile_time,
        VariableKind::UnwrappedOptional { wraps } => capable(tree, *wraps, own)?,
    })
}
