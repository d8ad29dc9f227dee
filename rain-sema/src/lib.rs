#![forbid(unsafe_code)]

mod builtin;
mod comptime;
mod error;
mod layer;
pub mod ops;
mod scope;
mod types;
mod validate;
mod var;

pub use builtin::{BuiltinTypes, Builtins};
pub use comptime::{CompileTimeEligibility, NoCompileTimeExterns};
pub use error::{NameKind, SemanticError};
pub use scope::{MethodKey, ScopeData, ScopeKind, ScopeTree};
pub use types::{Derivation, Field, InterfaceMethod, Primitive, TypeData, TypeGraph, TypeKind};
pub use validate::diverges;
pub use var::{ArithOp, BitOp, CompareOp, Intrinsic, NumClass, Storage, Variable, VariableKind};

use rain_ast::Module;

/// Resolve names and types across `module`, filling in the handles the code
/// generator reads. Returns the symbol tables the module was checked
/// against.
pub fn validate_module(
    builtins: &Builtins,
    module: &mut Module,
    policy: &dyn CompileTimeEligibility,
) -> Result<ScopeTree, SemanticError> {
    let mut tree = ScopeTree::new(builtins);
    let scope = tree.module_scope();
    module.scope = Some(scope);
    validate::Validator::new(&mut tree, policy).module(&mut module.items, scope)?;
    Ok(tree)
}
