#![forbid(unsafe_code)]

use std::collections::HashMap;

use rain_ast::{ScopeId, Span, TypeExpr, TypeExprKind, TypeId, VariableId};

use crate::builtin::{BuiltinTypes, Builtins};
use crate::error::{NameKind, SemanticError};
use crate::layer::Layered;
use crate::ops;
use crate::types::{Derivation, Field, TypeData, TypeGraph, TypeKind};
use crate::var::{Intrinsic, Variable, VariableKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Builtin,
    Module,
    Block,
}

/// Method table key. Free functions have no receiver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub receiver: Option<TypeId>,
    pub args: Vec<TypeId>,
    pub name: String,
}

impl MethodKey {
    pub fn new(receiver: Option<TypeId>, args: Vec<TypeId>, name: impl Into<String>) -> Self {
        Self {
            receiver,
            args,
            name: name.into(),
        }
    }
}

type FunctionKey = (Vec<TypeId>, Option<TypeId>);

#[derive(Clone, Debug)]
pub struct ScopeData {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Function nesting frame. Locals are only visible within their frame.
    pub frame: u32,
    types: HashMap<String, TypeId>,
    function_types: HashMap<FunctionKey, TypeId>,
    methods: HashMap<MethodKey, VariableId>,
    variables: HashMap<String, VariableId>,
}

impl ScopeData {
    fn new(kind: ScopeKind, parent: Option<ScopeId>, frame: u32) -> Self {
        Self {
            kind,
            parent,
            frame,
            types: HashMap::new(),
            function_types: HashMap::new(),
            methods: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn local_type(&self, name: &str) -> Option<TypeId> {
        self.types.get(name).copied()
    }

    pub fn local_variable(&self, name: &str) -> Option<VariableId> {
        self.variables.get(name).copied()
    }

    pub fn local_method(&self, key: &MethodKey) -> Option<VariableId> {
        self.methods.get(key).copied()
    }
}

/// Builtin -> Module -> Block symbol tables over one type graph.
///
/// The builtin scope and everything it owns come from a shared, frozen
/// [`Builtins`]; each tree adds one module scope and its descendants.
#[derive(Clone, Debug)]
pub struct ScopeTree {
    types: TypeGraph,
    scopes: Layered<ScopeData>,
    variables: Layered<Variable>,
    builtin: BuiltinTypes,
    module: ScopeId,
    frames: u32,
}

impl ScopeTree {
    pub fn new(builtins: &Builtins) -> Self {
        let module = ScopeId(builtins.scopes.len() as u32);
        let mut tree = Self {
            types: TypeGraph::new(builtins.types.clone(), builtins.anonymous.clone(), module),
            scopes: Layered::new(builtins.scopes.clone()),
            variables: Layered::new(builtins.variables.clone()),
            builtin: builtins.ids,
            module,
            frames: 0,
        };
        tree.scopes
            .push(ScopeData::new(ScopeKind::Module, Some(Self::BUILTIN), 0));
        tree
    }

    /// A tree whose root is a still-writable builtin scope.
    pub(crate) fn bootstrap() -> Self {
        let mut scopes = Layered::empty();
        scopes.push(ScopeData::new(ScopeKind::Builtin, None, 0));
        Self {
            types: TypeGraph::empty(Self::BUILTIN),
            scopes,
            variables: Layered::empty(),
            builtin: BuiltinTypes::unset(),
            module: Self::BUILTIN,
            frames: 0,
        }
    }

    pub(crate) fn set_builtin_types(&mut self, ids: BuiltinTypes) {
        self.builtin = ids;
    }

    pub(crate) fn freeze(self) -> Builtins {
        let (types, anonymous) = self.types.freeze();
        Builtins {
            types,
            anonymous,
            scopes: self.scopes.freeze(),
            variables: self.variables.freeze(),
            ids: self.builtin,
        }
    }

    pub const BUILTIN: ScopeId = ScopeId(0);

    pub fn module_scope(&self) -> ScopeId {
        self.module
    }

    pub fn builtin(&self) -> &BuiltinTypes {
        &self.builtin
    }

    pub fn types(&self) -> &TypeGraph {
        &self.types
    }

    pub(crate) fn types_mut(&mut self) -> &mut TypeGraph {
        &mut self.types
    }

    pub fn display(&self, ty: TypeId) -> String {
        self.types.display(ty)
    }

    pub fn scope(&self, id: ScopeId) -> Result<&ScopeData, SemanticError> {
        self.scopes
            .get(id.index())
            .ok_or_else(|| SemanticError::internal(format!("unknown scope #{}", id.0)))
    }

    fn scope_mut(&mut self, id: ScopeId) -> Result<&mut ScopeData, SemanticError> {
        self.scopes
            .get_mut(id.index())
            .ok_or_else(|| SemanticError::internal(format!("scope #{} is read-only", id.0)))
    }

    pub fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> Result<ScopeId, SemanticError> {
        let frame = self.scope(parent)?.frame;
        Ok(ScopeId(self.scopes.push(ScopeData::new(kind, Some(parent), frame)) as u32))
    }

    /// Block scope that starts a new function frame.
    pub fn new_frame(&mut self, parent: ScopeId) -> Result<ScopeId, SemanticError> {
        self.scope(parent)?;
        self.frames += 1;
        Ok(ScopeId(
            self.scopes
                .push(ScopeData::new(ScopeKind::Block, Some(parent), self.frames)) as u32,
        ))
    }

    /// `from` and its ancestors, nearest first.
    pub fn chain(&self, from: ScopeId) -> impl Iterator<Item = (ScopeId, &ScopeData)> + '_ {
        std::iter::successors(Some(from), move |id| {
            self.scopes.get(id.index()).and_then(|s| s.parent)
        })
        .filter_map(move |id| self.scopes.get(id.index()).map(|s| (id, s)))
    }

    pub fn find_type(&self, scope: ScopeId, name: &str) -> Option<TypeId> {
        self.chain(scope).find_map(|(_, s)| s.local_type(name))
    }

    pub fn find_variable(&self, scope: ScopeId, name: &str) -> Option<VariableId> {
        self.chain(scope).find_map(|(_, s)| s.local_variable(name))
    }

    pub fn find_method(&self, scope: ScopeId, key: &MethodKey) -> Option<VariableId> {
        self.chain(scope).find_map(|(_, s)| s.local_method(key))
    }

    /// Register a type name locally; returns a previous local binding.
    pub fn add_type(&mut self, scope: ScopeId, name: &str, ty: TypeId) -> Result<Option<TypeId>, SemanticError> {
        Ok(self.scope_mut(scope)?.types.insert(name.to_string(), ty))
    }

    pub fn add_method(
        &mut self,
        scope: ScopeId,
        key: MethodKey,
        method: VariableId,
    ) -> Result<Option<VariableId>, SemanticError> {
        Ok(self.scope_mut(scope)?.methods.insert(key, method))
    }

    /// Store a variable without binding its name anywhere.
    pub fn declare(&mut self, variable: Variable) -> VariableId {
        VariableId(self.variables.push(variable) as u32)
    }

    pub fn bind_variable(&mut self, scope: ScopeId, name: &str, variable: VariableId) -> Result<(), SemanticError> {
        self.scope_mut(scope)?
            .variables
            .insert(name.to_string(), variable);
        Ok(())
    }

    /// Declare and bind by name in `variable.scope`.
    pub fn add_variable(&mut self, variable: Variable) -> Result<VariableId, SemanticError> {
        let scope = variable.scope;
        let name = variable.name.clone();
        let id = self.declare(variable);
        self.bind_variable(scope, &name, id)?;
        Ok(id)
    }

    pub fn variable(&self, id: VariableId) -> Result<&Variable, SemanticError> {
        self.variables
            .get(id.index())
            .ok_or_else(|| SemanticError::internal(format!("unknown variable #{}", id.0)))
    }

    pub fn variable_mut(&mut self, id: VariableId) -> Result<&mut Variable, SemanticError> {
        self.variables
            .get_mut(id.index())
            .ok_or_else(|| SemanticError::internal(format!("variable #{} is read-only", id.0)))
    }

    pub fn variables(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VariableId(i as u32), v))
    }

    /// Parameters and return type of a function type.
    pub fn signature(&self, ty: TypeId) -> Result<(&[TypeId], Option<TypeId>), SemanticError> {
        match self.types.kind(ty)? {
            TypeKind::Function { params, ret } => Ok((params, *ret)),
            _ => Err(SemanticError::internal(format!(
                "`{}` is not a function type",
                self.display(ty)
            ))),
        }
    }

    /// Interned function type. An equal signature anywhere up the chain is
    /// reused; a new one is owned by the nearest scope that owns one of the
    /// types it mentions.
    pub fn get_function_type(
        &mut self,
        scope: ScopeId,
        params: Vec<TypeId>,
        ret: Option<TypeId>,
        span: Span,
    ) -> Result<TypeId, SemanticError> {
        let params = params
            .into_iter()
            .map(|p| self.types.resolve(p, span))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = ret.map(|r| self.types.resolve(r, span)).transpose()?;
        let key: FunctionKey = (params, ret);

        let owners = key
            .0
            .iter()
            .chain(key.1.iter())
            .map(|t| self.types.get(*t).map(|d| d.owner))
            .collect::<Result<Vec<_>, _>>()?;
        let chain: Vec<ScopeId> = self.chain(scope).map(|(id, _)| id).collect();
        if let Some(stray) = owners.iter().find(|o| !chain.contains(o)) {
            return Err(SemanticError::Internal {
                message: format!("signature mentions a type owned by unrelated scope #{}", stray.0),
                span: Some(span),
            });
        }
        for id in &chain {
            if let Some(found) = self.scope(*id)?.function_types.get(&key) {
                return Ok(*found);
            }
        }

        let owner = chain
            .iter()
            .copied()
            .find(|id| owners.contains(id))
            .filter(|id| !self.scopes.is_base(id.index()))
            .unwrap_or(self.module);
        let id = self.types.add(
            TypeKind::Function {
                params: key.0.clone(),
                ret: key.1,
            },
            owner,
        );
        self.scope_mut(owner)?.function_types.insert(key, id);
        Ok(id)
    }

    pub fn derive(&mut self, base: TypeId, derivation: Derivation, span: Span) -> Result<TypeId, SemanticError> {
        let (id, created) = self.types.derive(base, derivation, span)?;
        if created {
            self.register_intrinsics(id, span)?;
        }
        Ok(id)
    }

    pub fn optional_of(&mut self, base: TypeId, span: Span) -> Result<TypeId, SemanticError> {
        self.derive(base, Derivation::Optional, span)
    }

    pub fn reference_of(&mut self, base: TypeId, span: Span) -> Result<TypeId, SemanticError> {
        self.derive(base, Derivation::Reference, span)
    }

    pub fn slice_of(&mut self, base: TypeId, span: Span) -> Result<TypeId, SemanticError> {
        self.derive(base, Derivation::Slice, span)
    }

    pub fn array_of(&mut self, base: TypeId, length: u64, span: Span) -> Result<TypeId, SemanticError> {
        self.derive(base, Derivation::Array(length), span)
    }

    pub fn anonymous_struct(&mut self, fields: Vec<Field>) -> TypeId {
        self.types.anonymous_struct(fields)
    }

    /// Indexing, length and presence checks for a new derived type, in the
    /// scope that owns it.
    fn register_intrinsics(&mut self, ty: TypeId, span: Span) -> Result<(), SemanticError> {
        let TypeData { kind, owner, .. } = self.types.get(ty)?.clone();
        let (i32, bool) = (self.builtin.i32, self.builtin.bool);
        match kind {
            TypeKind::Array { element, length } => {
                let element = self.reference_of(element, span)?;
                self.add_intrinsic(owner, ty, vec![ty, i32], ops::INDEX, Some(element), Intrinsic::ArrayIndex, span)?;
                self.add_intrinsic(
                    owner,
                    ty,
                    Vec::new(),
                    ops::LENGTH,
                    Some(i32),
                    Intrinsic::ArrayLength { length },
                    span,
                )?;
            }
            TypeKind::Slice(element) => {
                let element = self.reference_of(element, span)?;
                self.add_intrinsic(owner, ty, vec![ty, i32], ops::INDEX, Some(element), Intrinsic::SliceIndex, span)?;
                self.add_intrinsic(owner, ty, vec![ty], ops::LENGTH, Some(i32), Intrinsic::SliceLength, span)?;
            }
            TypeKind::Optional(_) => {
                self.add_intrinsic(owner, ty, vec![ty], ops::HAS_VALUE, Some(bool), Intrinsic::OptionalHasValue, span)?;
            }
            _ => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_intrinsic(
        &mut self,
        scope: ScopeId,
        receiver: TypeId,
        args: Vec<TypeId>,
        name: &str,
        ret: Option<TypeId>,
        intrinsic: Intrinsic,
        span: Span,
    ) -> Result<VariableId, SemanticError> {
        let ty = self.get_function_type(scope, args.clone(), ret, span)?;
        let method = self.declare(Variable {
            name: name.to_string(),
            ty,
            scope,
            kind: VariableKind::Builtin(intrinsic),
        });
        self.add_method(scope, MethodKey::new(Some(receiver), args, name), method)?;
        Ok(method)
    }

    /// Resolve written type syntax to a canonical handle.
    pub fn resolve_type_expr(&mut self, ty: &TypeExpr, scope: ScopeId) -> Result<TypeId, SemanticError> {
        match &ty.kind {
            TypeExprKind::Named(name) => {
                let id = self
                    .find_type(scope, name)
                    .ok_or_else(|| SemanticError::undefined(NameKind::Type, name.clone(), ty.span))?;
                self.types.resolve(id, ty.span)
            }
            TypeExprKind::Array { element, length } => {
                let element = self.resolve_type_expr(element, scope)?;
                self.array_of(element, *length, ty.span)
            }
            TypeExprKind::Optional(inner) => {
                let inner = self.resolve_type_expr(inner, scope)?;
                self.optional_of(inner, ty.span)
            }
            TypeExprKind::Reference(inner) => {
                let inner = self.resolve_type_expr(inner, scope)?;
                self.reference_of(inner, ty.span)
            }
            TypeExprKind::Slice(inner) => {
                let inner = self.resolve_type_expr(inner, scope)?;
                self.slice_of(inner, ty.span)
            }
            TypeExprKind::Function { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_type_expr(p, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let ret = match ret {
                    Some(ret) => Some(self.resolve_type_expr(ret, scope)?),
                    None => None,
                };
                self.get_function_type(scope, params, ret, ty.span)
            }
            TypeExprKind::Struct(decls) => {
                let fields = self.resolve_fields(decls, scope)?;
                Ok(self.anonymous_struct(fields))
            }
        }
    }

    pub(crate) fn resolve_fields(
        &mut self,
        decls: &[rain_ast::FieldDecl],
        scope: ScopeId,
    ) -> Result<Vec<Field>, SemanticError> {
        let mut fields: Vec<Field> = Vec::with_capacity(decls.len());
        for decl in decls {
            if fields.iter().any(|f| f.name == decl.name.node) {
                return Err(SemanticError::syntax(
                    format!("field `{}` is declared twice", decl.name.node),
                    decl.name.span,
                ));
            }
            let ty = self.resolve_type_expr(&decl.ty, scope)?;
            fields.push(Field {
                name: decl.name.node.clone(),
                ty,
            });
        }
        Ok(fields)
    }
}
