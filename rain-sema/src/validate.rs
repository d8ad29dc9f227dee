#![forbid(unsafe_code)]

use rain_ast::{
    BinaryOp, Expr, ExprKind, Extern, Function, FunctionSignature, Implementation, MethodTarget, ScopeId,
    SelfParam, Span, TypeDeclBody, TypeId, UnaryOp, VariableId,
};
use tracing::debug;

use crate::comptime::{CompileTimeEligibility, check_compile_time, check_constant_slices};
use crate::error::{NameKind, SemanticError};
use crate::ops;
use crate::scope::{MethodKey, ScopeKind, ScopeTree};
use crate::types::{Field, InterfaceMethod, TypeKind};
use crate::var::{Storage, Variable, VariableKind};

/// Fails fast: the first error ends the pass.
pub(crate) struct Validator<'a> {
    tree: &'a mut ScopeTree,
    policy: &'a dyn CompileTimeEligibility,
    /// Declared return types of the functions being validated, innermost last.
    returns: Vec<Option<TypeId>>,
}

struct Signature {
    receiver: Option<TypeId>,
    params: Vec<TypeId>,
    ret: Option<TypeId>,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(tree: &'a mut ScopeTree, policy: &'a dyn CompileTimeEligibility) -> Self {
        Self {
            tree,
            policy,
            returns: Vec::new(),
        }
    }

    pub(crate) fn module(&mut self, items: &mut [Expr], scope: ScopeId) -> Result<(), SemanticError> {
        debug!(items = items.len(), "validating module");
        self.register_types(items, scope)?;
        self.define_types(items, scope)?;
        self.declare_functions(items, scope)?;
        for item in items.iter_mut() {
            if matches!(item.kind, ExprKind::Let(_)) {
                self.global_let(item, scope)?;
            }
        }
        for item in items.iter_mut() {
            self.define_function(item, scope)?;
            item.validated = true;
        }
        debug!("module validated");
        Ok(())
    }

    fn register_types(&mut self, items: &mut [Expr], scope: ScopeId) -> Result<(), SemanticError> {
        for item in items.iter_mut() {
            match &mut item.kind {
                ExprKind::Type(decl) => {
                    let name = decl.name.node.clone();
                    let kind = match decl.body {
                        TypeDeclBody::Struct(_) => TypeKind::Struct {
                            name: Some(name.clone()),
                            fields: Vec::new(),
                            simd: false,
                        },
                        TypeDeclBody::Interface(_) => TypeKind::Interface {
                            name: name.clone(),
                            methods: Vec::new(),
                        },
                        TypeDeclBody::Alias(_) => TypeKind::Unresolved {
                            name: name.clone(),
                            target: None,
                        },
                    };
                    let id = self.tree.types_mut().add(kind, scope);
                    if self.tree.add_type(scope, &name, id)?.is_some() {
                        return Err(SemanticError::syntax(
                            format!("type `{name}` is declared twice"),
                            decl.name.span,
                        ));
                    }
                    decl.ty = Some(id);
                }
                ExprKind::Let(_)
                | ExprKind::Function(_)
                | ExprKind::FunctionDeclaration(_)
                | ExprKind::Export(_)
                | ExprKind::Extern(_)
                | ExprKind::Implementation(_) => {}
                _ => {
                    return Err(SemanticError::syntax(
                        format!("{} is not allowed at the top level", item.kind_name()),
                        item.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn define_types(&mut self, items: &[Expr], scope: ScopeId) -> Result<(), SemanticError> {
        // Aliases first, in order, so struct fields may name them.
        for item in items.iter() {
            if let ExprKind::Type(decl) = &item.kind {
                if let TypeDeclBody::Alias(target) = &decl.body {
                    let id = declared(decl.ty, item.span)?;
                    let resolved = self.tree.resolve_type_expr(target, scope)?;
                    self.tree.types_mut().bind(id, resolved).map_err(|e| e.at(decl.name.span))?;
                    debug!(alias = %decl.name.node, target = %self.tree.display(resolved), "bound type alias");
                }
            }
        }

        for item in items.iter() {
            let ExprKind::Type(decl) = &item.kind else { continue };
            let id = declared(decl.ty, item.span)?;
            match &decl.body {
                TypeDeclBody::Struct(decls) => {
                    let fields = self.tree.resolve_fields(decls, scope)?;
                    self.tree.types_mut().define_struct(id, fields)?;
                }
                TypeDeclBody::Interface(signatures) => {
                    let mut methods = Vec::with_capacity(signatures.len());
                    for signature in signatures {
                        let name = signature.name.as_ref().ok_or_else(|| {
                            SemanticError::syntax("interface methods need a name", signature.span)
                        })?;
                        let params = signature
                            .params
                            .iter()
                            .map(|p| self.tree.resolve_type_expr(&p.ty, scope))
                            .collect::<Result<Vec<_>, _>>()?;
                        let ret = match &signature.ret {
                            Some(ret) => Some(self.tree.resolve_type_expr(ret, scope)?),
                            None => None,
                        };
                        methods.push(InterfaceMethod {
                            name: name.node.clone(),
                            self_param: signature.self_param.as_ref().map(|s| s.node),
                            params,
                            ret,
                        });
                    }
                    self.tree.types_mut().define_interface(id, methods)?;
                }
                TypeDeclBody::Alias(_) => continue,
            }
            debug!(name = %decl.name.node, "defined type");
        }

        for item in items.iter() {
            let ExprKind::Type(decl) = &item.kind else { continue };
            if !matches!(decl.body, TypeDeclBody::Struct(_)) {
                continue;
            }
            let id = declared(decl.ty, item.span)?;
            if self.tree.types().contains_by_value(id, id) {
                return Err(SemanticError::syntax(
                    format!("struct `{}` contains itself by value", decl.name.node),
                    decl.name.span,
                ));
            }
        }
        Ok(())
    }

    fn declare_functions(&mut self, items: &mut [Expr], scope: ScopeId) -> Result<(), SemanticError> {
        for item in items.iter_mut() {
            let span = item.span;
            match &mut item.kind {
                ExprKind::Function(function) => {
                    self.declare_function(&mut function.signature, scope, false, true)?;
                }
                ExprKind::FunctionDeclaration(signature) => {
                    self.declare_function(signature, scope, false, false)?;
                }
                ExprKind::Export(inner) => match &mut inner.kind {
                    ExprKind::Function(function) => {
                        self.declare_function(&mut function.signature, scope, true, true)?;
                    }
                    _ => return Err(SemanticError::syntax("only functions can be exported", span)),
                },
                ExprKind::Extern(import) => self.declare_extern(import, scope)?,
                ExprKind::Implementation(implementation) => self.declare_implementation(implementation, scope)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn signature(&mut self, signature: &FunctionSignature, scope: ScopeId) -> Result<Signature, SemanticError> {
        let receiver = match &signature.receiver {
            Some(receiver) => Some(self.tree.resolve_type_expr(receiver, scope)?),
            None => None,
        };
        let mut params = Vec::with_capacity(signature.params.len() + 1);
        if let Some(self_param) = &signature.self_param {
            let receiver = receiver
                .ok_or_else(|| SemanticError::syntax("`self` is only allowed on methods", self_param.span))?;
            params.push(match self_param.node {
                SelfParam::Value => receiver,
                SelfParam::Reference => self.tree.reference_of(receiver, self_param.span)?,
            });
        }
        for param in &signature.params {
            params.push(self.tree.resolve_type_expr(&param.ty, scope)?);
        }
        let ret = match &signature.ret {
            Some(ret) => Some(self.tree.resolve_type_expr(ret, scope)?),
            None => None,
        };
        Ok(Signature { receiver, params, ret })
    }

    fn key_args(&self, types: &[TypeId]) -> Vec<TypeId> {
        types.iter().map(|t| self.tree.types().deref(*t)).collect()
    }

    fn declare_function(
        &mut self,
        signature: &mut FunctionSignature,
        scope: ScopeId,
        exported: bool,
        defined: bool,
    ) -> Result<VariableId, SemanticError> {
        let name = signature
            .name
            .clone()
            .ok_or_else(|| SemanticError::syntax("functions need a name", signature.span))?;
        let Signature { receiver, params, ret } = self.signature(signature, scope)?;
        let ty = self.tree.get_function_type(scope, params.clone(), ret, signature.span)?;
        signature.ty = Some(ty);
        let key = MethodKey::new(receiver, self.key_args(&params), name.node.clone());

        let existing = self.tree.scope(scope)?.local_method(&key);
        if let Some(existing) = existing {
            let variable = self.tree.variable_mut(existing)?;
            let same_type = variable.ty == ty;
            match &mut variable.kind {
                VariableKind::Function {
                    defined: was_defined,
                    exported: was_exported,
                    ..
                } if same_type => {
                    if *was_defined && defined {
                        return Err(SemanticError::syntax(
                            format!("function `{}` is defined twice", name.node),
                            name.span,
                        ));
                    }
                    *was_defined |= defined;
                    *was_exported |= exported;
                }
                _ => {
                    return Err(SemanticError::syntax(
                        format!("`{}` is already declared with these parameters", name.node),
                        name.span,
                    ));
                }
            }
            signature.variable = Some(existing);
            return Ok(existing);
        }

        let variable = self.tree.declare(Variable {
            name: name.node.clone(),
            ty,
            scope,
            kind: VariableKind::Function {
                receiver,
                self_param: signature.self_param.as_ref().map(|s| s.node),
                exported,
                defined,
            },
        });
        self.tree.add_method(scope, key, variable)?;
        if receiver.is_none() {
            self.tree.bind_variable(scope, &name.node, variable)?;
        }
        signature.variable = Some(variable);
        debug!(function = %name.node, ty = %self.tree.display(ty), "declared function");
        Ok(variable)
    }

    fn declare_extern(&mut self, import: &mut Extern, scope: ScopeId) -> Result<(), SemanticError> {
        let signature = &mut import.signature;
        let Some(last) = import.keys.last() else {
            return Err(SemanticError::syntax("extern needs at least one import key", signature.span));
        };
        let namespace = &import.keys[0];
        if namespace.node != "js" {
            return Err(SemanticError::syntax(
                format!("unsupported extern namespace `{}`; only `js` is available", namespace.node),
                namespace.span,
            ));
        }
        if import.keys.len() != 3 {
            return Err(SemanticError::syntax(
                format!(
                    "`js` externs take three keys (`js`, module, function), found {}",
                    import.keys.len()
                ),
                last.span,
            ));
        }
        if let Some(receiver) = &signature.receiver {
            return Err(SemanticError::syntax("extern functions cannot be methods", receiver.span));
        }
        let name = signature.name.clone().unwrap_or_else(|| last.clone());
        let keys: Vec<String> = import.keys.iter().map(|k| k.node.clone()).collect();

        let Signature { params, ret, .. } = self.signature(signature, scope)?;
        let ty = self.tree.get_function_type(scope, params.clone(), ret, signature.span)?;
        let compile_time = self.policy.is_eligible(&keys);
        import.compile_time_runnable = compile_time;

        let key = MethodKey::new(None, self.key_args(&params), name.node.clone());
        if self.tree.scope(scope)?.local_method(&key).is_some() {
            return Err(SemanticError::syntax(
                format!("`{}` is already declared with these parameters", name.node),
                name.span,
            ));
        }
        let variable = self.tree.declare(Variable {
            name: name.node.clone(),
            ty,
            scope,
            kind: VariableKind::External { keys, compile_time },
        });
        self.tree.add_method(scope, key, variable)?;
        self.tree.bind_variable(scope, &name.node, variable)?;
        signature.ty = Some(ty);
        signature.variable = Some(variable);
        debug!(function = %name.node, compile_time, "declared extern");
        Ok(())
    }

    fn declare_implementation(
        &mut self,
        implementation: &mut Implementation,
        scope: ScopeId,
    ) -> Result<(), SemanticError> {
        let implementer = self.tree.resolve_type_expr(&implementation.implementer, scope)?;
        let interface = self.tree.resolve_type_expr(&implementation.interface, scope)?;
        let required = match self.tree.types().kind(interface)? {
            TypeKind::Interface { methods, .. } => methods.clone(),
            _ => {
                return Err(SemanticError::syntax(
                    format!("`{}` is not an interface", self.tree.display(interface)),
                    implementation.interface.span,
                ));
            }
        };

        for method in implementation.methods.iter_mut() {
            if method.signature.receiver.is_none() {
                method.signature.receiver = Some(implementation.implementer.clone());
            }
            self.declare_function(&mut method.signature, scope, false, true)?;
        }

        for method in &required {
            if !self.implements(scope, implementer, method)? {
                return Err(SemanticError::undefined(
                    NameKind::Method,
                    format!("{}.{}", self.tree.display(implementer), method.name),
                    implementation.implementer.span,
                ));
            }
        }
        Ok(())
    }

    fn implements(
        &self,
        scope: ScopeId,
        implementer: TypeId,
        required: &InterfaceMethod,
    ) -> Result<bool, SemanticError> {
        let mut args = Vec::with_capacity(required.params.len() + 1);
        if required.self_param.is_some() {
            args.push(implementer);
        }
        args.extend(self.key_args(&required.params));
        let key = MethodKey::new(Some(implementer), args, required.name.clone());
        let Some(found) = self.tree.scope(scope)?.local_method(&key) else {
            return Ok(false);
        };
        let variable = self.tree.variable(found)?;
        let (_, ret) = self.tree.signature(variable.ty)?;
        let self_param = match variable.kind {
            VariableKind::Function { self_param, .. } => self_param,
            _ => None,
        };
        Ok(ret == required.ret && self_param == required.self_param)
    }

    /// Module-level `let`: an immutable global whose value is computed while
    /// compiling.
    fn global_let(&mut self, item: &mut Expr, scope: ScopeId) -> Result<(), SemanticError> {
        let ExprKind::Let(binding) = &mut item.kind else {
            return Ok(());
        };
        self.expr(&mut binding.value, scope)?;
        let ty = binding.value.ty.ok_or_else(|| {
            SemanticError::syntax(
                format!("`{}` is initialized with an expression that has no value", binding.name.node),
                binding.value.span,
            )
        })?;
        check_compile_time(self.tree, &binding.value)?;
        if !self.tree.types().is_materializable(ty) {
            return Err(SemanticError::syntax(
                format!(
                    "global `{}` of type `{}` cannot be computed at compile time",
                    binding.name.node,
                    self.tree.display(ty)
                ),
                binding.value.span,
            ));
        }
        check_constant_slices(self.tree, &binding.value, ty)?;
        let variable = self.tree.add_variable(Variable {
            name: binding.name.node.clone(),
            ty,
            scope,
            kind: VariableKind::Local {
                mutable: false,
                storage: Storage::Global,
            },
        })?;
        binding.variable = Some(variable);
        debug!(global = %binding.name.node, ty = %self.tree.display(ty), "declared global");
        Ok(())
    }

    fn define_function(&mut self, item: &mut Expr, scope: ScopeId) -> Result<(), SemanticError> {
        match &mut item.kind {
            ExprKind::Function(function) => self.function_body(function, scope),
            ExprKind::Export(inner) => {
                if let ExprKind::Function(function) = &mut inner.kind {
                    self.function_body(function, scope)?;
                }
                inner.validated = true;
                Ok(())
            }
            ExprKind::Implementation(implementation) => {
                for method in implementation.methods.iter_mut() {
                    self.function_body(method, scope)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn function_body(&mut self, function: &mut Function, scope: ScopeId) -> Result<(), SemanticError> {
        let signature = &mut function.signature;
        let ty = declared(signature.ty, signature.span)?;
        let (params, ret) = {
            let (params, ret) = self.tree.signature(ty)?;
            (params.to_vec(), ret)
        };
        let frame = self.tree.new_frame(scope)?;

        let mut types = params.into_iter();
        if signature.self_param.is_some() {
            let ty = types
                .next()
                .ok_or_else(|| SemanticError::internal("method without a self parameter").at(signature.span))?;
            signature.self_variable = Some(self.tree.add_variable(parameter("self", ty, frame))?);
        }
        for (param, ty) in signature.params.iter_mut().zip(types) {
            param.variable = Some(self.tree.add_variable(parameter(&param.name.node, ty, frame))?);
        }

        self.returns.push(ret);
        let result = self.expr(&mut function.body, frame);
        self.returns.pop();
        result?;

        if let Some(ret) = ret {
            if !diverges(&function.body) && !self.coercible(&function.body, ret) {
                return Err(SemanticError::TypeMismatch {
                    expected: self.tree.display(ret),
                    found: self.describe(function.body.ty),
                    span: function.body.span,
                });
            }
        }
        debug!(function = ?function.signature.name.as_ref().map(|n| &n.node), "validated function body");
        Ok(())
    }

    fn describe(&self, ty: Option<TypeId>) -> String {
        match ty {
            Some(ty) => self.tree.display(ty),
            None => "nothing".to_string(),
        }
    }

    /// Value type of a validated child that must produce one.
    fn value_of(&self, expr: &Expr) -> Result<TypeId, SemanticError> {
        expr.ty.ok_or_else(|| {
            SemanticError::syntax(format!("this {} does not produce a value", expr.kind_name()), expr.span)
        })
    }

    pub(crate) fn expr(&mut self, expr: &mut Expr, scope: ScopeId) -> Result<(), SemanticError> {
        if expr.validated {
            return Err(SemanticError::internal("expression validated twice").at(expr.span));
        }
        let span = expr.span;
        let ty = match &mut expr.kind {
            ExprKind::Integer(value) => {
                let ids = self.tree.builtin();
                Some(if i32::try_from(*value).is_ok() { ids.i32 } else { ids.i64 })
            }
            ExprKind::Float(_) => Some(self.tree.builtin().f32),
            ExprKind::Boolean(_) => Some(self.tree.builtin().bool),
            ExprKind::String(_) => Some(self.tree.builtin().string),
            ExprKind::Null => None,

            ExprKind::Identifier(identifier) => {
                let name = &identifier.name.node;
                let found = self
                    .tree
                    .find_variable(scope, name)
                    .ok_or_else(|| SemanticError::undefined(NameKind::Variable, name.clone(), span))?;
                let variable = self.tree.variable(found)?;
                match variable.kind {
                    VariableKind::Local {
                        storage: Storage::Stack | Storage::Parameter,
                        ..
                    }
                    | VariableKind::UnwrappedOptional { .. } => {
                        if self.tree.scope(variable.scope)?.frame != self.tree.scope(scope)?.frame {
                            return Err(SemanticError::syntax(
                                format!("`{name}` belongs to an enclosing function and cannot be captured"),
                                span,
                            ));
                        }
                    }
                    VariableKind::Local { .. } => {}
                    VariableKind::Function { .. } | VariableKind::External { .. } | VariableKind::Builtin(_) => {
                        return Err(SemanticError::syntax(
                            format!("`{name}` is a function and can only be called"),
                            span,
                        ));
                    }
                }
                let ty = variable.ty;
                identifier.variable = Some(found);
                Some(ty)
            }

            ExprKind::Member(member) => {
                self.expr(&mut member.receiver, scope)?;
                let receiver = self.value_of(&member.receiver)?;
                let base = self.tree.types().deref(receiver);
                let field = match self.tree.types().kind(base)? {
                    TypeKind::Struct { fields, .. } => fields
                        .iter()
                        .enumerate()
                        .find(|(_, f)| f.name == member.name.node)
                        .map(|(i, f)| (i, f.ty)),
                    _ => None,
                };
                let (index, ty) = field.ok_or_else(|| {
                    SemanticError::undefined(
                        NameKind::Member,
                        format!("{}.{}", self.tree.display(base), member.name.node),
                        member.name.span,
                    )
                })?;
                member.field = Some(index);
                Some(ty)
            }

            ExprKind::Call(_) => self.call(expr, scope)?,

            ExprKind::Unary(unary) => {
                self.expr(&mut unary.operand, scope)?;
                let operand = self.value_of(&unary.operand)?;
                match ops::unary_method(unary.op.node) {
                    None => {
                        if self.place(&unary.operand)?.is_none() {
                            return Err(SemanticError::syntax(
                                "cannot take the address of a temporary value",
                                unary.operand.span,
                            ));
                        }
                        Some(self.tree.reference_of(operand, span)?)
                    }
                    Some(name) => {
                        let operand = self.tree.types().deref(operand);
                        let key = MethodKey::new(Some(operand), vec![operand], name);
                        let method = self.tree.find_method(scope, &key).ok_or_else(|| {
                            SemanticError::OperatorResolution {
                                op: name.to_string(),
                                operands: self.tree.display(operand),
                                lhs: unary.operand.span,
                                rhs: None,
                            }
                        })?;
                        unary.target = Some(MethodTarget {
                            method,
                            with_receiver: true,
                        });
                        self.returned(method)?
                    }
                }
            }

            ExprKind::Binary(binary) => {
                self.expr(&mut binary.lhs, scope)?;
                self.expr(&mut binary.rhs, scope)?;
                let lhs = self.value_of(&binary.lhs)?;
                match binary.op.node {
                    BinaryOp::Assign => {
                        if self.place(&binary.lhs)? != Some(true) {
                            return Err(SemanticError::syntax("cannot assign to this expression", binary.lhs.span));
                        }
                        if !self.coercible(&binary.rhs, lhs) {
                            return Err(SemanticError::TypeMismatch {
                                expected: self.tree.display(lhs),
                                found: self.describe(binary.rhs.ty),
                                span: binary.rhs.span,
                            });
                        }
                        None
                    }
                    op => {
                        let rhs = self.value_of(&binary.rhs)?;
                        let name = ops::binary_method(op)
                            .ok_or_else(|| SemanticError::internal("operator without a method name").at(span))?;
                        let (lhs, rhs) = (self.tree.types().deref(lhs), self.tree.types().deref(rhs));
                        let key = MethodKey::new(Some(lhs), vec![lhs, rhs], name);
                        let method = self.tree.find_method(scope, &key).ok_or_else(|| {
                            SemanticError::OperatorResolution {
                                op: name.to_string(),
                                operands: format!("{}, {}", self.tree.display(lhs), self.tree.display(rhs)),
                                lhs: binary.lhs.span,
                                rhs: Some(binary.rhs.span),
                            }
                        })?;
                        binary.target = Some(MethodTarget {
                            method,
                            with_receiver: true,
                        });
                        let ret = self.returned(method)?;
                        if op == BinaryOp::Index {
                            match ret.map(|r| self.tree.types().kind(r)).transpose()? {
                                Some(TypeKind::Reference(element)) => Some(*element),
                                _ => {
                                    return Err(SemanticError::syntax(
                                        format!("`{name}` must return a reference"),
                                        binary.op.span,
                                    ));
                                }
                            }
                        } else {
                            ret
                        }
                    }
                }
            }

            ExprKind::Cast(cast) => {
                self.expr(&mut cast.value, scope)?;
                let source = self.tree.types().deref(self.value_of(&cast.value)?);
                let target = self.tree.resolve_type_expr(&cast.to, scope)?;
                let key = MethodKey::new(Some(target), vec![source], ops::CAST);
                let method =
                    self.tree
                        .find_method(scope, &key)
                        .ok_or_else(|| SemanticError::OperatorResolution {
                            op: ops::CAST.to_string(),
                            operands: format!("{} as {}", self.tree.display(source), self.tree.display(target)),
                            lhs: cast.value.span,
                            rhs: Some(cast.to.span),
                        })?;
                cast.target = Some(MethodTarget {
                    method,
                    with_receiver: false,
                });
                self.returned(method)?
            }

            ExprKind::Parenthesis(inner) => {
                self.expr(inner, scope)?;
                inner.ty
            }

            ExprKind::CompileTime(inner) => {
                self.expr(inner, scope)?;
                let ty = self.value_of(inner)?;
                check_compile_time(self.tree, inner)?;
                if !self.tree.types().is_materializable(ty) {
                    return Err(SemanticError::syntax(
                        format!("a value of type `{}` cannot be computed at compile time", self.tree.display(ty)),
                        span,
                    ));
                }
                check_constant_slices(self.tree, inner, ty)?;
                Some(ty)
            }

            ExprKind::Let(binding) => {
                self.expr(&mut binding.value, scope)?;
                let ty = binding.value.ty.ok_or_else(|| {
                    SemanticError::syntax(
                        format!("`{}` is initialized with an expression that has no value", binding.name.node),
                        binding.value.span,
                    )
                })?;
                let variable = self.tree.add_variable(Variable {
                    name: binding.name.node.clone(),
                    ty,
                    scope,
                    kind: VariableKind::Local {
                        mutable: true,
                        storage: Storage::Stack,
                    },
                })?;
                binding.variable = Some(variable);
                None
            }

            ExprKind::Block(block) => {
                let inner = self.tree.new_scope(scope, ScopeKind::Block)?;
                block.scope = Some(inner);
                for item in block.items.iter_mut() {
                    self.block_item(item, inner)?;
                }
                block.items.last().and_then(|last| last.ty)
            }

            ExprKind::If(branch) => {
                self.condition(&mut branch.cond, scope)?;
                let then_scope = self.tree.new_scope(scope, ScopeKind::Block)?;
                self.unwrap_optional(&branch.cond, then_scope)?;
                self.expr(&mut branch.then_branch, then_scope)?;
                let then_diverges = diverges(&branch.then_branch);
                match &mut branch.else_branch {
                    None => match branch.then_branch.ty {
                        Some(ty) if !then_diverges => Some(self.tree.optional_of(ty, span)?),
                        _ => None,
                    },
                    Some(otherwise) => {
                        self.expr(otherwise, scope)?;
                        if then_diverges {
                            otherwise.ty
                        } else if diverges(otherwise) || branch.then_branch.ty == otherwise.ty {
                            branch.then_branch.ty
                        } else {
                            return Err(SemanticError::IfTypeMismatch {
                                then_ty: self.describe(branch.then_branch.ty),
                                else_ty: self.describe(otherwise.ty),
                                then_span: branch.then_branch.span,
                                else_span: otherwise.span,
                            });
                        }
                    }
                }
            }

            ExprKind::While(repeat) => {
                self.condition(&mut repeat.cond, scope)?;
                self.expr(&mut repeat.body, scope)?;
                match &mut repeat.else_branch {
                    Some(otherwise) => {
                        self.expr(otherwise, scope)?;
                        if repeat.body.ty == otherwise.ty { otherwise.ty } else { None }
                    }
                    None => None,
                }
            }

            ExprKind::Return(value) => {
                let expected = *self
                    .returns
                    .last()
                    .ok_or_else(|| SemanticError::syntax("`return` outside of a function", span))?;
                if let Some(value) = value {
                    self.expr(value, scope)?;
                }
                let ok = match (expected, value.as_deref()) {
                    (Some(expected), Some(value)) => self.coercible(value, expected),
                    (None, Some(value)) => value.ty.is_none(),
                    (expected, None) => expected.is_none(),
                };
                if !ok {
                    return Err(SemanticError::TypeMismatch {
                        expected: self.describe(expected),
                        found: self.describe(value.as_ref().and_then(|v| v.ty)),
                        span,
                    });
                }
                None
            }

            ExprKind::StructLiteral(literal) => {
                let ty = self.tree.resolve_type_expr(&literal.ty, scope)?;
                let fields: Vec<Field> = match self.tree.types().kind(ty)? {
                    TypeKind::Struct { fields, .. } => fields.clone(),
                    _ => {
                        return Err(SemanticError::syntax(
                            format!("`{}` is not a struct", self.tree.display(ty)),
                            literal.ty.span,
                        ));
                    }
                };
                let mut seen = Vec::with_capacity(literal.fields.len());
                for init in literal.fields.iter_mut() {
                    let index = fields.iter().position(|f| f.name == init.name.node).ok_or_else(|| {
                        SemanticError::undefined(
                            NameKind::Member,
                            format!("{}.{}", self.tree.display(ty), init.name.node),
                            init.name.span,
                        )
                    })?;
                    if seen.contains(&index) {
                        return Err(SemanticError::syntax(
                            format!("field `{}` is initialized twice", init.name.node),
                            init.name.span,
                        ));
                    }
                    seen.push(index);
                    self.expr(&mut init.value, scope)?;
                    self.expect(&init.value, fields[index].ty)?;
                    init.index = Some(index);
                }
                Some(ty)
            }

            ExprKind::ArrayLiteral(literal) => {
                let ty = self.tree.resolve_type_expr(&literal.ty, scope)?;
                let (element, length) = match self.tree.types().kind(ty)? {
                    TypeKind::Array { element, length } => (*element, *length),
                    _ => {
                        return Err(SemanticError::syntax(
                            format!("`{}` is not an array type", self.tree.display(ty)),
                            literal.ty.span,
                        ));
                    }
                };
                if literal.elements.len() as u64 > length {
                    return Err(SemanticError::syntax(
                        format!(
                            "{} elements do not fit in `{}`",
                            literal.elements.len(),
                            self.tree.display(ty)
                        ),
                        span,
                    ));
                }
                for element_expr in literal.elements.iter_mut() {
                    self.expr(element_expr, scope)?;
                    self.expect(element_expr, element)?;
                }
                Some(ty)
            }

            ExprKind::SliceLiteral(literal) => {
                let element = self.tree.resolve_type_expr(&literal.element, scope)?;
                for element_expr in literal.elements.iter_mut() {
                    self.expr(element_expr, scope)?;
                    self.expect(element_expr, element)?;
                }
                Some(self.tree.slice_of(element, span)?)
            }

            ExprKind::Tuple(items) => {
                let mut fields = Vec::with_capacity(items.len());
                for (i, item) in items.iter_mut().enumerate() {
                    self.expr(item, scope)?;
                    fields.push(Field {
                        name: i.to_string(),
                        ty: self.value_of(item)?,
                    });
                }
                Some(self.tree.anonymous_struct(fields))
            }

            ExprKind::Function(_)
            | ExprKind::FunctionDeclaration(_)
            | ExprKind::Export(_)
            | ExprKind::Extern(_)
            | ExprKind::Type(_)
            | ExprKind::Implementation(_) => {
                return Err(SemanticError::syntax(
                    format!("{} is only allowed at the top level", expr.kind_name()),
                    span,
                ));
            }
        };
        expr.ty = ty;
        expr.validated = true;
        Ok(())
    }

    /// Items of a block. Functions may be nested here; they are callable
    /// from the point of declaration on.
    fn block_item(&mut self, item: &mut Expr, scope: ScopeId) -> Result<(), SemanticError> {
        match &mut item.kind {
            ExprKind::Function(function) => {
                self.declare_function(&mut function.signature, scope, false, true)?;
                self.function_body(function, scope)?;
                item.validated = true;
                Ok(())
            }
            _ => self.expr(item, scope),
        }
    }

    fn call(&mut self, expr: &mut Expr, scope: ScopeId) -> Result<Option<TypeId>, SemanticError> {
        let span = expr.span;
        let ExprKind::Call(call) = &mut expr.kind else {
            return Err(SemanticError::internal("expected a call").at(span));
        };

        match &mut call.callee.kind {
            ExprKind::Member(member) => {
                self.expr(&mut member.receiver, scope)?;
                let receiver = self.tree.types().deref(self.value_of(&member.receiver)?);
                let args = self.arguments(&mut call.args, scope)?;
                let name = member.name.node.clone();

                let mut explicit = Vec::with_capacity(args.len() + 1);
                explicit.push(receiver);
                explicit.extend(&args);
                let with = MethodKey::new(Some(receiver), explicit, name.clone());
                let without = MethodKey::new(Some(receiver), args.clone(), name.clone());
                let (method, with_receiver) = match self.tree.find_method(scope, &with) {
                    Some(method) => (method, true),
                    None => match self.tree.find_method(scope, &without) {
                        Some(method) => (method, false),
                        None => {
                            return Err(SemanticError::undefined(
                                NameKind::Method,
                                format!("{}.{}({})", self.tree.display(receiver), name, self.list(&args)),
                                member.name.span,
                            ));
                        }
                    },
                };
                call.target = Some(MethodTarget { method, with_receiver });
                call.callee.ty = Some(self.tree.variable(method)?.ty);
                call.callee.validated = true;
                self.returned(method)
            }
            ExprKind::Identifier(identifier) => {
                let args = self.arguments(&mut call.args, scope)?;
                let name = identifier.name.node.clone();
                let key = MethodKey::new(None, args.clone(), name.clone());
                let Some(method) = self.tree.find_method(scope, &key) else {
                    return Err(match self.tree.find_variable(scope, &name) {
                        Some(found) if self.tree.variable(found)?.is_callable() => SemanticError::undefined(
                            NameKind::Function,
                            format!("{name}({})", self.list(&args)),
                            identifier.name.span,
                        ),
                        Some(_) => SemanticError::syntax(format!("`{name}` is not a function"), identifier.name.span),
                        None => SemanticError::undefined(NameKind::Variable, name, identifier.name.span),
                    });
                };
                identifier.variable = Some(method);
                call.target = Some(MethodTarget {
                    method,
                    with_receiver: false,
                });
                call.callee.ty = Some(self.tree.variable(method)?.ty);
                call.callee.validated = true;
                self.returned(method)
            }
            _ => Err(SemanticError::syntax(
                "only named functions and methods can be called",
                call.callee.span,
            )),
        }
    }

    /// Validate call arguments; returns their types with references stripped.
    fn arguments(&mut self, args: &mut [Expr], scope: ScopeId) -> Result<Vec<TypeId>, SemanticError> {
        let mut types = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            self.expr(arg, scope)?;
            types.push(self.tree.types().deref(self.value_of(arg)?));
        }
        Ok(types)
    }

    fn list(&self, types: &[TypeId]) -> String {
        types.iter().map(|t| self.tree.display(*t)).collect::<Vec<_>>().join(", ")
    }

    fn returned(&self, method: VariableId) -> Result<Option<TypeId>, SemanticError> {
        let ty = self.tree.variable(method)?.ty;
        Ok(self.tree.signature(ty)?.1)
    }

    fn condition(&mut self, cond: &mut Expr, scope: ScopeId) -> Result<(), SemanticError> {
        self.expr(cond, scope)?;
        let bool = self.tree.builtin().bool;
        if cond.ty != Some(bool) {
            return Err(SemanticError::TypeMismatch {
                expected: self.tree.display(bool),
                found: self.describe(cond.ty),
                span: cond.span,
            });
        }
        Ok(())
    }

    /// `if ?x` makes the payload of `x` visible as `x` in the then branch.
    fn unwrap_optional(&mut self, cond: &Expr, then_scope: ScopeId) -> Result<(), SemanticError> {
        let ExprKind::Unary(unary) = &cond.kind else { return Ok(()) };
        if unary.op.node != UnaryOp::HasValue {
            return Ok(());
        }
        let ExprKind::Identifier(identifier) = &unary.operand.kind else { return Ok(()) };
        let Some(wraps) = identifier.variable else { return Ok(()) };
        let Some(inner) = self.tree.types().optional_inner(self.tree.variable(wraps)?.ty) else {
            return Ok(());
        };
        self.tree.add_variable(Variable {
            name: identifier.name.node.clone(),
            ty: inner,
            scope: then_scope,
            kind: VariableKind::UnwrappedOptional { wraps },
        })?;
        Ok(())
    }

    fn expect(&self, expr: &Expr, ty: TypeId) -> Result<(), SemanticError> {
        if self.coercible(expr, ty) {
            return Ok(());
        }
        Err(SemanticError::TypeMismatch {
            expected: self.tree.display(ty),
            found: self.describe(expr.ty),
            span: expr.span,
        })
    }

    /// Same type, a value into its optional, or `null` into any optional.
    fn coercible(&self, expr: &Expr, target: TypeId) -> bool {
        let wrapped = self.tree.types().optional_inner(target);
        match expr.ty {
            Some(ty) => ty == target || wrapped == Some(ty),
            None => wrapped.is_some() && is_null(expr),
        }
    }

    /// `Some(mutable)` when `expr` names a storage location.
    fn place(&self, expr: &Expr) -> Result<Option<bool>, SemanticError> {
        Ok(match &expr.kind {
            ExprKind::Identifier(identifier) => {
                let variable = identifier
                    .variable
                    .ok_or_else(|| SemanticError::internal("unresolved identifier").at(expr.span))?;
                match self.tree.variable(variable)?.kind {
                    VariableKind::Local { mutable, .. } => Some(mutable),
                    VariableKind::UnwrappedOptional { .. } => Some(false),
                    _ => None,
                }
            }
            ExprKind::Member(member) => {
                if self.is_reference(member.receiver.ty)? {
                    Some(true)
                } else {
                    self.place(&member.receiver)?
                }
            }
            ExprKind::Binary(binary) if binary.op.node == BinaryOp::Index => {
                let through = match binary.lhs.ty {
                    Some(ty) => matches!(
                        self.tree.types().kind(ty)?,
                        TypeKind::Reference(_) | TypeKind::Slice(_)
                    ),
                    None => false,
                };
                if through { Some(true) } else { self.place(&binary.lhs)? }
            }
            ExprKind::Parenthesis(inner) => self.place(inner)?,
            _ => None,
        })
    }

    fn is_reference(&self, ty: Option<TypeId>) -> Result<bool, SemanticError> {
        match ty {
            Some(ty) => Ok(matches!(self.tree.types().kind(ty)?, TypeKind::Reference(_))),
            None => Ok(false),
        }
    }
}

fn declared(ty: Option<TypeId>, span: Span) -> Result<TypeId, SemanticError> {
    ty.ok_or_else(|| SemanticError::internal("declaration without a registered type").at(span))
}

fn parameter(name: &str, ty: TypeId, scope: ScopeId) -> Variable {
    Variable {
        name: name.to_string(),
        ty,
        scope,
        kind: VariableKind::Local {
            mutable: false,
            storage: Storage::Parameter,
        },
    }
}

fn is_null(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Null => true,
        ExprKind::Parenthesis(inner) => is_null(inner),
        _ => false,
    }
}

/// True when control never reaches the end of `expr`.
pub fn diverges(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Return(_) => true,
        ExprKind::Block(block) => block.items.iter().any(diverges),
        ExprKind::If(branch) => match &branch.else_branch {
            Some(otherwise) => diverges(&branch.then_branch) && diverges(otherwise),
            None => false,
        },
        ExprKind::Parenthesis(inner) => diverges(inner),
        _ => false,
    }
}
