#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use rain_ast::{Expr, ExprKind, Extern, Function, FunctionSignature, Let, Span, TypeId, VariableId};
use rain_ir::{FuncId, GlobalId, HostFunctions, InstKind, InterpreterLimits, Linkage, Module, Type};
use rain_sema::{ScopeTree, VariableKind};
use tracing::debug;

use crate::CodegenOptions;
use crate::error::CodegenError;
use crate::lower::FunctionLowering;
use crate::policy::ExternPolicy;

/// Module-wide lowering state. Function bodies are lowered from a queue so
/// that a compile-time expression can force the bodies it calls into
/// existence before it runs.
pub(crate) struct Generator<'a> {
    pub(crate) tree: &'a ScopeTree,
    pub(crate) policy: &'a dyn ExternPolicy,
    pub(crate) limits: InterpreterLimits,
    pub(crate) module: Module,
    pub(crate) hosts: HostFunctions,
    pub(crate) types: HashMap<TypeId, Type>,
    pub(crate) functions: HashMap<VariableId, FuncId>,
    pub(crate) globals: HashMap<VariableId, GlobalId>,
    pub(crate) strings: HashMap<Vec<u8>, GlobalId>,
    symbols: HashSet<String>,
    queue: VecDeque<FuncId>,
    bodies: HashMap<FuncId, &'a Function>,
    in_progress: HashSet<FuncId>,
    initializers: Vec<(GlobalId, &'a Expr)>,
}

impl<'a> Generator<'a> {
    pub(crate) fn new(
        tree: &'a ScopeTree,
        policy: &'a dyn ExternPolicy,
        options: &CodegenOptions,
    ) -> Result<Self, CodegenError> {
        Ok(Self {
            tree,
            policy,
            limits: options.limits,
            module: Module::new(options.module_name.clone(), options.triple.clone())?,
            hosts: HostFunctions::new(),
            types: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            strings: HashMap::new(),
            symbols: HashSet::new(),
            queue: VecDeque::new(),
            bodies: HashMap::new(),
            in_progress: HashSet::new(),
            initializers: Vec::new(),
        })
    }

    /// Create every function and global up front so bodies and initializers
    /// can refer to any of them.
    pub(crate) fn declare_items(&mut self, items: &'a [Expr]) -> Result<(), CodegenError> {
        // Imports and exports keep their source names; everything else is
        // renamed around them on collision.
        for item in items {
            match &item.kind {
                ExprKind::Extern(import) => self.declare_extern(import, item.span)?,
                ExprKind::Export(inner) => {
                    if let ExprKind::Function(function) = &inner.kind {
                        self.declare_defined(function)?;
                    }
                }
                _ => {}
            }
        }
        for item in items {
            match &item.kind {
                ExprKind::Function(function) => self.declare_defined(function)?,
                ExprKind::FunctionDeclaration(signature) => {
                    self.declare_function(signature)?;
                }
                ExprKind::Implementation(implementation) => {
                    for method in &implementation.methods {
                        self.declare_defined(method)?;
                    }
                }
                ExprKind::Let(binding) => self.declare_global(binding, item.span)?,
                _ => {}
            }
        }
        for item in items {
            self.declare_nested(item)?;
        }
        Ok(())
    }

    fn declare_nested(&mut self, expr: &'a Expr) -> Result<(), CodegenError> {
        for child in expr.children() {
            if let ExprKind::Function(function) = &child.kind {
                self.declare_defined(function)?;
            }
            self.declare_nested(child)?;
        }
        Ok(())
    }

    fn declare_defined(&mut self, function: &'a Function) -> Result<(), CodegenError> {
        let func = self.declare_function(&function.signature)?;
        if !self.bodies.contains_key(&func) && !self.in_progress.contains(&func) {
            self.bodies.insert(func, function);
            self.queue.push_back(func);
        }
        Ok(())
    }

    fn declare_function(&mut self, signature: &FunctionSignature) -> Result<FuncId, CodegenError> {
        let span = signature.span;
        let variable = signature
            .variable
            .ok_or_else(|| CodegenError::internal("function was never declared", span))?;
        if let Some(func) = self.functions.get(&variable) {
            return Ok(*func);
        }
        let tree = self.tree;
        let declared = tree.variable(variable)?;
        let VariableKind::Function {
            receiver,
            exported,
            defined,
            ..
        } = declared.kind
        else {
            return Err(CodegenError::internal(
                format!("`{}` is not a function", declared.name),
                span,
            ));
        };
        let base = match receiver {
            Some(receiver) => format!("{}.{}", tree.display(receiver), declared.name),
            None => declared.name.clone(),
        };
        let ir_signature = self.lower_signature(declared.ty, span)?;
        let linkage = if exported || !defined {
            Linkage::External
        } else {
            Linkage::Internal
        };
        let name = self.symbol(base);
        debug!(function = %name, ?linkage, "declared function");
        let func = self.module.add_function(name, ir_signature, linkage);
        self.functions.insert(variable, func);
        Ok(func)
    }

    fn declare_extern(&mut self, import: &Extern, span: Span) -> Result<(), CodegenError> {
        let variable = import
            .signature
            .variable
            .ok_or_else(|| CodegenError::internal("extern was never declared", span))?;
        let tree = self.tree;
        let declared = tree.variable(variable)?;
        let VariableKind::External { keys, compile_time } = &declared.kind else {
            return Err(CodegenError::internal(
                format!("`{}` is not an extern", declared.name),
                span,
            ));
        };
        let ir_signature = self.lower_signature(declared.ty, span)?;
        let name = self.symbol(declared.name.clone());
        let func = self.module.add_function(name.clone(), ir_signature, Linkage::External);
        self.module.function_mut(func)?.import = Some(self.policy.import(keys));
        if *compile_time {
            self.policy.materialize(keys, &name, &mut self.hosts)?;
        }
        debug!(function = %name, import = %keys.join("."), compile_time = *compile_time, "declared extern");
        self.functions.insert(variable, func);
        Ok(())
    }

    fn declare_global(&mut self, binding: &'a Let, span: Span) -> Result<(), CodegenError> {
        let variable = binding
            .variable
            .ok_or_else(|| CodegenError::internal("global was never declared", span))?;
        let tree = self.tree;
        let declared = tree.variable(variable)?;
        let ty = self.lower_type(declared.ty, span)?;
        let name = self.symbol(declared.name.clone());
        let global = self.module.add_global(name, ty, None, true);
        self.globals.insert(variable, global);
        self.initializers.push((global, &*binding.value));
        Ok(())
    }

    /// Globals get their values in declaration order.
    pub(crate) fn initialize_globals(&mut self) -> Result<(), CodegenError> {
        for (global, value) in std::mem::take(&mut self.initializers) {
            let constant = self.evaluate_constant(value)?;
            let slot = self.module.global_mut(global)?;
            slot.initializer = Some(constant);
            debug!(global = %slot.name, "initialized global");
        }
        Ok(())
    }

    pub(crate) fn define_remaining(&mut self) -> Result<(), CodegenError> {
        while let Some(func) = self.queue.pop_front() {
            self.define(func)?;
        }
        Ok(())
    }

    fn define(&mut self, func: FuncId) -> Result<(), CodegenError> {
        let Some(function) = self.bodies.remove(&func) else {
            return Ok(());
        };
        let span = function.signature.span;
        let fn_ty = function
            .signature
            .ty
            .ok_or_else(|| CodegenError::internal("function without a type", span))?;
        let tree = self.tree;
        let ret = tree.signature(fn_ty)?.1;
        self.in_progress.insert(func);
        let result = FunctionLowering::new(self, func, ret).and_then(|lowering| lowering.define(function));
        self.in_progress.remove(&func);
        result?;
        debug!(function = %self.module.function(func)?.name, "defined function");
        Ok(())
    }

    /// Lower every body `root` can reach through direct calls.
    pub(crate) fn define_reachable(&mut self, root: FuncId, span: Span) -> Result<(), CodegenError> {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(func) = stack.pop() {
            if !seen.insert(func) {
                continue;
            }
            if self.in_progress.contains(&func) {
                return Err(CodegenError::compile_time(
                    format!(
                        "`{}` is called at compile time before its own body is complete",
                        self.module.function(func)?.name
                    ),
                    span,
                ));
            }
            self.define(func)?;
            let function = self.module.function(func)?;
            stack.extend(function.insts.iter().filter_map(|data| match data.kind {
                InstKind::Call { callee, .. } => Some(callee),
                _ => None,
            }));
        }
        Ok(())
    }

    /// Unique symbol for `base`, suffixed `.1`, `.2`, ... on collision.
    pub(crate) fn symbol(&mut self, base: String) -> String {
        if self.symbols.insert(base.clone()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}.{n}");
            if self.symbols.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub(crate) fn finish(self) -> Module {
        self.module
    }
}
