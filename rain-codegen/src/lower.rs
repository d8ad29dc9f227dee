#![forbid(unsafe_code)]

use std::collections::HashMap;

use rain_ast::{Binary, BinaryOp, Expr, ExprKind, Function, If, MethodTarget, Span, TypeId, UnaryOp, VariableId, While};
use rain_ir::{BlockId, Builder, ConstId, Constant, Cursor, FuncId, GlobalId, Type, Value};
use rain_sema::{Intrinsic, TypeKind, VariableKind};

use crate::error::CodegenError;
use crate::generator::Generator;

/// Lowers one function body. Locals live in stack slots allocated in a
/// dedicated entry block, which branches to the first body block once the
/// body is complete.
pub(crate) struct FunctionLowering<'g, 'a> {
    pub(crate) generator: &'g mut Generator<'a>,
    func: FuncId,
    cursor: Cursor,
    entry: BlockId,
    body: BlockId,
    locals: HashMap<VariableId, Value>,
    ret: Option<TypeId>,
}

fn no_value(expr: &Expr) -> CodegenError {
    CodegenError::internal(format!("this {} produced no value", expr.kind_name()), expr.span)
}

impl<'g, 'a> FunctionLowering<'g, 'a> {
    pub(crate) fn new(
        generator: &'g mut Generator<'a>,
        func: FuncId,
        ret: Option<TypeId>,
    ) -> Result<Self, CodegenError> {
        let entry = generator.module.append_block(func, "entry")?;
        let body = generator.module.append_block(func, "body")?;
        Ok(Self {
            generator,
            func,
            cursor: Cursor::at(func, body),
            entry,
            body,
            locals: HashMap::new(),
            ret,
        })
    }

    pub(crate) fn ir(&mut self) -> Builder<'_> {
        Builder::new(&mut self.generator.module, &mut self.cursor)
    }

    pub(crate) fn lower(&mut self, ty: TypeId, span: Span) -> Result<Type, CodegenError> {
        self.generator.lower_type(ty, span)
    }

    fn value_type(&mut self, expr: &Expr) -> Result<Type, CodegenError> {
        let ty = expr.ty.ok_or_else(|| no_value(expr))?;
        self.lower(ty, expr.span)
    }

    pub(crate) fn entry_alloca(&mut self, ty: Type) -> Result<Value, CodegenError> {
        let mut cursor = Cursor::at(self.func, self.entry);
        Ok(Builder::new(&mut self.generator.module, &mut cursor).alloca(ty)?)
    }

    /// Close the entry block once no more slots are needed.
    pub(crate) fn seal(&mut self) -> Result<(), CodegenError> {
        let mut cursor = Cursor::at(self.func, self.entry);
        Builder::new(&mut self.generator.module, &mut cursor).br(self.body)?;
        Ok(())
    }

    pub(crate) fn define(mut self, function: &Function) -> Result<(), CodegenError> {
        let signature = &function.signature;
        let mut parameters = Vec::with_capacity(signature.params.len() + 1);
        parameters.extend(signature.self_variable);
        for param in &signature.params {
            parameters.push(
                param
                    .variable
                    .ok_or_else(|| CodegenError::internal("unresolved parameter", param.name.span))?,
            );
        }
        let tree = self.generator.tree;
        for (index, variable) in parameters.into_iter().enumerate() {
            let ty = self.lower(tree.variable(variable)?.ty, signature.span)?;
            let slot = self.entry_alloca(ty)?;
            self.ir().store(Value::Arg(index as u32), slot)?;
            self.locals.insert(variable, slot);
        }

        let body = &function.body;
        let value = self.expr(body)?;
        if !self.ir().is_terminated()? {
            match self.ret {
                Some(ret) => {
                    let value = self.convert(value, body, ret)?;
                    self.ir().ret(Some(value))?;
                }
                None => self.ir().ret(None)?,
            }
        }
        self.seal()
    }

    /// Value of an expression that must produce one. Code after a `return`
    /// keeps lowering into a fresh block with no predecessors.
    pub(crate) fn operand(&mut self, expr: &Expr) -> Result<Value, CodegenError> {
        match self.expr(expr)? {
            Some(value) => Ok(value),
            None if self.ir().is_terminated()? => {
                let dead = self.ir().append_block("dead")?;
                self.ir().position_at_end(dead)?;
                let ty = self.value_type(expr)?;
                Ok(self.ir().const_value(Constant::Undef(ty)))
            }
            None => Err(no_value(expr)),
        }
    }

    pub(crate) fn expr(&mut self, expr: &Expr) -> Result<Option<Value>, CodegenError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Integer(value) => {
                let ty = self.value_type(expr)?;
                Ok(Some(self.ir().const_int(ty, *value)))
            }
            ExprKind::Float(value) => Ok(Some(self.ir().const_value(Constant::f32(*value as f32)))),
            ExprKind::Boolean(value) => Ok(Some(self.ir().const_value(Constant::bool(*value)))),
            ExprKind::String(text) => self.string(text.as_bytes(), span).map(Some),
            // Only meaningful where it is converted into an optional.
            ExprKind::Null => Ok(None),

            ExprKind::Identifier(identifier) => {
                let variable = identifier
                    .variable
                    .ok_or_else(|| CodegenError::internal("unresolved identifier", span))?;
                let address = self.variable_address(variable, span)?;
                let ty = self.value_type(expr)?;
                Ok(Some(self.ir().load(ty, address)?))
            }

            ExprKind::Let(binding) => {
                let variable = binding
                    .variable
                    .ok_or_else(|| CodegenError::internal("unresolved let", span))?;
                let value = self.operand(&binding.value)?;
                let ty = self.value_type(&binding.value)?;
                let slot = self.entry_alloca(ty)?;
                self.ir().store(value, slot)?;
                self.locals.insert(variable, slot);
                Ok(None)
            }

            ExprKind::Block(block) => {
                let mut value = None;
                for item in &block.items {
                    value = match &item.kind {
                        // Nested functions are lowered on their own.
                        ExprKind::Function(_) => None,
                        _ => self.expr(item)?,
                    };
                    if self.ir().is_terminated()? {
                        return Ok(None);
                    }
                }
                Ok(if expr.ty.is_some() { value } else { None })
            }

            ExprKind::If(branch) => self.if_(expr, branch),
            ExprKind::While(repeat) => self.while_(expr, repeat),
            ExprKind::Return(value) => {
                self.return_(value.as_deref(), span)?;
                Ok(None)
            }

            ExprKind::Call(call) => {
                let target = call
                    .target
                    .ok_or_else(|| CodegenError::internal("unresolved call", span))?;
                let receiver = match &call.callee.kind {
                    ExprKind::Member(member) => Some(&*member.receiver),
                    _ => None,
                };
                let args: Vec<&Expr> = call.args.iter().collect();
                self.call(target, receiver, &args, span)
            }

            ExprKind::Member(member) => {
                if let Some(address) = self.place(expr)? {
                    let ty = self.value_type(expr)?;
                    return Ok(Some(self.ir().load(ty, address)?));
                }
                let field = member
                    .field
                    .ok_or_else(|| CodegenError::internal("unresolved member", span))?;
                let aggregate = self.operand(&member.receiver)?;
                let value = match self.ir().value_type(aggregate)? {
                    Type::Vector(..) => {
                        let lane = self.ir().const_int(Type::I32, field as i64);
                        self.ir().extract_element(aggregate, lane)?
                    }
                    _ => self.ir().extract_value(aggregate, field as u32)?,
                };
                Ok(Some(value))
            }

            ExprKind::Unary(unary) => {
                if unary.op.node == UnaryOp::Reference {
                    let address = self
                        .place(&unary.operand)?
                        .ok_or_else(|| CodegenError::internal("address of a temporary", span))?;
                    return Ok(Some(address));
                }
                let target = unary
                    .target
                    .ok_or_else(|| CodegenError::internal("unresolved operator", span))?;
                self.call(target, Some(&*unary.operand), &[], span)
            }

            ExprKind::Binary(binary) => match binary.op.node {
                BinaryOp::Assign => {
                    let lhs = binary.lhs.ty.ok_or_else(|| no_value(&binary.lhs))?;
                    let address = self
                        .place(&binary.lhs)?
                        .ok_or_else(|| CodegenError::internal("assignment to a temporary", span))?;
                    let value = self.coerce(&binary.rhs, lhs)?;
                    self.ir().store(value, address)?;
                    Ok(None)
                }
                BinaryOp::Index => {
                    let address = self.index_address(binary, span)?;
                    let ty = self.value_type(expr)?;
                    Ok(Some(self.ir().load(ty, address)?))
                }
                _ => {
                    let target = binary
                        .target
                        .ok_or_else(|| CodegenError::internal("unresolved operator", span))?;
                    self.call(target, Some(&*binary.lhs), &[&*binary.rhs], span)
                }
            },

            ExprKind::Cast(cast) => {
                let target = cast
                    .target
                    .ok_or_else(|| CodegenError::internal("unresolved cast", span))?;
                self.call(target, None, &[&*cast.value], span)
            }

            ExprKind::Parenthesis(inner) => self.expr(inner),

            ExprKind::CompileTime(inner) => {
                let constant = self.generator.evaluate_constant(inner)?;
                Ok(Some(Value::Const(constant)))
            }

            ExprKind::StructLiteral(literal) => {
                let tree = self.generator.tree;
                let ty = tree.types().resolve(expr.ty.ok_or_else(|| no_value(expr))?, span)?;
                let TypeKind::Struct { fields, .. } = tree.types().kind(ty)? else {
                    return Err(CodegenError::internal("struct literal of a non-struct type", span));
                };
                let lowered = self.lower(ty, span)?;
                let vector = matches!(lowered, Type::Vector(..));
                let mut aggregate = self.ir().const_value(Constant::Zero(lowered));
                for init in &literal.fields {
                    let index = init
                        .index
                        .ok_or_else(|| CodegenError::internal("unresolved field", init.name.span))?;
                    let field = fields
                        .get(index)
                        .ok_or_else(|| CodegenError::internal("field out of range", init.name.span))?;
                    let value = self.coerce(&init.value, field.ty)?;
                    aggregate = if vector {
                        let lane = self.ir().const_int(Type::I32, index as i64);
                        self.ir().insert_element(aggregate, value, lane)?
                    } else {
                        self.ir().insert_value(aggregate, value, index as u32)?
                    };
                }
                Ok(Some(aggregate))
            }

            ExprKind::ArrayLiteral(literal) => {
                let ty = expr.ty.ok_or_else(|| no_value(expr))?;
                let element = self.generator.element_type(ty, span)?;
                let lowered = self.lower(ty, span)?;
                let mut aggregate = self.ir().const_value(Constant::Zero(lowered));
                for (index, item) in literal.elements.iter().enumerate() {
                    let value = self.coerce(item, element)?;
                    aggregate = self.ir().insert_value(aggregate, value, index as u32)?;
                }
                Ok(Some(aggregate))
            }

            ExprKind::SliceLiteral(literal) => {
                let ty = expr.ty.ok_or_else(|| no_value(expr))?;
                self.slice_literal(ty, &literal.elements, span).map(Some)
            }

            ExprKind::Tuple(items) => {
                let lowered = self.value_type(expr)?;
                let mut aggregate = self.ir().const_value(Constant::Zero(lowered));
                for (index, item) in items.iter().enumerate() {
                    let value = self.operand(item)?;
                    aggregate = self.ir().insert_value(aggregate, value, index as u32)?;
                }
                Ok(Some(aggregate))
            }

            ExprKind::Function(_)
            | ExprKind::FunctionDeclaration(_)
            | ExprKind::Export(_)
            | ExprKind::Extern(_)
            | ExprKind::Type(_)
            | ExprKind::Implementation(_) => Err(CodegenError::internal(
                format!("{} inside a function body", expr.kind_name()),
                span,
            )),
        }
    }

    fn if_(&mut self, expr: &Expr, branch: &If) -> Result<Option<Value>, CodegenError> {
        let result = expr.ty;
        let cond = self.operand(&branch.cond)?;
        let then_block = self.ir().append_block("then")?;
        let else_block = self.ir().append_block("else")?;
        let merge = self.ir().append_block("endif")?;
        self.ir().cond_br(cond, then_block, else_block)?;

        self.ir().position_at_end(then_block)?;
        let value = self.expr(&branch.then_branch)?;
        let then_edge = self.branch_exit(value, &branch.then_branch, result, merge)?;

        self.ir().position_at_end(else_block)?;
        let else_edge = match &branch.else_branch {
            Some(otherwise) => {
                let value = self.expr(otherwise)?;
                self.branch_exit(value, otherwise, result, merge)?
            }
            None => {
                // The untaken side of a one-sided `if` is the empty optional.
                let value = match result {
                    Some(optional) => Some(self.none(optional, expr.span)?),
                    None => None,
                };
                let end = self.ir().current_block()?;
                self.ir().br(merge)?;
                Some((value, end))
            }
        };

        self.ir().position_at_end(merge)?;
        self.merge(result, [then_edge, else_edge], expr.span)
    }

    fn while_(&mut self, expr: &Expr, repeat: &While) -> Result<Option<Value>, CodegenError> {
        let result = expr.ty;
        let lowered = match result {
            Some(ty) => Some(self.lower(ty, expr.span)?),
            None => None,
        };
        let head = self.ir().append_block("loop.cond")?;
        let body = self.ir().append_block("loop")?;
        let done = self.ir().append_block("loop.done")?;
        let otherwise = self.ir().append_block("loop.else")?;
        let exit = self.ir().append_block("endloop")?;
        let entry = self.ir().current_block()?;
        self.ir().br(head)?;

        // One copy of the condition. `first` holds until the body has run
        // and `last` carries the latest iteration's value.
        self.ir().position_at_end(head)?;
        let yes = self.ir().const_value(Constant::bool(true));
        let first = self.ir().phi(Type::I1, vec![(yes, entry)])?;
        let last = match lowered {
            Some(ty) => {
                let undef = self.ir().const_value(Constant::Undef(ty.clone()));
                Some(self.ir().phi(ty, vec![(undef, entry)])?)
            }
            None => None,
        };
        let cond = self.operand(&repeat.cond)?;
        self.ir().cond_br(cond, body, done)?;

        self.ir().position_at_end(body)?;
        let value = self.expr(&repeat.body)?;
        let repeats = !self.ir().is_terminated()?;
        if repeats {
            let value = match result {
                Some(ty) => Some(self.convert(value, &repeat.body, ty)?),
                None => None,
            };
            let end = self.ir().current_block()?;
            if let (Some(last), Some(value)) = (last, value) {
                self.ir().add_incoming(last, value, end)?;
            }
            let no = self.ir().const_value(Constant::bool(false));
            self.ir().add_incoming(first, no, end)?;
            self.ir().br(head)?;
        }

        self.ir().position_at_end(done)?;
        let body_edge = if repeats {
            self.ir().cond_br(first, otherwise, exit)?;
            Some((last, done))
        } else {
            self.ir().br(otherwise)?;
            None
        };

        // Runs only when the loop body never ran.
        self.ir().position_at_end(otherwise)?;
        let else_edge = match &repeat.else_branch {
            Some(branch) => {
                let value = self.expr(branch)?;
                self.branch_exit(value, branch, result, exit)?
            }
            None => {
                let end = self.ir().current_block()?;
                self.ir().br(exit)?;
                Some((None, end))
            }
        };

        self.ir().position_at_end(exit)?;
        self.merge(result, [body_edge, else_edge], expr.span)
    }

    /// Finish a branch: convert its value to the construct's type and jump
    /// to `target`. `None` when the branch already returned.
    fn branch_exit(
        &mut self,
        value: Option<Value>,
        branch: &Expr,
        result: Option<TypeId>,
        target: BlockId,
    ) -> Result<Option<(Option<Value>, BlockId)>, CodegenError> {
        if self.ir().is_terminated()? {
            return Ok(None);
        }
        let value = match result {
            Some(ty) => Some(self.convert(value, branch, ty)?),
            None => None,
        };
        let end = self.ir().current_block()?;
        self.ir().br(target)?;
        Ok(Some((value, end)))
    }

    /// Join the live edges of a branching construct at the current block.
    fn merge(
        &mut self,
        result: Option<TypeId>,
        edges: [Option<(Option<Value>, BlockId)>; 2],
        span: Span,
    ) -> Result<Option<Value>, CodegenError> {
        let live: Vec<(Option<Value>, BlockId)> = edges.into_iter().flatten().collect();
        if live.is_empty() {
            // Every path returned.
            self.ir().unreachable()?;
            return Ok(None);
        }
        let Some(ty) = result else {
            return Ok(None);
        };
        let mut incoming = Vec::with_capacity(live.len());
        for (value, block) in live {
            let value = value.ok_or_else(|| CodegenError::internal("branch produced no value", span))?;
            incoming.push((value, block));
        }
        if let [(value, _)] = incoming.as_slice() {
            return Ok(Some(*value));
        }
        let lowered = self.lower(ty, span)?;
        Ok(Some(self.ir().phi(lowered, incoming)?))
    }

    fn return_(&mut self, value: Option<&Expr>, span: Span) -> Result<(), CodegenError> {
        match (self.ret, value) {
            (Some(ret), Some(value)) => {
                let value = self.coerce(value, ret)?;
                self.ir().ret(Some(value))?;
            }
            (None, Some(value)) => {
                self.expr(value)?;
                if !self.ir().is_terminated()? {
                    self.ir().ret(None)?;
                }
            }
            (None, None) => self.ir().ret(None)?,
            (Some(_), None) => return Err(CodegenError::internal("missing return value", span)),
        }
        Ok(())
    }

    /// Lower `expr` as a value of type `to`, wrapping into an optional or
    /// turning `null` into the empty optional.
    pub(crate) fn coerce(&mut self, expr: &Expr, to: TypeId) -> Result<Value, CodegenError> {
        let value = if expr.ty.is_some() {
            Some(self.operand(expr)?)
        } else {
            self.expr(expr)?
        };
        self.convert(value, expr, to)
    }

    fn convert(&mut self, value: Option<Value>, from: &Expr, to: TypeId) -> Result<Value, CodegenError> {
        if from.ty == Some(to) {
            return value.ok_or_else(|| no_value(from));
        }
        let tree = self.generator.tree;
        let mismatch = || {
            let found = from.ty.map_or_else(|| "nothing".to_string(), |ty| tree.display(ty));
            CodegenError::internal(
                format!("cannot convert `{found}` to `{}`", tree.display(to)),
                from.span,
            )
        };
        let inner = tree.types().optional_inner(to).ok_or_else(mismatch)?;
        let none = self.none(to, from.span)?;
        match from.ty {
            None => Ok(none),
            Some(ty) if ty == inner => {
                let value = value.ok_or_else(|| no_value(from))?;
                let some = self.ir().insert_value(none, value, 0)?;
                let present = self.ir().const_value(Constant::bool(true));
                Ok(self.ir().insert_value(some, present, 1)?)
            }
            Some(_) => Err(mismatch()),
        }
    }

    fn none(&mut self, optional: TypeId, span: Span) -> Result<Value, CodegenError> {
        let lowered = self.lower(optional, span)?;
        Ok(self.ir().const_value(Constant::Zero(lowered)))
    }

    /// Call `target`. The receiver is passed as the first argument when the
    /// method takes it, and is otherwise only evaluated.
    pub(crate) fn call(
        &mut self,
        target: MethodTarget,
        receiver: Option<&Expr>,
        args: &[&Expr],
        span: Span,
    ) -> Result<Option<Value>, CodegenError> {
        let tree = self.generator.tree;
        let method = tree.variable(target.method)?;
        let (params, ret) = tree.signature(method.ty)?;

        let mut operands: Vec<&Expr> = Vec::with_capacity(args.len() + 1);
        match receiver {
            Some(receiver) if target.with_receiver => operands.push(receiver),
            Some(receiver) => {
                self.expr(receiver)?;
            }
            None if target.with_receiver => {
                return Err(CodegenError::internal("method call without a receiver", span));
            }
            None => {}
        }
        operands.extend_from_slice(args);
        if operands.len() != params.len() {
            return Err(CodegenError::internal(
                format!(
                    "`{}` takes {} arguments, {} given",
                    method.name,
                    params.len(),
                    operands.len()
                ),
                span,
            ));
        }
        let mut values = Vec::with_capacity(operands.len());
        for (operand, param) in operands.into_iter().zip(params) {
            values.push(self.argument(operand, *param)?);
        }

        match &method.kind {
            VariableKind::Builtin(intrinsic) => self.intrinsic(*intrinsic, &values, params, span),
            VariableKind::Function { .. } | VariableKind::External { .. } => {
                let func = *self.generator.functions.get(&target.method).ok_or_else(|| {
                    CodegenError::internal(format!("`{}` has no backend function", method.name), span)
                })?;
                let value = self.ir().call(func, values)?;
                Ok(ret.map(|_| value))
            }
            _ => Err(CodegenError::internal(
                format!("`{}` is not callable", method.name),
                span,
            )),
        }
    }

    /// Adapt an argument to its parameter: references are taken from the
    /// argument's storage (or a temporary), dereferenced when a value is
    /// expected.
    fn argument(&mut self, arg: &Expr, param: TypeId) -> Result<Value, CodegenError> {
        let ty = arg.ty.ok_or_else(|| no_value(arg))?;
        if ty == param {
            return self.operand(arg);
        }
        let types = self.generator.tree.types();
        match (types.kind(param)?, types.kind(ty)?) {
            (TypeKind::Reference(inner), _) if *inner == ty => self.address_of(arg),
            (_, TypeKind::Reference(inner)) if *inner == param => {
                let pointer = self.operand(arg)?;
                let lowered = self.lower(param, arg.span)?;
                Ok(self.ir().load(lowered, pointer)?)
            }
            _ => {
                let tree = self.generator.tree;
                Err(CodegenError::internal(
                    format!("`{}` passed for a `{}` parameter", tree.display(ty), tree.display(param)),
                    arg.span,
                ))
            }
        }
    }

    fn address_of(&mut self, expr: &Expr) -> Result<Value, CodegenError> {
        if let Some(address) = self.place(expr)? {
            return Ok(address);
        }
        let value = self.operand(expr)?;
        let ty = self.value_type(expr)?;
        let slot = self.entry_alloca(ty)?;
        self.ir().store(value, slot)?;
        Ok(slot)
    }

    /// Address of the storage `expr` names, if it names any. Emits code
    /// only when it returns an address.
    fn place(&mut self, expr: &Expr) -> Result<Option<Value>, CodegenError> {
        let span = expr.span;
        let tree = self.generator.tree;
        match &expr.kind {
            ExprKind::Identifier(identifier) => {
                let variable = identifier
                    .variable
                    .ok_or_else(|| CodegenError::internal("unresolved identifier", span))?;
                match tree.variable(variable)?.kind {
                    VariableKind::Local { .. } | VariableKind::UnwrappedOptional { .. } => {
                        Ok(Some(self.variable_address(variable, span)?))
                    }
                    _ => Ok(None),
                }
            }
            ExprKind::Member(member) => {
                let field = member
                    .field
                    .ok_or_else(|| CodegenError::internal("unresolved member", span))?;
                let receiver = member.receiver.ty.ok_or_else(|| no_value(&member.receiver))?;
                let base = tree.types().deref(receiver);
                let pointer = if base != receiver {
                    Some(self.operand(&member.receiver)?)
                } else {
                    self.place(&member.receiver)?
                };
                match pointer {
                    Some(pointer) => {
                        let lowered = self.lower(base, span)?;
                        Ok(Some(self.ir().member_gep(lowered, pointer, field as u32)?))
                    }
                    None => Ok(None),
                }
            }
            ExprKind::Binary(binary) if binary.op.node == BinaryOp::Index => {
                Ok(Some(self.index_address(binary, span)?))
            }
            ExprKind::Parenthesis(inner) => self.place(inner),
            _ => Ok(None),
        }
    }

    fn variable_address(&mut self, variable: VariableId, span: Span) -> Result<Value, CodegenError> {
        if let Some(slot) = self.locals.get(&variable) {
            return Ok(*slot);
        }
        if let Some(global) = self.generator.globals.get(&variable) {
            return Ok(Value::Global(*global));
        }
        let tree = self.generator.tree;
        let declared = tree.variable(variable)?;
        match declared.kind {
            VariableKind::UnwrappedOptional { wraps } => {
                let optional = self.variable_address(wraps, span)?;
                let lowered = self.lower(tree.variable(wraps)?.ty, span)?;
                Ok(self.ir().member_gep(lowered, optional, 0)?)
            }
            _ => Err(CodegenError::internal(
                format!("`{}` has no storage in this function", declared.name),
                span,
            )),
        }
    }

    fn index_address(&mut self, binary: &Binary, span: Span) -> Result<Value, CodegenError> {
        let target = binary
            .target
            .ok_or_else(|| CodegenError::internal("unresolved index", span))?;
        let tree = self.generator.tree;
        let method = tree.variable(target.method)?;
        let (params, _) = tree.signature(method.ty)?;
        let (Some(&container), Some(&position)) = (params.first(), params.get(1)) else {
            return Err(CodegenError::internal("index method without an index parameter", span));
        };
        match method.intrinsic() {
            Some(Intrinsic::ArrayIndex) => {
                let lhs = binary.lhs.ty.ok_or_else(|| no_value(&binary.lhs))?;
                let array = tree.types().deref(lhs);
                let base = if array != lhs {
                    self.operand(&binary.lhs)?
                } else {
                    self.address_of(&binary.lhs)?
                };
                let index = self.argument(&binary.rhs, position)?;
                let lowered = self.lower(array, span)?;
                let zero = self.ir().const_int(Type::I32, 0);
                Ok(self.ir().gep(lowered, base, vec![zero, index])?)
            }
            Some(Intrinsic::SliceIndex) => {
                let slice = self.argument(&binary.lhs, container)?;
                let index = self.argument(&binary.rhs, position)?;
                self.slice_element(slice, index, container, span)
            }
            _ => self
                .call(target, Some(&*binary.lhs), &[&*binary.rhs], span)?
                .ok_or_else(|| CodegenError::internal("`__get__` returned nothing", span)),
        }
    }

    pub(crate) fn slice_element(
        &mut self,
        slice: Value,
        index: Value,
        slice_ty: TypeId,
        span: Span,
    ) -> Result<Value, CodegenError> {
        let element = self.generator.element_type(slice_ty, span)?;
        let lowered = self.lower(element, span)?;
        let begin = self.ir().extract_value(slice, 0)?;
        Ok(self.ir().gep(lowered, begin, vec![index])?)
    }

    fn string(&mut self, bytes: &[u8], span: Span) -> Result<Value, CodegenError> {
        let global = match self.generator.strings.get(bytes).copied() {
            Some(global) => global,
            None => {
                let module = &mut self.generator.module;
                let elements: Vec<ConstId> = bytes
                    .iter()
                    .map(|b| module.add_constant(Constant::int(Type::I8, *b as i64)))
                    .collect();
                let global = self.constant_array(Type::I8, elements, ".str");
                self.generator.strings.insert(bytes.to_vec(), global);
                global
            }
        };
        let string = self.generator.tree.builtin().string;
        let slice = self.lower(string, span)?;
        self.constant_slice(slice, global, bytes.len() as u64, span)
    }

    fn slice_literal(&mut self, ty: TypeId, items: &[Expr], span: Span) -> Result<Value, CodegenError> {
        let element = self.generator.element_type(ty, span)?;
        let element_ty = self.lower(element, span)?;
        let slice = self.lower(ty, span)?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(self.coerce(item, element)?);
        }
        let array = Type::array(element_ty.clone(), values.len() as u64);

        // Constant elements live in a read-only global, like strings.
        let constants: Option<Vec<ConstId>> = values
            .iter()
            .map(|value| match value {
                Value::Const(id) => Some(*id),
                _ => None,
            })
            .collect();
        if let Some(elements) = constants {
            let global = self.constant_array(element_ty, elements, ".slice");
            return self.constant_slice(slice, global, values.len() as u64, span);
        }

        let storage = self.entry_alloca(array.clone())?;
        let zero = self.ir().const_int(Type::I32, 0);
        for (index, value) in values.iter().enumerate() {
            let position = self.ir().const_int(Type::I32, index as i64);
            let address = self.ir().gep(array.clone(), storage, vec![zero, position])?;
            self.ir().store(*value, address)?;
        }
        let length = self.ir().const_int(Type::I32, values.len() as i64);
        let begin = self.ir().gep(array.clone(), storage, vec![zero, zero])?;
        let end = self.ir().gep(array, storage, vec![zero, length])?;
        let empty = self.ir().const_value(Constant::Zero(slice));
        let partial = self.ir().insert_value(empty, begin, 0)?;
        Ok(self.ir().insert_value(partial, end, 1)?)
    }

    fn constant_array(&mut self, element: Type, elements: Vec<ConstId>, name: &str) -> GlobalId {
        let ty = Type::array(element, elements.len() as u64);
        let module = &mut self.generator.module;
        let initializer = module.add_constant(Constant::Aggregate {
            ty: ty.clone(),
            elements,
        });
        let name = self.generator.symbol(name.to_string());
        self.generator.module.add_global(name, ty, Some(initializer), true)
    }

    /// `{ begin, end }` over the first `length` elements of a global array.
    fn constant_slice(&mut self, slice: Type, global: GlobalId, length: u64, span: Span) -> Result<Value, CodegenError> {
        let module = &mut self.generator.module;
        let array = module.global(global)?.ty.clone();
        let Type::Array(element, _) = &array else {
            return Err(CodegenError::internal("slice storage is not an array", span));
        };
        let end = module.size_of(element)? * length;
        let begin = module.add_constant(Constant::GlobalAddr { global, offset: 0 });
        let end = module.add_constant(Constant::GlobalAddr { global, offset: end });
        Ok(self.ir().const_value(Constant::Aggregate {
            ty: slice,
            elements: vec![begin, end],
        }))
    }
}
