//! Constructors for AST nodes.
//!
//! The parser and the test suites assemble trees through these helpers.
//! Nodes start at an empty span at offset 0; use [`Expr::at`] to anchor them.

use crate::*;

fn nowhere() -> Span {
    span(0, 0)
}

fn name(text: &str) -> Ident {
    Spanned::new(nowhere(), text.to_string())
}

fn expr(kind: ExprKind) -> Expr {
    Expr::new(nowhere(), kind)
}

pub fn named(text: &str) -> TypeExpr {
    TypeExpr {
        span: nowhere(),
        kind: TypeExprKind::Named(text.to_string()),
    }
}

pub fn array_of(element: TypeExpr, length: u64) -> TypeExpr {
    TypeExpr {
        span: element.span,
        kind: TypeExprKind::Array {
            element: Box::new(element),
            length,
        },
    }
}

pub fn optional_of(element: TypeExpr) -> TypeExpr {
    TypeExpr {
        span: element.span,
        kind: TypeExprKind::Optional(Box::new(element)),
    }
}

pub fn reference_of(element: TypeExpr) -> TypeExpr {
    TypeExpr {
        span: element.span,
        kind: TypeExprKind::Reference(Box::new(element)),
    }
}

pub fn slice_of(element: TypeExpr) -> TypeExpr {
    TypeExpr {
        span: element.span,
        kind: TypeExprKind::Slice(Box::new(element)),
    }
}

pub fn function_type(params: Vec<TypeExpr>, ret: Option<TypeExpr>) -> TypeExpr {
    TypeExpr {
        span: nowhere(),
        kind: TypeExprKind::Function {
            params,
            ret: ret.map(Box::new),
        },
    }
}

pub fn fields(list: Vec<(&str, TypeExpr)>) -> Vec<FieldDecl> {
    list.into_iter()
        .map(|(n, ty)| FieldDecl { name: name(n), ty })
        .collect()
}

pub fn ident(text: &str) -> Expr {
    expr(ExprKind::Identifier(Identifier {
        name: name(text),
        variable: None,
    }))
}

pub fn int(value: i64) -> Expr {
    expr(ExprKind::Integer(value))
}

pub fn float(value: f64) -> Expr {
    expr(ExprKind::Float(value))
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Boolean(value))
}

pub fn string(value: &str) -> Expr {
    expr(ExprKind::String(value.to_string()))
}

pub fn null() -> Expr {
    expr(ExprKind::Null)
}

pub fn let_(binding: &str, value: Expr) -> Expr {
    expr(ExprKind::Let(Let {
        name: name(binding),
        value: Box::new(value),
        variable: None,
    }))
}

pub fn block(items: Vec<Expr>) -> Expr {
    expr(ExprKind::Block(Block { items, scope: None }))
}

pub fn if_(cond: Expr, then_branch: Vec<Expr>) -> Expr {
    expr(ExprKind::If(If {
        cond: Box::new(cond),
        then_branch: Box::new(block(then_branch)),
        else_branch: None,
    }))
}

pub fn if_else(cond: Expr, then_branch: Vec<Expr>, else_branch: Vec<Expr>) -> Expr {
    expr(ExprKind::If(If {
        cond: Box::new(cond),
        then_branch: Box::new(block(then_branch)),
        else_branch: Some(Box::new(block(else_branch))),
    }))
}

pub fn while_(cond: Expr, body: Vec<Expr>) -> Expr {
    expr(ExprKind::While(While {
        cond: Box::new(cond),
        body: Box::new(block(body)),
        else_branch: None,
    }))
}

pub fn while_else(cond: Expr, body: Vec<Expr>, else_branch: Vec<Expr>) -> Expr {
    expr(ExprKind::While(While {
        cond: Box::new(cond),
        body: Box::new(block(body)),
        else_branch: Some(Box::new(block(else_branch))),
    }))
}

pub fn ret(value: Option<Expr>) -> Expr {
    expr(ExprKind::Return(value.map(Box::new)))
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call(Call {
        callee: Box::new(callee),
        args,
        target: None,
    }))
}

pub fn member(receiver: Expr, field: &str) -> Expr {
    expr(ExprKind::Member(Member {
        receiver: Box::new(receiver),
        name: name(field),
        field: None,
    }))
}

pub fn method_call(receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
    call(member(receiver, method), args)
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    expr(ExprKind::Unary(Unary {
        op: Spanned::new(nowhere(), op),
        operand: Box::new(operand),
        target: None,
    }))
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let op_span = span(lhs.span.offset() + lhs.span.len(), 0);
    expr(ExprKind::Binary(Binary {
        op: Spanned::new(op_span, op),
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        target: None,
    }))
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    binary(BinaryOp::Assign, target, value)
}

pub fn index(array: Expr, at: Expr) -> Expr {
    binary(BinaryOp::Index, array, at)
}

pub fn cast(value: Expr, to: TypeExpr) -> Expr {
    expr(ExprKind::Cast(Cast {
        value: Box::new(value),
        to,
        target: None,
    }))
}

pub fn paren(inner: Expr) -> Expr {
    expr(ExprKind::Parenthesis(Box::new(inner)))
}

pub fn comptime(inner: Expr) -> Expr {
    expr(ExprKind::CompileTime(Box::new(inner)))
}

pub fn struct_literal(ty: TypeExpr, values: Vec<(&str, Expr)>) -> Expr {
    expr(ExprKind::StructLiteral(StructLiteral {
        ty,
        fields: values
            .into_iter()
            .map(|(n, value)| FieldInit {
                name: name(n),
                value,
                index: None,
            })
            .collect(),
    }))
}

pub fn array_literal(ty: TypeExpr, elements: Vec<Expr>) -> Expr {
    expr(ExprKind::ArrayLiteral(ArrayLiteral { ty, elements }))
}

pub fn slice_literal(element: TypeExpr, elements: Vec<Expr>) -> Expr {
    expr(ExprKind::SliceLiteral(SliceLiteral { element, elements }))
}

pub fn tuple(elements: Vec<Expr>) -> Expr {
    expr(ExprKind::Tuple(elements))
}

/// Start a named signature with no parameters and no return type.
pub fn signature(fn_name: &str) -> FunctionSignature {
    FunctionSignature {
        span: nowhere(),
        name: Some(name(fn_name)),
        receiver: None,
        self_param: None,
        params: Vec::new(),
        ret: None,
        ty: None,
        variable: None,
        self_variable: None,
    }
}

impl FunctionSignature {
    pub fn param(mut self, param: &str, ty: TypeExpr) -> Self {
        self.params.push(Param {
            name: name(param),
            ty,
            variable: None,
        });
        self
    }

    pub fn returns(mut self, ty: TypeExpr) -> Self {
        self.ret = Some(ty);
        self
    }

    pub fn on(mut self, receiver: TypeExpr) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_self(mut self, kind: SelfParam) -> Self {
        self.self_param = Some(Spanned::new(nowhere(), kind));
        self
    }
}

pub fn function_value(signature: FunctionSignature, body: Vec<Expr>) -> Function {
    Function {
        signature,
        body: Box::new(block(body)),
    }
}

pub fn function(signature: FunctionSignature, body: Vec<Expr>) -> Expr {
    expr(ExprKind::Function(function_value(signature, body)))
}

pub fn declaration(signature: FunctionSignature) -> Expr {
    expr(ExprKind::FunctionDeclaration(signature))
}

pub fn export(function: Expr) -> Expr {
    expr(ExprKind::Export(Box::new(function)))
}

pub fn extern_(keys: &[&str], signature: FunctionSignature) -> Expr {
    expr(ExprKind::Extern(Extern {
        keys: keys.iter().map(|k| name(k)).collect(),
        signature,
        compile_time_runnable: false,
    }))
}

pub fn struct_decl(type_name: &str, members: Vec<(&str, TypeExpr)>) -> Expr {
    expr(ExprKind::Type(TypeDecl {
        name: name(type_name),
        body: TypeDeclBody::Struct(fields(members)),
        ty: None,
    }))
}

pub fn interface_decl(type_name: &str, methods: Vec<FunctionSignature>) -> Expr {
    expr(ExprKind::Type(TypeDecl {
        name: name(type_name),
        body: TypeDeclBody::Interface(methods),
        ty: None,
    }))
}

pub fn alias(type_name: &str, ty: TypeExpr) -> Expr {
    expr(ExprKind::Type(TypeDecl {
        name: name(type_name),
        body: TypeDeclBody::Alias(ty),
        ty: None,
    }))
}

pub fn implementation(implementer: TypeExpr, interface: TypeExpr, methods: Vec<Function>) -> Expr {
    expr(ExprKind::Implementation(Implementation {
        implementer,
        interface,
        methods,
    }))
}

pub fn module(items: Vec<Expr>) -> Module {
    Module::new(items)
}
