#![forbid(unsafe_code)]

pub mod build;

use std::fmt;

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Smallest span covering both `a` and `b`.
pub fn span_join(a: Span, b: Span) -> Span {
    let start = a.offset().min(b.offset());
    let end = (a.offset() + a.len()).max(b.offset() + b.len());
    span_between(start, end)
}

pub type Ident = Spanned<String>;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// Canonical handle into the semantic type graph.
    TypeId
);
handle!(
    /// Handle of a variable registered in a scope.
    VariableId
);
handle!(ScopeId);

/// A translation unit: ordered top-level expressions plus the module scope
/// assigned during validation.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Module {
    pub items: Vec<Expr>,
    pub scope: Option<ScopeId>,
}

impl Module {
    pub fn new(items: Vec<Expr>) -> Self {
        Self { items, scope: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
    /// Result type, filled in by validation. `None` after validation means
    /// the expression produces no value.
    pub ty: Option<TypeId>,
    pub validated: bool,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self {
            span,
            kind,
            ty: None,
            validated: false,
        }
    }

    /// Re-anchor the node at a source range.
    pub fn at(mut self, start: usize, len: usize) -> Self {
        self.span = span(start, len);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Let(_) => "let",
            ExprKind::Function(_) => "function",
            ExprKind::FunctionDeclaration(_) => "function declaration",
            ExprKind::Export(_) => "export",
            ExprKind::Extern(_) => "extern",
            ExprKind::Type(_) => "type declaration",
            ExprKind::Implementation(_) => "interface implementation",
            ExprKind::Block(_) => "block",
            ExprKind::If(_) => "if",
            ExprKind::While(_) => "while",
            ExprKind::Return(_) => "return",
            ExprKind::Call(_) => "call",
            ExprKind::Member(_) => "member access",
            ExprKind::Unary(_) => "unary operator",
            ExprKind::Binary(_) => "binary operator",
            ExprKind::Cast(_) => "cast",
            ExprKind::Parenthesis(_) => "parenthesis",
            ExprKind::CompileTime(_) => "compile-time expression",
            ExprKind::Identifier(_) => "identifier",
            ExprKind::Integer(_) => "integer literal",
            ExprKind::Float(_) => "float literal",
            ExprKind::Boolean(_) => "boolean literal",
            ExprKind::String(_) => "string literal",
            ExprKind::Null => "null literal",
            ExprKind::StructLiteral(_) => "struct literal",
            ExprKind::ArrayLiteral(_) => "array literal",
            ExprKind::SliceLiteral(_) => "slice literal",
            ExprKind::Tuple(_) => "tuple",
        }
    }

    /// Direct child expressions in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Let(l) => vec![&*l.value],
            ExprKind::Function(f) => vec![&*f.body],
            ExprKind::Export(inner)
            | ExprKind::Parenthesis(inner)
            | ExprKind::CompileTime(inner) => vec![&**inner],
            ExprKind::Implementation(i) => i.methods.iter().map(|m| &*m.body).collect(),
            ExprKind::Block(b) => b.items.iter().collect(),
            ExprKind::If(i) => {
                let mut out: Vec<&Expr> = vec![&*i.cond, &*i.then_branch];
                out.extend(i.else_branch.as_deref());
                out
            }
            ExprKind::While(w) => {
                let mut out: Vec<&Expr> = vec![&*w.cond, &*w.body];
                out.extend(w.else_branch.as_deref());
                out
            }
            ExprKind::Return(value) => value.as_deref().into_iter().collect(),
            ExprKind::Call(c) => std::iter::once(&*c.callee).chain(&c.args).collect(),
            ExprKind::Member(m) => vec![&*m.receiver],
            ExprKind::Unary(u) => vec![&*u.operand],
            ExprKind::Binary(b) => vec![&*b.lhs, &*b.rhs],
            ExprKind::Cast(c) => vec![&*c.value],
            ExprKind::StructLiteral(s) => s.fields.iter().map(|f| &f.value).collect(),
            ExprKind::ArrayLiteral(a) => a.elements.iter().collect(),
            ExprKind::SliceLiteral(s) => s.elements.iter().collect(),
            ExprKind::Tuple(items) => items.iter().collect(),
            ExprKind::FunctionDeclaration(_)
            | ExprKind::Extern(_)
            | ExprKind::Type(_)
            | ExprKind::Identifier(_)
            | ExprKind::Integer(_)
            | ExprKind::Float(_)
            | ExprKind::Boolean(_)
            | ExprKind::String(_)
            | ExprKind::Null => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    // declarations
    Let(Let),
    Function(Function),
    FunctionDeclaration(FunctionSignature),
    Export(Box<Expr>),
    Extern(Extern),
    Type(TypeDecl),
    Implementation(Implementation),

    // control flow
    Block(Block),
    If(If),
    While(While),
    Return(Option<Box<Expr>>),

    // operations
    Call(Call),
    Member(Member),
    Unary(Unary),
    Binary(Binary),
    Cast(Cast),
    Parenthesis(Box<Expr>),
    CompileTime(Box<Expr>),

    Identifier(Identifier),

    // literals
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Null,
    StructLiteral(StructLiteral),
    ArrayLiteral(ArrayLiteral),
    SliceLiteral(SliceLiteral),
    Tuple(Vec<Expr>),
}

/// Type syntax as written in the source.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeExpr {
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExprKind {
    Named(String),
    Array { element: Box<TypeExpr>, length: u64 },
    Optional(Box<TypeExpr>),
    Reference(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    Function {
        params: Vec<TypeExpr>,
        ret: Option<Box<TypeExpr>>,
    },
    Struct(Vec<FieldDecl>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty: TypeExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Let {
    pub name: Ident,
    pub value: Box<Expr>,
    pub variable: Option<VariableId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelfParam {
    Value,
    Reference,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeExpr,
    pub variable: Option<VariableId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSignature {
    pub span: Span,
    pub name: Option<Ident>,
    /// `fn T.name(...)` declares a method on `T`.
    pub receiver: Option<TypeExpr>,
    pub self_param: Option<Spanned<SelfParam>>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,

    pub ty: Option<TypeId>,
    pub variable: Option<VariableId>,
    pub self_variable: Option<VariableId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub signature: FunctionSignature,
    pub body: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Extern {
    /// Import path, e.g. `["js", "math", "sin"]`. The first key is the
    /// import namespace.
    pub keys: Vec<Spanned<String>>,
    pub signature: FunctionSignature,
    pub compile_time_runnable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeDeclBody {
    Struct(Vec<FieldDecl>),
    Interface(Vec<FunctionSignature>),
    Alias(TypeExpr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    pub name: Ident,
    pub body: TypeDeclBody,
    pub ty: Option<TypeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Implementation {
    pub implementer: TypeExpr,
    pub interface: TypeExpr,
    pub methods: Vec<Function>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub items: Vec<Expr>,
    pub scope: Option<ScopeId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct If {
    pub cond: Box<Expr>,
    pub then_branch: Box<Expr>,
    pub else_branch: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct While {
    pub cond: Box<Expr>,
    pub body: Box<Expr>,
    pub else_branch: Option<Box<Expr>>,
}

/// Resolved operator/method target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodTarget {
    pub method: VariableId,
    /// The receiver travels as the implicit first argument.
    pub with_receiver: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub target: Option<MethodTarget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub receiver: Box<Expr>,
    pub name: Ident,
    pub field: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negative,
    Positive,
    Not,
    Reference,
    HasValue,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Negative => "-",
            UnaryOp::Positive => "+",
            UnaryOp::Not => "!",
            UnaryOp::Reference => "&",
            UnaryOp::HasValue => "?",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Unary {
    pub op: Spanned<UnaryOp>,
    pub operand: Box<Expr>,
    pub target: Option<MethodTarget>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    And,
    Or,
    Xor,
    Shl,
    Shr,
    RotateLeft,
    RotateRight,

    Index,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Assign => "=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::RotateLeft => "<<<",
            BinaryOp::RotateRight => ">>>",
            BinaryOp::Index => "[]",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Binary {
    pub op: Spanned<BinaryOp>,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub target: Option<MethodTarget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cast {
    pub value: Box<Expr>,
    pub to: TypeExpr,
    pub target: Option<MethodTarget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Identifier {
    pub name: Ident,
    pub variable: Option<VariableId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldInit {
    pub name: Ident,
    pub value: Expr,
    pub index: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructLiteral {
    pub ty: TypeExpr,
    pub fields: Vec<FieldInit>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayLiteral {
    pub ty: TypeExpr,
    pub elements: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SliceLiteral {
    pub element: TypeExpr,
    pub elements: Vec<Expr>,
}
