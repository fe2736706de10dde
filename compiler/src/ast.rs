// AST node types for textual kernel IR.
//
// A syntactic view of a `.tk` file: kernels, parameters, and a flat list of
// body items (labels and instructions). Name resolution, opcode checking,
// and block formation happen later in `resolve`.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A parsed `.tk` file: one or more kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub kernels: Vec<KernelDef>,
}

/// `kernel NAME(params) { items }`
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: Ident,
    pub params: Vec<Param>,
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// `%name` reference or definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub name: String,
    pub span: Span,
}

// ── Types ──

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    /// Scalar type name, or `ptr` with `pointee` set.
    pub base: Ident,
    pub pointee: Option<Ident>,
    pub shape: Vec<i64>,
    pub span: Span,
}

// ── Parameters ──

/// `%name: TYPE attr(N)*`
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: ValueRef,
    pub ty: TypeExpr,
    pub attrs: Vec<Attr>,
}

/// `align(16)`
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: Ident,
    pub value: i64,
    pub span: Span,
}

// ── Body ──

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Label(Ident),
    Inst(InstDef),
}

/// `[%result =] OPCODE operands [: TYPE]`
#[derive(Debug, Clone, PartialEq)]
pub struct InstDef {
    pub result: Option<ValueRef>,
    pub opcode: Ident,
    pub operands: Vec<Operand>,
    pub ty: Option<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(ValueRef),
    Int(i64, Span),
    Float(f64, Span),
    Label(Ident),
    /// Phi incoming pair `[%value, label]`.
    Incoming(ValueRef, Ident),
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Operand::Value(v) => v.span,
            Operand::Int(_, s) | Operand::Float(_, s) => *s,
            Operand::Label(l) => l.span,
            Operand::Incoming(v, _) => v.span,
        }
    }
}
