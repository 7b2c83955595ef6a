//! # AST Module
//!
//! Passive syntax tree produced by the parser and consumed by the
//! compiler. Every node carries the [`Span`] of the source text it was
//! parsed from; child spans always lie inside their parent's span.

use crate::error::Span;

// -----------------------------------------------------------------------------
// EXPRESSIONS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Call {
        callee: String,
        callee_span: Span,
        args: Vec<Expr>,
        span: Span,
    },
    /// `expr as TYPE` (or `expr =< TYPE`).
    Cast {
        expr: Box<Expr>,
        target: String,
        target_span: Span,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Cast { span, .. } => *span,
        }
    }

    /// Same expression covering `span`; used to widen over parentheses.
    pub fn with_span(mut self, outer: Span) -> Expr {
        match &mut self {
            Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::Str { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Cast { span, .. } => *span = outer,
        }
        self
    }

    /// Only calls may stand alone as statements without being useless.
    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

// -----------------------------------------------------------------------------
// STATEMENTS
// -----------------------------------------------------------------------------

/// An ordered statement list closed by `;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct CondBranch {
    pub condition: Expr,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr {
        expr: Expr,
        span: Span,
    },
    /// `name (: TYPE)? (= expr)?`; the parser guarantees at least one of
    /// `type_name` and `value` is present.
    Assign {
        name: String,
        name_span: Span,
        type_name: Option<String>,
        value: Option<Expr>,
        span: Span,
    },
    /// A bare `return` (value `None`) is only valid in void functions.
    Return {
        value: Option<Expr>,
        span: Span,
    },
    /// `branches[0]` is the `if`, the rest are `elif`s in order.
    If {
        branches: Vec<CondBranch>,
        else_body: Option<Block>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Block,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. } => *span,
        }
    }
}

// -----------------------------------------------------------------------------
// DECLARATIONS
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_name: String,
    pub is_public: bool,
    pub is_static: bool,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub name_span: Span,
    pub return_type: String,
    pub return_type_span: Span,
    pub params: Vec<Param>,
    pub body: Block,
    pub is_public: bool,
    pub is_static: bool,
    /// Declared with `def VIS class ...`: a candidate operator method.
    pub is_class_method: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub name_span: Span,
    pub is_public: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// Top-level declarations.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Switches the namespace for every class that follows.
    Namespace { name: String, span: Span },
    Class(ClassDecl),
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Namespace { span, .. } => *span,
            Item::Class(class) => class.span,
        }
    }
}
