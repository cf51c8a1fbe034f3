// src/frontend/ast.rs
//! Defines the Abstract Syntax Tree (AST) nodes for Synapse.
//! Every node owns its children; the resolver fills in the `binding` and
//! frame-size annotations in place before code generation reads them.
use crate::frontend::token::Pos;

/// Identity of a declaration node, used by symbols as a non-owning back-reference.
pub type NodeId = u32;

/// What an identifier use was bound to by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Slot in the current call frame.
    Local(u16),
    /// Slot in the program's global table.
    Global(u32),
    /// Top-level function, by name.
    Function(String),
    /// Class constructor reference, by name.
    Class(String),
    /// Host function imported from a host module.
    Native { module: String, name: String },
    /// Whole host module imported as a namespace.
    Module(String),
    /// Declared AI service.
    Service(String),
    /// Bare reference to a member of the enclosing class, i.e. `this.<name>`.
    Member(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub file: String,
    pub items: Vec<Item>,
    /// Names of program-level variables, indexed by `Binding::Global`.
    pub globals: Vec<String>,
    /// Frame size for the implicit top-level function.
    pub main_frame: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(FunctionDecl),
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Handler(HandlerDecl),
    Import(ImportDecl),
    Uses(UsesDecl),
    Stmt(Stmt),
}

/// Type annotation as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Named { name: String, pos: Pos },
    Array(Box<TypeExpr>),
}

impl TypeExpr {
    pub fn pos(&self) -> Pos {
        match self {
            TypeExpr::Named { pos, .. } => *pos,
            TypeExpr::Array(inner) => inner.pos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub is_async: bool,
    pub body: Block,
    pub pos: Pos,
    pub frame_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub visibility: Visibility,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub visibility: Visibility,
    pub func: FunctionDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub id: NodeId,
    pub name: String,
    /// Name-only annotations written as `@Name` before the class.
    pub decorators: Vec<String>,
    pub base: Option<(String, Pos)>,
    pub interfaces: Vec<(String, Pos)>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub constructor: Option<FunctionDecl>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDecl {
    pub id: NodeId,
    pub name: String,
    pub extends: Vec<(String, Pos)>,
    pub methods: Vec<MethodSig>,
    pub pos: Pos,
}

/// `on [async] topic (binding) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerDecl {
    pub id: NodeId,
    pub topic: String,
    pub is_async: bool,
    pub binding: String,
    pub body: Block,
    pub pos: Pos,
    pub frame_size: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `import { a, b } from "module";`
    Names(Vec<(String, Pos)>),
    /// `import module;`
    Module,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module: String,
    pub kind: ImportKind,
    pub pos: Pos,
}

/// `uses Name from "capability" { key: value, ... };`
#[derive(Debug, Clone, PartialEq)]
pub struct UsesDecl {
    pub name: String,
    pub capability: String,
    pub config: Vec<(String, Expr)>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Var {
        name: String,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
        pos: Pos,
        binding: Option<Binding>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        else_: Option<Box<Stmt>>,
        pos: Pos,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        pos: Pos,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
        pos: Pos,
    },
    ForIn {
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
        pos: Pos,
        binding: Option<Binding>,
    },
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    Throw {
        value: Expr,
        pos: Pos,
    },
    Try {
        body: Block,
        catch_name: String,
        handler: Block,
        pos: Pos,
        catch_binding: Option<Binding>,
    },
    Emit {
        topic: String,
        payload: Option<Expr>,
        pos: Pos,
    },
    Block(Block),
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Var { pos, .. }
            | Stmt::If { pos, .. }
            | Stmt::While { pos, .. }
            | Stmt::For { pos, .. }
            | Stmt::ForIn { pos, .. }
            | Stmt::Return { pos, .. }
            | Stmt::Throw { pos, .. }
            | Stmt::Try { pos, .. }
            | Stmt::Emit { pos, .. } => *pos,
            Stmt::Expr(expr) => expr.pos,
            Stmt::Block(block) => block.pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::LtEq => "<=",
            BinaryOp::GtEq => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    /// The arithmetic a compound assignment performs before storing.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Self { kind, pos }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Number literal with its source lexeme.
    Number { value: f64, lexeme: String },
    /// String literal with its unescaped value and its source lexeme.
    Str { value: String, lexeme: String },
    Bool(bool),
    Null,
    This,
    Ident {
        name: String,
        binding: Option<Binding>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
    Await(Box<Expr>),
    Parallel(Box<Expr>),
}
