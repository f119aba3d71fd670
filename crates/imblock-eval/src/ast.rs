//! Arena-indexed syntax tree for compiled block programs.
//!
//! Statements, expressions and statement blocks live in flat vectors owned by
//! [`Program`] and refer to each other through typed indices, so interpreter
//! frames can hold plain `Copy` ids instead of borrowing into the tree.

use crate::primitive::Builtin;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// A parsed program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    stmts: Vec<Stmt>,
    exprs: Vec<Expr>,
    /// Statement blocks; index 0 is the top level.
    blocks: Vec<Vec<StmtId>>,
}

impl Program {
    /// An empty program with just the top-level block.
    pub fn new() -> Self {
        Self {
            stmts: Vec::new(),
            exprs: Vec::new(),
            blocks: vec![Vec::new()],
        }
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0]
    }

    pub fn block(&self, id: BlockId) -> &[StmtId] {
        &self.blocks[id.0]
    }

    /// The top-level statement block.
    pub fn root(&self) -> BlockId {
        BlockId(0)
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        self.blocks.push(Vec::new());
        BlockId(self.blocks.len() - 1)
    }

    pub(crate) fn push_to_block(&mut self, block: BlockId, stmt: StmtId) {
        self.blocks[block.0].push(stmt);
    }

    pub(crate) fn add_stmt(&mut self, stmt: Stmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId(self.stmts.len() - 1)
    }

    pub(crate) fn add_expr(&mut self, expr: Expr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() - 1)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Statement in a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `var x;` or `var x = e;`
    VarDecl { name: String, init: Option<ExprId> },
    /// `x = e;`, `x += e;`, `x -= e;`
    Assign { name: String, op: AssignOp, value: ExprId },
    /// Expression evaluated for its effects: `e;`
    Expr(ExprId),
    /// `if (c) {..} else if (c) {..} else {..}`
    If {
        branches: Vec<(ExprId, BlockId)>,
        else_block: Option<BlockId>,
    },
    While { cond: ExprId, body: BlockId },
    /// `for (init; cond; update) {..}`; init and update are simple statements.
    For {
        init: Option<StmtId>,
        cond: Option<ExprId>,
        update: Option<StmtId>,
        body: BlockId,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Call { builtin: Builtin, args: Vec<ExprId> },
    /// `e.field`
    Member { object: ExprId, field: String },
    Unary { op: UnOp, operand: ExprId },
    Binary { op: BinOp, left: ExprId, right: ExprId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}
