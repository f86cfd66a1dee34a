//! Parsed statement and expression trees (§4.F, §6 grammar summary).

use crate::catalog::{ColumnType, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(SqlValue),
    Column(String),
    Param(usize),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cast(Box<Expr>, ColumnType),
    FuncCall(String, Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    /// `SINCE`/`UNTIL`: inclusive tx-id bound. `AFTER`/`BEFORE`: exclusive.
    Since(u64),
    After(u64),
    Until(u64),
    Before(u64),
}

#[derive(Debug, Clone, Default)]
pub struct SelectCore {
    pub distinct: bool,
    pub columns: Vec<Expr>,
    pub column_aliases: Vec<Option<String>>,
    pub from: Option<String>,
    pub join: Option<(String, Expr)>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
    pub order_by: Vec<(String, bool)>, // (column, descending)
    pub use_index: Option<Vec<String>>,
    pub temporal: Option<Temporal>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    CreateDatabase(String),
    UseDatabase(String),
    CreateTable { name: String, columns: Vec<ColumnDef>, primary_key: Vec<String> },
    AlterTableAddColumn { table: String, column: ColumnDef },
    AlterTableRenameColumn { table: String, from: String, to: String },
    CreateIndex { table: String, columns: Vec<String>, unique: bool },
    Insert { table: String, columns: Vec<String>, rows: Vec<Vec<Expr>>, on_conflict_do_nothing: bool },
    Upsert { table: String, columns: Vec<String>, rows: Vec<Vec<Expr>> },
    Update { table: String, assignments: Vec<(String, Expr)>, where_clause: Option<Expr> },
    Delete { table: String, where_clause: Option<Expr> },
    Select(SelectCore),
    Union { left: Box<Statement>, right: Box<Statement>, all: bool },
    Begin,
    Commit,
    Cancel,
}
