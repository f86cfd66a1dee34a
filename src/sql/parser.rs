//! Hand-written recursive-descent tokenizer and parser covering the
//! grammar summarized in §6. Not a full SQL grammar — enough of
//! DDL/DML/SELECT (including temporal clauses, `USE INDEX`, `DISTINCT`,
//! `UNION`) to drive the row-reader pipeline in [super::reader].

use crate::catalog::{ColumnType, SqlValue};
use crate::{err_at, Result};

use super::ast::*;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    Param,
    Punct(char),
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Lexer<'a> {
        Lexer { chars: src.chars().peekable() }
    }

    fn tokens(mut self) -> Result<Vec<Tok>> {
        let mut out = vec![];
        loop {
            while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
                self.chars.next();
            }
            match self.chars.peek() {
                None => break,
                Some('\'') => {
                    self.chars.next();
                    let mut s = String::new();
                    loop {
                        match self.chars.next() {
                            Some('\'') => break,
                            Some(c) => s.push(c),
                            None => return err_at!(ParseError, msg: "unterminated string literal"),
                        }
                    }
                    out.push(Tok::Str(s));
                }
                Some('?') => {
                    self.chars.next();
                    out.push(Tok::Param);
                }
                Some(c) if c.is_alphabetic() || *c == '_' => {
                    let mut s = String::new();
                    while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
                        s.push(self.chars.next().unwrap());
                    }
                    out.push(Tok::Ident(s));
                }
                Some(c) if c.is_ascii_digit() || *c == '-' => {
                    let mut s = String::new();
                    s.push(self.chars.next().unwrap());
                    while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
                        s.push(self.chars.next().unwrap());
                    }
                    out.push(Tok::Num(s));
                }
                Some(&c) => {
                    self.chars.next();
                    out.push(Tok::Punct(c));
                }
            }
        }
        out.push(Tok::Eof);
        Ok(out)
    }
}

pub struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    next_param: usize,
}

impl Parser {
    pub fn new(src: &str) -> Result<Parser> {
        let toks = Lexer::new(src).tokens()?;
        Ok(Parser { toks, pos: 0, next_param: 0 })
    }

    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn kw(&self, s: &str) -> bool {
        matches!(self.peek(), Tok::Ident(id) if id.eq_ignore_ascii_case(s))
    }

    fn eat_kw(&mut self, s: &str) -> bool {
        if self.kw(s) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, s: &str) -> Result<()> {
        if self.eat_kw(s) {
            Ok(())
        } else {
            err_at!(ParseError, msg: "expected keyword {}, found {:?}", s, self.peek())
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if matches!(self.peek(), Tok::Punct(p) if *p == c) {
            self.advance();
            Ok(())
        } else {
            err_at!(ParseError, msg: "expected '{}', found {:?}", c, self.peek())
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(self.peek(), Tok::Punct(p) if *p == c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(s) => Ok(s),
            other => err_at!(ParseError, msg: "expected identifier, found {:?}", other),
        }
    }

    pub fn parse_statement(&mut self) -> Result<Statement> {
        let stmt = if self.eat_kw("CREATE") {
            self.parse_create()?
        } else if self.eat_kw("USE") {
            self.eat_kw("DATABASE");
            Statement::UseDatabase(self.ident()?)
        } else if self.eat_kw("ALTER") {
            self.parse_alter()?
        } else if self.eat_kw("INSERT") {
            self.parse_insert(false)?
        } else if self.eat_kw("UPSERT") {
            self.expect_kw("INTO")?;
            let (table, columns, rows) = self.parse_insert_body()?;
            Statement::Upsert { table, columns, rows }
        } else if self.eat_kw("UPDATE") {
            self.parse_update()?
        } else if self.eat_kw("DELETE") {
            self.parse_delete()?
        } else if self.eat_kw("SELECT") {
            self.parse_select_stmt()?
        } else if self.eat_kw("BEGIN") {
            self.eat_kw("TRANSACTION");
            Statement::Begin
        } else if self.eat_kw("COMMIT") {
            Statement::Commit
        } else if self.eat_kw("CANCEL") {
            Statement::Cancel
        } else {
            return err_at!(ParseError, msg: "unrecognized statement starting at {:?}", self.peek());
        };
        self.eat_punct(';');
        Ok(stmt)
    }

    fn parse_select_stmt(&mut self) -> Result<Statement> {
        let left = self.parse_select_core()?;
        if self.eat_kw("UNION") {
            let all = self.eat_kw("ALL");
            self.expect_kw("SELECT")?;
            let right = self.parse_select_stmt()?;
            return Ok(Statement::Union { left: Box::new(Statement::Select(left)), right: Box::new(right), all });
        }
        Ok(Statement::Select(left))
    }

    fn parse_create(&mut self) -> Result<Statement> {
        if self.eat_kw("DATABASE") {
            return Ok(Statement::CreateDatabase(self.ident()?));
        }
        let unique = self.eat_kw("UNIQUE");
        if self.eat_kw("INDEX") {
            self.expect_kw("ON")?;
            let table = self.ident()?;
            self.expect_punct('(')?;
            let mut cols = vec![self.ident()?];
            while self.eat_punct(',') {
                cols.push(self.ident()?);
            }
            self.expect_punct(')')?;
            return Ok(Statement::CreateIndex { table, columns: cols, unique });
        }
        self.expect_kw("TABLE")?;
        let name = self.ident()?;
        self.expect_punct('(')?;
        let mut columns = vec![];
        let mut primary_key = vec![];
        loop {
            if self.eat_kw("PRIMARY") {
                self.expect_kw("KEY")?;
                if self.eat_punct('(') {
                    primary_key.push(self.ident()?);
                    while self.eat_punct(',') {
                        primary_key.push(self.ident()?);
                    }
                    self.expect_punct(')')?;
                } else {
                    primary_key.push(self.ident()?);
                }
            } else {
                let cname = self.ident()?;
                let ty = self.parse_type()?;
                let mut nullable = true;
                let mut auto_increment = false;
                loop {
                    if self.eat_kw("NOT") {
                        self.expect_kw("NULL")?;
                        nullable = false;
                    } else if self.eat_kw("AUTO_INCREMENT") {
                        auto_increment = true;
                    } else if self.eat_kw("PRIMARY") {
                        self.expect_kw("KEY")?;
                        primary_key.push(cname.clone());
                        nullable = false;
                    } else {
                        break;
                    }
                }
                columns.push(ColumnDef { name: cname, ty, nullable, auto_increment });
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(Statement::CreateTable { name, columns, primary_key })
    }

    fn parse_type(&mut self) -> Result<ColumnType> {
        let name = self.ident()?;
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "INTEGER" | "INT" => Ok(ColumnType::Integer),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            "ANY" => Ok(ColumnType::Any),
            "VARCHAR" => {
                let n = self.parse_bracket_len()?;
                Ok(ColumnType::Varchar(n))
            }
            "BLOB" => {
                let n = self.parse_bracket_len()?;
                Ok(ColumnType::Blob(n))
            }
            _ => err_at!(ParseError, msg: "unknown column type {}", name),
        }
    }

    fn parse_bracket_len(&mut self) -> Result<u32> {
        self.expect_punct('[')?;
        let n = match self.advance() {
            Tok::Num(s) => err_at!(ParseError, s.parse::<u32>())?,
            other => return err_at!(ParseError, msg: "expected length, found {:?}", other),
        };
        self.expect_punct(']')?;
        Ok(n)
    }

    fn parse_alter(&mut self) -> Result<Statement> {
        self.expect_kw("TABLE")?;
        let table = self.ident()?;
        if self.eat_kw("ADD") {
            self.eat_kw("COLUMN");
            let cname = self.ident()?;
            let ty = self.parse_type()?;
            Ok(Statement::AlterTableAddColumn { table, column: ColumnDef { name: cname, ty, nullable: true, auto_increment: false } })
        } else {
            self.expect_kw("RENAME")?;
            self.eat_kw("COLUMN");
            let from = self.ident()?;
            self.expect_kw("TO")?;
            let to = self.ident()?;
            Ok(Statement::AlterTableRenameColumn { table, from, to })
        }
    }

    fn parse_insert(&mut self, _unused: bool) -> Result<Statement> {
        self.expect_kw("INTO")?;
        let (table, columns, rows) = self.parse_insert_body()?;
        let on_conflict_do_nothing = if self.eat_kw("ON") {
            self.expect_kw("CONFLICT")?;
            self.expect_kw("DO")?;
            self.expect_kw("NOTHING")?;
            true
        } else {
            false
        };
        Ok(Statement::Insert { table, columns, rows, on_conflict_do_nothing })
    }

    fn parse_insert_body(&mut self) -> Result<(String, Vec<String>, Vec<Vec<Expr>>)> {
        let table = self.ident()?;
        let mut columns = vec![];
        if self.eat_punct('(') {
            columns.push(self.ident()?);
            while self.eat_punct(',') {
                columns.push(self.ident()?);
            }
            self.expect_punct(')')?;
        }
        self.expect_kw("VALUES")?;
        let mut rows = vec![];
        loop {
            self.expect_punct('(')?;
            let mut row = vec![self.parse_expr()?];
            while self.eat_punct(',') {
                row.push(self.parse_expr()?);
            }
            self.expect_punct(')')?;
            rows.push(row);
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok((table, columns, rows))
    }

    fn parse_update(&mut self) -> Result<Statement> {
        let table = self.ident()?;
        self.expect_kw("SET")?;
        let mut assignments = vec![(self.ident()?, { self.expect_punct('=')?; self.parse_expr()? })];
        while self.eat_punct(',') {
            let c = self.ident()?;
            self.expect_punct('=')?;
            assignments.push((c, self.parse_expr()?));
        }
        let where_clause = if self.eat_kw("WHERE") { Some(self.parse_expr()?) } else { None };
        Ok(Statement::Update { table, assignments, where_clause })
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect_kw("FROM")?;
        let table = self.ident()?;
        let where_clause = if self.eat_kw("WHERE") { Some(self.parse_expr()?) } else { None };
        Ok(Statement::Delete { table, where_clause })
    }

    fn parse_select_core(&mut self) -> Result<SelectCore> {
        let mut core = SelectCore::default();
        core.distinct = self.eat_kw("DISTINCT");
        loop {
            if matches!(self.peek(), Tok::Punct('*')) {
                self.advance();
                core.columns.push(Expr::Column("*".to_string()));
                core.column_aliases.push(None);
                break;
            }
            let expr = self.parse_expr()?;
            let alias = if self.eat_kw("AS") { Some(self.ident()?) } else { None };
            core.columns.push(expr);
            core.column_aliases.push(alias);
            if !self.eat_punct(',') {
                break;
            }
        }
        if self.eat_kw("FROM") {
            core.from = Some(self.ident()?);
        }
        if self.eat_kw("INNER") {
            self.expect_kw("JOIN")?;
            let table = self.ident()?;
            self.expect_kw("ON")?;
            let cond = self.parse_expr()?;
            core.join = Some((table, cond));
        }
        if let Some(t) = self.parse_temporal()? {
            core.temporal = Some(t);
        }
        if self.eat_kw("USE") {
            self.expect_kw("INDEX")?;
            self.expect_kw("ON")?;
            self.expect_punct('(')?;
            let mut cols = vec![self.ident()?];
            while self.eat_punct(',') {
                cols.push(self.ident()?);
            }
            self.expect_punct(')')?;
            core.use_index = Some(cols);
        }
        if self.eat_kw("WHERE") {
            core.where_clause = Some(self.parse_expr()?);
        }
        if self.eat_kw("GROUP") {
            self.expect_kw("BY")?;
            core.group_by.push(self.ident()?);
            while self.eat_punct(',') {
                core.group_by.push(self.ident()?);
            }
        }
        if self.eat_kw("HAVING") {
            core.having = Some(self.parse_expr()?);
        }
        if self.eat_kw("ORDER") {
            self.expect_kw("BY")?;
            loop {
                let col = self.ident()?;
                let desc = self.eat_kw("DESC");
                self.eat_kw("ASC");
                core.order_by.push((col, desc));
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        if self.eat_kw("LIMIT") {
            core.limit = Some(self.parse_uint()?);
        }
        if self.eat_kw("OFFSET") {
            core.offset = Some(self.parse_uint()?);
        }
        Ok(core)
    }

    fn parse_temporal(&mut self) -> Result<Option<Temporal>> {
        let ctor: fn(u64) -> Temporal = if self.eat_kw("SINCE") {
            Temporal::Since
        } else if self.eat_kw("AFTER") {
            Temporal::After
        } else if self.eat_kw("UNTIL") {
            Temporal::Until
        } else if self.eat_kw("BEFORE") {
            Temporal::Before
        } else {
            return Ok(None);
        };
        self.expect_kw("TX")?;
        let n = self.parse_uint()?;
        if n == 0 {
            return err_at!(IllegalArguments, msg: "temporal tx bound must be > 0");
        }
        Ok(Some(ctor(n)))
    }

    fn parse_uint(&mut self) -> Result<u64> {
        match self.advance() {
            Tok::Num(s) => err_at!(ParseError, s.parse::<u64>()),
            other => err_at!(ParseError, msg: "expected a number, found {:?}", other),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_kw("OR") {
            left = Expr::BinOp(BinOp::Or, Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_kw("AND") {
            left = Expr::BinOp(BinOp::And, Box::new(left), Box::new(self.parse_not()?));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_kw("NOT") {
            Ok(Expr::Not(Box::new(self.parse_not()?)))
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Tok::Punct('=') => Some(BinOp::Eq),
            Tok::Punct('<') => Some(BinOp::Lt),
            Tok::Punct('>') => Some(BinOp::Gt),
            _ => None,
        };
        if matches!(self.peek(), Tok::Punct('!')) {
            self.advance();
            self.expect_punct('=')?;
            return Ok(Expr::BinOp(BinOp::Ne, Box::new(left), Box::new(self.parse_additive()?)));
        }
        if let Some(op) = op {
            self.advance();
            let op = if matches!(op, BinOp::Lt) && self.eat_punct('=') {
                BinOp::Le
            } else if matches!(op, BinOp::Gt) && self.eat_punct('=') {
                BinOp::Ge
            } else {
                op
            };
            return Ok(Expr::BinOp(op, Box::new(left), Box::new(self.parse_additive()?)));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Punct('+') => BinOp::Add,
                Tok::Punct('-') => BinOp::Sub,
                _ => break,
            };
            self.advance();
            left = Expr::BinOp(op, Box::new(left), Box::new(self.parse_multiplicative()?));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Punct('*') => BinOp::Mul,
                Tok::Punct('/') => BinOp::Div,
                _ => break,
            };
            self.advance();
            left = Expr::BinOp(op, Box::new(left), Box::new(self.parse_unary()?));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.eat_kw("CAST") {
            self.expect_punct('(')?;
            let e = self.parse_expr()?;
            self.expect_kw("AS")?;
            let ty = self.parse_type()?;
            self.expect_punct(')')?;
            return Ok(Expr::Cast(Box::new(e), ty));
        }
        if self.eat_kw("NULL") {
            return Ok(Expr::Literal(SqlValue::Null));
        }
        if self.eat_kw("TRUE") {
            return Ok(Expr::Literal(SqlValue::Boolean(true)));
        }
        if self.eat_kw("FALSE") {
            return Ok(Expr::Literal(SqlValue::Boolean(false)));
        }
        if self.eat_punct('(') {
            let e = self.parse_expr()?;
            self.expect_punct(')')?;
            return Ok(e);
        }
        match self.advance() {
            Tok::Param => {
                let idx = self.next_param;
                self.next_param += 1;
                Ok(Expr::Param(idx))
            }
            Tok::Str(s) => Ok(Expr::Literal(SqlValue::Varchar(s))),
            Tok::Num(s) => {
                let v = err_at!(ParseError, s.parse::<i64>())?;
                Ok(Expr::Literal(SqlValue::Integer(v)))
            }
            Tok::Ident(name) => {
                if self.eat_punct('(') {
                    let mut args = vec![];
                    if !matches!(self.peek(), Tok::Punct(')')) {
                        if matches!(self.peek(), Tok::Punct('*')) {
                            self.advance();
                        } else {
                            args.push(self.parse_expr()?);
                            while self.eat_punct(',') {
                                args.push(self.parse_expr()?);
                            }
                        }
                    }
                    self.expect_punct(')')?;
                    Ok(Expr::FuncCall(name, args))
                } else {
                    Ok(Expr::Column(name))
                }
            }
            other => err_at!(ParseError, msg: "unexpected token {:?}", other),
        }
    }
}

#[cfg(test)]
mod parser_test {
    use super::*;

    #[test]
    fn test_parse_create_table_with_pk() {
        let mut p = Parser::new("CREATE TABLE t(id INTEGER, v VARCHAR[8], PRIMARY KEY id)").unwrap();
        let stmt = p.parse_statement().unwrap();
        match stmt {
            Statement::CreateTable { name, columns, primary_key } => {
                assert_eq!(name, "t");
                assert_eq!(columns.len(), 2);
                assert_eq!(primary_key, vec!["id".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_insert_values() {
        let mut p = Parser::new("INSERT INTO t VALUES (1,'a'),(2,'b')").unwrap();
        let stmt = p.parse_statement().unwrap();
        match stmt {
            Statement::Insert { rows, .. } => assert_eq!(rows.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_with_where_and_temporal() {
        let mut p = Parser::new("SELECT v FROM t BEFORE TX 3 WHERE id = 1").unwrap();
        let stmt = p.parse_statement().unwrap();
        match stmt {
            Statement::Select(core) => {
                assert_eq!(core.from, Some("t".to_string()));
                assert_eq!(core.temporal, Some(Temporal::Before(3)));
                assert!(core.where_clause.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_distinct_with_limit() {
        let mut p = Parser::new("SELECT DISTINCT title FROM t").unwrap();
        let stmt = p.parse_statement().unwrap();
        match stmt {
            Statement::Select(core) => assert!(core.distinct),
            other => panic!("unexpected {:?}", other),
        }
    }
}
