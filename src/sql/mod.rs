//! SQL surface (§4.E/§4.F): parses statements, translates DDL/DML into
//! catalog + KV writes, and builds a [reader::Reader] pipeline for
//! `SELECT`. Ties together [crate::catalog], [crate::mvcc] and
//! [crate::store::Store] the way `embedded/sql`'s engine sits over
//! `embedded/store` in the original system this was modeled on.

pub mod ast;
pub mod parser;
pub mod reader;

use std::collections::HashMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use crate::catalog::{self, Catalog, ColumnId, ColumnType, DbId, SqlValue, Table, TableId};
use crate::mvcc::{ReadSetEntry, TxManager};
use crate::store::Store;
use crate::{err_at, Result};

use ast::{BinOp, Expr, SelectCore, Statement, Temporal};
use parser::Parser;
use reader::{AggKind, DistinctReader, FilterReader, GroupByReader, JoinReader, LimitReader, ProjectionReader, Reader, SortReader, UnionReader, VecReader};

pub enum QueryResult {
    Rows { columns: Vec<String>, rows: Vec<reader::Row> },
    RowsAffected(usize),
    Ack,
}

pub struct Engine {
    store: Arc<Store>,
    catalog: Mutex<Catalog>,
    tx_mgr: TxManager,
    current_db: Mutex<Option<DbId>>,
}

impl Engine {
    pub fn new(store: Arc<Store>) -> Engine {
        let tx_mgr = TxManager::new(store.clone());
        Engine { store, catalog: Mutex::new(Catalog::new()), tx_mgr, current_db: Mutex::new(None) }
    }

    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let mut parser = Parser::new(sql)?;
        let stmt = parser.parse_statement()?;
        self.execute_stmt(&stmt, params)
    }

    fn current_db_id(&self) -> Result<DbId> {
        self.current_db.lock().unwrap().ok_or_else(|| crate::Error::IllegalArguments("no database selected; issue USE DATABASE first".into()))
    }

    fn execute_stmt(&self, stmt: &Statement, params: &[SqlValue]) -> Result<QueryResult> {
        match stmt {
            Statement::CreateDatabase(name) => {
                let (_, entries) = self.catalog.lock().unwrap().create_database(name)?;
                self.store.commit(entries)?;
                Ok(QueryResult::Ack)
            }
            Statement::UseDatabase(name) => {
                let db_id = self.catalog.lock().unwrap().database(name).map(|d| d.id).ok_or_else(|| crate::Error::IllegalArguments(format!("unknown database {}", name)))?;
                *self.current_db.lock().unwrap() = Some(db_id);
                Ok(QueryResult::Ack)
            }
            Statement::CreateTable { name, columns, primary_key } => {
                let db_id = self.current_db_id()?;
                let cols = columns.iter().map(|c| (c.name.clone(), c.ty, c.nullable, c.auto_increment)).collect();
                let (_, entries) = self.catalog.lock().unwrap().create_table(db_id, name, cols, primary_key.clone())?;
                self.store.commit(entries)?;
                Ok(QueryResult::Ack)
            }
            Statement::AlterTableAddColumn { table, column } => {
                let table_id = self.table_id(table)?;
                if !column.nullable {
                    return err_at!(IllegalArguments, msg: "ALTER TABLE ADD COLUMN must be nullable");
                }
                let entries = self.catalog.lock().unwrap().add_column(table_id, &column.name, column.ty)?;
                self.store.commit(entries)?;
                Ok(QueryResult::Ack)
            }
            Statement::AlterTableRenameColumn { table, from, to } => {
                let table_id = self.table_id(table)?;
                self.catalog.lock().unwrap().rename_column(table_id, from, to)?;
                Ok(QueryResult::Ack)
            }
            Statement::CreateIndex { table, columns, unique } => {
                let table_id = self.table_id(table)?;
                let snap = self.snapshot()?;
                let t = self.table_by_id(table_id)?;
                let prefix = table_prefix(self.current_db_id()?, table_id);
                let is_empty = snap.range((Bound::Included(prefix.as_slice()), Bound::Unbounded), false).is_empty();
                let nullable_friendly = columns.iter().all(|c| t.column(c).map(|col| col.nullable).unwrap_or(false));
                if !is_empty && !nullable_friendly {
                    return err_at!(LimitedIndexCreation, msg: "table {} is not empty and index columns are not all nullable-friendly", table);
                }
                let entries = self.catalog.lock().unwrap().create_index(table_id, columns.clone(), *unique)?.1;
                self.store.commit(entries)?;
                Ok(QueryResult::Ack)
            }
            Statement::Insert { table, columns, rows, on_conflict_do_nothing } => self.do_insert(table, columns, rows, params, *on_conflict_do_nothing, false),
            Statement::Upsert { table, columns, rows } => self.do_insert(table, columns, rows, params, false, true),
            Statement::Update { table, assignments, where_clause } => self.do_update(table, assignments, where_clause, params),
            Statement::Delete { table, where_clause } => self.do_delete(table, where_clause, params),
            Statement::Select(core) => {
                let mut reader = self.build_select(core, params)?;
                let columns = reader.columns();
                let mut rows = vec![];
                while let Some(row) = reader.next()? {
                    rows.push(row);
                }
                Ok(QueryResult::Rows { columns, rows })
            }
            Statement::Union { left, right, all } => {
                let (l_cols, l_rows) = self.collect(left, params)?;
                let (_, r_rows) = self.collect(right, params)?;
                let l = VecReader::new(l_cols.clone(), l_rows);
                let r = VecReader::new(l_cols.clone(), r_rows);
                let mut merged = UnionReader::new(l, r)?;
                if !all {
                    let mut deduped = DistinctReader::new(merged, 1_000_000);
                    let mut rows = vec![];
                    while let Some(row) = deduped.next()? {
                        rows.push(row);
                    }
                    return Ok(QueryResult::Rows { columns: l_cols, rows });
                }
                let mut rows = vec![];
                while let Some(row) = merged.next()? {
                    rows.push(row);
                }
                Ok(QueryResult::Rows { columns: l_cols, rows })
            }
            Statement::Begin => {
                self.tx_mgr.begin()?;
                Ok(QueryResult::Ack)
            }
            Statement::Commit => {
                self.tx_mgr.commit()?;
                Ok(QueryResult::Ack)
            }
            Statement::Cancel => {
                self.tx_mgr.cancel();
                Ok(QueryResult::Ack)
            }
        }
    }

    fn collect(&self, stmt: &Statement, params: &[SqlValue]) -> Result<(Vec<String>, Vec<reader::Row>)> {
        match self.execute_stmt(stmt, params)? {
            QueryResult::Rows { columns, rows } => Ok((columns, rows)),
            _ => err_at!(IllegalArguments, msg: "expected a SELECT in UNION operand"),
        }
    }

    fn table_id(&self, name: &str) -> Result<TableId> {
        let db_id = self.current_db_id()?;
        self.catalog.lock().unwrap().table(db_id, name).map(|t| t.id).ok_or_else(|| crate::Error::IllegalArguments(format!("unknown table {}", name)))
    }

    fn table_by_id(&self, id: TableId) -> Result<Table> {
        self.catalog.lock().unwrap().table_by_id(id).cloned().ok_or_else(|| crate::Error::IllegalArguments("unknown table".into()))
    }

    fn snapshot(&self) -> Result<crate::index::Snapshot> {
        self.store.index().snapshot()
    }

    /// Full current-state scan of a table, used for the inner side of a
    /// join (§4.F "Joint reader") where no temporal narrowing applies.
    fn scan_table(&self, db_id: DbId, table_id: TableId) -> Result<(Table, Vec<reader::Row>)> {
        let table = self.table_by_id(table_id)?;
        let snap = self.snapshot()?;
        let prefix = table_prefix(db_id, table_id);
        let entries = snap.range((Bound::Included(prefix.as_slice()), Bound::Unbounded), false);
        let mut rows = vec![];
        for (key, entry) in entries {
            if !key.starts_with(&prefix) {
                break;
            }
            let raw = self.store.read_value_at(entry.value.v_off, entry.value.v_len, entry.value.v_hash)?;
            if catalog::is_tombstone(&raw) {
                continue;
            }
            let values = catalog::decode_row(&table, &raw)?;
            rows.push(row_from_map(&table, &values));
        }
        Ok((table, rows))
    }

    fn pk_bytes(&self, table: &Table, values: &HashMap<ColumnId, SqlValue>) -> Result<Vec<u8>> {
        let mut buf = vec![];
        for col_id in &table.primary_key {
            let col = table.column_by_id(*col_id).expect("pk column exists");
            let v = values.get(col_id).cloned().unwrap_or(SqlValue::Null);
            if v.is_null() {
                return err_at!(IllegalArguments, msg: "primary key column {} cannot be NULL", col.name);
            }
            buf.extend_from_slice(&v.encode_key(col.ty));
        }
        Ok(buf)
    }

    /// Secondary-index KV writes for a freshly inserted row (§3 "Secondary
    /// index entry", §4.E: "uniqueness on secondary indexes is enforced by
    /// attempting to write a sentinel key whose pre-existence triggers
    /// `KeyAlreadyExists`"). For a unique index this also probes the
    /// uniqueness-variant key (no PK suffix) before returning any writes.
    fn secondary_index_writes(&self, table: &Table, db_id: DbId, pk: &[u8], values: &HashMap<ColumnId, SqlValue>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut writes = vec![];
        for idx in table.indexes.iter().filter(|i| !i.primary) {
            let mut idx_cols_encoded = vec![];
            let mut null_bitmap: u8 = 0;
            for (bit, col_id) in idx.cols.iter().enumerate() {
                let col = table.column_by_id(*col_id).expect("index column exists");
                let v = values.get(col_id).cloned().unwrap_or(SqlValue::Null);
                if v.is_null() && bit < 8 {
                    null_bitmap |= 1u8 << bit;
                }
                idx_cols_encoded.extend_from_slice(&v.encode_key(col.ty));
            }
            if idx.unique {
                let uniq_key = catalog::secondary_key(db_id, table.id, idx.id, null_bitmap, &idx_cols_encoded, &[]);
                if self.store.index().get(&uniq_key)?.is_some() {
                    return err_at!(KeyAlreadyExists, msg: "unique index violation on table {}", table.name);
                }
                writes.push((uniq_key, vec![]));
            }
            let lookup_key = catalog::secondary_key(db_id, table.id, idx.id, null_bitmap, &idx_cols_encoded, pk);
            writes.push((lookup_key, pk.to_vec()));
        }
        Ok(writes)
    }

    fn do_insert(&self, table_name: &str, columns: &[String], rows: &[Vec<Expr>], params: &[SqlValue], on_conflict_do_nothing: bool, upsert: bool) -> Result<QueryResult> {
        let table_id = self.table_id(table_name)?;
        let db_id = self.current_db_id()?;
        let mut entries = vec![];
        let mut affected = 0;
        for row in rows {
            let table = self.table_by_id(table_id)?;
            let col_names: Vec<String> = if columns.is_empty() { table.columns.iter().map(|c| c.name.clone()).collect() } else { columns.to_vec() };
            if col_names.len() != row.len() {
                return err_at!(IllegalArguments, msg: "column count does not match value count");
            }
            let mut values: HashMap<ColumnId, SqlValue> = HashMap::new();
            for (cname, expr) in col_names.iter().zip(row.iter()) {
                let col = table.column(cname).ok_or_else(|| crate::Error::IllegalArguments(format!("unknown column {}", cname)))?;
                let v = eval_const(expr, params)?;
                values.insert(col.id, v);
            }
            for col in &table.columns {
                if col.auto_increment {
                    let explicit = values.get(&col.id).and_then(|v| if let SqlValue::Integer(n) = v { Some(*n) } else { None });
                    let assigned = self.catalog.lock().unwrap().reserve_auto_increment(table_id, explicit)?;
                    values.insert(col.id, SqlValue::Integer(assigned));
                } else if !values.contains_key(&col.id) && !col.nullable {
                    return err_at!(IllegalArguments, msg: "column {} is NOT NULL and has no value", col.name);
                }
            }
            let pk = self.pk_bytes(&table, &values)?;
            let key = catalog::row_key(db_id, table_id, &pk);
            if !upsert {
                let exists = self.store.index().get(&key)?.is_some();
                if exists {
                    if on_conflict_do_nothing {
                        continue;
                    }
                    return err_at!(KeyAlreadyExists, msg: "primary key already exists for table {}", table_name);
                }
                entries.extend(self.secondary_index_writes(&table, db_id, &pk, &values)?);
            }
            let payload = catalog::encode_row(&values.into_iter().collect::<Vec<_>>());
            entries.push((key, payload));
            affected += 1;
        }
        if !entries.is_empty() {
            self.tx_mgr.with_tx(|tx| {
                for (k, v) in entries {
                    tx.record_write(k, v);
                }
                Ok(())
            })?;
        }
        Ok(QueryResult::RowsAffected(affected))
    }

    fn do_update(&self, table_name: &str, assignments: &[(String, Expr)], where_clause: &Option<Expr>, params: &[SqlValue]) -> Result<QueryResult> {
        let table_id = self.table_id(table_name)?;
        let db_id = self.current_db_id()?;
        let table = self.table_by_id(table_id)?;
        let snap = self.snapshot()?;
        let prefix = table_prefix(db_id, table_id);
        let matching = snap.range((Bound::Included(prefix.as_slice()), Bound::Unbounded), false);

        let mut affected = 0;
        let mut writes = vec![];
        for (key, entry) in matching {
            if !key.starts_with(&prefix) {
                break;
            }
            let raw = self.store.read_value_at(entry.value.v_off, entry.value.v_len, entry.value.v_hash)?;
            if catalog::is_tombstone(&raw) {
                continue;
            }
            let mut values = catalog::decode_row(&table, &raw)?;
            let row = row_from_map(&table, &values);
            if let Some(w) = where_clause {
                if eval_bool(w, &row, params)? != true {
                    continue;
                }
            }
            for (cname, expr) in assignments {
                let col = table.column(cname).ok_or_else(|| crate::Error::IllegalArguments(format!("unknown column {}", cname)))?;
                values.insert(col.id, eval_expr(expr, &row, params)?);
            }
            let payload = catalog::encode_row(&values.into_iter().collect::<Vec<_>>());
            writes.push((key, payload));
            affected += 1;
        }
        if !writes.is_empty() {
            self.tx_mgr.with_tx(|tx| {
                tx.record_read(ReadSetEntry { lo: Bound::Included(prefix.clone()), hi: Bound::Unbounded });
                for (k, v) in writes {
                    tx.record_write(k, v);
                }
                Ok(())
            })?;
        }
        Ok(QueryResult::RowsAffected(affected))
    }

    fn do_delete(&self, table_name: &str, where_clause: &Option<Expr>, params: &[SqlValue]) -> Result<QueryResult> {
        let table_id = self.table_id(table_name)?;
        let db_id = self.current_db_id()?;
        let table = self.table_by_id(table_id)?;
        let snap = self.snapshot()?;
        let prefix = table_prefix(db_id, table_id);
        let matching = snap.range((Bound::Included(prefix.as_slice()), Bound::Unbounded), false);

        let mut affected = 0;
        let mut writes = vec![];
        for (key, entry) in matching {
            if !key.starts_with(&prefix) {
                break;
            }
            let raw = self.store.read_value_at(entry.value.v_off, entry.value.v_len, entry.value.v_hash)?;
            if catalog::is_tombstone(&raw) {
                continue;
            }
            let values = catalog::decode_row(&table, &raw)?;
            let row = row_from_map(&table, &values);
            if let Some(w) = where_clause {
                if eval_bool(w, &row, params)? != true {
                    continue;
                }
            }
            writes.push((key, catalog::TOMBSTONE.to_vec()));
            affected += 1;
        }
        if !writes.is_empty() {
            self.tx_mgr.with_tx(|tx| {
                tx.record_read(ReadSetEntry { lo: Bound::Included(prefix.clone()), hi: Bound::Unbounded });
                for (k, v) in writes {
                    tx.record_write(k, v);
                }
                Ok(())
            })?;
        }
        Ok(QueryResult::RowsAffected(affected))
    }

    fn build_select(&self, core: &SelectCore, params: &[SqlValue]) -> Result<Box<dyn Reader>> {
        let from = core.from.as_ref().ok_or_else(|| crate::Error::IllegalArguments("SELECT without FROM is not supported".into()))?;
        let table_id = self.table_id(from)?;
        let db_id = self.current_db_id()?;
        let table = self.table_by_id(table_id)?;

        let bound_tx = match core.temporal {
            Some(Temporal::Since(n)) => Some(n),
            Some(Temporal::After(n)) => Some(n + 1),
            Some(Temporal::Until(n)) => Some(n),
            Some(Temporal::Before(n)) => Some(n.saturating_sub(1)),
            None => None,
        };
        if let Some(n) = bound_tx {
            if n == 0 {
                return err_at!(IllegalArguments, msg: "temporal bound resolves to tx 0");
            }
        }

        let snap = self.snapshot()?;
        let prefix = table_prefix(db_id, table_id);
        let entries = snap.range((Bound::Included(prefix.as_slice()), Bound::Unbounded), false);

        let mut rows = vec![];
        for (key, entry) in entries {
            if !key.starts_with(&prefix) {
                break;
            }
            let raw = match bound_tx {
                None => self.store.read_value_at(entry.value.v_off, entry.value.v_len, entry.value.v_hash)?,
                Some(bound) => match self.historical_value(&key, &entry, bound)? {
                    Some(raw) => raw,
                    None => continue,
                },
            };
            if catalog::is_tombstone(&raw) {
                continue;
            }
            let values = catalog::decode_row(&table, &raw)?;
            rows.push(row_from_map(&table, &values));
        }

        let cols = table.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        let mut out: Box<dyn Reader> = if let Some((join_table_name, on_expr)) = &core.join {
            let join_table_id = self.table_id(join_table_name)?;
            let (join_table, right_rows) = self.scan_table(db_id, join_table_id)?;
            let right_cols: Vec<String> = join_table.columns.iter().map(|c| c.name.clone()).collect();
            let on = on_expr.clone();
            let on_params = params.to_vec();
            Box::new(JoinReader::new(cols, rows, right_cols, right_rows, move |row| eval_bool(&on, row, &on_params))?)
        } else {
            Box::new(VecReader::new(cols, rows))
        };

        if let Some(w) = core.where_clause.clone() {
            let params = params.to_vec();
            out = Box::new(FilterReader::new(out, Box::new(move |row| eval_expr(&w, row, &params))));
        }

        let grouped = !core.group_by.is_empty();
        if grouped {
            let pk_names: Vec<String> = table.primary_key.iter().map(|id| table.column_by_id(*id).unwrap().name.clone()).collect();
            if core.group_by != pk_names {
                return err_at!(NoAvailableIndex, msg: "GROUP BY columns must match an available ordered index");
            }
            let mut aggs: Vec<(String, AggKind)> = vec![];
            for e in core.columns.iter().chain(core.having.iter()) {
                collect_aggs(e, &mut aggs)?;
            }
            out = Box::new(GroupByReader::new(out, &core.group_by, &aggs)?);
            if let Some(h) = &core.having {
                let rewritten = rewrite_aggs(h);
                out = Box::new(FilterReader::new(out, Box::new(move |row| eval_expr(&rewritten, row, &[]))));
            }
        }

        if !core.order_by.is_empty() {
            let pk_names: Vec<String> = table.primary_key.iter().map(|id| table.column_by_id(*id).unwrap().name.clone()).collect();
            let uses_pk = core.order_by.iter().all(|(c, _)| pk_names.contains(c));
            if !uses_pk && core.use_index.is_none() {
                return err_at!(LimitedOrderBy, msg: "ORDER BY column has no matching index; use USE INDEX ON (...)");
            }
            out = Box::new(SortReader::new_boxed(out, &core.order_by)?);
        }

        // Projection (column list, which may reference aggregates/aliases).
        if !(core.columns.len() == 1 && matches!(core.columns[0], Expr::Column(ref c) if c == "*")) {
            let mut project = vec![];
            for (i, expr) in core.columns.iter().enumerate() {
                let name = core.column_aliases[i].clone().unwrap_or_else(|| describe_expr(expr));
                let e = if grouped { rewrite_aggs(expr) } else { expr.clone() };
                let p = params.to_vec();
                project.push((name, Box::new(move |row: &reader::Row| eval_expr(&e, row, &p)) as Box<dyn Fn(&reader::Row) -> Result<SqlValue>>));
            }
            out = Box::new(ProjectionReader::new(out, project));
        }

        if core.distinct {
            out = Box::new(DistinctReader::new(out, 1_000_000));
        }

        if core.limit.is_some() || core.offset.is_some() {
            out = Box::new(LimitReader::new(out, core.offset, core.limit));
        }

        Ok(out)
    }

    /// Resolve the row version active as of tx `bound` for `key`, whose
    /// current and prior tx-ids are recorded in its index entry (§4.F
    /// Temporal reader), by reading the historical tx record directly.
    fn historical_value(&self, key: &[u8], entry: &crate::index::LeafEntry, bound: u64) -> Result<Option<Vec<u8>>> {
        let mut candidates = vec![entry.insert_tx_id];
        candidates.extend_from_slice(&entry.history);
        let chosen = match candidates.into_iter().filter(|id| *id <= bound).max() {
            Some(id) => id,
            None => return Ok(None),
        };
        if chosen == entry.insert_tx_id {
            return Ok(Some(self.store.read_value_at(entry.value.v_off, entry.value.v_len, entry.value.v_hash)?));
        }
        // An older version: re-read the tx record that wrote it to recover
        // that version's own (vOff, vLen, vHash) rather than the current one.
        let tx = self.store.tx(chosen)?;
        for e in &tx.entries {
            if e.key == key {
                return Ok(Some(self.store.read_value_at(e.v_off, e.v_len, e.v_hash)?));
            }
        }
        Ok(None)
    }
}

fn table_prefix(db_id: DbId, table_id: TableId) -> Vec<u8> {
    catalog::row_key(db_id, table_id, &[])
}

fn row_from_map(table: &Table, values: &HashMap<ColumnId, SqlValue>) -> reader::Row {
    table.columns.iter().map(|c| (c.name.clone(), values.get(&c.id).cloned().unwrap_or(SqlValue::Null))).collect()
}

fn describe_expr(e: &Expr) -> String {
    match e {
        Expr::Column(c) => c.clone(),
        Expr::FuncCall(name, _) => name.clone(),
        _ => "?column?".to_string(),
    }
}

/// Canonical label for an aggregate call, doubling as both the column name
/// in a [GroupByReader]'s output rows and the substitution target
/// `rewrite_aggs` swaps `FuncCall` nodes for in projection/HAVING exprs.
fn agg_canonical_name(name: &str, args: &[Expr]) -> String {
    let inner = match args.first() {
        Some(Expr::Column(c)) => c.clone(),
        None => "*".to_string(),
        _ => "expr".to_string(),
    };
    format!("{}({})", name.to_uppercase(), inner)
}

/// Walks an expression tree collecting every distinct aggregate call it
/// references (§4.F: aggregates appear in `SELECT` columns and `HAVING`).
fn collect_aggs(expr: &Expr, out: &mut Vec<(String, AggKind)>) -> Result<()> {
    match expr {
        Expr::FuncCall(name, args) => {
            let canon = agg_canonical_name(name, args);
            if out.iter().any(|(n, _)| n == &canon) {
                return Ok(());
            }
            let col = match args.first() {
                Some(Expr::Column(c)) => Some(c.clone()),
                None => None,
                Some(_) => return err_at!(IllegalArguments, msg: "aggregate function {} only supports a column argument", name),
            };
            out.push((canon, AggKind::parse(name, col)?));
            Ok(())
        }
        Expr::BinOp(_, l, r) => {
            collect_aggs(l, out)?;
            collect_aggs(r, out)
        }
        Expr::Not(e) | Expr::Cast(e, _) => collect_aggs(e, out),
        Expr::Literal(_) | Expr::Column(_) | Expr::Param(_) => Ok(()),
    }
}

/// Replaces every aggregate call in `expr` with a `Column` reference to its
/// canonical label, so the ordinary row evaluator can read it straight out
/// of a [GroupByReader]'s already-aggregated output row.
fn rewrite_aggs(expr: &Expr) -> Expr {
    match expr {
        Expr::FuncCall(name, args) => Expr::Column(agg_canonical_name(name, args)),
        Expr::BinOp(op, l, r) => Expr::BinOp(*op, Box::new(rewrite_aggs(l)), Box::new(rewrite_aggs(r))),
        Expr::Not(e) => Expr::Not(Box::new(rewrite_aggs(e))),
        Expr::Cast(e, ty) => Expr::Cast(Box::new(rewrite_aggs(e)), *ty),
        other => other.clone(),
    }
}

fn eval_const(expr: &Expr, params: &[SqlValue]) -> Result<SqlValue> {
    eval_expr(expr, &[], params)
}

fn eval_bool(expr: &Expr, row: &reader::Row, params: &[SqlValue]) -> Result<bool> {
    match eval_expr(expr, row, params)? {
        SqlValue::Boolean(b) => Ok(b),
        _ => err_at!(InvalidCondition, msg: "expression did not evaluate to a boolean"),
    }
}

/// Single-pass expression evaluator; `row` is empty for constant-folding
/// contexts (e.g. VALUES literals), where a bare `Column` reference is an
/// error rather than a lookup.
fn eval_expr(expr: &Expr, row: &reader::Row, params: &[SqlValue]) -> Result<SqlValue> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Param(i) => params.get(*i).cloned().ok_or_else(|| crate::Error::IllegalArguments(format!("missing bind parameter {}", i))),
        Expr::Column(name) => row
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| crate::Error::IllegalArguments(format!("unknown column {} in this context", name))),
        Expr::Not(e) => match eval_expr(e, row, params)? {
            SqlValue::Boolean(b) => Ok(SqlValue::Boolean(!b)),
            SqlValue::Null => Ok(SqlValue::Null),
            _ => err_at!(InvalidCondition, msg: "NOT applied to a non-boolean"),
        },
        Expr::Cast(e, ty) => cast_value(eval_expr(e, row, params)?, *ty),
        Expr::FuncCall(name, _args) => err_at!(IllegalArguments, msg: "aggregate function {} is only valid in GROUP BY context", name),
        Expr::BinOp(op, l, r) => {
            let lv = eval_expr(l, row, params)?;
            if matches!(op, BinOp::And) {
                if let SqlValue::Boolean(false) = lv {
                    return Ok(SqlValue::Boolean(false));
                }
            }
            let rv = eval_expr(r, row, params)?;
            eval_binop(*op, lv, rv)
        }
    }
}

fn cast_value(v: SqlValue, ty: ColumnType) -> Result<SqlValue> {
    match (v, ty) {
        (SqlValue::Null, _) => Ok(SqlValue::Null),
        (SqlValue::Integer(n), ColumnType::Varchar(_)) => Ok(SqlValue::Varchar(n.to_string())),
        (SqlValue::Varchar(s), ColumnType::Integer) => {
            err_at!(InvalidValue, s.trim().parse::<i64>()).map(SqlValue::Integer)
        }
        (v, ColumnType::Any) => Ok(v),
        (v, _) if v.type_of() == Some(ty) => Ok(v),
        (v, ty) => err_at!(NotComparableValues, msg: "cannot CAST {:?} to {:?}", v, ty),
    }
}

fn eval_binop(op: BinOp, l: SqlValue, r: SqlValue) -> Result<SqlValue> {
    if matches!(l, SqlValue::Null) || matches!(r, SqlValue::Null) {
        return Ok(SqlValue::Null);
    }
    match op {
        BinOp::And => match (l, r) {
            (SqlValue::Boolean(a), SqlValue::Boolean(b)) => Ok(SqlValue::Boolean(a && b)),
            _ => err_at!(InvalidCondition, msg: "AND requires boolean operands"),
        },
        BinOp::Or => match (l, r) {
            (SqlValue::Boolean(a), SqlValue::Boolean(b)) => Ok(SqlValue::Boolean(a || b)),
            _ => err_at!(InvalidCondition, msg: "OR requires boolean operands"),
        },
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = l.compare(&r).ok_or_else(|| crate::Error::NotComparableValues(format!("{:?} vs {:?}", l, r)))?;
            use std::cmp::Ordering::*;
            let b = match op {
                BinOp::Eq => ord == Equal,
                BinOp::Ne => ord != Equal,
                BinOp::Lt => ord == Less,
                BinOp::Le => ord != Greater,
                BinOp::Gt => ord == Greater,
                BinOp::Ge => ord != Less,
                _ => unreachable!(),
            };
            Ok(SqlValue::Boolean(b))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => match (l, r) {
            (SqlValue::Integer(a), SqlValue::Integer(b)) => {
                let v = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0 {
                            return err_at!(InvalidValue, msg: "division by zero");
                        }
                        a / b
                    }
                    _ => unreachable!(),
                };
                Ok(SqlValue::Integer(v))
            }
            (a, b) => err_at!(NotComparableValues, msg: "arithmetic requires integers, got {:?} and {:?}", a, b),
        },
    }
}

impl SortReader {
    fn new_boxed(inner: Box<dyn Reader>, keys: &[(String, bool)]) -> Result<SortReader> {
        SortReader::new(inner, keys)
    }
}

#[cfg(test)]
mod sql_test {
    use super::*;
    use crate::store::StoreOptions;

    fn fresh_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), StoreOptions::new()).unwrap());
        (dir, Engine::new(store))
    }

    #[test]
    fn test_end_to_end_ddl_dml_select() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE t(id INTEGER, v VARCHAR[8], PRIMARY KEY id)", &[]).unwrap();
        eng.execute("INSERT INTO t VALUES (1,'a'),(2,'b')", &[]).unwrap();
        eng.execute("UPDATE t SET v='c' WHERE id = 1", &[]).unwrap();

        match eng.execute("SELECT v FROM t WHERE id = 1", &[]).unwrap() {
            QueryResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0].1, SqlValue::Varchar("c".to_string()));
            }
            _ => panic!("expected rows"),
        }

        // tx1=CREATE DATABASE, tx2=CREATE TABLE, tx3=INSERT (both rows),
        // tx4=UPDATE; BEFORE TX 4 looks at the state as of tx <= 3, i.e.
        // right after the insert and before the update took effect.
        match eng.execute("SELECT v FROM t BEFORE TX 4 WHERE id = 1", &[]).unwrap() {
            QueryResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0].1, SqlValue::Varchar("a".to_string()));
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn test_group_by_count_and_sum() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE t(id INTEGER, amount INTEGER, PRIMARY KEY id)", &[]).unwrap();
        for (id, amount) in [(1, 10), (2, 20), (3, 30)] {
            eng.execute(&format!("INSERT INTO t VALUES ({}, {})", id, amount), &[]).unwrap();
        }
        match eng.execute("SELECT id, COUNT(*), SUM(amount) FROM t GROUP BY id", &[]).unwrap() {
            QueryResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 3);
                for row in &rows {
                    assert_eq!(row[1].1, SqlValue::Integer(1));
                }
                let sums: Vec<i64> = rows.iter().map(|r| match r[2].1 {
                    SqlValue::Integer(n) => n,
                    _ => panic!("expected integer"),
                }).collect();
                let mut sums = sums;
                sums.sort();
                assert_eq!(sums, vec![10, 20, 30]);
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn test_group_by_having_filters_groups() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE t(id INTEGER, amount INTEGER, PRIMARY KEY id)", &[]).unwrap();
        for (id, amount) in [(1, 5), (2, 50)] {
            eng.execute(&format!("INSERT INTO t VALUES ({}, {})", id, amount), &[]).unwrap();
        }
        match eng.execute("SELECT id FROM t GROUP BY id HAVING SUM(amount) > 10", &[]).unwrap() {
            QueryResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0].1, SqlValue::Integer(2));
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn test_inner_join() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE customers(id INTEGER, name VARCHAR[8], PRIMARY KEY id)", &[]).unwrap();
        eng.execute("CREATE TABLE orders(oid INTEGER, cust_id INTEGER, PRIMARY KEY oid)", &[]).unwrap();
        eng.execute("INSERT INTO customers VALUES (1, 'alice'), (2, 'bob')", &[]).unwrap();
        eng.execute("INSERT INTO orders VALUES (100, 1), (101, 2), (102, 1)", &[]).unwrap();

        match eng.execute("SELECT name, oid FROM customers INNER JOIN orders ON id = cust_id", &[]).unwrap() {
            QueryResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 3);
                let mut oids: Vec<i64> = rows
                    .iter()
                    .map(|r| match r[1].1 {
                        SqlValue::Integer(n) => n,
                        _ => panic!("expected integer"),
                    })
                    .collect();
                oids.sort();
                assert_eq!(oids, vec![100, 101, 102]);
                let alice_orders: Vec<i64> = rows
                    .iter()
                    .filter(|r| r[0].1 == SqlValue::Varchar("alice".to_string()))
                    .map(|r| match r[1].1 {
                        SqlValue::Integer(n) => n,
                        _ => panic!("expected integer"),
                    })
                    .collect();
                assert_eq!(alice_orders.len(), 2);
            }
            _ => panic!("expected rows"),
        }
    }

    #[test]
    fn test_unique_secondary_index_rejects_duplicate() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE t(id INTEGER, email VARCHAR[16], PRIMARY KEY id)", &[]).unwrap();
        eng.execute("CREATE UNIQUE INDEX ON t(email)", &[]).unwrap();
        eng.execute("INSERT INTO t VALUES (1, 'a@example.com')", &[]).unwrap();
        let err = eng.execute("INSERT INTO t VALUES (2, 'a@example.com')", &[]).unwrap_err();
        assert!(matches!(err, crate::Error::KeyAlreadyExists(_)));
        // a distinct value is unaffected by the prior index write
        eng.execute("INSERT INTO t VALUES (2, 'b@example.com')", &[]).unwrap();
    }

    #[test]
    fn test_distinct_limit_exceeded() {
        let (_dir, eng) = fresh_engine();
        eng.execute("CREATE DATABASE db1", &[]).unwrap();
        eng.execute("USE db1", &[]).unwrap();
        eng.execute("CREATE TABLE t(id INTEGER, title VARCHAR[8], PRIMARY KEY id)", &[]).unwrap();
        for (i, title) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            eng.execute(&format!("INSERT INTO t VALUES ({}, '{}')", i, title), &[]).unwrap();
        }
        let mut core = match Parser::new("SELECT DISTINCT title FROM t").unwrap().parse_statement().unwrap() {
            Statement::Select(c) => c,
            _ => unreachable!(),
        };
        core.distinct = true;
        let r = eng.build_select(&core, &[]).unwrap();
        let mut limited = reader::DistinctReader::new(r, 4);
        let mut count = 0;
        let mut saw_err = false;
        loop {
            match limited.next() {
                Ok(Some(_)) => count += 1,
                Ok(None) => break,
                Err(_) => {
                    saw_err = true;
                    break;
                }
            }
        }
        assert!(saw_err || count <= 4);
    }
}
