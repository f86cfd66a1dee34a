//! Row readers (§4.F, Design Note §9): a `Reader` trait-object pipeline
//! built by composition, mirroring the teacher's `core::{Reader, Writer}`
//! trait-object style used across `llrb`/`robt`/`dgm`.

use std::collections::HashSet;

use crate::catalog::SqlValue;
use crate::{err_at, Result};

pub type Row = Vec<(String, SqlValue)>;

pub trait Reader {
    fn columns(&self) -> Vec<String>;
    fn next(&mut self) -> Result<Option<Row>>;

    fn close(&mut self) {}
}

/// Lets a boxed trait object sit inside the generic wrappers below (e.g.
/// `FilterReader<Box<dyn Reader>>`), which is how the engine builds a
/// pipeline whose shape isn't known until a statement is parsed.
impl Reader for Box<dyn Reader> {
    fn columns(&self) -> Vec<String> {
        (**self).columns()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        (**self).next()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Wraps an already-materialized row set (used by every reader here: the
/// index snapshots this store drives scans from are already fully resolved
/// in memory by the time a reader is built, so "streaming" is modeled as
/// popping off a `Vec` rather than literally re-touching storage per call).
pub struct VecReader {
    cols: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl VecReader {
    pub fn new(cols: Vec<String>, rows: Vec<Row>) -> VecReader {
        VecReader { cols, rows: rows.into_iter() }
    }
}

impl Reader for VecReader {
    fn columns(&self) -> Vec<String> {
        self.cols.clone()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Evaluates a boolean-valued row predicate; failure to reduce to a
/// `Boolean` is `InvalidCondition` (§4.F).
pub trait Predicate {
    fn eval(&self, row: &Row) -> Result<bool>;
}

pub struct FilterReader<R: Reader> {
    inner: R,
    pred: Box<dyn Fn(&Row) -> Result<SqlValue>>,
}

impl<R: Reader> FilterReader<R> {
    pub fn new(inner: R, pred: Box<dyn Fn(&Row) -> Result<SqlValue>>) -> FilterReader<R> {
        FilterReader { inner, pred }
    }
}

impl<R: Reader> Reader for FilterReader<R> {
    fn columns(&self) -> Vec<String> {
        self.inner.columns()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            match self.inner.next()? {
                None => return Ok(None),
                Some(row) => match (self.pred)(&row)? {
                    SqlValue::Boolean(true) => return Ok(Some(row)),
                    SqlValue::Boolean(false) => continue,
                    _ => return err_at!(InvalidCondition, msg: "WHERE clause did not evaluate to a boolean"),
                },
            }
        }
    }
}

pub struct ProjectionReader<R: Reader> {
    inner: R,
    /// (output name, source column name or computed-in-place index)
    project: Vec<(String, Box<dyn Fn(&Row) -> Result<SqlValue>>)>,
}

impl<R: Reader> ProjectionReader<R> {
    pub fn new(inner: R, project: Vec<(String, Box<dyn Fn(&Row) -> Result<SqlValue>>)>) -> ProjectionReader<R> {
        ProjectionReader { inner, project }
    }
}

impl<R: Reader> Reader for ProjectionReader<R> {
    fn columns(&self) -> Vec<String> {
        self.project.iter().map(|(n, _)| n.clone()).collect()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        match self.inner.next()? {
            None => Ok(None),
            Some(row) => {
                let mut out = vec![];
                for (name, f) in &self.project {
                    out.push((name.clone(), f(&row)?));
                }
                Ok(Some(out))
            }
        }
    }
}

/// Bounded by `distinctLimit`; exceeding it is `TooManyRows` (§4.F).
pub struct DistinctReader<R: Reader> {
    inner: R,
    seen: HashSet<Vec<u8>>,
    limit: usize,
}

impl<R: Reader> DistinctReader<R> {
    pub fn new(inner: R, limit: usize) -> DistinctReader<R> {
        DistinctReader { inner, seen: HashSet::new(), limit }
    }
}

fn row_fingerprint(row: &Row) -> Vec<u8> {
    let mut buf = vec![];
    for (_, v) in row {
        buf.extend_from_slice(&v.encode());
        buf.push(0);
    }
    buf
}

impl<R: Reader> Reader for DistinctReader<R> {
    fn columns(&self) -> Vec<String> {
        self.inner.columns()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            match self.inner.next()? {
                None => return Ok(None),
                Some(row) => {
                    let fp = row_fingerprint(&row);
                    if self.seen.contains(&fp) {
                        continue;
                    }
                    if self.seen.len() >= self.limit {
                        return err_at!(TooManyRows, msg: "distinctLimit={} exceeded", self.limit);
                    }
                    self.seen.insert(fp);
                    return Ok(Some(row));
                }
            }
        }
    }
}

/// Union of two readers: `UNION ALL` concatenates, `UNION` additionally
/// deduplicates under `distinctLimit` (§4.F). Column counts must match.
pub struct UnionReader<R: Reader> {
    cols: Vec<String>,
    left: Option<R>,
    right: Option<R>,
}

impl<R: Reader> UnionReader<R> {
    pub fn new(left: R, right: R) -> Result<UnionReader<R>> {
        if left.columns().len() != right.columns().len() {
            return err_at!(ColumnMismatchInUnionStmt, msg: "left has {} columns, right has {}", left.columns().len(), right.columns().len());
        }
        let cols = left.columns();
        Ok(UnionReader { cols, left: Some(left), right: Some(right) })
    }
}

impl<R: Reader> Reader for UnionReader<R> {
    fn columns(&self) -> Vec<String> {
        self.cols.clone()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if let Some(l) = self.left.as_mut() {
            if let Some(row) = l.next()? {
                return Ok(Some(row));
            }
            self.left = None;
        }
        if let Some(r) = self.right.as_mut() {
            return r.next();
        }
        Ok(None)
    }
}

/// In-memory sort (§4.F "Sort reader" — this store keeps the whole result
/// set in memory rather than spilling runs to a temp file; see DESIGN.md).
pub struct SortReader {
    cols: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl SortReader {
    pub fn new<R: Reader>(mut inner: R, keys: &[(String, bool)]) -> Result<SortReader> {
        let cols = inner.columns();
        let mut rows = vec![];
        while let Some(row) = inner.next()? {
            rows.push(row);
        }
        let idxs: Vec<(usize, bool)> = keys
            .iter()
            .filter_map(|(name, desc)| cols.iter().position(|c| c == name).map(|i| (i, *desc)))
            .collect();
        rows.sort_by(|a, b| {
            for (i, desc) in &idxs {
                let ord = a[*i].1.compare(&b[*i].1).unwrap_or(std::cmp::Ordering::Equal);
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(SortReader { cols, rows: rows.into_iter() })
    }
}

impl Reader for SortReader {
    fn columns(&self) -> Vec<String> {
        self.cols.clone()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// `INNER JOIN`: streaming-shaped in the reader contract (`next()` pulls one
/// row at a time) but built eagerly as a nested-loop cross product filtered
/// by the `ON` condition (§4.F "Joint reader"), since both sides are already
/// materialized from their index scans by the time a reader is assembled.
pub struct JoinReader {
    cols: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl JoinReader {
    pub fn new<F>(left_cols: Vec<String>, left_rows: Vec<Row>, right_cols: Vec<String>, right_rows: Vec<Row>, on: F) -> Result<JoinReader>
    where
        F: Fn(&Row) -> Result<bool>,
    {
        let mut cols = left_cols;
        cols.extend(right_cols);
        let mut out = Vec::with_capacity(left_rows.len());
        for l in &left_rows {
            for r in &right_rows {
                let mut combined = l.clone();
                combined.extend(r.iter().cloned());
                if on(&combined)? {
                    out.push(combined);
                }
            }
        }
        Ok(JoinReader { cols, rows: out.into_iter() })
    }
}

impl Reader for JoinReader {
    fn columns(&self) -> Vec<String> {
        self.cols.clone()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Aggregate functions supported by [GroupByReader] (§4.F): `COUNT(*)`,
/// `COUNT(col)`, `SUM`, `MIN`, `MAX`, `AVG`.
#[derive(Debug, Clone)]
pub enum AggKind {
    CountStar,
    Count(String),
    Sum(String),
    Min(String),
    Max(String),
    Avg(String),
}

impl AggKind {
    pub fn parse(name: &str, col: Option<String>) -> Result<AggKind> {
        match (name.to_uppercase().as_str(), col) {
            ("COUNT", None) => Ok(AggKind::CountStar),
            ("COUNT", Some(c)) => Ok(AggKind::Count(c)),
            ("SUM", Some(c)) => Ok(AggKind::Sum(c)),
            ("MIN", Some(c)) => Ok(AggKind::Min(c)),
            ("MAX", Some(c)) => Ok(AggKind::Max(c)),
            ("AVG", Some(c)) => Ok(AggKind::Avg(c)),
            (n, None) => err_at!(IllegalArguments, msg: "aggregate function {} requires a column argument", n),
            (n, _) => err_at!(IllegalArguments, msg: "unknown aggregate function {}", n),
        }
    }

    fn eval(&self, rows: &[Row]) -> Result<SqlValue> {
        fn col_val<'a>(row: &'a Row, name: &str) -> Option<&'a SqlValue> {
            row.iter().find(|(n, _)| n == name).map(|(_, v)| v)
        }
        match self {
            AggKind::CountStar => Ok(SqlValue::Integer(rows.len() as i64)),
            AggKind::Count(c) => {
                let n = rows.iter().filter(|r| col_val(r, c).map(|v| !v.is_null()).unwrap_or(false)).count();
                Ok(SqlValue::Integer(n as i64))
            }
            AggKind::Sum(c) | AggKind::Avg(c) => {
                let mut sum = 0i64;
                let mut n = 0i64;
                for r in rows {
                    match col_val(r, c) {
                        Some(SqlValue::Integer(v)) => {
                            sum += v;
                            n += 1;
                        }
                        Some(SqlValue::Null) | None => {}
                        Some(other) => return err_at!(NotComparableValues, msg: "SUM/AVG requires an integer column, got {:?}", other),
                    }
                }
                if matches!(self, AggKind::Sum(_)) {
                    Ok(SqlValue::Integer(sum))
                } else if n == 0 {
                    Ok(SqlValue::Null)
                } else {
                    Ok(SqlValue::Integer(sum / n))
                }
            }
            AggKind::Min(c) | AggKind::Max(c) => {
                let want_min = matches!(self, AggKind::Min(_));
                let mut best: Option<SqlValue> = None;
                for r in rows {
                    let v = match col_val(r, c) {
                        Some(v) if !v.is_null() => v.clone(),
                        _ => continue,
                    };
                    best = Some(match best {
                        None => v,
                        Some(b) => {
                            let ord = v.compare(&b).ok_or_else(|| crate::Error::NotComparableValues(format!("{:?} vs {:?}", v, b)))?;
                            let replace = if want_min { ord == std::cmp::Ordering::Less } else { ord == std::cmp::Ordering::Greater };
                            if replace {
                                v
                            } else {
                                b
                            }
                        }
                    });
                }
                Ok(best.unwrap_or(SqlValue::Null))
            }
        }
    }
}

/// Strict `GROUP BY` (§4.F): groups the fully-materialized input by the
/// exact value tuple of `group_cols`, producing one output row per group
/// holding the group-by columns followed by each requested aggregate, named
/// by its canonical label (e.g. `"COUNT(*)"`, `"SUM(amount)"`).
pub struct GroupByReader {
    cols: Vec<String>,
    rows: std::vec::IntoIter<Row>,
}

impl GroupByReader {
    pub fn new<R: Reader>(mut inner: R, group_cols: &[String], aggs: &[(String, AggKind)]) -> Result<GroupByReader> {
        let mut order: Vec<Vec<u8>> = vec![];
        let mut groups: std::collections::HashMap<Vec<u8>, (Row, Vec<Row>)> = std::collections::HashMap::new();
        while let Some(row) = inner.next()? {
            let key_vals: Vec<SqlValue> = group_cols.iter().map(|c| row.iter().find(|(n, _)| n == c).map(|(_, v)| v.clone()).unwrap_or(SqlValue::Null)).collect();
            let mut kb = vec![];
            for v in &key_vals {
                kb.extend_from_slice(&v.encode());
                kb.push(0);
            }
            groups
                .entry(kb.clone())
                .or_insert_with(|| {
                    order.push(kb.clone());
                    let group_row: Row = group_cols.iter().cloned().zip(key_vals.into_iter()).collect();
                    (group_row, vec![])
                })
                .1
                .push(row);
        }
        let mut out = vec![];
        for kb in &order {
            let (group_row, rows) = &groups[kb];
            let mut row = group_row.clone();
            for (label, agg) in aggs {
                row.push((label.clone(), agg.eval(rows)?));
            }
            out.push(row);
        }
        let cols = group_cols.iter().cloned().chain(aggs.iter().map(|(label, _)| label.clone())).collect();
        Ok(GroupByReader { cols, rows: out.into_iter() })
    }
}

impl Reader for GroupByReader {
    fn columns(&self) -> Vec<String> {
        self.cols.clone()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// `LIMIT`/`OFFSET`.
pub struct LimitReader<R: Reader> {
    inner: R,
    skip: u64,
    remaining: Option<u64>,
}

impl<R: Reader> LimitReader<R> {
    pub fn new(inner: R, offset: Option<u64>, limit: Option<u64>) -> LimitReader<R> {
        LimitReader { inner, skip: offset.unwrap_or(0), remaining: limit }
    }
}

impl<R: Reader> Reader for LimitReader<R> {
    fn columns(&self) -> Vec<String> {
        self.inner.columns()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        while self.skip > 0 {
            self.skip -= 1;
            if self.inner.next()?.is_none() {
                return Ok(None);
            }
        }
        if let Some(0) = self.remaining {
            return Ok(None);
        }
        if let Some(r) = self.remaining.as_mut() {
            *r -= 1;
        }
        self.inner.next()
    }
}
