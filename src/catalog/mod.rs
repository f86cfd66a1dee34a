//! Databases, tables, columns and indexes (§4.E), arena-owned by stable
//! integer ids (Design Note §9). Every DDL statement both mutates the
//! in-memory `Catalog` and returns the KV entries under the `CTL.*`
//! prefixes of §3 that the caller commits alongside, so the two stay in
//! lockstep for the lifetime of one `Engine`. Rehydrating a `Catalog` from
//! those entries after a process restart is not implemented; an `Engine`
//! only ever sees the DDL it has itself executed.

pub mod value;

pub use value::{ColumnType, SqlValue};

use std::collections::HashMap;

use crate::{err_at, Result};

pub type DbId = u32;
pub type TableId = u32;
pub type ColumnId = u32;
pub type IndexId = u32;

#[derive(Debug, Clone)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub auto_increment: bool,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub id: IndexId,
    pub table_id: TableId,
    pub cols: Vec<ColumnId>,
    pub unique: bool,
    pub primary: bool,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub db_id: DbId,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<ColumnId>,
    pub indexes: Vec<Index>,
    /// Next value handed out by an `AUTO_INCREMENT` column; never reused,
    /// even across crash recovery (§8 round-trip property).
    pub auto_increment_next: i64,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn primary_index(&self) -> &Index {
        self.indexes.iter().find(|i| i.primary).expect("every table has a primary index")
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pub id: DbId,
    pub name: String,
}

/// Reserved key prefixes (§3): catalog metadata lives alongside row data in
/// the same KV space, distinguished only by prefix.
pub mod prefix {
    pub const DATABASE: &[u8] = b"CTL.DATABASE.";
    pub const TABLE: &[u8] = b"CTL.TABLE.";
    pub const COLUMN: &[u8] = b"CTL.COLUMN.";
    pub const INDEX: &[u8] = b"CTL.INDEX.";
    pub const ROW: &[u8] = b"R.";
    pub const SECONDARY: &[u8] = b"E.";
}

/// Arena-style catalog: every entity addressed by a stable `u32` id,
/// looked up by name through the maps below.
#[derive(Debug, Default)]
pub struct Catalog {
    databases: Vec<Database>,
    tables: Vec<Table>,
    db_by_name: HashMap<String, DbId>,
    table_by_name: HashMap<(DbId, String), TableId>,
    next_db_id: DbId,
    next_table_id: TableId,
    next_col_id: ColumnId,
    next_index_id: IndexId,
}

impl Catalog {
    pub fn new() -> Catalog {
        Catalog::default()
    }

    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.db_by_name.get(name).and_then(|id| self.databases.iter().find(|d| d.id == *id))
    }

    pub fn table(&self, db_id: DbId, name: &str) -> Option<&Table> {
        self.table_by_name.get(&(db_id, name.to_string())).and_then(|id| self.tables.iter().find(|t| t.id == *id))
    }

    pub fn table_mut(&mut self, db_id: DbId, name: &str) -> Option<&mut Table> {
        let id = *self.table_by_name.get(&(db_id, name.to_string()))?;
        self.tables.iter_mut().find(|t| t.id == id)
    }

    pub fn table_by_id(&self, id: TableId) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Register a new database, returning catalog KV entries the caller
    /// commits alongside (CREATE DATABASE is realized purely as a write).
    pub fn create_database(&mut self, name: &str) -> Result<(DbId, Vec<(Vec<u8>, Vec<u8>)>)> {
        if self.db_by_name.contains_key(name) {
            return err_at!(KeyAlreadyExists, msg: "database {} already exists", name);
        }
        let id = self.next_db_id;
        self.next_db_id += 1;
        self.databases.push(Database { id, name: name.to_string() });
        self.db_by_name.insert(name.to_string(), id);

        let key = [prefix::DATABASE, name.as_bytes()].concat();
        Ok((id, vec![(key, id.to_be_bytes().to_vec())]))
    }

    pub fn create_table(
        &mut self,
        db_id: DbId,
        name: &str,
        columns: Vec<(String, ColumnType, bool, bool)>,
        primary_key: Vec<String>,
    ) -> Result<(TableId, Vec<(Vec<u8>, Vec<u8>)>)> {
        if self.table_by_name.contains_key(&(db_id, name.to_string())) {
            return err_at!(KeyAlreadyExists, msg: "table {} already exists", name);
        }
        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let mut cols = vec![];
        let mut auto_inc_count = 0;
        for (cname, ty, nullable, auto_increment) in columns {
            if auto_increment {
                auto_inc_count += 1;
            }
            let id = self.next_col_id;
            self.next_col_id += 1;
            cols.push(Column { id, name: cname, ty, nullable, auto_increment });
        }
        if auto_inc_count > 1 {
            return err_at!(IllegalArguments, msg: "at most one AUTO_INCREMENT column per table");
        }

        let pk_ids: Result<Vec<ColumnId>> = primary_key
            .iter()
            .map(|n| {
                cols.iter()
                    .find(|c| c.name.eq_ignore_ascii_case(n))
                    .map(|c| c.id)
                    .ok_or_else(|| crate::Error::IllegalArguments(format!("unknown PK column {}", n)))
            })
            .collect();
        let pk_ids = pk_ids?;
        if pk_ids.iter().any(|id| cols.iter().find(|c| c.id == *id).map(|c| cols_nullable(c)).unwrap_or(false)) {
            return err_at!(IllegalArguments, msg: "primary key columns must not be nullable");
        }

        let primary_index = Index { id: 0, table_id, cols: pk_ids.clone(), unique: true, primary: true };

        let mut entries = vec![];
        let tkey = table_key(db_id, name);
        entries.push((tkey, table_id.to_be_bytes().to_vec()));
        for c in &cols {
            entries.push((column_key(table_id, c.id), encode_column(c)));
        }
        entries.push((index_key(table_id, 0), encode_index(&primary_index)));

        self.tables.push(Table {
            id: table_id,
            db_id,
            name: name.to_string(),
            columns: cols,
            primary_key: pk_ids,
            indexes: vec![primary_index],
            auto_increment_next: 1,
        });
        self.table_by_name.insert((db_id, name.to_string()), table_id);

        Ok((table_id, entries))
    }

    pub fn create_index(&mut self, table_id: TableId, cols: Vec<String>, unique: bool) -> Result<(IndexId, Vec<(Vec<u8>, Vec<u8>)>)> {
        let table = self.tables.iter_mut().find(|t| t.id == table_id).ok_or_else(|| crate::Error::IllegalArguments("unknown table".into()))?;
        let col_ids: Result<Vec<ColumnId>> = cols
            .iter()
            .map(|n| table.column(n).map(|c| c.id).ok_or_else(|| crate::Error::IllegalArguments(format!("unknown column {}", n))))
            .collect();
        let col_ids = col_ids?;

        let id = self.next_index_id + 1; // index 0 is reserved for the primary index
        self.next_index_id += 1;
        let index = Index { id, table_id, cols: col_ids, unique, primary: false };
        let entries = vec![(index_key(table_id, id), encode_index(&index))];
        table.indexes.push(index);
        Ok((id, entries))
    }

    pub fn add_column(&mut self, table_id: TableId, name: &str, ty: ColumnType) -> Result<(Vec<(Vec<u8>, Vec<u8>)>)> {
        let id = self.next_col_id;
        self.next_col_id += 1;
        let col = Column { id, name: name.to_string(), ty, nullable: true, auto_increment: false };
        let entries = vec![(column_key(table_id, id), encode_column(&col))];
        let table = self.tables.iter_mut().find(|t| t.id == table_id).ok_or_else(|| crate::Error::IllegalArguments("unknown table".into()))?;
        table.columns.push(col);
        Ok(entries)
    }

    pub fn rename_column(&mut self, table_id: TableId, from: &str, to: &str) -> Result<()> {
        let table = self.tables.iter_mut().find(|t| t.id == table_id).ok_or_else(|| crate::Error::IllegalArguments("unknown table".into()))?;
        let col = table.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(from)).ok_or_else(|| crate::Error::IllegalArguments("unknown column".into()))?;
        col.name = to.to_string();
        Ok(())
    }

    /// Allocate the next `AUTO_INCREMENT` value for `table_id`'s single
    /// auto-increment column, honoring an explicit larger value if one was
    /// supplied (§4.E: "a larger explicit value ... advances the counter").
    pub fn reserve_auto_increment(&mut self, table_id: TableId, explicit: Option<i64>) -> Result<i64> {
        let table = self.tables.iter_mut().find(|t| t.id == table_id).ok_or_else(|| crate::Error::IllegalArguments("unknown table".into()))?;
        match explicit {
            Some(v) if v < table.auto_increment_next => {
                err_at!(InvalidValue, msg: "explicit AUTO_INCREMENT value {} is not greater than current max", v)
            }
            Some(v) => {
                table.auto_increment_next = v + 1;
                Ok(v)
            }
            None => {
                let v = table.auto_increment_next;
                table.auto_increment_next += 1;
                Ok(v)
            }
        }
    }
}

fn cols_nullable(c: &Column) -> bool {
    c.nullable
}

fn table_key(db_id: DbId, name: &str) -> Vec<u8> {
    let mut k = prefix::TABLE.to_vec();
    k.extend_from_slice(&db_id.to_be_bytes());
    k.push(b'.');
    k.extend_from_slice(name.as_bytes());
    k
}

fn column_key(table_id: TableId, col_id: ColumnId) -> Vec<u8> {
    let mut k = prefix::COLUMN.to_vec();
    k.extend_from_slice(&table_id.to_be_bytes());
    k.extend_from_slice(&col_id.to_be_bytes());
    k
}

fn index_key(table_id: TableId, index_id: IndexId) -> Vec<u8> {
    let mut k = prefix::INDEX.to_vec();
    k.extend_from_slice(&table_id.to_be_bytes());
    k.extend_from_slice(&index_id.to_be_bytes());
    k
}

fn encode_column(c: &Column) -> Vec<u8> {
    let mut buf = vec![];
    buf.extend_from_slice(&c.id.to_be_bytes());
    let (tag, width) = match c.ty {
        ColumnType::Integer => (0u8, 0u32),
        ColumnType::Varchar(n) => (1, n),
        ColumnType::Boolean => (2, 0),
        ColumnType::Blob(n) => (3, n),
        ColumnType::Timestamp => (4, 0),
        ColumnType::Any => (5, 0),
    };
    buf.push(tag);
    buf.extend_from_slice(&width.to_be_bytes());
    buf.push(c.nullable as u8);
    buf.push(c.auto_increment as u8);
    buf.extend_from_slice(&(c.name.len() as u32).to_be_bytes());
    buf.extend_from_slice(c.name.as_bytes());
    buf
}

fn encode_index(i: &Index) -> Vec<u8> {
    let mut buf = vec![];
    buf.extend_from_slice(&i.id.to_be_bytes());
    buf.extend_from_slice(&i.table_id.to_be_bytes());
    buf.push(i.unique as u8);
    buf.push(i.primary as u8);
    buf.extend_from_slice(&(i.cols.len() as u32).to_be_bytes());
    for c in &i.cols {
        buf.extend_from_slice(&c.to_be_bytes());
    }
    buf
}

/// Primary-key row key: `R.<dbId>.<tableId>.<pkEncoded>` (§3).
pub fn row_key(db_id: DbId, table_id: TableId, pk_encoded: &[u8]) -> Vec<u8> {
    let mut k = prefix::ROW.to_vec();
    k.extend_from_slice(&db_id.to_be_bytes());
    k.push(b'.');
    k.extend_from_slice(&table_id.to_be_bytes());
    k.push(b'.');
    k.extend_from_slice(pk_encoded);
    k
}

/// Secondary index key: `E.<dbId>.<tableId>.<indexId>.<nullBitmap>.<encodedIdxCols>.<encodedPk>` (§3).
pub fn secondary_key(db_id: DbId, table_id: TableId, index_id: IndexId, null_bitmap: u8, idx_cols_encoded: &[u8], pk_encoded: &[u8]) -> Vec<u8> {
    let mut k = prefix::SECONDARY.to_vec();
    k.extend_from_slice(&db_id.to_be_bytes());
    k.push(b'.');
    k.extend_from_slice(&table_id.to_be_bytes());
    k.push(b'.');
    k.extend_from_slice(&index_id.to_be_bytes());
    k.push(b'.');
    k.push(null_bitmap);
    k.push(b'.');
    k.extend_from_slice(idx_cols_encoded);
    k.push(b'.');
    k.extend_from_slice(pk_encoded);
    k
}

/// Row payload: `(colId, valueLen, valueBytes)` repeated for each non-NULL
/// column (§3); columns absent from the payload are NULL.
pub fn encode_row(values: &[(ColumnId, SqlValue)]) -> Vec<u8> {
    let mut buf = vec![];
    for (col_id, v) in values {
        if v.is_null() {
            continue;
        }
        let encoded = v.encode();
        buf.extend_from_slice(&col_id.to_be_bytes());
        buf.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        buf.extend_from_slice(&encoded);
    }
    buf
}

pub fn decode_row(table: &Table, buf: &[u8]) -> Result<HashMap<ColumnId, SqlValue>> {
    let mut out = HashMap::new();
    let mut off = 0;
    while off < buf.len() {
        if off + 8 > buf.len() {
            return err_at!(CorruptedData, msg: "truncated row payload");
        }
        let col_id = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        let vlen = u32::from_be_bytes(buf[off + 4..off + 8].try_into().unwrap()) as usize;
        off += 8;
        if off + vlen > buf.len() {
            return err_at!(CorruptedData, msg: "truncated row value");
        }
        let col = table.column_by_id(col_id).ok_or_else(|| crate::Error::CorruptedData("unknown column id in row".into()))?;
        out.insert(col_id, SqlValue::decode(col.ty, &buf[off..off + vlen])?);
        off += vlen;
    }
    Ok(out)
}

/// Tombstone marker: a row payload tagged deleted (§4.E DELETE), one reserved
/// byte that can never collide with a real `colId` (column ids start at 0
/// but this tag is placed before any column record and is length 1, which
/// `decode_row` would reject as truncated — so tombstones are checked via
/// this helper, never decoded as a row).
pub const TOMBSTONE: &[u8] = b"\xffDELETED";

pub fn is_tombstone(buf: &[u8]) -> bool {
    buf == TOMBSTONE
}

#[cfg(test)]
mod catalog_test {
    use super::*;

    #[test]
    fn test_create_database_and_table() {
        let mut cat = Catalog::new();
        let (db_id, _) = cat.create_database("db1").unwrap();
        let (table_id, entries) = cat
            .create_table(
                db_id,
                "t",
                vec![("id".into(), ColumnType::Integer, false, false), ("v".into(), ColumnType::Varchar(8), true, false)],
                vec!["id".into()],
            )
            .unwrap();
        assert!(!entries.is_empty());
        let table = cat.table_by_id(table_id).unwrap();
        assert_eq!(table.primary_key.len(), 1);
        assert_eq!(table.indexes.len(), 1);
        assert!(table.indexes[0].primary);
    }

    #[test]
    fn test_duplicate_database_rejected() {
        let mut cat = Catalog::new();
        cat.create_database("db1").unwrap();
        assert!(cat.create_database("db1").is_err());
    }

    #[test]
    fn test_auto_increment_never_reuses() {
        let mut cat = Catalog::new();
        let (db_id, _) = cat.create_database("db1").unwrap();
        let (table_id, _) = cat
            .create_table(db_id, "t", vec![("id".into(), ColumnType::Integer, false, true)], vec!["id".into()])
            .unwrap();
        assert_eq!(cat.reserve_auto_increment(table_id, None).unwrap(), 1);
        assert_eq!(cat.reserve_auto_increment(table_id, Some(10)).unwrap(), 10);
        assert_eq!(cat.reserve_auto_increment(table_id, None).unwrap(), 11);
        assert!(cat.reserve_auto_increment(table_id, Some(3)).is_err());
    }

    #[test]
    fn test_row_payload_roundtrip() {
        let mut cat = Catalog::new();
        let (db_id, _) = cat.create_database("db1").unwrap();
        let (table_id, _) = cat
            .create_table(
                db_id,
                "t",
                vec![("id".into(), ColumnType::Integer, false, false), ("v".into(), ColumnType::Varchar(8), true, false)],
                vec!["id".into()],
            )
            .unwrap();
        let table = cat.table_by_id(table_id).unwrap();
        let id_col = table.column("id").unwrap().id;
        let v_col = table.column("v").unwrap().id;
        let values = vec![(id_col, SqlValue::Integer(1)), (v_col, SqlValue::Varchar("a".into()))];
        let buf = encode_row(&values);
        let back = decode_row(table, &buf).unwrap();
        assert_eq!(back.get(&id_col), Some(&SqlValue::Integer(1)));
        assert_eq!(back.get(&v_col), Some(&SqlValue::Varchar("a".into())));
    }
}
