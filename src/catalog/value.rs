//! Typed SQL values and their fixed-width, order-preserving encoding (§3
//! "SQL row encoding"). Mirrors the teacher's `core::Serialize` idiom:
//! `encode`/`decode` pairs per type rather than a single generic codec.

use crate::{err_at, Result};

/// Declared column type. `VARCHAR`/`BLOB` carry their max length because row
/// and key encodings are fixed-width within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Varchar(u32),
    Boolean,
    Blob(u32),
    Timestamp,
    Any,
}

impl ColumnType {
    /// Width of this type's encoded form, when fixed (used for PK byte
    /// padding); `None` for `Any`, which is only legal on non-key columns.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnType::Integer => Some(8),
            ColumnType::Varchar(n) => Some(*n as usize),
            ColumnType::Boolean => Some(1),
            ColumnType::Blob(n) => Some(*n as usize),
            ColumnType::Timestamp => Some(8),
            ColumnType::Any => None,
        }
    }
}

/// A runtime SQL value. `Null` is a distinct variant rather than
/// `Option<_>` wrapping every case, matching how comparisons and arithmetic
/// need to see it explicitly (NULL propagates rather than unwraps).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Varchar(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Timestamp(i64),
}

impl SqlValue {
    pub fn type_of(&self) -> Option<ColumnType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(_) => Some(ColumnType::Integer),
            SqlValue::Varchar(s) => Some(ColumnType::Varchar(s.len() as u32)),
            SqlValue::Boolean(_) => Some(ColumnType::Boolean),
            SqlValue::Blob(b) => Some(ColumnType::Blob(b.len() as u32)),
            SqlValue::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Variable-length encode used in row payloads (§3: `valueLen,
    /// valueBytes`); `NULL` is represented by the column's absence, not by
    /// an encoding, so this is never called for a NULL column value.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SqlValue::Null => vec![],
            SqlValue::Integer(v) => v.to_be_bytes().to_vec(),
            SqlValue::Varchar(s) => s.as_bytes().to_vec(),
            SqlValue::Boolean(b) => vec![if *b { 1 } else { 0 }],
            SqlValue::Blob(b) => b.clone(),
            SqlValue::Timestamp(v) => v.to_be_bytes().to_vec(),
        }
    }

    pub fn decode(ty: ColumnType, buf: &[u8]) -> Result<SqlValue> {
        match ty {
            ColumnType::Integer => {
                if buf.len() != 8 {
                    return err_at!(CorruptedData, msg: "integer value truncated");
                }
                Ok(SqlValue::Integer(i64::from_be_bytes(buf.try_into().unwrap())))
            }
            ColumnType::Timestamp => {
                if buf.len() != 8 {
                    return err_at!(CorruptedData, msg: "timestamp value truncated");
                }
                Ok(SqlValue::Timestamp(i64::from_be_bytes(buf.try_into().unwrap())))
            }
            ColumnType::Boolean => {
                if buf.len() != 1 {
                    return err_at!(CorruptedData, msg: "boolean value truncated");
                }
                Ok(SqlValue::Boolean(buf[0] != 0))
            }
            ColumnType::Varchar(_) => {
                let s = err_at!(CorruptedData, String::from_utf8(buf.to_vec()))?;
                Ok(SqlValue::Varchar(s))
            }
            ColumnType::Blob(_) => Ok(SqlValue::Blob(buf.to_vec())),
            ColumnType::Any => err_at!(CorruptedData, msg: "cannot decode a value typed ANY"),
        }
    }

    /// Fixed-width, order-preserving encode used in key bytes (primary key
    /// and secondary index columns): strings/blobs are NUL-padded to
    /// `width`, integers and timestamps are sign-flipped so big-endian
    /// byte order matches signed numeric order.
    pub fn encode_key(&self, ty: ColumnType) -> Vec<u8> {
        let width = ty.fixed_width().unwrap_or(self.encode().len());
        match self {
            SqlValue::Integer(v) | SqlValue::Timestamp(v) => {
                ((*v as u64) ^ (1u64 << 63)).to_be_bytes().to_vec()
            }
            SqlValue::Boolean(b) => vec![if *b { 1 } else { 0 }],
            SqlValue::Varchar(s) => {
                let mut buf = vec![0u8; width];
                let bytes = s.as_bytes();
                buf[..bytes.len().min(width)].copy_from_slice(&bytes[..bytes.len().min(width)]);
                buf
            }
            SqlValue::Blob(b) => {
                let mut buf = vec![0u8; width];
                buf[..b.len().min(width)].copy_from_slice(&b[..b.len().min(width)]);
                buf
            }
            SqlValue::Null => vec![0u8; width],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Ordering used by comparisons and indexes. Incompatible types (other
    /// than a `NULL` operand, which callers special-case before reaching
    /// here) are rejected by the caller with `NotComparableValues`.
    pub fn compare(&self, other: &SqlValue) -> Option<std::cmp::Ordering> {
        use SqlValue::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Varchar(a), Varchar(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Blob(a), Blob(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod value_test {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let v = SqlValue::Integer(-42);
        let buf = v.encode();
        assert_eq!(SqlValue::decode(ColumnType::Integer, &buf).unwrap(), v);
    }

    #[test]
    fn test_varchar_roundtrip() {
        let v = SqlValue::Varchar("hello".to_string());
        let buf = v.encode();
        assert_eq!(SqlValue::decode(ColumnType::Varchar(8), &buf).unwrap(), v);
    }

    #[test]
    fn test_truncated_integer_is_corrupted() {
        assert!(SqlValue::decode(ColumnType::Integer, &[0u8; 3]).is_err());
    }

    #[test]
    fn test_key_encoding_preserves_integer_order() {
        let a = SqlValue::Integer(-5).encode_key(ColumnType::Integer);
        let b = SqlValue::Integer(10).encode_key(ColumnType::Integer);
        assert!(a < b);
    }

    #[test]
    fn test_key_encoding_pads_varchar() {
        let k = SqlValue::Varchar("ab".to_string()).encode_key(ColumnType::Varchar(5));
        assert_eq!(k.len(), 5);
        assert_eq!(&k[..2], b"ab");
        assert_eq!(&k[2..], &[0, 0, 0]);
    }
}
