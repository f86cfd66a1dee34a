use std::{fmt, result};

/// Typed error kinds surfaced by this crate, textually stable per the contract
/// the core hands to its callers (gRPC/CLI/replication shells sit atop this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    IllegalArguments(String),
    CorruptedData(String),
    CorruptedCLog(String),
    CorruptedTxData(String),
    CorruptedAHT(String),
    AlreadyClosed(String),
    ReadOnly(String),
    IOError(String),
    FailConvert(String),
    InvalidFile(String),
    KeyNotFound(String),
    TxNotFound(String),
    DuplicatedKey(String),
    KeyAlreadyExists(String),
    TxReadConflict(String),
    InvalidValue(String),
    NotComparableValues(String),
    InferredMultipleTypes(String),
    NoAvailableIndex(String),
    LimitedOrderBy(String),
    LimitedIndexCreation(String),
    InvalidCondition(String),
    TooManyRows(String),
    ColumnMismatchInUnionStmt(String),
    NestedTxNotSupported(String),
    TooManyActiveSnapshots(String),
    LinearProofMaxLenExceeded(String),
    MaxConcurrencyLimitExceeded(String),
    MaxKeyLengthExceeded(String),
    MaxValueLengthExceeded(String),
    NoMoreEntries(String),
    ParseError(String),
    ThreadFail(String),
    IPCFail(String),
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            IllegalArguments(s) => write!(f, "IllegalArguments: {}", s),
            CorruptedData(s) => write!(f, "CorruptedData: {}", s),
            CorruptedCLog(s) => write!(f, "CorruptedCLog: {}", s),
            CorruptedTxData(s) => write!(f, "CorruptedTxData: {}", s),
            CorruptedAHT(s) => write!(f, "CorruptedAHT: {}", s),
            AlreadyClosed(s) => write!(f, "AlreadyClosed: {}", s),
            ReadOnly(s) => write!(f, "ReadOnly: {}", s),
            IOError(s) => write!(f, "IOError: {}", s),
            FailConvert(s) => write!(f, "FailConvert: {}", s),
            InvalidFile(s) => write!(f, "InvalidFile: {}", s),
            KeyNotFound(s) => write!(f, "KeyNotFound: {}", s),
            TxNotFound(s) => write!(f, "TxNotFound: {}", s),
            DuplicatedKey(s) => write!(f, "DuplicatedKey: {}", s),
            KeyAlreadyExists(s) => write!(f, "KeyAlreadyExists: {}", s),
            TxReadConflict(s) => write!(f, "TxReadConflict: {}", s),
            InvalidValue(s) => write!(f, "InvalidValue: {}", s),
            NotComparableValues(s) => write!(f, "NotComparableValues: {}", s),
            InferredMultipleTypes(s) => write!(f, "InferredMultipleTypes: {}", s),
            NoAvailableIndex(s) => write!(f, "NoAvailableIndex: {}", s),
            LimitedOrderBy(s) => write!(f, "LimitedOrderBy: {}", s),
            LimitedIndexCreation(s) => write!(f, "LimitedIndexCreation: {}", s),
            InvalidCondition(s) => write!(f, "InvalidCondition: {}", s),
            TooManyRows(s) => write!(f, "TooManyRows: {}", s),
            ColumnMismatchInUnionStmt(s) => write!(f, "ColumnMismatchInUnionStmt: {}", s),
            NestedTxNotSupported(s) => write!(f, "NestedTxNotSupported: {}", s),
            TooManyActiveSnapshots(s) => write!(f, "TooManyActiveSnapshots: {}", s),
            LinearProofMaxLenExceeded(s) => write!(f, "LinearProofMaxLenExceeded: {}", s),
            MaxConcurrencyLimitExceeded(s) => write!(f, "MaxConcurrencyLimitExceeded: {}", s),
            MaxKeyLengthExceeded(s) => write!(f, "MaxKeyLengthExceeded: {}", s),
            MaxValueLengthExceeded(s) => write!(f, "MaxValueLengthExceeded: {}", s),
            NoMoreEntries(s) => write!(f, "NoMoreEntries: {}", s),
            ParseError(s) => write!(f, "ParseError: {}", s),
            ThreadFail(s) => write!(f, "ThreadFail: {}", s),
            IPCFail(s) => write!(f, "IPCFail: {}", s),
            Fatal(s) => write!(f, "Fatal: {}", s),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// Build a typed [Error], tagging it with the call site so bug reports carry
/// `file:line` instead of a bare message. Mirrors the teacher's `err_at!` idiom:
///
/// * `err_at!(Variant, result_expr)` — wraps a foreign error's `Display`.
/// * `err_at!(Variant, result_expr, "ctx {}", arg)` — as above with a prefix.
/// * `err_at!(Variant, msg: "fmt {}", arg)` — builds an [Error] directly.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let msg = format!($($arg),+);
        Err($crate::Error::$v(format!("{}:{} {}", file!(), line!(), msg)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => Err($crate::Error::$v(format!("{}:{} {}", file!(), line!(), err))),
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let ctx = format!($($arg),+);
                Err($crate::Error::$v(format!(
                    "{}:{} {}: {}",
                    file!(),
                    line!(),
                    ctx,
                    err
                )))
            }
        }
    }};
}
