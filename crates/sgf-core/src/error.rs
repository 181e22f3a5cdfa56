//! Error taxonomy. Kinds map onto the process-boundary behavior described for each:
//! `Config`/`Io` are recoverable and reported to the caller, `Invariant` is a bug and
//! should be turned into a panic by the caller (see [`SgfError::into_panic`]).

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SgfError>;

#[derive(Debug)]
pub enum SgfError {
    Config(String),
    Io { path: Option<PathBuf>, source: String },
    Invariant(String),
}

impl SgfError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SgfError::Config(msg.into())
    }

    pub fn io<S: Into<String>>(path: impl Into<Option<PathBuf>>, msg: S) -> Self {
        SgfError::Io { path: path.into(), source: msg.into() }
    }

    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        SgfError::Invariant(msg.into())
    }

    /// Invariant violations are programmer errors per the error taxonomy: they must
    /// never be handled as a recoverable `Result` at the process boundary.
    pub fn into_panic(self) -> ! {
        match self {
            SgfError::Invariant(msg) => panic!("invariant violation: {msg}"),
            other => panic!("fatal error reached a panic-only path: {other}"),
        }
    }
}

impl fmt::Display for SgfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SgfError::Config(msg) => write!(f, "config error: {msg}"),
            SgfError::Io { path: Some(p), source } => {
                write!(f, "io error ({}): {source}", p.display())
            }
            SgfError::Io { path: None, source } => write!(f, "io error: {source}"),
            SgfError::Invariant(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for SgfError {}

impl From<std::io::Error> for SgfError {
    fn from(e: std::io::Error) -> Self {
        SgfError::Io { path: None, source: e.to_string() }
    }
}

impl From<csv::Error> for SgfError {
    fn from(e: csv::Error) -> Self {
        SgfError::Io { path: None, source: e.to_string() }
    }
}
