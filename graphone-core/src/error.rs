use std::fmt;

use thiserror::Error;

/// What was wrong with a dictionary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFault {
    /// The record did not split into exactly two comma-separated columns.
    ColumnCount(usize),
    /// One of the two columns was empty.
    EmptyField,
    /// The spelling column contained something other than `a`-`z`.
    InvalidLetter(char),
    /// The pronunciation column contained a symbol outside the phone list.
    InvalidPhone(char),
}

impl fmt::Display for RecordFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnCount(n) => write!(f, "expected two columns, found {n}"),
            Self::EmptyField => f.write_str("columns may not be empty"),
            Self::InvalidLetter(c) => write!(f, "unexpected letter: {c:?}"),
            Self::InvalidPhone(c) => write!(f, "unexpected phonetic symbol: {c:?}"),
        }
    }
}

/// All errors produced by graphone-core.
#[derive(Debug, Error)]
pub enum GraphoneError {
    #[error("malformed dictionary record on line {line}: {fault}")]
    MalformedRecord { line: usize, fault: RecordFault },

    #[error("unknown {alphabet} symbol {symbol:?} at position {position}")]
    UnknownSymbol {
        symbol: char,
        position: usize,
        alphabet: &'static str,
    },

    #[error("cannot align {frames} frames to a target needing at least {required}")]
    UnalignableSequence { frames: usize, required: usize },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GraphoneError>;
