//! EP-001: Error taxonomy shared by the lexer, parser, resolver, compile cache and job engine.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every failure the engine can surface.
#[derive(Debug, Error)]
pub enum EpmError {
    /// Bad character or unterminated literal.
    #[error("lex error at {line}:{column}: {message}")]
    Lex {
        message: String,
        line: usize,
        column: usize,
    },

    /// Malformed job or wrong argument count.
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("division by zero in ({0})")]
    DivisionByZero(String),

    #[error("negative result in ({0}): values are unsigned")]
    NegativeResult(String),

    #[error("not a number: {0:?}")]
    InvalidNumber(String),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    #[error("cannot read include {}: {source}", path.display())]
    MissingInclude {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("include cycle: {0}")]
    IncludeCycle(String),

    /// Local or remote compiler reported failure; no bytecode is returned.
    #[error("compile failed: {0}")]
    CompilerFailed(String),

    #[error("remote compiler {url}: {message}")]
    Remote { url: String, message: String },

    #[error("abi error: {0}")]
    Abi(String),

    /// Any failure reported by the blockchain backend.
    #[error("chain error: {0}")]
    Chain(String),

    #[error("commit timed out after {0:?} waiting for a new block")]
    CommitTimeout(Duration),

    #[error("assertion error. Got {got}, expected {expected}")]
    Assertion { got: String, expected: String },

    #[error("{failed} of {total} tests failed in {file}")]
    TestsFailed {
        failed: usize,
        total: usize,
        file: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    /// A job failed under the return-on-error policy.
    #[error("job {index} `{job}` (line {line}) failed: {source}")]
    JobFailed {
        index: usize,
        job: String,
        line: usize,
        source: Box<EpmError>,
    },
}

impl EpmError {
    /// Wrap an I/O error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EpmError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn chain(message: impl std::fmt::Display) -> Self {
        EpmError::Chain(message.to_string())
    }

    /// Source location carried by parse-time errors.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            EpmError::Lex { line, column, .. } | EpmError::Syntax { line, column, .. } => {
                Some((*line, *column))
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EpmError>;
