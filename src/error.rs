//! Error taxonomy shared across the indexing engine.
//!
//! Mirrors the error kinds named in the design: configuration, database,
//! FTS-consistency, I/O, decode, parse, and query errors. `LangRejected`
//! and `Cancelled` are deliberately *not* variants here — per-file skip
//! reasons are not failures, they're recorded as [`crate::status::SkipReason`].

use thiserror::Error;

/// All fallible outcomes the indexing engine and search service can produce.
#[derive(Error, Debug)]
pub enum LibrarianError {
    /// Invalid or missing required configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection, schema, or transaction failure.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// `count(subtitles) != count(subtitles_fts)` and the rebuild failed.
    #[error("FTS index corruption: {0}")]
    FtsCorruption(String),

    /// File read/stat failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding detection/decode exhausted all fallbacks.
    #[error("decode error: {0}")]
    Decode(String),

    /// Subtitle file was syntactically invalid.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// FTS query syntax was invalid.
    #[error("query error: {0}")]
    Query(String),
}

pub type Result<T> = std::result::Result<T, LibrarianError>;

impl LibrarianError {
    /// Exit code when this error terminates the process, per the control
    /// interface's documented exit codes (0 success is not represented here).
    pub fn exit_code(&self) -> i32 {
        match self {
            LibrarianError::Config(_) => 2,
            LibrarianError::Db(_) => 3,
            LibrarianError::FtsCorruption(_) => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn exit_codes_match_the_documented_table() {
        assert_matches!(LibrarianError::Config("x".into()).exit_code(), 2);
        assert_matches!(LibrarianError::FtsCorruption("x".into()).exit_code(), 4);
        assert_matches!(LibrarianError::Decode("x".into()).exit_code(), 1);
    }
}
