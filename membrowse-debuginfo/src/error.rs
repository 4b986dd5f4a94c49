use thiserror::Error;

/// Top-level failures for binary analysis. Per-CU/per-DIE failures inside
/// the DWARF processor are intentionally *not* part of this enum — they are
/// recovered locally and only ever reach `tracing::debug!`.
#[derive(Debug, Error)]
pub enum DebugInfoError {
    #[error("binary not found: {0}")]
    InputNotFound(String),

    #[error("failed to read binary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid or unsupported binary format: {0}")]
    InvalidBinaryFormat(String),

    #[error("DWARF parsing failed: {0}")]
    DwarfParsingError(String),
}

pub type Result<T> = std::result::Result<T, DebugInfoError>;
