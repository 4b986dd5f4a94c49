use thiserror::Error;

/// Errors raised while evaluating linker-script expressions or parsing
/// scripts. These are recoverable at the region level — a single bad
/// expression does not abort the whole parse.
#[derive(Debug, Error)]
pub enum LinkerError {
    #[error("linker script not found: {0}")]
    InputNotFound(String),

    #[error("failed to read linker script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not evaluate expression `{expr}`: {reason}")]
    ExpressionEvaluationError { expr: String, reason: String },

    #[error("linker script syntax error: {0}")]
    LinkerScriptSyntaxError(String),
}

pub type Result<T> = std::result::Result<T, LinkerError>;
