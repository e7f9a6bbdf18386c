use crate::lang::error::ParseError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Common error type of the engine.
///
/// Only [`Error::ExternalCall`] is local to a solution branch: the query
/// engine turns it into a failure and backtracks. Every other variant
/// aborts the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // sub-categories of errors
    #[error(transparent)]
    Parse(#[from] ParseError),

    // loading
    #[error("inline query failed: {query}")]
    InlineQueryFailed { query: String },
    #[error("policy files must have a .polar extension, found {0}")]
    FileExtension(String),

    // registration
    #[error("cannot register `{alias}`: {reason}")]
    DuplicateClassAlias { alias: String, reason: String },
    #[error("unregistered class: {0}")]
    UnregisteredClass(String),

    // host calls
    #[error("external call `{name}` failed: {message}")]
    ExternalCall { name: String, message: String },
    #[error("invalid call id: {0}")]
    InvalidCallId(u64),
    #[error("unknown instance id: {0}")]
    UnknownInstance(u64),

    // evaluation
    #[error("variable `{0}` is already bound")]
    AlreadyBound(String),
    #[error("stack overflow: {0}")]
    StackOverflow(String),
    #[error("{0}")]
    Runtime(String),

    // Wrappers on top of other errors
    #[error("std::io::Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde_json::Error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
    pub fn external_call(name: &str, err: anyhow::Error) -> Self {
        Self::ExternalCall {
            name: name.to_string(),
            message: format!("{:#}", err),
        }
    }
    pub fn duplicate_alias(alias: &str, reason: impl Into<String>) -> Self {
        Self::DuplicateClassAlias {
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }

    /// True if the error should only fail the current solution branch.
    pub fn is_branch_local(&self) -> bool {
        matches!(self, Self::ExternalCall { .. })
    }
}
