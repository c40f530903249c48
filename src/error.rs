//! Transport-neutral error taxonomy shared by every component (spec §7).

use thiserror::Error;

/// The closed set of outcomes a `SettingsEngine` call can report.
///
/// Every variant maps one-to-one onto the wire-level error codes in §6;
/// a transport adapter need only match on the variant to pick a code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvmanError {
    /// Session-phase violation: an operation was issued outside the phase
    /// that permits it, or a client started a second session while already
    /// holding or queued for one.
    #[error("unexpected request: {0}")]
    Unexpected(String),

    /// Path not present; metadata property missing; no plugin covers path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed path, wrong value shape, or a type-info request on the
    /// wrong kind of node.
    #[error("bad arguments: {0}")]
    BadArgs(String),

    /// Path targets a key in a write that the schema forbids.
    #[error("bad key: {0}")]
    BadKey(String),

    /// Delete forbidden by schema, or session held by another client.
    #[error("denied: {0}")]
    Denied(String),

    /// Internal invariant violation: overlapping plugin roots, schema
    /// parse failure at startup.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// In-flight plugin operation was aborted.
    #[error("cancelled")]
    Cancelled,

    /// The broker went away before a queued request could be serviced.
    #[error("died")]
    Died,

    /// Underlying I/O failure (metadata file read/write).
    #[error("io error: {0}")]
    Io(String),

    /// Allocation or resource exhaustion.
    #[error("out of memory")]
    Oom,

    /// A plugin whose sync-in had already failed is being accessed again.
    #[error("unknown: {0}")]
    Unknown(String),
}

pub type ProvmanResult<T> = Result<T, ProvmanError>;

impl From<std::io::Error> for ProvmanError {
    fn from(e: std::io::Error) -> Self {
        ProvmanError::Io(e.to_string())
    }
}
