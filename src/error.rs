//! Error taxonomy for decoding, storing and querying traces.

use thiserror::Error;

/// Errors raised by the ingestion and query pipeline.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Bad magic, unsupported format version, truncated header or chunk.
    /// The stream that produced it is aborted.
    #[error("fatal decode error: {0}")]
    FatalDecode(String),

    /// An event referenced a wire id that was never defined. The rest of the
    /// buffer cannot be skipped without the type's argument layout.
    #[error("undefined event type: wire id {wire_id}")]
    UndefinedEventType { wire_id: u16 },

    /// A source-level problem (mixed units, malformed JSON).
    #[error("{title}: {detail}")]
    Source { title: String, detail: String },

    /// A filter expression failed to parse or compile.
    #[error("invalid filter: {0}")]
    FilterCompile(String),

    /// A search ran against a store with events still pending reconciliation.
    #[error("event store has unreconciled chunks")]
    Unreconciled,

    /// A value did not fit the argument type it was written as.
    #[error("encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    pub(crate) fn fatal(detail: impl Into<String>) -> Self {
        TraceError::FatalDecode(detail.into())
    }

    pub(crate) fn source(title: impl Into<String>, detail: impl Into<String>) -> Self {
        TraceError::Source {
            title: title.into(),
            detail: detail.into(),
        }
    }

    /// Whether the error aborts the stream it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TraceError::FatalDecode(_) | TraceError::UndefinedEventType { .. } | TraceError::Io(_)
        )
    }
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
