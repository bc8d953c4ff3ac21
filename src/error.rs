// ⚠️ Error taxonomy for the ingestion core
//
// Only `Configuration` is fatal to a run. Everything else is scoped to a
// single cell and ends up in the run summary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Registry unreachable, bad settings, unusable storage. Aborts the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Record type not registered in the catalog.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// External fetch failed for one (entity, record type) cell.
    #[error("fetch failed for {entity} / {record_type}: {message}")]
    Fetch {
        entity: String,
        record_type: String,
        message: String,
    },

    /// A row in the batch is unusable; the whole batch is rejected.
    #[error("malformed row #{row_index} for {table}: {reason}")]
    MalformedRow {
        table: String,
        row_index: usize,
        reason: String,
    },

    /// A chunk failed and was rolled back. Earlier chunks stay committed.
    #[error("write to {table} failed at chunk {chunk_index} ({rows_committed} rows committed before it): {source}")]
    Write {
        table: String,
        chunk_index: usize,
        /// Rows in the chunks committed before this one, written or discarded
        rows_committed: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// Storage failure outside a chunk transaction (schema, registry, audit).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IngestError {
    pub fn configuration(message: impl Into<String>) -> Self {
        IngestError::Configuration(message.into())
    }

    /// Only configuration-level failures stop a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Configuration(_))
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
