// Bank Financials Ingestion - Core Library
// Exposes all modules for use by the CLI and tests

pub mod error;
pub mod config;
pub mod catalog;   // SourceCatalog: record type → table + policy
pub mod row;
pub mod resolver;  // ConflictResolver: policy → upsert semantics
pub mod db;
pub mod writer;    // BatchWriter: chunked transactional writes
pub mod registry;
pub mod fetch;
pub mod driver;    // IngestionDriver: entities × record types

// Re-export commonly used types
pub use error::{IngestError, IngestResult};
pub use config::{IngestConfig, IngestSettings, StorageConfig, TushareConfig};
pub use catalog::{PolicyClass, RecordType, SourceCatalog, TableIdentity};
pub use row::{Entity, Row, Value};
pub use resolver::{ConflictResolver, FieldRule, MergePlan, MergeStatement};
pub use db::{setup_database, RunAudit};
pub use writer::BatchWriter;
pub use registry::{EntityRegistry, SqliteRegistry, StaticRegistry};
pub use fetch::{Fetcher, TushareClient};
pub use driver::{
    CellOutcome, CellReport, CellStage, FixedInterval, IngestionDriver, RunSummary, Throttle,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
