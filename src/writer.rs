// 💾 Batch Writer - chunked, transactional application of a merge plan
//
// Chunking only bounds transaction size. Rows are applied in order, so the
// stored result is the same whatever the chunk size.

use crate::catalog::{PolicyClass, TableIdentity};
use crate::error::{IngestError, IngestResult};
use crate::resolver::{ConflictResolver, MergePlan};
use crate::row::{Row, Value};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

pub struct BatchWriter {
    conn: Connection,
    chunk_size: usize,
    resolver: ConflictResolver,
}

impl BatchWriter {
    pub fn new(conn: Connection, chunk_size: usize) -> Self {
        BatchWriter {
            conn,
            chunk_size: chunk_size.max(1),
            resolver: ConflictResolver::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Resolve and write `rows`; returns rows inserted or updated.
    ///
    /// A malformed row rejects the batch before anything is written.
    pub fn write(
        &mut self,
        table: &TableIdentity,
        policy: PolicyClass,
        rows: &[Row],
    ) -> IngestResult<usize> {
        let plan = self.resolver.resolve(table, policy, rows)?;
        self.apply(&plan)
    }

    /// Apply an already-resolved plan, one transaction per chunk.
    pub fn apply(&mut self, plan: &MergePlan) -> IngestResult<usize> {
        if plan.is_empty() {
            return Ok(0);
        }

        let mut affected = 0;
        let mut committed = 0;
        for (chunk_index, chunk) in plan.rows.chunks(self.chunk_size).enumerate() {
            let written = self
                .apply_chunk(plan, chunk)
                .map_err(|source| IngestError::Write {
                    table: plan.statement.table.to_string(),
                    chunk_index,
                    rows_committed: committed,
                    source,
                })?;

            debug!(
                table = plan.statement.table,
                chunk_index,
                rows = chunk.len(),
                written,
                "chunk committed"
            );
            affected += written;
            committed += chunk.len();
        }

        Ok(affected)
    }

    /// Dropping the transaction on error rolls the chunk back.
    fn apply_chunk(&mut self, plan: &MergePlan, chunk: &[Vec<Value>]) -> rusqlite::Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(&plan.statement.sql)?;
            for values in chunk {
                written += stmt.execute(params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;
        Ok(written)
    }
}
