// 🚚 Ingestion Driver - walks entities × record types, one cell at a time
//
// Per cell:  Fetching → Resolving → Writing → Done | Skipped | Failed
//
// A failed cell is recorded and the walk continues. Every cell, whatever its
// outcome, is followed by the throttle pause before the next fetch.

use crate::catalog::{RecordType, SourceCatalog};
use crate::db::{self, RunAudit};
use crate::error::{IngestError, IngestResult};
use crate::fetch::Fetcher;
use crate::registry::EntityRegistry;
use crate::resolver::ConflictResolver;
use crate::row::Entity;
use crate::writer::BatchWriter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ============================================================================
// THROTTLE
// ============================================================================

/// Rate limit between provider calls
pub trait Throttle {
    fn pause(&mut self);
}

/// Sleep a fixed interval after every cell
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        FixedInterval { interval }
    }
}

impl Throttle for FixedInterval {
    fn pause(&mut self) {
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
    }
}

// ============================================================================
// CELL OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStage {
    Fetching,
    Resolving,
    Writing,
}

impl CellStage {
    pub fn name(&self) -> &'static str {
        match self {
            CellStage::Fetching => "fetching",
            CellStage::Resolving => "resolving",
            CellStage::Writing => "writing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellOutcome {
    /// Rows fetched and merged
    Done { fetched: usize, written: usize },

    /// Provider returned nothing
    Skipped,

    /// Stopped at `stage`; not retried in this run
    Failed { stage: CellStage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellReport {
    pub entity: String,
    pub record_type: RecordType,
    pub outcome: CellOutcome,
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub cells: Vec<CellReport>,
}

impl RunSummary {
    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, CellOutcome::Done { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, CellOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, CellOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&CellOutcome) -> bool) -> usize {
        self.cells.iter().filter(|c| pred(&c.outcome)).count()
    }

    pub fn rows_written(&self) -> usize {
        self.cells
            .iter()
            .map(|c| match c.outcome {
                CellOutcome::Done { written, .. } => written,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter_map(|c| match &c.outcome {
                CellOutcome::Failed { stage, reason } => Some(format!(
                    "{}/{} ({}): {}",
                    c.entity,
                    c.record_type,
                    stage.name(),
                    reason
                )),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} cells: {} done, {} skipped, {} failed; {} rows written in {:.2}s",
            self.cells.len(),
            self.done(),
            self.skipped(),
            self.failed(),
            self.rows_written(),
            self.elapsed.as_secs_f64()
        )
    }

    pub fn to_audit(&self) -> RunAudit {
        RunAudit {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            done_cells: self.done(),
            skipped_cells: self.skipped(),
            failed_cells: self.failed(),
            rows_written: self.rows_written(),
            failures: self.failures(),
        }
    }
}

// ============================================================================
// INGESTION DRIVER
// ============================================================================

pub struct IngestionDriver<F: Fetcher, T: Throttle> {
    catalog: SourceCatalog,
    fetcher: F,
    writer: BatchWriter,
    throttle: T,
    resolver: ConflictResolver,
    record_audit: bool,
}

impl<F: Fetcher, T: Throttle> IngestionDriver<F, T> {
    pub fn new(catalog: SourceCatalog, fetcher: F, writer: BatchWriter, throttle: T) -> Self {
        IngestionDriver {
            catalog,
            fetcher,
            writer,
            throttle,
            resolver: ConflictResolver::new(),
            record_audit: true,
        }
    }

    /// Builder pattern: skip the `ingest_runs` audit row
    pub fn without_audit(mut self) -> Self {
        self.record_audit = false;
        self
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn throttle(&self) -> &T {
        &self.throttle
    }

    /// Process every cell once. Only a registry failure aborts the run.
    pub fn run(&mut self, registry: &dyn EntityRegistry) -> IngestResult<RunSummary> {
        let entities = registry.entities().map_err(|e| match e {
            IngestError::Configuration(_) => e,
            other => IngestError::configuration(other.to_string()),
        })?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        if entities.is_empty() {
            warn!("entity registry is empty; nothing to ingest");
        }
        info!(
            run_id = %run_id,
            entities = entities.len(),
            record_types = self.catalog.len(),
            "ingestion run started"
        );

        let record_types = self.catalog.record_types().to_vec();
        let mut cells = Vec::with_capacity(entities.len() * record_types.len());

        for (i, entity) in entities.iter().enumerate() {
            info!(
                "[{}/{}] processing {} {}",
                i + 1,
                entities.len(),
                entity.code,
                entity.name
            );

            for &record_type in &record_types {
                let outcome = self.process_cell(entity, record_type);
                match &outcome {
                    CellOutcome::Done { fetched, written } => info!(
                        entity = %entity.code,
                        record_type = %record_type,
                        fetched,
                        written,
                        "cell done"
                    ),
                    CellOutcome::Skipped => debug!(
                        entity = %entity.code,
                        record_type = %record_type,
                        "no rows from provider"
                    ),
                    CellOutcome::Failed { stage, reason } => warn!(
                        entity = %entity.code,
                        record_type = %record_type,
                        stage = stage.name(),
                        "cell failed: {}",
                        reason
                    ),
                }

                cells.push(CellReport {
                    entity: entity.code.clone(),
                    record_type,
                    outcome,
                });

                self.throttle.pause();
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            elapsed: clock.elapsed(),
            cells,
        };

        info!(run_id = %summary.run_id, "{}", summary.summary());

        if self.record_audit {
            if let Err(e) = db::insert_run(self.writer.connection(), &summary.to_audit()) {
                warn!("could not record run audit: {}", e);
            }
        }

        Ok(summary)
    }

    fn process_cell(&mut self, entity: &Entity, record_type: RecordType) -> CellOutcome {
        let failed = |stage: CellStage, e: IngestError| CellOutcome::Failed {
            stage,
            reason: e.to_string(),
        };

        debug!(entity = %entity.code, record_type = %record_type, "fetching");
        let rows = match self.fetcher.fetch(entity, record_type) {
            Ok(rows) => rows,
            Err(e) => return failed(CellStage::Fetching, e),
        };
        if rows.is_empty() {
            return CellOutcome::Skipped;
        }

        debug!(entity = %entity.code, record_type = %record_type, rows = rows.len(), "resolving");
        let plan = match self
            .catalog
            .table_for(record_type)
            .and_then(|table| {
                let policy = self.catalog.policy_for(record_type)?;
                self.resolver.resolve(table, policy, &rows)
            }) {
            Ok(plan) => plan,
            Err(e) => return failed(CellStage::Resolving, e),
        };

        debug!(
            entity = %entity.code,
            record_type = %record_type,
            policy = plan.policy.name(),
            "writing"
        );
        match self.writer.apply(&plan) {
            Ok(written) => CellOutcome::Done {
                fetched: rows.len(),
                written,
            },
            Err(e) => failed(CellStage::Writing, e),
        }
    }
}
