use crate::catalog::{RecordType, TableIdentity};
use crate::config::StorageConfig;
use crate::error::{IngestError, IngestResult};
use crate::row::{Entity, Row, Value};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Open the store described by `config` (WAL, busy timeout)
pub fn open(config: &StorageConfig) -> IngestResult<Connection> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IngestError::configuration(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let conn = Connection::open(&config.path).map_err(|e| {
        IngestError::configuration(format!(
            "cannot open database {}: {}",
            config.path.display(),
            e
        ))
    })?;

    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(config.busy_timeout())?;

    Ok(conn)
}

/// CREATE TABLE for one catalog table; the business key is the primary key
pub fn create_table_sql(table: &TableIdentity) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            if table.is_key(c.name) {
                format!("{} {} NOT NULL", c.name, c.kind.sql_type())
            } else {
                format!("{} {}", c.name, c.kind.sql_type())
            }
        })
        .collect::<Vec<_>>()
        .join(",\n            ");

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n            {},\n            PRIMARY KEY ({})\n        )",
        table.name,
        columns,
        table.key.join(", ")
    )
}

pub fn setup_database(conn: &Connection) -> IngestResult<()> {
    // ==========================================================================
    // Registry of banks (insertion order = processing order)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS banks (
            stock_code TEXT PRIMARY KEY NOT NULL,
            bank_name TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // One table per record type
    // ==========================================================================
    for rt in RecordType::ALL {
        conn.execute(&create_table_sql(rt.table()), [])?;
    }

    // ==========================================================================
    // Run audit trail
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ingest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            done_cells INTEGER NOT NULL,
            skipped_cells INTEGER NOT NULL,
            failed_cells INTEGER NOT NULL,
            rows_written INTEGER NOT NULL,
            failures TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ingest_runs_started ON ingest_runs(started_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// BANK REGISTRY TABLE
// ============================================================================

/// Insert new banks, refresh the name of known ones
pub fn upsert_banks(conn: &mut Connection, banks: &[Entity]) -> IngestResult<usize> {
    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO banks (stock_code, bank_name) VALUES (?1, ?2)
             ON CONFLICT (stock_code) DO UPDATE SET bank_name = excluded.bank_name",
        )?;
        for bank in banks {
            written += stmt.execute(params![bank.code, bank.name])?;
        }
    }
    tx.commit()?;
    Ok(written)
}

pub fn get_banks(conn: &Connection) -> IngestResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT stock_code, bank_name FROM banks ORDER BY rowid")?;
    let banks = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(banks)
}

// ============================================================================
// INGESTED TABLES
// ============================================================================

pub fn count_rows(conn: &Connection, table: &TableIdentity) -> IngestResult<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", table.name),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Read back one stored record by business key (values in key order)
pub fn get_row(conn: &Connection, table: &TableIdentity, key: &[Value]) -> IngestResult<Option<Row>> {
    let columns: Vec<&str> = table.column_names().collect();
    let predicate = table
        .key
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", k, i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        table.name,
        predicate
    );

    let row = conn
        .query_row(&sql, params_from_iter(key.iter()), |r| {
            let mut stored = Row::new();
            for (i, column) in columns.iter().enumerate() {
                stored.set(column, Value::from(r.get_ref(i)?));
            }
            Ok(stored)
        })
        .optional()?;

    Ok(row)
}

// ============================================================================
// RUN AUDIT
// ============================================================================

/// One finished driver run, as persisted in `ingest_runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAudit {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub done_cells: usize,
    pub skipped_cells: usize,
    pub failed_cells: usize,
    pub rows_written: usize,
    /// "entity/record_type: reason" per failed cell
    pub failures: Vec<String>,
}

pub fn insert_run(conn: &Connection, run: &RunAudit) -> IngestResult<()> {
    let failures_json = serde_json::to_string(&run.failures)
        .map_err(|e| IngestError::configuration(format!("cannot encode run failures: {}", e)))?;

    conn.execute(
        "INSERT INTO ingest_runs (
            run_id, started_at, finished_at, done_cells, skipped_cells,
            failed_cells, rows_written, failures
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.done_cells as i64,
            run.skipped_cells as i64,
            run.failed_cells as i64,
            run.rows_written as i64,
            failures_json,
        ],
    )?;

    Ok(())
}

pub fn latest_run(conn: &Connection) -> IngestResult<Option<RunAudit>> {
    let run = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, done_cells, skipped_cells,
                    failed_cells, rows_written, failures
             FROM ingest_runs
             ORDER BY id DESC
             LIMIT 1",
            [],
            |row| {
                let started_at: String = row.get(1)?;
                let finished_at: String = row.get(2)?;
                let failures_json: String = row.get(7)?;
                let done: i64 = row.get(3)?;
                let skipped: i64 = row.get(4)?;
                let failed: i64 = row.get(5)?;
                let rows_written: i64 = row.get(6)?;

                Ok(RunAudit {
                    run_id: row.get(0)?,
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: parse_timestamp(&finished_at)?,
                    done_cells: done as usize,
                    skipped_cells: skipped as usize,
                    failed_cells: failed as usize,
                    rows_written: rows_written as usize,
                    failures: serde_json::from_str(&failures_json)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                })
            },
        )
        .optional()?;

    Ok(run)
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}
