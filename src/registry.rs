// 🏦 Entity Registry - ordered list of banks to ingest
//
// The driver only depends on `EntityRegistry::entities()`. Where the list
// comes from (the `banks` table, a test fixture) is not its concern.

use crate::db;
use crate::error::{IngestError, IngestResult};
use crate::row::Entity;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;

pub trait EntityRegistry {
    /// Entities in processing order. Any failure is a configuration error.
    fn entities(&self) -> IngestResult<Vec<Entity>>;
}

// ============================================================================
// SQLITE REGISTRY (banks table)
// ============================================================================

/// Reads through the run's own connection; no second handle on the file
pub struct SqliteRegistry<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRegistry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteRegistry { conn }
    }
}

impl EntityRegistry for SqliteRegistry<'_> {
    fn entities(&self) -> IngestResult<Vec<Entity>> {
        let banks = db::get_banks(self.conn).map_err(|e| {
            IngestError::configuration(format!("cannot read banks registry: {}", e))
        })?;

        banks
            .into_iter()
            .map(|(code, name)| Entity::new(code, name))
            .collect()
    }
}

// ============================================================================
// STATIC REGISTRY
// ============================================================================

/// Fixed, in-memory list of entities
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    entities: Vec<Entity>,
}

impl StaticRegistry {
    pub fn new(entities: Vec<Entity>) -> Self {
        StaticRegistry { entities }
    }
}

impl EntityRegistry for StaticRegistry {
    fn entities(&self) -> IngestResult<Vec<Entity>> {
        Ok(self.entities.clone())
    }
}

// ============================================================================
// SEED FILE
// ============================================================================

#[derive(Debug, Deserialize)]
struct BankRecord {
    bank_name: String,
    stock_code: String,
}

/// Load `bank_name,stock_code` rows; an invalid code rejects the whole file
pub fn load_banks_csv(csv_path: &Path) -> Result<Vec<Entity>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open bank list {}", csv_path.display()))?;

    let mut banks = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let record: BankRecord = result.context("Failed to deserialize bank record")?;
        let entity = Entity::new(record.stock_code, record.bank_name.trim())
            .with_context(|| format!("Invalid bank record on data line {}", line + 1))?;
        banks.push(entity);
    }

    Ok(banks)
}
