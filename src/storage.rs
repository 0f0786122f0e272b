use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::plate::{PlateRecord, PlateText, TIMESTAMP_FORMAT};

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of an insert-if-absent request. A duplicate is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

/// Deduplicated record of confirmed plates.
///
/// Uniqueness is enforced by the store itself. Callers never check
/// `exists` before inserting; `insert_if_absent` is a single atomic step.
pub trait PlateStore: Send {
    /// True iff a record with exactly this key is stored.
    fn exists(&self, plate: &PlateText) -> Result<bool>;

    /// Atomically insert a record unless the key is already present.
    ///
    /// Never overwrites. The record is durable when this returns `Ok`.
    fn insert_if_absent(
        &mut self,
        plate: &PlateText,
        confidence: f32,
        first_seen: NaiveDateTime,
    ) -> Result<InsertOutcome>;

    fn get(&self, plate: &PlateText) -> Result<Option<PlateRecord>>;

    /// Records ordered by first-seen time, oldest first.
    fn list(&self, limit: usize) -> Result<Vec<PlateRecord>>;

    fn count(&self) -> Result<u64>;
}

fn validate_confidence(confidence: f32) -> Result<()> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(anyhow!(
            "plate confidence must be within 0..=1, got {}",
            confidence
        ));
    }
    Ok(())
}

pub struct SqlitePlateStore {
    conn: Connection,
}

impl SqlitePlateStore {
    /// Open (or create) the plate database.
    ///
    /// Accepts a filesystem path or a `file:` URI (see `shared_memory_uri`).
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)
            .with_context(|| format!("failed to open plate store {}", db_path))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;

            CREATE TABLE IF NOT EXISTS plates (
              plate_number TEXT PRIMARY KEY,
              timestamp TEXT NOT NULL,
              confidence REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_plates_timestamp ON plates(timestamp);
            "#,
            )
            .context("failed to initialise plate store schema")?;
        Ok(())
    }
}

/// Raw `plates` row. Databases created by older tools declare every column
/// nullable, so nothing here is assumed present.
type PlateRow = (Option<String>, Option<String>, Option<f64>);

fn read_plate_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlateRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn record_from_row((plate_number, timestamp, confidence): PlateRow) -> Result<PlateRecord> {
    let plate_text = plate_number
        .as_deref()
        .and_then(PlateText::normalize)
        .ok_or_else(|| anyhow!("corrupt plate row: empty plate_number"))?;
    let timestamp = timestamp
        .ok_or_else(|| anyhow!("corrupt plate row {}: missing timestamp", plate_text))?;
    let first_seen = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT).with_context(
        || format!("corrupt plate row {}: bad timestamp {:?}", plate_text, timestamp),
    )?;
    let confidence = confidence
        .ok_or_else(|| anyhow!("corrupt plate row {}: missing confidence", plate_text))?;
    Ok(PlateRecord {
        plate_text,
        first_seen,
        confidence: confidence as f32,
    })
}

impl PlateStore for SqlitePlateStore {
    fn exists(&self, plate: &PlateText) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM plates WHERE plate_number = ?1 LIMIT 1",
                params![plate.as_str()],
                |_| Ok(()),
            )
            .optional()
            .context("plate store lookup failed")?;
        Ok(found.is_some())
    }

    fn insert_if_absent(
        &mut self,
        plate: &PlateText,
        confidence: f32,
        first_seen: NaiveDateTime,
    ) -> Result<InsertOutcome> {
        validate_confidence(confidence)?;
        let changed = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO plates(plate_number, timestamp, confidence) VALUES (?1, ?2, ?3)",
                params![
                    plate.as_str(),
                    first_seen.format(TIMESTAMP_FORMAT).to_string(),
                    confidence as f64
                ],
            )
            .context("plate store insert failed")?;
        Ok(if changed == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyPresent
        })
    }

    fn get(&self, plate: &PlateText) -> Result<Option<PlateRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT plate_number, timestamp, confidence FROM plates WHERE plate_number = ?1",
                params![plate.as_str()],
                read_plate_row,
            )
            .optional()
            .context("plate store lookup failed")?;
        row.map(record_from_row).transpose()
    }

    /// Rows that cannot be read back (NULL columns left by older tools,
    /// empty keys, bad timestamps) are skipped with a warning.
    fn list(&self, limit: usize) -> Result<Vec<PlateRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT plate_number, timestamp, confidence FROM plates ORDER BY timestamp ASC, plate_number ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], read_plate_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("plate store listing failed")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping unreadable plate row: {:#}", e),
            }
        }
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM plates", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPlateStore {
    records: BTreeMap<PlateText, PlateRecord>,
}

impl InMemoryPlateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlateStore for InMemoryPlateStore {
    fn exists(&self, plate: &PlateText) -> Result<bool> {
        Ok(self.records.contains_key(plate))
    }

    fn insert_if_absent(
        &mut self,
        plate: &PlateText,
        confidence: f32,
        first_seen: NaiveDateTime,
    ) -> Result<InsertOutcome> {
        validate_confidence(confidence)?;
        if self.records.contains_key(plate) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        self.records.insert(
            plate.clone(),
            PlateRecord {
                plate_text: plate.clone(),
                first_seen,
                confidence,
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    fn get(&self, plate: &PlateText) -> Result<Option<PlateRecord>> {
        Ok(self.records.get(plate).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<PlateRecord>> {
        let mut records: Vec<PlateRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.plate_text.cmp(&b.plate_text))
        });
        records.truncate(limit);
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}
