//! SQLite storage layer -- telemetry buffer, anomaly log, training history.

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::Serialize;

use crate::detect::ModelMetrics;
use crate::telemetry::TelemetrySample;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager).with_context(|| format!("failed to open database {path}"))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort as text.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).with_context(|| format!("corrupt timestamp {s:?}"))?;
    Ok(dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Telemetry buffer
// ---------------------------------------------------------------------------

/// Append one observed sample to the retraining buffer.
pub fn buffer_telemetry(pool: &Pool, entity_id: &str, sample: &TelemetrySample) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO telemetry (entity_id, sample_json, sampled_at) VALUES (?1, ?2, ?3)",
        params![entity_id, serde_json::to_string(sample)?, sample.timestamp],
    )?;
    Ok(())
}

pub fn buffered_count(pool: &Pool) -> Result<usize> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Buffered samples in arrival order, with the highest row id read.
#[derive(Debug, Clone, Default)]
pub struct TelemetryBatch {
    pub samples: Vec<TelemetrySample>,
    pub last_id: Option<i64>,
}

pub fn load_buffered(pool: &Pool) -> Result<TelemetryBatch> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT id, sample_json FROM telemetry ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut batch = TelemetryBatch::default();
    for r in rows {
        let (id, json) = r?;
        let sample: TelemetrySample =
            serde_json::from_str(&json).with_context(|| format!("corrupt telemetry row {id}"))?;
        batch.samples.push(sample);
        batch.last_id = Some(id);
    }
    Ok(batch)
}

/// Drop buffered rows up to and including `last_id`. Rows appended after
/// the batch was read survive.
pub fn discard_buffered_through(pool: &Pool, last_id: i64) -> Result<usize> {
    let conn = pool.get()?;
    let removed = conn.execute("DELETE FROM telemetry WHERE id <= ?1", [last_id])?;
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Training history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRun {
    pub id: i64,
    /// What started the cycle: `bootstrap`, `api` or `scheduled`.
    pub origin: String,
    pub metrics: ModelMetrics,
}

pub fn record_training_run(pool: &Pool, origin: &str, metrics: &ModelMetrics) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO training_runs (origin, samples, accuracy, precision, recall, f1_score,
                                    training_loss, validation_loss, cnn_loss, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            origin,
            metrics.samples_processed as i64,
            metrics.accuracy,
            metrics.precision,
            metrics.recall,
            metrics.f1_score,
            metrics.training_loss,
            metrics.validation_loss,
            metrics.cnn_loss,
            timestamp(metrics.last_trained),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn recent_training_runs(pool: &Pool, limit: usize) -> Result<Vec<TrainingRun>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, origin, samples, accuracy, precision, recall, f1_score,
                training_loss, validation_loss, cnn_loss, created_at
         FROM training_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        let run = TrainingRun {
            id: row.get(0)?,
            origin: row.get(1)?,
            metrics: ModelMetrics {
                samples_processed: row.get::<_, i64>(2)? as u64,
                accuracy: row.get(3)?,
                precision: row.get(4)?,
                recall: row.get(5)?,
                f1_score: row.get(6)?,
                training_loss: row.get(7)?,
                validation_loss: row.get(8)?,
                cnn_loss: row.get(9)?,
                last_trained: DateTime::<Utc>::default(),
            },
        };
        Ok((run, row.get::<_, String>(10)?))
    })?;

    let mut runs = Vec::new();
    for r in rows {
        let (mut run, created_at) = r?;
        run.metrics.last_trained = parse_timestamp(&created_at)
            .with_context(|| format!("training run {}", run.id))?;
        runs.push(run);
    }
    Ok(runs)
}

pub fn latest_training_run(pool: &Pool) -> Result<Option<TrainingRun>> {
    Ok(recent_training_runs(pool, 1)?.into_iter().next())
}

/// Row count of a table, for status reporting and tests.
pub fn table_count(pool: &Pool, table: &str) -> Result<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("sentinelx.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn metrics() -> ModelMetrics {
        ModelMetrics {
            accuracy: 97.5,
            precision: 90.0,
            recall: 80.0,
            f1_score: 84.7,
            training_loss: 0.12,
            validation_loss: 0.15,
            cnn_loss: 0.4,
            samples_processed: 2200,
            last_trained: Utc::now(),
        }
    }

    #[test]
    fn test_buffer_roundtrip_and_partial_discard() {
        let (_dir, pool) = temp_pool();
        for ts in 0..5 {
            buffer_telemetry(&pool, "sat-1", &TelemetrySample::nominal(ts)).unwrap();
        }
        assert_eq!(buffered_count(&pool).unwrap(), 5);

        let batch = load_buffered(&pool).unwrap();
        assert_eq!(batch.samples.len(), 5);
        assert_eq!(batch.samples[4].timestamp, 4);

        // arrives while a retrain is running
        buffer_telemetry(&pool, "sat-2", &TelemetrySample::nominal(99)).unwrap();

        let removed = discard_buffered_through(&pool, batch.last_id.unwrap()).unwrap();
        assert_eq!(removed, 5);
        let rest = load_buffered(&pool).unwrap();
        assert_eq!(rest.samples.len(), 1);
        assert_eq!(rest.samples[0].timestamp, 99);
    }

    #[test]
    fn test_training_runs_newest_first() {
        let (_dir, pool) = temp_pool();
        assert!(latest_training_run(&pool).unwrap().is_none());

        record_training_run(&pool, "bootstrap", &metrics()).unwrap();
        let mut second = metrics();
        second.samples_processed = 150;
        record_training_run(&pool, "scheduled", &second).unwrap();

        let runs = recent_training_runs(&pool, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].origin, "scheduled");
        assert_eq!(runs[0].metrics.samples_processed, 150);
        assert_eq!(runs[1].metrics.accuracy, 97.5);
        assert_eq!(table_count(&pool, "training_runs").unwrap(), 2);
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let a = timestamp(parse_timestamp("2026-01-01T00:00:00Z").unwrap());
        let b = timestamp(parse_timestamp("2026-01-01T00:00:00.5Z").unwrap());
        assert!(a < b);
        assert_eq!(
            parse_timestamp(&a).unwrap(),
            parse_timestamp("2026-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_corrupt_run_timestamp_is_an_error() {
        let (_dir, pool) = temp_pool();
        let id = record_training_run(&pool, "api", &metrics()).unwrap();
        pool.get()
            .unwrap()
            .execute("UPDATE training_runs SET created_at = 'yesterday' WHERE id = ?1", [id])
            .unwrap();

        let err = recent_training_runs(&pool, 10).unwrap_err();
        assert!(format!("{err:#}").contains("corrupt timestamp"));
        assert!(parse_timestamp("not a date").is_err());
    }
}
