use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{AnomalyVerdict, Severity};
use crate::storage::{parse_timestamp, timestamp, Pool};

/// One entry in the anomaly log: either a positive verdict or an
/// operator-raised alert.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub entity_id: String,
    pub anomaly_type: String,
    pub severity: Severity,
    pub score: f64,
    pub confidence: u8,
    pub description: Option<String>,
    pub verdict: Option<serde_json::Value>,
    pub flagged: bool,
    pub manual: bool,
    pub created_at: DateTime<Utc>,
}

/// Operator-raised alert.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAlert {
    pub entity_id: String,
    pub anomaly_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct AnomalyLog {
    pool: Pool,
}

impl AnomalyLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record_verdict(&self, verdict: &AnomalyVerdict) -> Result<Uuid> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        let verdict_json = serde_json::to_string(verdict)?;

        conn.execute(
            "INSERT INTO anomalies (id, entity_id, anomaly_type, severity, score, confidence,
                                    verdict_json, flagged, manual, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8)",
            params![
                id.to_string(),
                verdict.entity_id,
                verdict.anomaly_type.as_str(),
                verdict.severity.as_str(),
                verdict.anomaly_score,
                verdict.confidence,
                verdict_json,
                timestamp(verdict.detected_at),
            ],
        )?;

        Ok(id)
    }

    /// Manual alerts carry full confidence and are flagged on creation.
    pub fn record_manual(&self, alert: &ManualAlert) -> Result<AnomalyRecord> {
        let conn = self.pool.get()?;
        let record = AnomalyRecord {
            id: Uuid::new_v4(),
            entity_id: alert.entity_id.clone(),
            anomaly_type: alert.anomaly_type.clone(),
            severity: alert.severity,
            score: 1.0,
            confidence: 100,
            description: alert.description.clone(),
            verdict: None,
            flagged: true,
            manual: true,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO anomalies (id, entity_id, anomaly_type, severity, score, confidence,
                                    description, flagged, manual, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 1, ?8)",
            params![
                record.id.to_string(),
                record.entity_id,
                record.anomaly_type,
                record.severity.as_str(),
                record.score,
                record.confidence,
                record.description,
                timestamp(record.created_at),
            ],
        )?;

        Ok(record)
    }

    /// Mark an entry for operator follow-up. Returns false for unknown ids.
    pub fn flag(&self, id: Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        let updated = conn.execute("UPDATE anomalies SET flagged = 1 WHERE id = ?1", [id.to_string()])?;
        Ok(updated > 0)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<AnomalyRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} WHERE id = ?1"))?;
        let mut rows = stmt.query_map([id.to_string()], row_to_raw)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_record()?)),
            None => Ok(None),
        }
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<AnomalyRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{SELECT_RECORD} ORDER BY created_at DESC, rowid DESC LIMIT ?1"))?;
        let rows = stmt.query_map([limit as i64], row_to_raw)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?.into_record()?);
        }
        Ok(records)
    }

    /// Fleet threat level: mean severity weight of every logged entry
    /// (low 10, medium 40, high 80, critical 100), capped at 100.
    pub fn threat_score(&self) -> Result<f64> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT severity FROM anomalies")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let (mut total, mut count) = (0.0, 0usize);
        for r in rows {
            let severity: Severity = r?.parse().map_err(anyhow::Error::msg)?;
            total += severity.weight();
            count += 1;
        }
        if count == 0 {
            return Ok(0.0);
        }
        Ok((total / count as f64).min(100.0))
    }
}

const SELECT_RECORD: &str = "SELECT id, entity_id, anomaly_type, severity, score, confidence,
        description, verdict_json, flagged, manual, created_at FROM anomalies";

/// Column values before fallible parsing of ids, enums and JSON.
struct RawRecord {
    id: String,
    entity_id: String,
    anomaly_type: String,
    severity: String,
    score: f64,
    confidence: u8,
    description: Option<String>,
    verdict_json: Option<String>,
    flagged: bool,
    manual: bool,
    created_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        anomaly_type: row.get(2)?,
        severity: row.get(3)?,
        score: row.get(4)?,
        confidence: row.get(5)?,
        description: row.get(6)?,
        verdict_json: row.get(7)?,
        flagged: row.get(8)?,
        manual: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<AnomalyRecord> {
        let verdict = match self.verdict_json {
            Some(json) => Some(serde_json::from_str(&json).context("corrupt verdict json")?),
            None => None,
        };
        Ok(AnomalyRecord {
            id: Uuid::parse_str(&self.id).with_context(|| format!("corrupt anomaly id {}", self.id))?,
            entity_id: self.entity_id,
            anomaly_type: self.anomaly_type,
            severity: self.severity.parse().map_err(anyhow::Error::msg)?,
            score: self.score,
            confidence: self.confidence,
            description: self.description,
            verdict,
            flagged: self.flagged,
            manual: self.manual,
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("anomaly {}", self.id))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::fusion::{SignalScores, Votes};
    use crate::detect::AnomalyCategory;
    use crate::telemetry::TelemetrySample;

    fn temp_log() -> (tempfile::TempDir, AnomalyLog) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("log.db");
        let pool = crate::storage::open_pool(path.to_str().unwrap()).unwrap();
        (dir, AnomalyLog::new(pool))
    }

    fn verdict(entity: &str, severity: Severity, at: DateTime<Utc>) -> AnomalyVerdict {
        AnomalyVerdict {
            entity_id: entity.to_string(),
            is_anomaly: true,
            anomaly_score: 0.9,
            confidence: 90,
            features: TelemetrySample::nominal(0),
            anomaly_type: AnomalyCategory::PowerSystemDegradation,
            severity,
            votes: Votes {
                reconstruction: true,
                isolation: true,
                statistical: true,
                cnn: false,
            },
            signals: SignalScores {
                reconstruction_error: 1.2,
                isolation_score: 0.7,
                max_z_score: 8.0,
                statistical: true,
                cnn_score: None,
            },
            detected_at: at,
        }
    }

    #[test]
    fn test_record_and_list_newest_first() {
        let (_dir, log) = temp_log();
        let t0 = Utc::now();
        let first = log.record_verdict(&verdict("sat-1", Severity::High, t0)).unwrap();
        let second = log
            .record_verdict(&verdict("sat-2", Severity::Critical, t0 + chrono::Duration::seconds(1)))
            .unwrap();

        let records = log.list_recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second);
        assert_eq!(records[1].id, first);
        assert_eq!(records[0].anomaly_type, "Power System Degradation");
        assert!(!records[0].flagged);
        assert_eq!(records[0].verdict.as_ref().unwrap()["entityId"], "sat-2");

        assert_eq!(log.list_recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_flag_marks_entry() {
        let (_dir, log) = temp_log();
        let id = log.record_verdict(&verdict("sat-1", Severity::High, Utc::now())).unwrap();

        assert!(log.flag(id).unwrap());
        assert!(log.get(id).unwrap().unwrap().flagged);
        assert!(!log.flag(Uuid::new_v4()).unwrap());
        assert!(log.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_manual_alert_is_flagged() {
        let (_dir, log) = temp_log();
        let record = log
            .record_manual(&ManualAlert {
                entity_id: "sat-9".to_string(),
                anomaly_type: "Payload Fault".to_string(),
                severity: Severity::Medium,
                description: Some("operator report".to_string()),
            })
            .unwrap();
        assert!(record.flagged && record.manual);
        assert_eq!(record.confidence, 100);

        let stored = log.get(record.id).unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("operator report"));
        assert!(stored.verdict.is_none());
    }

    #[test]
    fn test_threat_score_weights() {
        let (_dir, log) = temp_log();
        assert_eq!(log.threat_score().unwrap(), 0.0);

        let now = Utc::now();
        log.record_verdict(&verdict("a", Severity::Low, now)).unwrap();
        log.record_verdict(&verdict("b", Severity::Critical, now)).unwrap();
        log.record_verdict(&verdict("c", Severity::High, now)).unwrap();
        log.record_verdict(&verdict("d", Severity::Medium, now)).unwrap();
        // (10 + 100 + 80 + 40) / 4
        assert!((log.threat_score().unwrap() - 57.5).abs() < 1e-9);
    }
}
