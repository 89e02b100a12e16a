use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use mend_core::decisions::DecisionRepository;
use mend_core::error::AuditError;
use mend_core::types::{DecisionId, DecisionRecord, FailureId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct DecisionRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> DecisionRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> AuditError {
    AuditError::Store {
        message: err.to_string(),
    }
}

fn map_decision_row(row: &Row<'_>) -> Result<DecisionRecord, AuditError> {
    let id: String = row.get(0).map_err(store_err)?;
    let failure_id: String = row.get(1).map_err(store_err)?;
    let kind: String = row.get(2).map_err(store_err)?;
    let alternatives: String = row.get(4).map_err(store_err)?;
    let created_at: String = row.get(9).map_err(store_err)?;
    Ok(DecisionRecord {
        id: DecisionId::new(id).map_err(store_err)?,
        failure_id: FailureId::new(failure_id).map_err(store_err)?,
        kind: decode_enum(&kind).map_err(store_err)?,
        chosen: row.get(3).map_err(store_err)?,
        alternatives: decode_json(&alternatives).map_err(store_err)?,
        context_digest: row.get(5).map_err(store_err)?,
        confidence: row.get(6).map_err(store_err)?,
        model_id: row.get(7).map_err(store_err)?,
        response_latency_ms: row.get(8).map_err(store_err)?,
        created_at: from_rfc3339(&created_at).map_err(store_err)?,
    })
}

impl<'a> DecisionRepository for DecisionRepo<'a> {
    fn append(&self, record: DecisionRecord) -> Result<DecisionRecord, AuditError> {
        self.conn()
            .execute(
                "INSERT INTO decisions (id, failure_id, kind, chosen, alternatives, \
                 context_digest, confidence, model_id, response_latency_ms, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                (
                    record.id.as_str(),
                    record.failure_id.as_str(),
                    encode_enum(&record.kind).map_err(store_err)?,
                    &record.chosen,
                    encode_json(&record.alternatives).map_err(store_err)?,
                    &record.context_digest,
                    record.confidence,
                    &record.model_id,
                    record.response_latency_ms,
                    to_rfc3339(&record.created_at),
                ),
            )
            .map_err(store_err)?;
        Ok(record)
    }

    fn list_for_failure(&self, id: &FailureId) -> Result<Vec<DecisionRecord>, AuditError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, failure_id, kind, chosen, alternatives, context_digest, confidence, \
                 model_id, response_latency_ms, created_at \
                 FROM decisions WHERE failure_id = ?1 ORDER BY created_at",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            records.push(map_decision_row(row)?);
        }
        Ok(records)
    }
}
