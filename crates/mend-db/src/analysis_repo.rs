use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use mend_core::classify::AnalysisRepository;
use mend_core::error::FailureError;
use mend_core::types::{Analysis, FailureId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct AnalysisRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> AnalysisRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> FailureError {
    FailureError::Store {
        message: err.to_string(),
    }
}

fn map_analysis_row(row: &Row<'_>) -> Result<Analysis, FailureError> {
    let failure_id: String = row.get(0).map_err(store_err)?;
    let error_type: String = row.get(1).map_err(store_err)?;
    let effort: String = row.get(5).map_err(store_err)?;
    let files: String = row.get(7).map_err(store_err)?;
    let operations: String = row.get(8).map_err(store_err)?;
    let commands: String = row.get(9).map_err(store_err)?;
    let components: String = row.get(11).map_err(store_err)?;
    let created_at: String = row.get(14).map_err(store_err)?;
    Ok(Analysis {
        failure_id: FailureId::new(failure_id).map_err(store_err)?,
        error_type: decode_enum(&error_type).map_err(store_err)?,
        category: row.get(2).map_err(store_err)?,
        risk_score: row.get::<_, i64>(3).map_err(store_err)? as u8,
        confidence: row.get::<_, i64>(4).map_err(store_err)? as u8,
        effort: decode_enum(&effort).map_err(store_err)?,
        proposed_fix: row.get(6).map_err(store_err)?,
        files_to_modify: decode_json(&files).map_err(store_err)?,
        fix_operations: decode_json(&operations).map_err(store_err)?,
        fix_commands: decode_json(&commands).map_err(store_err)?,
        reasoning: row.get(10).map_err(store_err)?,
        affected_components: decode_json(&components).map_err(store_err)?,
        model_id: row.get(12).map_err(store_err)?,
        response_latency_ms: row.get(13).map_err(store_err)?,
        created_at: from_rfc3339(&created_at).map_err(store_err)?,
    })
}

impl<'a> AnalysisRepository for AnalysisRepo<'a> {
    fn insert(&self, analysis: &Analysis) -> Result<(), FailureError> {
        self.conn()
            .execute(
                "INSERT INTO analyses (failure_id, error_type, category, risk_score, confidence, \
                 effort, proposed_fix, files_to_modify, fix_operations, fix_commands, reasoning, \
                 affected_components, model_id, response_latency_ms, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                (
                    analysis.failure_id.as_str(),
                    encode_enum(&analysis.error_type).map_err(store_err)?,
                    &analysis.category,
                    analysis.risk_score as i64,
                    analysis.confidence as i64,
                    encode_enum(&analysis.effort).map_err(store_err)?,
                    &analysis.proposed_fix,
                    encode_json(&analysis.files_to_modify).map_err(store_err)?,
                    encode_json(&analysis.fix_operations).map_err(store_err)?,
                    encode_json(&analysis.fix_commands).map_err(store_err)?,
                    &analysis.reasoning,
                    encode_json(&analysis.affected_components).map_err(store_err)?,
                    &analysis.model_id,
                    analysis.response_latency_ms,
                    to_rfc3339(&analysis.created_at),
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn get(&self, id: &FailureId) -> Result<Option<Analysis>, FailureError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT failure_id, error_type, category, risk_score, confidence, effort, \
                 proposed_fix, files_to_modify, fix_operations, fix_commands, reasoning, \
                 affected_components, model_id, response_latency_ms, created_at \
                 FROM analyses WHERE failure_id = ?1",
            )
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_analysis_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn risk_distribution(&self) -> Result<Vec<(u8, u64)>, FailureError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT risk_score, COUNT(*) FROM analyses GROUP BY risk_score ORDER BY risk_score")
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut distribution = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let score: i64 = row.get(0).map_err(store_err)?;
            let count: i64 = row.get(1).map_err(store_err)?;
            distribution.push((score as u8, count as u64));
        }
        Ok(distribution)
    }
}
