use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use mend_core::error::PatternError;
use mend_core::memory::PatternRepository;
use mend_core::types::{Pattern, PatternId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct PatternRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> PatternRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> PatternError {
    PatternError::Store {
        message: err.to_string(),
    }
}

const COLUMNS: &str = "id, repository, branch, failure_reason, category, error_signature, \
                       proposed_fix, files_modified, fix_commands, fix_successful, risk_score, \
                       resolution_time_ms, embedding, embedding_family, created_at";

fn map_pattern_row(row: &Row<'_>) -> Result<Pattern, PatternError> {
    let id: String = row.get(0).map_err(store_err)?;
    let files: String = row.get(7).map_err(store_err)?;
    let commands: String = row.get(8).map_err(store_err)?;
    let successful: i64 = row.get(9).map_err(store_err)?;
    let embedding: String = row.get(12).map_err(store_err)?;
    let family: String = row.get(13).map_err(store_err)?;
    let created_at: String = row.get(14).map_err(store_err)?;
    Ok(Pattern {
        id: PatternId::new(id).map_err(store_err)?,
        repository: row.get(1).map_err(store_err)?,
        branch: row.get(2).map_err(store_err)?,
        failure_reason: row.get(3).map_err(store_err)?,
        category: row.get(4).map_err(store_err)?,
        error_signature: row.get(5).map_err(store_err)?,
        proposed_fix: row.get(6).map_err(store_err)?,
        files_modified: decode_json(&files).map_err(store_err)?,
        fix_commands: decode_json(&commands).map_err(store_err)?,
        fix_successful: successful != 0,
        risk_score: row.get::<_, i64>(10).map_err(store_err)? as u8,
        resolution_time_ms: row.get(11).map_err(store_err)?,
        embedding: decode_json(&embedding).map_err(store_err)?,
        embedding_family: decode_enum(&family).map_err(store_err)?,
        created_at: from_rfc3339(&created_at).map_err(store_err)?,
    })
}

impl<'a> PatternRepository for PatternRepo<'a> {
    fn insert(&self, pattern: &Pattern) -> Result<(), PatternError> {
        self.conn()
            .execute(
                "INSERT INTO patterns (id, repository, branch, failure_reason, category, \
                 error_signature, proposed_fix, files_modified, fix_commands, fix_successful, \
                 risk_score, resolution_time_ms, embedding, embedding_family, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                (
                    pattern.id.as_str(),
                    &pattern.repository,
                    &pattern.branch,
                    &pattern.failure_reason,
                    &pattern.category,
                    &pattern.error_signature,
                    &pattern.proposed_fix,
                    encode_json(&pattern.files_modified).map_err(store_err)?,
                    encode_json(&pattern.fix_commands).map_err(store_err)?,
                    i64::from(pattern.fix_successful),
                    pattern.risk_score as i64,
                    pattern.resolution_time_ms,
                    encode_json(&pattern.embedding).map_err(store_err)?,
                    encode_enum(&pattern.embedding_family).map_err(store_err)?,
                    to_rfc3339(&pattern.created_at),
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn all(&self) -> Result<Vec<Pattern>, PatternError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM patterns ORDER BY created_at"))
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut patterns = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            patterns.push(map_pattern_row(row)?);
        }
        Ok(patterns)
    }

    fn count(&self) -> Result<u64, PatternError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as u64)
    }

    fn count_for_repo(&self, repository: &str) -> Result<u64, PatternError> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM patterns WHERE repository = ?1",
                [repository],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count as u64)
    }

    fn prune_oldest(&self, repository: &str, keep: usize) -> Result<Vec<PatternId>, PatternError> {
        let count = self.count_for_repo(repository)? as usize;
        let excess = count.saturating_sub(keep);
        if excess == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id FROM patterns WHERE repository = ?1 \
                 ORDER BY created_at ASC, id ASC LIMIT ?2",
            )
            .map_err(store_err)?;
        let mut rows = stmt
            .query((repository, excess as i64))
            .map_err(store_err)?;
        let mut doomed = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let raw: String = row.get(0).map_err(store_err)?;
            doomed.push(PatternId::new(raw).map_err(store_err)?);
        }
        for id in &doomed {
            conn.execute("DELETE FROM patterns WHERE id = ?1", [id.as_str()])
                .map_err(store_err)?;
        }
        Ok(doomed)
    }
}
