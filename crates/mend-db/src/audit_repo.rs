use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use mend_core::audit::AuditRepository;
use mend_core::error::AuditError;
use mend_core::types::{ApprovalId, AuditEntry, AuditFilter, AuditId, FailureId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct AuditRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> AuditRepo<'a> {
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

fn map_audit_row(row: &Row<'_>) -> Result<AuditEntry, AuditError> {
    let id: String = row.get(0).map_err(store_err)?;
    let at: String = row.get(1).map_err(store_err)?;
    let action: String = row.get(3).map_err(store_err)?;
    let failure_id: Option<String> = row.get(4).map_err(store_err)?;
    let request_id: Option<String> = row.get(5).map_err(store_err)?;
    let outcome: String = row.get(6).map_err(store_err)?;
    let details: String = row.get(7).map_err(store_err)?;
    Ok(AuditEntry {
        id: AuditId::new(id).map_err(store_err)?,
        at: from_rfc3339(&at).map_err(store_err)?,
        actor: row.get(2).map_err(store_err)?,
        action: decode_enum(&action).map_err(store_err)?,
        failure_id: failure_id
            .map(FailureId::new)
            .transpose()
            .map_err(store_err)?,
        request_id: request_id
            .map(ApprovalId::new)
            .transpose()
            .map_err(store_err)?,
        outcome: decode_enum(&outcome).map_err(store_err)?,
        details: decode_json(&details).map_err(store_err)?,
        error: row.get(8).map_err(store_err)?,
    })
}

impl<'a> AuditRepository for AuditRepo<'a> {
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, AuditError> {
        self.conn()
            .execute(
                "INSERT INTO audit_log (id, at, actor, action, failure_id, request_id, outcome, \
                 details, error) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                (
                    entry.id.as_str(),
                    to_rfc3339(&entry.at),
                    &entry.actor,
                    encode_enum(&entry.action).map_err(store_err)?,
                    entry.failure_id.as_ref().map(FailureId::as_str),
                    entry.request_id.as_ref().map(ApprovalId::as_str),
                    encode_enum(&entry.outcome).map_err(store_err)?,
                    encode_json(&entry.details).map_err(store_err)?,
                    entry.error.as_deref(),
                ),
            )
            .map_err(store_err)?;
        Ok(entry)
    }

    fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut sql = String::from(
            "SELECT id, at, actor, action, failure_id, request_id, outcome, details, error \
             FROM audit_log WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(failure_id) = &filter.failure_id {
            sql.push_str(&format!(" AND failure_id = ?{}", params.len() + 1));
            params.push(Box::new(failure_id.as_str().to_string()));
        }
        if let Some(action) = &filter.action {
            sql.push_str(&format!(" AND action = ?{}", params.len() + 1));
            params.push(Box::new(encode_enum(action).map_err(store_err)?));
        }
        if let Some(outcome) = &filter.outcome {
            sql.push_str(&format!(" AND outcome = ?{}", params.len() + 1));
            params.push(Box::new(encode_enum(outcome).map_err(store_err)?));
        }
        if let Some(since) = &filter.since {
            sql.push_str(&format!(" AND at >= ?{}", params.len() + 1));
            params.push(Box::new(to_rfc3339(since)));
        }
        if let Some(until) = &filter.until {
            sql.push_str(&format!(" AND at <= ?{}", params.len() + 1));
            params.push(Box::new(to_rfc3339(until)));
        }
        sql.push_str(" ORDER BY at DESC");
        let limit = filter.limit.unwrap_or(200);
        sql.push_str(&format!(" LIMIT {limit}"));

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))
            .map_err(store_err)?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            entries.push(map_audit_row(row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;
    use mend_core::audit::AuditEvent;
    use mend_core::types::{AuditAction, AuditOutcome};

    #[test]
    fn append_and_filter_by_action() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = AuditRepo::new(&conn);
        let failure_id = FailureId::generate();
        repo.append(
            AuditEvent::new("poller", AuditAction::Detection, AuditOutcome::Success)
                .failure(&failure_id)
                .into_entry(Utc::now()),
        )
        .unwrap();
        repo.append(
            AuditEvent::new("safety_gate", AuditAction::Validation, AuditOutcome::Failure)
                .failure(&failure_id)
                .into_entry(Utc::now()),
        )
        .unwrap();

        let validations = repo
            .query(AuditFilter {
                action: Some(AuditAction::Validation),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(validations.len(), 1);
        assert_eq!(validations[0].actor, "safety_gate");

        let for_failure = repo
            .query(AuditFilter {
                failure_id: Some(failure_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(for_failure.len(), 2);
    }
}
