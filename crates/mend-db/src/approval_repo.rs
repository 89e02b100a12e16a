use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use mend_core::approval::ApprovalRepository;
use mend_core::error::ApprovalError;
use mend_core::types::{ApprovalId, ApprovalRequest, ApprovalStatus, FailureId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct ApprovalRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> ApprovalRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> ApprovalError {
    ApprovalError::Store {
        message: err.to_string(),
    }
}

const COLUMNS: &str = "id, failure_id, repository, pr_number, required_reviewers, \
                       environment_name, deployment_id, status, created_at, expires_at, \
                       resolved_at, resolved_by";

fn map_approval_row(row: &Row<'_>) -> Result<ApprovalRequest, ApprovalError> {
    let id: String = row.get(0).map_err(store_err)?;
    let failure_id: String = row.get(1).map_err(store_err)?;
    let reviewers: String = row.get(4).map_err(store_err)?;
    let status: String = row.get(7).map_err(store_err)?;
    let created_at: String = row.get(8).map_err(store_err)?;
    let expires_at: String = row.get(9).map_err(store_err)?;
    let resolved_at: Option<String> = row.get(10).map_err(store_err)?;
    Ok(ApprovalRequest {
        id: ApprovalId::new(id).map_err(store_err)?,
        failure_id: FailureId::new(failure_id).map_err(store_err)?,
        repository: row.get(2).map_err(store_err)?,
        pr_number: row.get::<_, i64>(3).map_err(store_err)? as u64,
        required_reviewers: decode_json(&reviewers).map_err(store_err)?,
        environment_name: row.get(5).map_err(store_err)?,
        deployment_id: row.get(6).map_err(store_err)?,
        status: decode_enum(&status).map_err(store_err)?,
        created_at: from_rfc3339(&created_at).map_err(store_err)?,
        expires_at: from_rfc3339(&expires_at).map_err(store_err)?,
        resolved_at: resolved_at
            .map(|v| from_rfc3339(&v))
            .transpose()
            .map_err(store_err)?,
        resolved_by: row.get(11).map_err(store_err)?,
    })
}

impl<'a> ApprovalRepository for ApprovalRepo<'a> {
    fn insert(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        self.conn()
            .execute(
                "INSERT INTO approvals (id, failure_id, repository, pr_number, required_reviewers, \
                 environment_name, deployment_id, status, created_at, expires_at, resolved_at, resolved_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                (
                    request.id.as_str(),
                    request.failure_id.as_str(),
                    &request.repository,
                    request.pr_number as i64,
                    encode_json(&request.required_reviewers).map_err(store_err)?,
                    &request.environment_name,
                    &request.deployment_id,
                    encode_enum(&request.status).map_err(store_err)?,
                    to_rfc3339(&request.created_at),
                    to_rfc3339(&request.expires_at),
                    request.resolved_at.map(|v| to_rfc3339(&v)),
                    request.resolved_by.as_deref(),
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn get(&self, id: &ApprovalId) -> Result<Option<ApprovalRequest>, ApprovalError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM approvals WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_approval_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn get_for_failure(
        &self,
        failure_id: &FailureId,
    ) -> Result<Option<ApprovalRequest>, ApprovalError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM approvals WHERE failure_id = ?1 \
                 ORDER BY created_at DESC LIMIT 1"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query([failure_id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_approval_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn list_pending(&self) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let pending = encode_enum(&ApprovalStatus::Pending).map_err(store_err)?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM approvals WHERE status = ?1 ORDER BY created_at"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query([pending]).map_err(store_err)?;
        let mut requests = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            requests.push(map_approval_row(row)?);
        }
        Ok(requests)
    }

    fn resolve(
        &self,
        id: &ApprovalId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
        resolved_by: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let existing = self.get(id)?.ok_or(ApprovalError::NotFound)?;
        if existing.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyResolved {
                status: format!("{:?}", existing.status),
            });
        }
        self.conn()
            .execute(
                "UPDATE approvals SET status = ?2, resolved_at = ?3, resolved_by = ?4 WHERE id = ?1",
                (
                    id.as_str(),
                    encode_enum(&status).map_err(store_err)?,
                    to_rfc3339(&resolved_at),
                    resolved_by.as_deref(),
                ),
            )
            .map_err(store_err)?;
        self.get(id)?.ok_or(ApprovalError::NotFound)
    }
}
