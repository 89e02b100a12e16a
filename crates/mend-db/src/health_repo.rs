use crate::util::{decode_json, encode_json, from_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use mend_core::error::HealthError;
use mend_core::health::HealthCheckRepository;
use mend_core::types::{CheckId, CheckResult, FailureId, HealthCheck, SnapshotId};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct HealthRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> HealthRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> HealthError {
    HealthError::Store {
        message: err.to_string(),
    }
}

const COLUMNS: &str = "id, remediation_id, snapshot_id, repository, branch, pr_number, \
                       scheduled_at, executed_at, passed, checks, triggered_rollback";

fn map_check_row(row: &Row<'_>) -> Result<HealthCheck, HealthError> {
    let id: String = row.get(0).map_err(store_err)?;
    let remediation_id: String = row.get(1).map_err(store_err)?;
    let snapshot_id: String = row.get(2).map_err(store_err)?;
    let scheduled_at: String = row.get(6).map_err(store_err)?;
    let executed_at: Option<String> = row.get(7).map_err(store_err)?;
    let passed: Option<i64> = row.get(8).map_err(store_err)?;
    let checks: String = row.get(9).map_err(store_err)?;
    let triggered: i64 = row.get(10).map_err(store_err)?;
    Ok(HealthCheck {
        id: CheckId::new(id).map_err(store_err)?,
        remediation_id: FailureId::new(remediation_id).map_err(store_err)?,
        snapshot_id: SnapshotId::new(snapshot_id).map_err(store_err)?,
        repository: row.get(3).map_err(store_err)?,
        branch: row.get(4).map_err(store_err)?,
        pr_number: row.get::<_, i64>(5).map_err(store_err)? as u64,
        scheduled_at: from_rfc3339(&scheduled_at).map_err(store_err)?,
        executed_at: executed_at
            .map(|v| from_rfc3339(&v))
            .transpose()
            .map_err(store_err)?,
        passed: passed.map(|v| v != 0),
        checks: decode_json(&checks).map_err(store_err)?,
        triggered_rollback: triggered != 0,
    })
}

impl<'a> HealthCheckRepository for HealthRepo<'a> {
    fn insert(&self, check: &HealthCheck) -> Result<(), HealthError> {
        self.conn()
            .execute(
                "INSERT INTO health_checks (id, remediation_id, snapshot_id, repository, branch, \
                 pr_number, scheduled_at, executed_at, passed, checks, triggered_rollback) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                (
                    check.id.as_str(),
                    check.remediation_id.as_str(),
                    check.snapshot_id.as_str(),
                    &check.repository,
                    &check.branch,
                    check.pr_number as i64,
                    to_rfc3339(&check.scheduled_at),
                    check.executed_at.map(|v| to_rfc3339(&v)),
                    check.passed.map(i64::from),
                    encode_json(&check.checks).map_err(store_err)?,
                    i64::from(check.triggered_rollback),
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn get(&self, id: &CheckId) -> Result<Option<HealthCheck>, HealthError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM health_checks WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_check_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn due(&self, now: DateTime<Utc>) -> Result<Vec<HealthCheck>, HealthError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM health_checks \
                 WHERE executed_at IS NULL AND scheduled_at <= ?1 ORDER BY scheduled_at"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query([to_rfc3339(&now)]).map_err(store_err)?;
        let mut checks = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            checks.push(map_check_row(row)?);
        }
        Ok(checks)
    }

    fn unexecuted(&self) -> Result<Vec<HealthCheck>, HealthError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM health_checks WHERE executed_at IS NULL ORDER BY scheduled_at"
            ))
            .map_err(store_err)?;
        let mut rows = stmt.query([]).map_err(store_err)?;
        let mut checks = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            checks.push(map_check_row(row)?);
        }
        Ok(checks)
    }

    fn resolve(
        &self,
        id: &CheckId,
        executed_at: DateTime<Utc>,
        passed: bool,
        checks: &[CheckResult],
        triggered_rollback: bool,
    ) -> Result<HealthCheck, HealthError> {
        let existing = self.get(id)?.ok_or(HealthError::NotFound)?;
        if existing.executed_at.is_some() {
            return Err(HealthError::AlreadyResolved);
        }
        self.conn()
            .execute(
                "UPDATE health_checks SET executed_at = ?2, passed = ?3, checks = ?4, \
                 triggered_rollback = ?5 WHERE id = ?1",
                (
                    id.as_str(),
                    to_rfc3339(&executed_at),
                    i64::from(passed),
                    encode_json(&checks).map_err(store_err)?,
                    i64::from(triggered_rollback),
                ),
            )
            .map_err(store_err)?;
        self.get(id)?.ok_or(HealthError::NotFound)
    }
}
