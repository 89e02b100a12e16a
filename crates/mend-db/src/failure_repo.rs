use crate::util::{decode_enum, encode_enum, from_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use mend_core::error::FailureError;
use mend_core::failures::FailureRepository;
use mend_core::types::{
    Failure, FailureFilter, FailureId, FailureStat, FailureStatus, NewFailure,
};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct FailureRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> FailureRepo<'a> {
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

const COLUMNS: &str = "id, repository, branch, workflow, workflow_run_id, commit_sha, \
                       failure_reason, logs, status, status_reason, detected_at, updated_at";

fn map_failure_row(row: &Row<'_>) -> Result<Failure, FailureError> {
    let id: String = row.get(0).map_err(store_err)?;
    let status: String = row.get(8).map_err(store_err)?;
    let detected_at: String = row.get(10).map_err(store_err)?;
    let updated_at: String = row.get(11).map_err(store_err)?;
    Ok(Failure {
        id: FailureId::new(id).map_err(store_err)?,
        repository: row.get(1).map_err(store_err)?,
        branch: row.get(2).map_err(store_err)?,
        workflow: row.get(3).map_err(store_err)?,
        workflow_run_id: row.get(4).map_err(store_err)?,
        commit_sha: row.get(5).map_err(store_err)?,
        failure_reason: row.get(6).map_err(store_err)?,
        logs: row.get(7).map_err(store_err)?,
        status: decode_enum(&status).map_err(store_err)?,
        status_reason: row.get(9).map_err(store_err)?,
        detected_at: from_rfc3339(&detected_at).map_err(store_err)?,
        updated_at: from_rfc3339(&updated_at).map_err(store_err)?,
    })
}

impl<'a> FailureRepository for FailureRepo<'a> {
    fn insert(&self, input: NewFailure) -> Result<Failure, FailureError> {
        let failure = Failure {
            id: FailureId::generate(),
            repository: input.repository,
            branch: input.branch,
            workflow: input.workflow,
            workflow_run_id: input.workflow_run_id,
            commit_sha: input.commit_sha,
            failure_reason: input.failure_reason,
            logs: input.logs,
            status: FailureStatus::Detected,
            status_reason: None,
            detected_at: input.detected_at,
            updated_at: input.detected_at,
        };
        self.conn()
            .execute(
                "INSERT INTO failures (id, repository, branch, workflow, workflow_run_id, \
                 commit_sha, failure_reason, logs, status, status_reason, detected_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                (
                    failure.id.as_str(),
                    &failure.repository,
                    &failure.branch,
                    &failure.workflow,
                    &failure.workflow_run_id,
                    &failure.commit_sha,
                    &failure.failure_reason,
                    &failure.logs,
                    encode_enum(&failure.status).map_err(store_err)?,
                    failure.status_reason.as_deref(),
                    to_rfc3339(&failure.detected_at),
                    to_rfc3339(&failure.updated_at),
                ),
            )
            .map_err(store_err)?;
        Ok(failure)
    }

    fn get(&self, id: &FailureId) -> Result<Option<Failure>, FailureError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM failures WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_failure_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn exists(&self, repository: &str, workflow_run_id: &str) -> Result<bool, FailureError> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM failures WHERE repository = ?1 AND workflow_run_id = ?2",
                (repository, workflow_run_id),
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count > 0)
    }

    fn list(&self, filter: FailureFilter) -> Result<Vec<Failure>, FailureError> {
        let mut sql = format!("SELECT {COLUMNS} FROM failures WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(repository) = &filter.repository {
            sql.push_str(&format!(" AND repository = ?{}", params.len() + 1));
            params.push(Box::new(repository.clone()));
        }
        if let Some(status) = &filter.status {
            sql.push_str(&format!(" AND status = ?{}", params.len() + 1));
            params.push(Box::new(encode_enum(status).map_err(store_err)?));
        }
        if let Some(since) = &filter.since {
            sql.push_str(&format!(" AND detected_at >= ?{}", params.len() + 1));
            params.push(Box::new(to_rfc3339(since)));
        }
        sql.push_str(" ORDER BY detected_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())))
            .map_err(store_err)?;
        let mut failures = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            failures.push(map_failure_row(row)?);
        }
        Ok(failures)
    }

    fn set_status(
        &self,
        id: &FailureId,
        status: FailureStatus,
        reason: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<Failure, FailureError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE failures SET status = ?2, status_reason = ?3, updated_at = ?4 WHERE id = ?1",
                (
                    id.as_str(),
                    encode_enum(&status).map_err(store_err)?,
                    reason.as_deref(),
                    to_rfc3339(&updated_at),
                ),
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(FailureError::NotFound);
        }
        self.get(id)?.ok_or(FailureError::NotFound)
    }

    fn count_since(&self, since: DateTime<Utc>) -> Result<u64, FailureError> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM failures WHERE detected_at >= ?1",
                [to_rfc3339(&since)],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count as u64)
    }

    fn stats_window(
        &self,
        repository: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<FailureStat>, FailureError> {
        let mut sql = String::from(
            "SELECT f.repository, a.category, f.status, f.detected_at, f.updated_at \
             FROM failures f LEFT JOIN analyses a ON a.failure_id = f.id \
             WHERE f.detected_at >= ?1",
        );
        if repository.is_some() {
            sql.push_str(" AND f.repository = ?2");
        }
        sql.push_str(" ORDER BY f.detected_at");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(store_err)?;
        let since_str = to_rfc3339(&since);
        let mut rows = match repository {
            Some(repo) => stmt
                .query(rusqlite::params![since_str, repo])
                .map_err(store_err)?,
            None => stmt.query([since_str]).map_err(store_err)?,
        };

        let mut stats = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let status_raw: String = row.get(2).map_err(store_err)?;
            let status: FailureStatus = decode_enum(&status_raw).map_err(store_err)?;
            let detected_raw: String = row.get(3).map_err(store_err)?;
            let updated_raw: String = row.get(4).map_err(store_err)?;
            let detected_at = from_rfc3339(&detected_raw).map_err(store_err)?;
            let updated_at = from_rfc3339(&updated_raw).map_err(store_err)?;
            let resolution_ms = status
                .is_terminal()
                .then(|| (updated_at - detected_at).num_milliseconds());
            stats.push(FailureStat {
                repository: row.get(0).map_err(store_err)?,
                category: row.get(1).map_err(store_err)?,
                status,
                detected_at,
                resolution_ms,
            });
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;

    fn new_failure(run_id: &str) -> NewFailure {
        NewFailure {
            repository: "x/y".to_string(),
            branch: "main".to_string(),
            workflow: "build".to_string(),
            workflow_run_id: run_id.to_string(),
            commit_sha: "abc1234".to_string(),
            failure_reason: "npm install timeout".to_string(),
            logs: "logs".to_string(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn insert_get_round_trip() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        let failure = repo.insert(new_failure("1")).unwrap();
        let loaded = repo.get(&failure.id).unwrap().unwrap();
        assert_eq!(loaded, failure);
        assert_eq!(loaded.status, FailureStatus::Detected);
    }

    #[test]
    fn exists_dedupes_on_repo_and_run() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        repo.insert(new_failure("42")).unwrap();
        assert!(repo.exists("x/y", "42").unwrap());
        assert!(!repo.exists("x/y", "43").unwrap());
        assert!(!repo.exists("x/z", "42").unwrap());
    }

    #[test]
    fn duplicate_run_insert_is_rejected() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        repo.insert(new_failure("42")).unwrap();
        assert!(repo.insert(new_failure("42")).is_err());
    }

    #[test]
    fn set_status_updates_reason() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        let failure = repo.insert(new_failure("1")).unwrap();
        let updated = repo
            .set_status(
                &failure.id,
                FailureStatus::Failed,
                Some("circuit_open".to_string()),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(updated.status, FailureStatus::Failed);
        assert_eq!(updated.status_reason.as_deref(), Some("circuit_open"));
    }

    #[test]
    fn list_filters_by_status() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        let first = repo.insert(new_failure("1")).unwrap();
        repo.insert(new_failure("2")).unwrap();
        repo.set_status(&first.id, FailureStatus::Failed, None, Utc::now())
            .unwrap();

        let failed = repo
            .list(FailureFilter {
                status: Some(FailureStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, first.id);
    }

    #[test]
    fn stats_window_exposes_resolution_for_terminal() {
        let conn = Mutex::new(with_test_db().unwrap());
        let repo = FailureRepo::new(&conn);
        let failure = repo.insert(new_failure("1")).unwrap();
        repo.set_status(
            &failure.id,
            FailureStatus::Remediated,
            None,
            failure.detected_at + chrono::Duration::minutes(3),
        )
        .unwrap();

        let stats = repo
            .stats_window(Some("x/y"), failure.detected_at - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].resolution_ms, Some(180_000));
        assert!(stats[0].remediation_succeeded());
    }
}
