use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use mend_core::error::SnapshotError;
use mend_core::snapshot::SnapshotRepository;
use mend_core::types::{FailureId, Snapshot, SnapshotId, SnapshotStatus};
use rusqlite::{Connection, Row};
use std::sync::{Mutex, MutexGuard};

pub struct SnapshotRepo<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> SnapshotRepo<'a> {
    pub fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection poisoned")
    }
}

fn store_err(err: impl std::fmt::Display) -> SnapshotError {
    SnapshotError::Store {
        message: err.to_string(),
    }
}

const COLUMNS: &str = "id, repository, remediation_id, branch, fix_branch, base_commit_sha, \
                       files, status, created_at, expires_at";

fn map_snapshot_row(row: &Row<'_>) -> Result<Snapshot, SnapshotError> {
    let id: String = row.get(0).map_err(store_err)?;
    let remediation_id: String = row.get(2).map_err(store_err)?;
    let files: String = row.get(6).map_err(store_err)?;
    let status: String = row.get(7).map_err(store_err)?;
    let created_at: String = row.get(8).map_err(store_err)?;
    let expires_at: String = row.get(9).map_err(store_err)?;
    Ok(Snapshot {
        id: SnapshotId::new(id).map_err(store_err)?,
        repository: row.get(1).map_err(store_err)?,
        remediation_id: FailureId::new(remediation_id).map_err(store_err)?,
        branch: row.get(3).map_err(store_err)?,
        fix_branch: row.get(4).map_err(store_err)?,
        base_commit_sha: row.get(5).map_err(store_err)?,
        files: decode_json(&files).map_err(store_err)?,
        status: decode_enum(&status).map_err(store_err)?,
        created_at: from_rfc3339(&created_at).map_err(store_err)?,
        expires_at: from_rfc3339(&expires_at).map_err(store_err)?,
    })
}

impl<'a> SnapshotRepository for SnapshotRepo<'a> {
    fn insert(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.conn()
            .execute(
                "INSERT INTO snapshots (id, repository, remediation_id, branch, fix_branch, \
                 base_commit_sha, files, status, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                (
                    snapshot.id.as_str(),
                    &snapshot.repository,
                    snapshot.remediation_id.as_str(),
                    &snapshot.branch,
                    &snapshot.fix_branch,
                    &snapshot.base_commit_sha,
                    encode_json(&snapshot.files).map_err(store_err)?,
                    encode_enum(&snapshot.status).map_err(store_err)?,
                    to_rfc3339(&snapshot.created_at),
                    to_rfc3339(&snapshot.expires_at),
                ),
            )
            .map_err(store_err)?;
        Ok(())
    }

    fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>, SnapshotError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM snapshots WHERE id = ?1"))
            .map_err(store_err)?;
        let mut rows = stmt.query([id.as_str()]).map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_snapshot_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn active_for_remediation(
        &self,
        remediation_id: &FailureId,
    ) -> Result<Option<Snapshot>, SnapshotError> {
        let active = encode_enum(&SnapshotStatus::Active).map_err(store_err)?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM snapshots WHERE remediation_id = ?1 AND status = ?2 \
                 ORDER BY created_at DESC LIMIT 1"
            ))
            .map_err(store_err)?;
        let mut rows = stmt
            .query((remediation_id.as_str(), active))
            .map_err(store_err)?;
        match rows.next().map_err(store_err)? {
            Some(row) => map_snapshot_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn update(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE snapshots SET files = ?2, status = ?3 WHERE id = ?1",
                (
                    snapshot.id.as_str(),
                    encode_json(&snapshot.files).map_err(store_err)?,
                    encode_enum(&snapshot.status).map_err(store_err)?,
                ),
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(SnapshotError::NotFound);
        }
        Ok(())
    }

    fn set_status(&self, id: &SnapshotId, status: SnapshotStatus) -> Result<(), SnapshotError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE snapshots SET status = ?2 WHERE id = ?1",
                (id.as_str(), encode_enum(&status).map_err(store_err)?),
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(SnapshotError::NotFound);
        }
        Ok(())
    }

    fn expired(&self, now: DateTime<Utc>) -> Result<Vec<SnapshotId>, SnapshotError> {
        let active = encode_enum(&SnapshotStatus::Active).map_err(store_err)?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id FROM snapshots WHERE status = ?1 AND expires_at < ?2")
            .map_err(store_err)?;
        let mut rows = stmt
            .query((active, to_rfc3339(&now)))
            .map_err(store_err)?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().map_err(store_err)? {
            let raw: String = row.get(0).map_err(store_err)?;
            ids.push(SnapshotId::new(raw).map_err(store_err)?);
        }
        Ok(ids)
    }

    fn delete(&self, id: &SnapshotId) -> Result<(), SnapshotError> {
        self.conn()
            .execute("DELETE FROM snapshots WHERE id = ?1", [id.as_str()])
            .map_err(store_err)?;
        Ok(())
    }
}
