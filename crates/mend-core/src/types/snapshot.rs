use crate::types::enums::SnapshotStatus;
use crate::types::ids::{FailureId, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Pre-edit capture of file bytes, the target of rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub repository: String,
    /// The failure whose remediation this snapshot protects.
    pub remediation_id: FailureId,
    pub branch: String,
    /// Branch the remediation commits land on; rollback writes here.
    pub fix_branch: String,
    pub base_commit_sha: String,
    pub files: Vec<FileSnapshot>,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileSnapshot {
    pub path: String,
    /// sha256 hex of `content` as of `base_commit_sha`.
    pub content_hash: String,
    pub content: String,
    /// sha256 hex of the content the executor wrote; rollback compares the
    /// live file against this to detect third-party edits.
    pub edited_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RollbackOutcome {
    pub snapshot_id: SnapshotId,
    /// False when any file could not be reverted (partial rollback).
    pub complete: bool,
    pub files: Vec<FileRollback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FileRollback {
    pub path: String,
    pub reverted: bool,
    /// Set when the current content hash no longer matched the edit we made.
    pub drifted: bool,
    pub message: String,
}
