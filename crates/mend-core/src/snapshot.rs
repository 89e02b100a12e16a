//! Pre-edit snapshots and rollback. Bytes and hashes are captured as of the
//! base commit before any write; rollback validates hashes and reports
//! per-file outcomes.

use crate::clock::Clock;
use crate::decisions::hex_lower;
use crate::dryrun::DryRunRecorder;
use crate::error::{SnapshotError, VcsError};
use crate::types::{
    FailureId, FileRollback, FileSnapshot, RollbackOutcome, Snapshot, SnapshotId, SnapshotStatus,
};
use crate::vcs::VcsClient;
use chrono::Duration as ChronoDuration;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};

pub trait SnapshotRepository {
    fn insert(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;
    fn get(&self, id: &SnapshotId) -> Result<Option<Snapshot>, SnapshotError>;
    /// The active snapshot protecting one remediation, if any.
    fn active_for_remediation(
        &self,
        remediation_id: &FailureId,
    ) -> Result<Option<Snapshot>, SnapshotError>;
    fn update(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;
    fn set_status(&self, id: &SnapshotId, status: SnapshotStatus) -> Result<(), SnapshotError>;
    /// Active snapshots whose expiry has passed.
    fn expired(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<SnapshotId>, SnapshotError>;
    fn delete(&self, id: &SnapshotId) -> Result<(), SnapshotError>;
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_lower(&hasher.finalize())
}

pub struct SnapshotManager {
    vcs: Arc<dyn VcsClient>,
    clock: Arc<dyn Clock>,
    retention: ChronoDuration,
    dry_run: Option<Arc<DryRunRecorder>>,
}

impl SnapshotManager {
    pub fn new(
        vcs: Arc<dyn VcsClient>,
        clock: Arc<dyn Clock>,
        retention_days: u64,
        dry_run: Option<Arc<DryRunRecorder>>,
    ) -> Self {
        Self {
            vcs,
            clock,
            retention: ChronoDuration::days(retention_days as i64),
            dry_run,
        }
    }

    /// Capture the pre-change bytes of every file the remediation will touch.
    /// Transport failures abort the remediation; files that do not exist yet
    /// are simply absent from the snapshot (they will be created, and
    /// rollback has nothing to restore).
    #[allow(clippy::too_many_arguments)]
    pub async fn capture<R: SnapshotRepository>(
        &self,
        repo: &R,
        repository: &str,
        remediation_id: &FailureId,
        branch: &str,
        fix_branch: &str,
        base_commit_sha: &str,
        files: &[String],
    ) -> Result<Snapshot, SnapshotError> {
        let mut captured = Vec::new();
        for path in files {
            match self.vcs.get_file(repository, path, base_commit_sha).await {
                Ok(Some(file)) => {
                    captured.push(FileSnapshot {
                        path: path.clone(),
                        content_hash: content_hash(&file.content),
                        content: file.content,
                        edited_hash: None,
                    });
                }
                Ok(None) => {
                    info!(path, "file absent at base commit, snapshot records nothing");
                }
                Err(err) => {
                    return Err(SnapshotError::CaptureFailed {
                        path: path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let now = self.clock.now();
        let snapshot = Snapshot {
            id: SnapshotId::generate(),
            repository: repository.to_string(),
            remediation_id: remediation_id.clone(),
            branch: branch.to_string(),
            fix_branch: fix_branch.to_string(),
            base_commit_sha: base_commit_sha.to_string(),
            files: captured,
            status: SnapshotStatus::Active,
            created_at: now,
            expires_at: now + self.retention,
        };
        repo.insert(&snapshot)?;
        info!(
            snapshot_id = %snapshot.id,
            repository,
            files = snapshot.files.len(),
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// Record the post-edit hash for a path so rollback can tell our edits
    /// from third-party ones.
    pub fn mark_edited<R: SnapshotRepository>(
        &self,
        repo: &R,
        snapshot: &mut Snapshot,
        path: &str,
        new_content: &str,
    ) -> Result<(), SnapshotError> {
        if let Some(file) = snapshot.files.iter_mut().find(|f| f.path == path) {
            file.edited_hash = Some(content_hash(new_content));
            repo.update(snapshot)?;
        }
        Ok(())
    }

    /// Write the captured bytes back in new commits on the fix branch. Files
    /// whose live content matches neither our edit nor the snapshot are
    /// still reverted, but the outcome is flagged partial.
    pub async fn rollback<R: SnapshotRepository>(
        &self,
        repo: &R,
        snapshot_id: &SnapshotId,
        fix_branch: &str,
    ) -> Result<RollbackOutcome, SnapshotError> {
        let snapshot = repo.get(snapshot_id)?.ok_or(SnapshotError::NotFound)?;
        if snapshot.status != SnapshotStatus::Active {
            return Err(SnapshotError::NotActive {
                status: format!("{:?}", snapshot.status),
            });
        }

        let mut files = Vec::new();
        let mut complete = true;
        for file in &snapshot.files {
            let outcome = self
                .rollback_file(&snapshot.repository, fix_branch, snapshot_id, file)
                .await;
            if !outcome.reverted || outcome.drifted {
                complete = false;
            }
            files.push(outcome);
        }

        repo.set_status(snapshot_id, SnapshotStatus::RolledBack)?;
        if complete {
            info!(snapshot_id = %snapshot_id, files = files.len(), "rollback complete");
        } else {
            warn!(snapshot_id = %snapshot_id, "partial rollback, see per-file outcomes");
        }
        Ok(RollbackOutcome {
            snapshot_id: snapshot_id.clone(),
            complete,
            files,
        })
    }

    async fn rollback_file(
        &self,
        repository: &str,
        fix_branch: &str,
        snapshot_id: &SnapshotId,
        file: &FileSnapshot,
    ) -> FileRollback {
        let current = match self.vcs.get_file(repository, &file.path, fix_branch).await {
            Ok(current) => current,
            Err(err) => {
                error!(path = %file.path, error = %err, "rollback read failed");
                return FileRollback {
                    path: file.path.clone(),
                    reverted: false,
                    drifted: false,
                    message: format!("read failed: {err}"),
                };
            }
        };

        let (current_sha, drifted) = match &current {
            Some(live) => {
                let live_hash = content_hash(&live.content);
                if live_hash == file.content_hash {
                    return FileRollback {
                        path: file.path.clone(),
                        reverted: true,
                        drifted: false,
                        message: "already matches snapshot".to_string(),
                    };
                }
                let drifted = file
                    .edited_hash
                    .as_deref()
                    .map(|edited| edited != live_hash)
                    .unwrap_or(false);
                (Some(live.sha.clone()), drifted)
            }
            None => (None, true),
        };

        let message = format!(
            "revert {} to snapshot {}",
            file.path,
            &snapshot_id.as_str()[..SnapshotId::PREFIX.len() + 8]
        );
        let write = self
            .put_file(
                repository,
                &file.path,
                &file.content,
                &message,
                fix_branch,
                current_sha.as_deref(),
            )
            .await;
        match write {
            Ok(()) => FileRollback {
                path: file.path.clone(),
                reverted: true,
                drifted,
                message: if drifted {
                    "reverted over third-party edit".to_string()
                } else {
                    "reverted".to_string()
                },
            },
            Err(err) => {
                error!(path = %file.path, error = %err, "rollback write failed");
                FileRollback {
                    path: file.path.clone(),
                    reverted: false,
                    drifted,
                    message: format!("write failed: {err}"),
                }
            }
        }
    }

    async fn put_file(
        &self,
        repository: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        sha: Option<&str>,
    ) -> Result<(), VcsError> {
        if let Some(recorder) = &self.dry_run {
            recorder.record("put_file", &format!("{repository}:{path}"), content);
            return Ok(());
        }
        self.vcs
            .put_file(repository, path, content, message, branch, sha)
            .await
    }

    /// Daily cleanup: mark expired snapshots and drop their payloads.
    pub fn cleanup_expired<R: SnapshotRepository>(&self, repo: &R) -> Result<usize, SnapshotError> {
        let now = self.clock.now();
        let expired = repo.expired(now)?;
        for id in &expired {
            repo.set_status(id, SnapshotStatus::Expired)?;
            repo.delete(id)?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired snapshots cleaned up");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_sha256_hex() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
