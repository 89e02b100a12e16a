use mend_core::error::MendError;
use mend_core::store::Store;
use rusqlite::Connection;
use std::sync::Mutex;

use crate::analysis_repo::AnalysisRepo;
use crate::approval_repo::ApprovalRepo;
use crate::audit_repo::AuditRepo;
use crate::circuit_repo::CircuitRepo;
use crate::decision_repo::DecisionRepo;
use crate::failure_repo::FailureRepo;
use crate::health_repo::HealthRepo;
use crate::pattern_repo::PatternRepo;
use crate::snapshot_repo::SnapshotRepo;

/// The connection is mutex-wrapped so the store can be shared with the
/// async control loop; each repository method holds the lock only for the
/// duration of its statements.
pub struct DbStore {
    conn: Mutex<Connection>,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl Store for DbStore {
    type Failures<'a>
        = FailureRepo<'a>
    where
        Self: 'a;
    type Analyses<'a>
        = AnalysisRepo<'a>
    where
        Self: 'a;
    type Decisions<'a>
        = DecisionRepo<'a>
    where
        Self: 'a;
    type Circuits<'a>
        = CircuitRepo<'a>
    where
        Self: 'a;
    type Snapshots<'a>
        = SnapshotRepo<'a>
    where
        Self: 'a;
    type HealthChecks<'a>
        = HealthRepo<'a>
    where
        Self: 'a;
    type Approvals<'a>
        = ApprovalRepo<'a>
    where
        Self: 'a;
    type Patterns<'a>
        = PatternRepo<'a>
    where
        Self: 'a;
    type Audit<'a>
        = AuditRepo<'a>
    where
        Self: 'a;

    fn failures(&self) -> Self::Failures<'_> {
        FailureRepo::new(&self.conn)
    }

    fn analyses(&self) -> Self::Analyses<'_> {
        AnalysisRepo::new(&self.conn)
    }

    fn decisions(&self) -> Self::Decisions<'_> {
        DecisionRepo::new(&self.conn)
    }

    fn circuits(&self) -> Self::Circuits<'_> {
        CircuitRepo::new(&self.conn)
    }

    fn snapshots(&self) -> Self::Snapshots<'_> {
        SnapshotRepo::new(&self.conn)
    }

    fn health_checks(&self) -> Self::HealthChecks<'_> {
        HealthRepo::new(&self.conn)
    }

    fn approvals(&self) -> Self::Approvals<'_> {
        ApprovalRepo::new(&self.conn)
    }

    fn patterns(&self) -> Self::Patterns<'_> {
        PatternRepo::new(&self.conn)
    }

    fn audit(&self) -> Self::Audit<'_> {
        AuditRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, MendError>
    where
        F: FnOnce(&Self) -> Result<T, MendError>,
    {
        let batch = |sql: &str| -> Result<(), MendError> {
            self.conn
                .lock()
                .expect("connection poisoned")
                .execute_batch(sql)
                .map_err(|err| MendError::Internal {
                    message: err.to_string(),
                })
        };
        batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                let _ = batch("ROLLBACK");
                Err(err)
            }
        }
    }
}
