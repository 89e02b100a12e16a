use crate::approval::ApprovalRepository;
use crate::audit::AuditRepository;
use crate::circuit::CircuitRepository;
use crate::classify::AnalysisRepository;
use crate::decisions::DecisionRepository;
use crate::error::MendError;
use crate::failures::FailureRepository;
use crate::health::HealthCheckRepository;
use crate::memory::PatternRepository;
use crate::snapshot::SnapshotRepository;

/// Durable record access. The store is the only cross-task mutable resource;
/// every write in the system goes through one of these repositories.
pub trait Store {
    type Failures<'a>: FailureRepository
    where
        Self: 'a;
    type Analyses<'a>: AnalysisRepository
    where
        Self: 'a;
    type Decisions<'a>: DecisionRepository
    where
        Self: 'a;
    type Circuits<'a>: CircuitRepository
    where
        Self: 'a;
    type Snapshots<'a>: SnapshotRepository
    where
        Self: 'a;
    type HealthChecks<'a>: HealthCheckRepository
    where
        Self: 'a;
    type Approvals<'a>: ApprovalRepository
    where
        Self: 'a;
    type Patterns<'a>: PatternRepository
    where
        Self: 'a;
    type Audit<'a>: AuditRepository
    where
        Self: 'a;

    fn failures(&self) -> Self::Failures<'_>;
    fn analyses(&self) -> Self::Analyses<'_>;
    fn decisions(&self) -> Self::Decisions<'_>;
    fn circuits(&self) -> Self::Circuits<'_>;
    fn snapshots(&self) -> Self::Snapshots<'_>;
    fn health_checks(&self) -> Self::HealthChecks<'_>;
    fn approvals(&self) -> Self::Approvals<'_>;
    fn patterns(&self) -> Self::Patterns<'_>;
    fn audit(&self) -> Self::Audit<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, MendError>
    where
        F: FnOnce(&Self) -> Result<T, MendError>;
}
