pub mod analysis;
pub mod approval;
pub mod audit;
pub mod circuit;
pub mod decision;
pub mod enums;
pub mod failure;
pub mod health;
pub mod ids;
pub mod io;
pub mod pattern;
pub mod profile;
pub mod snapshot;

pub use analysis::{Analysis, FixOperation, FixOperationKind};
pub use approval::ApprovalRequest;
pub use audit::{AuditEntry, AuditFilter};
pub use circuit::{CircuitState, CircuitTransition};
pub use decision::{Alternative, DecisionRecord};
pub use enums::{
    ApprovalStatus, AuditAction, AuditOutcome, CircuitPhase, DecisionKind, Effort,
    EmbeddingFamily, ErrorType, FailureStatus, ImpactLevel, SnapshotStatus,
};
pub use failure::{Failure, FailureStat};
pub use health::{CheckResult, HealthCheck};
pub use ids::{
    ApprovalId, AuditId, CheckId, DecisionId, FailureId, IdError, PatternId, SnapshotId,
};
pub use io::{FailureFilter, NewFailure};
pub use pattern::{Pattern, PatternMatch};
pub use profile::{DetectedPattern, PersonalityProfile, ProfileFlag};
pub use snapshot::{FileRollback, FileSnapshot, RollbackOutcome, Snapshot};
