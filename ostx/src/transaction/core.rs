use crate::common::ModuleKind;
use crate::errors::{ErrorKind, OstxError, OstxResult};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Unique identity of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a transaction.
///
/// ```text
/// Active -> Locked -> Validating -> Applying -> Finishing -> Released
///    |                    |                        ^
///    +----------------> Undoing -------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransactionPhase {
    /// Body is running, wrappers may register modules and append records
    Active,
    /// Every participant holds its resource locks
    Locked,
    /// Snapshots are being compared against live versions
    Validating,
    /// Deferred effects are being performed
    Applying,
    /// Speculative effects are being reverted
    Undoing,
    /// Outcome-independent cleanup
    Finishing,
    /// Terminal, every participant has been released
    Released,
}

impl TransactionPhase {
    pub fn can_advance_to(&self, next: TransactionPhase) -> bool {
        use TransactionPhase::*;
        matches!(
            (self, next),
            (Active, Locked)
                | (Active, Undoing)
                | (Locked, Validating)
                | (Validating, Applying)
                | (Validating, Undoing)
                | (Applying, Finishing)
                | (Undoing, Finishing)
                | (Finishing, Released)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == TransactionPhase::Released
    }
}

impl Display for TransactionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionPhase::Active => "ACTIVE",
            TransactionPhase::Locked => "LOCKED",
            TransactionPhase::Validating => "VALIDATING",
            TransactionPhase::Applying => "APPLYING",
            TransactionPhase::Undoing => "UNDOING",
            TransactionPhase::Finishing => "FINISHING",
            TransactionPhase::Released => "RELEASED",
        };
        write!(f, "{}", name)
    }
}

/// Why a transaction did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AbortReason {
    /// A snapshot was invalidated by a concurrent commit
    ValidationFailed,
    /// A resource lock could not be acquired in time
    LockFailed,
    /// A module failed with the given code
    ModuleError(i32),
    /// The application aborted the transaction
    Requested,
}

impl AbortReason {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AbortReason::ValidationFailed | AbortReason::LockFailed)
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            AbortReason::ValidationFailed => ErrorKind::ValidationConflict,
            AbortReason::LockFailed => ErrorKind::ResourceBusy,
            AbortReason::ModuleError(_) => ErrorKind::ModuleInternalError,
            AbortReason::Requested => ErrorKind::InvalidOperation,
        }
    }
}

impl Display for AbortReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ValidationFailed => write!(f, "VALIDATION_FAILED"),
            AbortReason::LockFailed => write!(f, "LOCK_FAILED"),
            AbortReason::ModuleError(code) => write!(f, "MODULE_ERROR({})", code),
            AbortReason::Requested => write!(f, "REQUESTED"),
        }
    }
}

/// Final result of [`Transaction::commit`](crate::transaction::Transaction::commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommitOutcome {
    Committed,
    Aborted(AbortReason),
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        *self == CommitOutcome::Committed
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            CommitOutcome::Committed => None,
            CommitOutcome::Aborted(reason) => Some(*reason),
        }
    }

    /// Converts an abort into an error of the matching kind.
    pub fn into_result(self) -> OstxResult<()> {
        match self {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::Aborted(reason) => Err(OstxError::new(
                &format!("Transaction aborted: {}", reason),
                reason.error_kind(),
            )),
        }
    }
}

impl Display for CommitOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitOutcome::Committed => write!(f, "COMMITTED"),
            CommitOutcome::Aborted(reason) => write!(f, "ABORTED({})", reason),
        }
    }
}

/// Returned by module registration. Identifies the participant within its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantHandle {
    transaction: TransactionId,
    kind: ModuleKind,
}

impl ParticipantHandle {
    pub(crate) fn new(transaction: TransactionId, kind: ModuleKind) -> Self {
        ParticipantHandle { transaction, kind }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionPhase::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_commit_path_transitions() {
        assert!(Active.can_advance_to(Locked));
        assert!(Locked.can_advance_to(Validating));
        assert!(Validating.can_advance_to(Applying));
        assert!(Applying.can_advance_to(Finishing));
        assert!(Finishing.can_advance_to(Released));
    }

    #[test]
    fn test_abort_path_transitions() {
        assert!(Active.can_advance_to(Undoing));
        assert!(Validating.can_advance_to(Undoing));
        assert!(Undoing.can_advance_to(Finishing));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Active.can_advance_to(Applying));
        assert!(!Locked.can_advance_to(Applying));
        assert!(!Applying.can_advance_to(Undoing));
        assert!(!Released.can_advance_to(Active));
        assert!(!Finishing.can_advance_to(Active));
        assert!(Released.is_terminal());
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(CommitOutcome::Committed.into_result().is_ok());

        let err = CommitOutcome::Aborted(AbortReason::ValidationFailed)
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationConflict);
        assert!(err.is_retryable());

        let err = CommitOutcome::Aborted(AbortReason::ModuleError(32))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ModuleInternalError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CommitOutcome::Committed.to_string(), "COMMITTED");
        assert_eq!(
            CommitOutcome::Aborted(AbortReason::ModuleError(5)).to_string(),
            "ABORTED(MODULE_ERROR(5))"
        );
        assert_eq!(
            CommitOutcome::Aborted(AbortReason::LockFailed).to_string(),
            "ABORTED(LOCK_FAILED)"
        );
    }
}
