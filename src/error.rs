use crate::transaction::TransactionId;
use thiserror::Error;

pub type ChalkResult<T, E = ChalkError> = Result<T, E>;

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            AbortReason::LockOnShrinking => "lock requested in shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read uncommitted"
            }
            AbortReason::UpgradeConflict => "conflicting lock upgrade",
            AbortReason::Deadlock => "deadlock victim",
        };
        write!(f, "{reason}")
    }
}

#[derive(Debug, Error)]
pub enum ChalkError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAbort {
        txn_id: TransactionId,
        reason: AbortReason,
    },

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}
