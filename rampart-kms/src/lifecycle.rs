//! ElasticKey lifecycle state machine.
//!
//! The machine is pure data: a lookup from status to the statuses it may
//! move to. It never touches storage; callers authorise a change here and
//! then persist it in the same transaction.
//!
//! ```text
//! Creating ──→ PendingGenerate ⇄ GenerateFailed
//!     │              │
//!     │              ↓
//!     │           Active ⇄ Disabled
//!     │              │         │
//!     ↓              ↓         ↓
//! PendingImport   PendingDeleteWas… ──→ FinishedDelete
//! ```

use crate::error::KmsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an ElasticKey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyStatus {
    Creating,
    PendingGenerate,
    GenerateFailed,
    PendingImport,
    ImportFailed,
    Active,
    Disabled,
    PendingDeleteWasActive,
    PendingDeleteWasDisabled,
    PendingDeleteWasImportFailed,
    PendingDeleteWasPendingImport,
    PendingDeleteWasGenerateFailed,
    StartedDelete,
    FinishedDelete,
}

impl KeyStatus {
    pub const ALL: [KeyStatus; 14] = [
        KeyStatus::Creating,
        KeyStatus::PendingGenerate,
        KeyStatus::GenerateFailed,
        KeyStatus::PendingImport,
        KeyStatus::ImportFailed,
        KeyStatus::Active,
        KeyStatus::Disabled,
        KeyStatus::PendingDeleteWasActive,
        KeyStatus::PendingDeleteWasDisabled,
        KeyStatus::PendingDeleteWasImportFailed,
        KeyStatus::PendingDeleteWasPendingImport,
        KeyStatus::PendingDeleteWasGenerateFailed,
        KeyStatus::StartedDelete,
        KeyStatus::FinishedDelete,
    ];

    /// The stored (and displayed) form.
    pub fn name(&self) -> &'static str {
        match self {
            KeyStatus::Creating => "creating",
            KeyStatus::PendingGenerate => "pending_generate",
            KeyStatus::GenerateFailed => "generate_failed",
            KeyStatus::PendingImport => "pending_import",
            KeyStatus::ImportFailed => "import_failed",
            KeyStatus::Active => "active",
            KeyStatus::Disabled => "disabled",
            KeyStatus::PendingDeleteWasActive => "pending_delete_was_active",
            KeyStatus::PendingDeleteWasDisabled => "pending_delete_was_disabled",
            KeyStatus::PendingDeleteWasImportFailed => "pending_delete_was_import_failed",
            KeyStatus::PendingDeleteWasPendingImport => "pending_delete_was_pending_import",
            KeyStatus::PendingDeleteWasGenerateFailed => "pending_delete_was_generate_failed",
            KeyStatus::StartedDelete => "started_delete",
            KeyStatus::FinishedDelete => "finished_delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Statuses this one may transition to. `FinishedDelete` is terminal.
    pub fn allowed_transitions(&self) -> &'static [KeyStatus] {
        match self {
            KeyStatus::Creating => &[KeyStatus::PendingGenerate, KeyStatus::PendingImport],
            KeyStatus::PendingImport => &[
                KeyStatus::ImportFailed,
                KeyStatus::Active,
                KeyStatus::PendingDeleteWasPendingImport,
            ],
            KeyStatus::ImportFailed => &[
                KeyStatus::PendingImport,
                KeyStatus::PendingDeleteWasImportFailed,
            ],
            KeyStatus::PendingGenerate => &[KeyStatus::GenerateFailed, KeyStatus::Active],
            KeyStatus::GenerateFailed => &[
                KeyStatus::PendingGenerate,
                KeyStatus::PendingDeleteWasGenerateFailed,
            ],
            KeyStatus::Active => &[KeyStatus::Disabled, KeyStatus::PendingDeleteWasActive],
            KeyStatus::Disabled => &[KeyStatus::Active, KeyStatus::PendingDeleteWasDisabled],
            KeyStatus::PendingDeleteWasActive => {
                &[KeyStatus::Active, KeyStatus::FinishedDelete]
            }
            KeyStatus::PendingDeleteWasDisabled => {
                &[KeyStatus::Disabled, KeyStatus::FinishedDelete]
            }
            KeyStatus::PendingDeleteWasImportFailed => {
                &[KeyStatus::ImportFailed, KeyStatus::FinishedDelete]
            }
            KeyStatus::PendingDeleteWasPendingImport => {
                &[KeyStatus::PendingImport, KeyStatus::FinishedDelete]
            }
            KeyStatus::PendingDeleteWasGenerateFailed => {
                &[KeyStatus::GenerateFailed, KeyStatus::FinishedDelete]
            }
            KeyStatus::StartedDelete => &[KeyStatus::FinishedDelete],
            KeyStatus::FinishedDelete => &[],
        }
    }

    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// The soft-delete target for this status, if deletion is allowed here.
    pub fn pending_delete_status(&self) -> Option<KeyStatus> {
        match self {
            KeyStatus::Active => Some(KeyStatus::PendingDeleteWasActive),
            KeyStatus::Disabled => Some(KeyStatus::PendingDeleteWasDisabled),
            KeyStatus::ImportFailed => Some(KeyStatus::PendingDeleteWasImportFailed),
            KeyStatus::PendingImport => Some(KeyStatus::PendingDeleteWasPendingImport),
            KeyStatus::GenerateFailed => Some(KeyStatus::PendingDeleteWasGenerateFailed),
            _ => None,
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Authorise a status change, or fail with `InvalidTransition`.
pub fn transition(current: KeyStatus, next: KeyStatus) -> Result<(), KmsError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(KmsError::InvalidTransition {
            from: current,
            to: Some(next),
        })
    }
}
