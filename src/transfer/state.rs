//! Status Definitions
//!
//! Every status is persisted as SMALLINT via `id()` / `from_id()`.
//!
//! # FTS request lifecycle
//!
//! ```text
//! SUBMITTED ──┬──▶ FINISHED
//!             ├──▶ FINISHED_DIRTY
//!             ├──▶ FAILED
//!             └──▶ CANCELED
//! ```
//!
//! Terminal requests are deleted once their files have been processed.
//!
//! # Catalog registration
//!
//! ```text
//! WAITING ──▶ EXECUTING ──▶ WAITING ──▶ DONE
//! ```
//!
//! `DONE` is only reachable from `WAITING`.

use serde::Serialize;
use std::fmt;

/// Channel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum ChannelStatus {
    Active = 1,
    Inactive = 2,
}

impl ChannelStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ChannelStatus::Active),
            2 => Some(ChannelStatus::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Active => "ACTIVE",
            ChannelStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a file queued on a channel
///
/// A `Waiting` entry may additionally be gated on an ancestor channel; the
/// gate lives in `QueueEntry::ancestor_channel`, not in the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum QueueStatus {
    Waiting = 0,
    Executing = 10,
}

impl QueueStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(QueueStatus::Waiting),
            10 => Some(QueueStatus::Executing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "WAITING",
            QueueStatus::Executing => "EXECUTING",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// FTS request status
///
/// Terminal states: FINISHED (40), FINISHED_DIRTY (30), FAILED (-10), CANCELED (-20)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum FtsStatus {
    /// Handed to FTS, being monitored
    Submitted = 0,

    /// Terminal: some files succeeded, some failed
    FinishedDirty = 30,

    /// Terminal: all files succeeded
    Finished = 40,

    /// Terminal: the job failed as a whole
    Failed = -10,

    /// Terminal: the job was canceled on the FTS side
    Canceled = -20,
}

impl FtsStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FtsStatus::Submitted)
    }

    /// Whether `self -> next` is a legal move
    ///
    /// Re-asserting the current status is allowed so the monitor loop can
    /// write back what it observed without checking first.
    pub fn can_transition_to(&self, next: FtsStatus) -> bool {
        *self == next || *self == FtsStatus::Submitted
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(FtsStatus::Submitted),
            30 => Some(FtsStatus::FinishedDirty),
            40 => Some(FtsStatus::Finished),
            -10 => Some(FtsStatus::Failed),
            -20 => Some(FtsStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FtsStatus::Submitted => "SUBMITTED",
            FtsStatus::FinishedDirty => "FINISHED_DIRTY",
            FtsStatus::Finished => "FINISHED",
            FtsStatus::Failed => "FAILED",
            FtsStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for FtsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for FtsStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        FtsStatus::from_id(value).ok_or(())
    }
}

/// Per-file outcome inside an FTS request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum AssignmentStatus {
    Submitted = 0,
    Completed = 40,
    Failed = -10,
}

impl AssignmentStatus {
    #[inline]
    pub fn is_outcome(&self) -> bool {
        !matches!(self, AssignmentStatus::Submitted)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(AssignmentStatus::Submitted),
            40 => Some(AssignmentStatus::Completed),
            -10 => Some(AssignmentStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Submitted => "SUBMITTED",
            AssignmentStatus::Completed => "COMPLETED",
            AssignmentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum RegistrationStatus {
    Waiting = 0,
    Executing = 10,
    Done = 40,
}

impl RegistrationStatus {
    /// The single status a move to `next` may start from
    pub fn required_predecessor(next: RegistrationStatus) -> RegistrationStatus {
        match next {
            RegistrationStatus::Executing => RegistrationStatus::Waiting,
            RegistrationStatus::Waiting => RegistrationStatus::Executing,
            RegistrationStatus::Done => RegistrationStatus::Waiting,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RegistrationStatus::Waiting),
            10 => Some(RegistrationStatus::Executing),
            40 => Some(RegistrationStatus::Done),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Waiting => "WAITING",
            RegistrationStatus::Executing => "EXECUTING",
            RegistrationStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_terminal_states() {
        assert!(!FtsStatus::Submitted.is_terminal());
        assert!(FtsStatus::Finished.is_terminal());
        assert!(FtsStatus::FinishedDirty.is_terminal());
        assert!(FtsStatus::Failed.is_terminal());
        assert!(FtsStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_fts_transitions() {
        assert!(FtsStatus::Submitted.can_transition_to(FtsStatus::Finished));
        assert!(FtsStatus::Submitted.can_transition_to(FtsStatus::Canceled));
        assert!(FtsStatus::Finished.can_transition_to(FtsStatus::Finished));
        assert!(!FtsStatus::Finished.can_transition_to(FtsStatus::Submitted));
        assert!(!FtsStatus::Failed.can_transition_to(FtsStatus::Finished));
    }

    #[test]
    fn test_fts_state_ids() {
        for state in [
            FtsStatus::Submitted,
            FtsStatus::FinishedDirty,
            FtsStatus::Finished,
            FtsStatus::Failed,
            FtsStatus::Canceled,
        ] {
            assert_eq!(FtsStatus::from_id(state.id()), Some(state));
        }
        assert!(FtsStatus::from_id(999).is_none());
    }

    #[test]
    fn test_registration_done_only_from_waiting() {
        assert_eq!(
            RegistrationStatus::required_predecessor(RegistrationStatus::Done),
            RegistrationStatus::Waiting
        );
        assert_eq!(
            RegistrationStatus::required_predecessor(RegistrationStatus::Executing),
            RegistrationStatus::Waiting
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelStatus::Active.to_string(), "ACTIVE");
        assert_eq!(QueueStatus::Executing.to_string(), "EXECUTING");
        assert_eq!(FtsStatus::FinishedDirty.to_string(), "FINISHED_DIRTY");
        assert_eq!(AssignmentStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(RegistrationStatus::Done.to_string(), "DONE");
    }
}
