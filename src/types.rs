// =============================================================================
// Shared enums used across the sector simulation engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// The three actions a worker agent (via a proposal) or a checklist item can
/// take. Canonical, uppercase — see spec §9 REDESIGN FLAGS: no lowercase
/// `action` alias is modeled anywhere downstream of the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Lifecycle status of a `ChecklistItem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistStatus {
    Pending,
    Approved,
    Rejected,
    ReviseRequired,
    AcceptRejection,
    Resubmitted,
}

impl ChecklistStatus {
    /// Terminal statuses per the glossary: APPROVED (executed), REJECTED,
    /// ACCEPT_REJECTION.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::AcceptRejection)
    }
}

impl std::fmt::Display for ChecklistStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::ReviseRequired => "REVISE_REQUIRED",
            Self::AcceptRejection => "ACCEPT_REJECTION",
            Self::Resubmitted => "RESUBMITTED",
        };
        write!(f, "{s}")
    }
}

/// Discussion state machine status — see `discussion_status` for the
/// authoritative transition function. Only that module may construct a
/// transition between two of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscussionStatus {
    Created,
    InProgress,
    AwaitingExecution,
    Decided,
    Closed,
}

impl DiscussionStatus {
    /// `true` for `Decided`/`Closed` — the only two terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Decided | Self::Closed)
    }

    /// `true` for the three states counted against the per-sector
    /// serial-execution lock.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::InProgress | Self::AwaitingExecution)
    }
}

impl std::fmt::Display for DiscussionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::InProgress => "IN_PROGRESS",
            Self::AwaitingExecution => "AWAITING_EXECUTION",
            Self::Decided => "DECIDED",
            Self::Closed => "CLOSED",
        };
        write!(f, "{s}")
    }
}

/// An agent's role within its sector. Exactly one agent per sector may hold
/// `Manager`; all others are `Worker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Manager,
    Worker(String),
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manager => write!(f, "manager"),
            Self::Worker(style) => write!(f, "worker:{style}"),
        }
    }
}

impl AgentRole {
    pub fn is_manager(&self) -> bool {
        matches!(self, Self::Manager)
    }
}
