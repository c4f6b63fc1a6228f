//! Ticket store and the other persistence seams the escalation engine uses.
//!
//! Every ticket mutation goes through a version-checked conditional write.
//! `RedbStore` is the on-disk implementation; `MemoryStore` holds the same
//! semantics in process for embedding and tests.

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::notify::{NotificationRequest, QueuedNotification};
use crate::run::RunReport;
use crate::ticket::{NewTicket, Ticket, TicketId, TierChange};
use crate::types::{TicketStatus, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Conditional write outcome
// ---------------------------------------------------------------------------

/// Why a tier change was refused. Conflicts are expected, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictReason {
    VersionChanged { expected: u64, found: u64 },
    TerminalStatus { status: TicketStatus },
    TierAdvanced { current: Tier, target: Tier },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::VersionChanged { expected, found } => {
                write!(f, "version changed (expected {expected}, found {found})")
            }
            ConflictReason::TerminalStatus { status } => write!(f, "ticket is {status}"),
            ConflictReason::TierAdvanced { current, target } => {
                write!(f, "tier already {current}, target was {target}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum CasOutcome {
    Applied(Ticket),
    Conflict(ConflictReason),
}

/// Check whether `change` may still be applied to `ticket` as last read at
/// `expected_version`. Shared by the executor's pre-read and every store's
/// conditional write so both sides agree on what a conflict is.
pub fn check_change(ticket: &Ticket, expected_version: u64, target: Tier) -> Option<ConflictReason> {
    if ticket.status.is_terminal() {
        return Some(ConflictReason::TerminalStatus {
            status: ticket.status,
        });
    }
    if ticket.version != expected_version {
        return Some(ConflictReason::VersionChanged {
            expected: expected_version,
            found: ticket.version,
        });
    }
    if ticket.tier >= target {
        return Some(ConflictReason::TierAdvanced {
            current: ticket.tier,
            target,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// TicketStore
// ---------------------------------------------------------------------------

pub trait TicketStore: Send + Sync {
    /// Insert a ticket in OPEN/L1, assigning the next id.
    fn insert(&self, new: NewTicket) -> Result<Ticket>;

    fn get(&self, id: TicketId) -> Result<Ticket>;

    /// All tickets, ordered by id.
    fn list(&self) -> Result<Vec<Ticket>>;

    /// Tickets with status OPEN or IN_PROGRESS and tier below `max_tier`.
    fn list_escalation_candidates(&self, max_tier: Tier) -> Result<Vec<Ticket>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|t| t.is_candidate(max_tier))
            .collect())
    }

    /// Apply `change` only if the stored ticket is still at `expected_version`,
    /// non-terminal, and below the target tier. All-or-nothing.
    fn compare_and_set_tier(
        &self,
        id: TicketId,
        expected_version: u64,
        change: &TierChange,
    ) -> Result<CasOutcome>;

    /// Status change by an agent or customer. Bumps the version.
    fn set_status(&self, id: TicketId, status: TicketStatus, now: DateTime<Utc>) -> Result<Ticket>;
}

// ---------------------------------------------------------------------------
// RunLease
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGrant {
    Acquired(Lease),
    Held(Lease),
}

impl Lease {
    /// Decide whether `holder` may take the lease given the `current` one.
    pub(crate) fn grant(
        current: Option<Lease>,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> LeaseGrant {
        match current {
            Some(lease) if lease.holder != holder && lease.expires_at > now => {
                LeaseGrant::Held(lease)
            }
            _ => LeaseGrant::Acquired(Lease {
                holder,
                acquired_at: now,
                expires_at: now
                    .checked_add_signed(ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            }),
        }
    }
}

/// Single-run guard. Expiry makes a crashed holder harmless.
pub trait RunLease: Send + Sync {
    fn try_acquire(
        &self,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LeaseGrant>;

    /// Release the lease if `holder` still owns it.
    fn release(&self, holder: Uuid) -> Result<()>;
}

// ---------------------------------------------------------------------------
// NotificationQueue / RunLog
// ---------------------------------------------------------------------------

/// Outbox the executor writes to and the fan-out drains.
pub trait NotificationQueue: Send + Sync {
    fn enqueue(&self, request: &NotificationRequest, now: DateTime<Utc>) -> Result<QueuedNotification>;

    /// Entries still awaiting delivery, oldest first.
    fn pending(&self) -> Result<Vec<QueuedNotification>>;

    /// Store the entry's delivery state. A `done` entry is removed.
    fn update(&self, entry: &QueuedNotification) -> Result<()>;
}

pub trait RunLog: Send + Sync {
    fn record(&self, report: &RunReport) -> Result<()>;

    /// Drop all but the `keep` most recent reports. Returns how many went.
    fn prune(&self, keep: usize) -> Result<usize>;

    /// Most recent reports first.
    fn recent(&self, limit: usize) -> Result<Vec<RunReport>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
