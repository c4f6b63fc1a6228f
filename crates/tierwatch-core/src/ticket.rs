//! Ticket record and its append-only escalation history.
//!
//! Tickets are created elsewhere in OPEN/L1. This crate only ever advances
//! `tier`, `tier_changed_at`, `version`, `manual_review` and `history`, and it
//! does so exclusively through a [`TierChange`] applied by a store's
//! conditional write.

use crate::types::{format_secs, Priority, TicketStatus, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TicketId = u64;

// ---------------------------------------------------------------------------
// EscalationReason / EscalationEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The ticket dwelt at its tier for at least the policy threshold.
    ElapsedBreach {
        priority: Priority,
        threshold_secs: i64,
        elapsed_secs: i64,
    },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::ElapsedBreach {
                priority,
                threshold_secs,
                elapsed_secs,
            } => write!(
                f,
                "{priority} ticket waited {} (threshold {})",
                format_secs(*elapsed_secs),
                format_secs(*threshold_secs)
            ),
        }
    }
}

/// One recorded tier advance. Immutable once appended to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub ticket_id: TicketId,
    pub from: Tier,
    pub to: Tier,
    pub at: DateTime<Utc>,
    pub reason: EscalationReason,
}

/// Everything a conditional tier write needs to apply atomically.
#[derive(Debug, Clone)]
pub struct TierChange {
    pub event: EscalationEvent,
    /// Set when `event.to` is the configured max tier.
    pub manual_review: bool,
}

// ---------------------------------------------------------------------------
// NewTicket / Ticket
// ---------------------------------------------------------------------------

/// Fields supplied by the submission flow; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub category: String,
    pub priority: Priority,
    pub customer: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub subject: String,
    /// Owning department, e.g. `billing`. Selects tier owners.
    pub category: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub tier: Tier,
    /// Contact address of the customer who raised the ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_changed_at: Option<DateTime<Utc>>,
    pub version: u64,
    #[serde(default)]
    pub manual_review: bool,
    #[serde(default)]
    pub history: Vec<EscalationEvent>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(id: TicketId, new: NewTicket) -> Self {
        Self {
            id,
            subject: new.subject,
            category: new.category,
            priority: new.priority,
            status: TicketStatus::Open,
            tier: Tier::L1,
            customer: new.customer,
            created_at: new.created_at,
            tier_changed_at: None,
            version: 1,
            manual_review: false,
            history: Vec::new(),
            updated_at: new.created_at,
        }
    }

    /// Start of the current dwell period at this tier.
    pub fn aging_since(&self) -> DateTime<Utc> {
        self.tier_changed_at.unwrap_or(self.created_at)
    }

    pub fn last_escalation(&self) -> Option<&EscalationEvent> {
        self.history.last()
    }

    /// True when the ticket is still eligible for automatic escalation.
    pub fn is_candidate(&self, max_tier: Tier) -> bool {
        !self.status.is_terminal() && self.tier < max_tier
    }

    /// Apply a tier change in place. Callers must have verified the version.
    pub(crate) fn apply(&mut self, change: &TierChange) {
        let event = &change.event;
        self.tier = event.to;
        self.tier_changed_at = Some(event.at);
        self.version += 1;
        self.manual_review |= change.manual_review;
        self.updated_at = event.at;
        self.history.push(event.clone());
    }

    /// External actor mutation (agent picks it up, customer confirms, ...).
    pub(crate) fn set_status(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        self.status = status;
        self.version += 1;
        self.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> Ticket {
        Ticket::new(
            7,
            NewTicket {
                subject: "Refund missing".into(),
                category: "billing".into(),
                priority: Priority::High,
                customer: Some("cust@example.com".into()),
                created_at: now - Duration::hours(3),
            },
        )
    }

    #[test]
    fn new_ticket_is_open_at_l1() {
        let now = Utc::now();
        let t = sample(now);
        assert_eq!(t.status, TicketStatus::Open);
        assert_eq!(t.tier, Tier::L1);
        assert_eq!(t.version, 1);
        assert_eq!(t.aging_since(), t.created_at);
        assert!(t.is_candidate(Tier::L4));
    }

    #[test]
    fn apply_advances_tier_and_records_history() {
        let now = Utc::now();
        let mut t = sample(now);
        let change = TierChange {
            event: EscalationEvent {
                ticket_id: t.id,
                from: Tier::L1,
                to: Tier::L2,
                at: now,
                reason: EscalationReason::ElapsedBreach {
                    priority: Priority::High,
                    threshold_secs: 7_200,
                    elapsed_secs: 10_800,
                },
            },
            manual_review: false,
        };
        t.apply(&change);

        assert_eq!(t.tier, Tier::L2);
        assert_eq!(t.version, 2);
        assert_eq!(t.aging_since(), now);
        assert_eq!(t.history.len(), 1);
        assert_eq!(t.last_escalation().unwrap().to, Tier::L2);
    }

    #[test]
    fn terminal_status_is_not_a_candidate() {
        let now = Utc::now();
        let mut t = sample(now);
        t.set_status(TicketStatus::Resolved, now);
        assert_eq!(t.version, 2);
        assert!(!t.is_candidate(Tier::L4));
    }

    #[test]
    fn reason_display_is_readable() {
        let reason = EscalationReason::ElapsedBreach {
            priority: Priority::High,
            threshold_secs: 7_200,
            elapsed_secs: 10_800,
        };
        assert_eq!(
            reason.to_string(),
            "high ticket waited 3h 0m (threshold 2h 0m)"
        );
    }

    #[test]
    fn ticket_json_roundtrip_without_optional_fields() {
        let now = Utc::now();
        let mut t = sample(now);
        t.customer = None;
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("customer"));
        assert!(!json.contains("tier_changed_at"));
        let parsed: Ticket = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, t);
    }
}
