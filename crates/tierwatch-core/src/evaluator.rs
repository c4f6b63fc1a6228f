//! Policy evaluator: which tickets are due for escalation at `now`.
//!
//! `evaluate` is a pure function of its inputs. It performs no I/O and no
//! writes, so calling it twice with the same snapshot yields the same
//! [`Evaluation`].

use crate::policy::EscalationPolicy;
use crate::ticket::{Ticket, TicketId};
use crate::types::{Priority, TicketStatus, Tier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A tier advance that is due. Consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub ticket_id: TicketId,
    pub priority: Priority,
    pub from: Tier,
    pub to: Tier,
    /// When the threshold was (or will be) breached.
    pub due_at: DateTime<Utc>,
    /// Ticket version at evaluation time; the executor's write is keyed on it.
    pub expected_version: u64,
    pub threshold_secs: i64,
    pub elapsed_secs: i64,
    pub overdue_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkipReason {
    TerminalStatus { status: TicketStatus },
    MaxTier,
    RecentlyEscalated { at: DateTime<Utc> },
    NotYetDue { due_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub ticket_id: TicketId,
    pub reason: SkipReason,
}

/// A ticket whose (priority, tier) has no rule. Never defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyGap {
    pub ticket_id: TicketId,
    pub priority: Priority,
    pub tier: Tier,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Ordered by priority desc, overdue desc, ticket id asc.
    pub decisions: Vec<EscalationDecision>,
    pub gaps: Vec<PolicyGap>,
    pub skipped: Vec<Skipped>,
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Compute every escalation due at `now`.
///
/// Tickets whose last escalation falls inside `(now - window, now]` are
/// excluded so that a retried or overlapping run cannot double-escalate.
/// A zero `window` disables that guard.
pub fn evaluate(
    tickets: &[Ticket],
    policy: &EscalationPolicy,
    now: DateTime<Utc>,
    window: Duration,
) -> Evaluation {
    let mut out = Evaluation::default();
    let max_tier = policy.max_tier();
    let window_start = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    for ticket in tickets {
        let skip = |reason| Skipped {
            ticket_id: ticket.id,
            reason,
        };

        if ticket.status.is_terminal() {
            out.skipped.push(skip(SkipReason::TerminalStatus {
                status: ticket.status,
            }));
            continue;
        }
        if ticket.tier >= max_tier {
            out.skipped.push(skip(SkipReason::MaxTier));
            continue;
        }
        if let Some(last) = ticket.last_escalation() {
            if last.at > window_start && last.at <= now {
                out.skipped
                    .push(skip(SkipReason::RecentlyEscalated { at: last.at }));
                continue;
            }
        }

        let Some(rule) = policy.rule_for(ticket.priority, ticket.tier) else {
            out.gaps.push(PolicyGap {
                ticket_id: ticket.id,
                priority: ticket.priority,
                tier: ticket.tier,
            });
            continue;
        };

        let since = ticket.aging_since();
        let due_at = since
            .checked_add_signed(rule.threshold())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < due_at {
            out.skipped.push(skip(SkipReason::NotYetDue { due_at }));
            continue;
        }

        let elapsed = now - since;
        out.decisions.push(EscalationDecision {
            ticket_id: ticket.id,
            priority: ticket.priority,
            from: ticket.tier,
            to: rule.next,
            due_at,
            expected_version: ticket.version,
            threshold_secs: rule.threshold().num_seconds(),
            elapsed_secs: elapsed.num_seconds(),
            overdue_secs: (now - due_at).num_seconds(),
        });
    }

    out.decisions
        .sort_by_key(|d| (Reverse(d.priority), Reverse(d.overdue_secs), d.ticket_id));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
