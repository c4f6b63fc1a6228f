//! Escalation executor: turns one decision into one conditional tier write.
//!
//! Every decision is handled on its own. A conflict or failure on one ticket
//! is returned as an [`Outcome`] and never stops the rest of the batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OwnerDirectory;
use crate::evaluator::EscalationDecision;
use crate::notify::NotificationRequest;
use crate::store::{check_change, CasOutcome, NotificationQueue, TicketStore};
use crate::ticket::{EscalationEvent, EscalationReason, TicketId, TierChange};
use crate::types::{Priority, Tier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        version: u64,
        /// False when the tier change stuck but the outbox write did not.
        notification_queued: bool,
    },
    Conflict {
        reason: String,
    },
    Failed {
        error: String,
    },
    /// Over the per-run cap; left for the next run.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOutcome {
    pub ticket_id: TicketId,
    pub priority: Priority,
    pub from: Tier,
    pub to: Tier,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl TicketOutcome {
    pub fn new(decision: &EscalationDecision, outcome: Outcome) -> Self {
        Self {
            ticket_id: decision.ticket_id,
            priority: decision.priority,
            from: decision.from,
            to: decision.to,
            outcome,
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn TicketStore>,
    queue: Arc<dyn NotificationQueue>,
    owners: Arc<OwnerDirectory>,
    max_tier: Tier,
}

impl Executor {
    pub fn new(
        store: Arc<dyn TicketStore>,
        queue: Arc<dyn NotificationQueue>,
        owners: Arc<OwnerDirectory>,
        max_tier: Tier,
    ) -> Self {
        Self {
            store,
            queue,
            owners,
            max_tier,
        }
    }

    /// Apply `decision` if the ticket is still as the evaluator saw it.
    ///
    /// Blocks on store I/O; async callers run it on a blocking thread.
    pub fn execute(&self, decision: &EscalationDecision, now: DateTime<Utc>) -> Outcome {
        let id = decision.ticket_id;

        let ticket = match self.store.get(id) {
            Ok(t) => t,
            Err(e) => {
                warn!(ticket = id, "escalation read failed: {e}");
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
        };
        if let Some(reason) = check_change(&ticket, decision.expected_version, decision.to) {
            debug!(ticket = id, %reason, "escalation conflict on re-read");
            return Outcome::Conflict {
                reason: reason.to_string(),
            };
        }

        let change = TierChange {
            event: EscalationEvent {
                ticket_id: id,
                from: decision.from,
                to: decision.to,
                at: now,
                reason: EscalationReason::ElapsedBreach {
                    priority: decision.priority,
                    threshold_secs: decision.threshold_secs,
                    elapsed_secs: (now - ticket.aging_since()).num_seconds(),
                },
            },
            manual_review: decision.to >= self.max_tier,
        };

        let updated = match self
            .store
            .compare_and_set_tier(id, decision.expected_version, &change)
        {
            Ok(CasOutcome::Applied(t)) => t,
            Ok(CasOutcome::Conflict(reason)) => {
                warn!(ticket = id, %reason, "escalation conflict on write");
                return Outcome::Conflict {
                    reason: reason.to_string(),
                };
            }
            Err(e) => {
                warn!(ticket = id, "escalation write failed: {e}");
                return Outcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        info!(
            ticket = id,
            from = %decision.from,
            to = %decision.to,
            version = updated.version,
            manual_review = updated.manual_review,
            "ticket escalated"
        );

        let request = NotificationRequest::for_escalation(&updated, &change.event, &self.owners);
        let notification_queued = match self.queue.enqueue(&request, now) {
            Ok(_) => true,
            Err(e) => {
                warn!(ticket = id, "escalation applied but notification not queued: {e}");
                false
            }
        };

        Outcome::Applied {
            version: updated.version,
            notification_queued,
        }
    }
}
