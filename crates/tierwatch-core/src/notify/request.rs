//! Notification requests written by the executor and the outbox entries that
//! track their delivery.

use crate::config::OwnerDirectory;
use crate::ticket::{EscalationEvent, EscalationReason, Ticket, TicketId};
use crate::types::{Priority, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RecipientRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    /// The customer who owns the ticket.
    Customer,
    /// Owner of the tier the ticket left.
    OutgoingOwner,
    /// Owner of the tier the ticket entered.
    IncomingOwner,
}

impl RecipientRole {
    pub fn all() -> &'static [RecipientRole] {
        &[
            RecipientRole::Customer,
            RecipientRole::OutgoingOwner,
            RecipientRole::IncomingOwner,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecipientRole::Customer => "customer",
            RecipientRole::OutgoingOwner => "outgoing_owner",
            RecipientRole::IncomingOwner => "incoming_owner",
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NotificationRequest
// ---------------------------------------------------------------------------

/// Everything the fan-out needs to inform the three parties of one applied
/// escalation. Addresses are resolved at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub ticket_id: TicketId,
    pub subject: String,
    pub category: String,
    pub priority: Priority,
    pub from: Tier,
    pub to: Tier,
    pub escalated_at: DateTime<Utc>,
    pub reason: EscalationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_owner: Option<String>,
}

impl NotificationRequest {
    pub fn for_escalation(
        ticket: &Ticket,
        event: &EscalationEvent,
        owners: &OwnerDirectory,
    ) -> Self {
        Self {
            ticket_id: ticket.id,
            subject: ticket.subject.clone(),
            category: ticket.category.clone(),
            priority: ticket.priority,
            from: event.from,
            to: event.to,
            escalated_at: event.at,
            reason: event.reason.clone(),
            customer: ticket.customer.clone(),
            outgoing_owner: owners.owner_for(&ticket.category, event.from),
            incoming_owner: owners.owner_for(&ticket.category, event.to),
        }
    }

    pub fn recipient(&self, role: RecipientRole) -> Option<&str> {
        match role {
            RecipientRole::Customer => self.customer.as_deref(),
            RecipientRole::OutgoingOwner => self.outgoing_owner.as_deref(),
            RecipientRole::IncomingOwner => self.incoming_owner.as_deref(),
        }
    }

    /// The message for one recipient, or `None` when no address is known.
    pub fn notification(&self, role: RecipientRole) -> Option<Notification> {
        let recipient = self.recipient(role)?.to_string();
        let id = self.ticket_id;
        let subject = &self.subject;
        let body = match role {
            RecipientRole::Customer => format!(
                "Your support ticket #{id} \"{subject}\" has been escalated to a {} for priority attention.",
                self.to.role()
            ),
            RecipientRole::OutgoingOwner => format!(
                "Ticket #{id} \"{subject}\" left your {} queue for {} ({}): {}.",
                self.from,
                self.to,
                self.to.role(),
                self.reason
            ),
            RecipientRole::IncomingOwner => format!(
                "Ticket #{id} \"{subject}\" was escalated to you as {} ({}): {}. {}",
                self.to.role(),
                self.to,
                self.reason,
                urgency(self.to)
            ),
        };
        Some(Notification {
            ticket_id: id,
            role,
            recipient,
            subject: format!("Ticket #{id} escalated to {}", self.to),
            body,
            from: self.from,
            to: self.to,
            priority: self.priority,
            category: self.category.clone(),
        })
    }
}

fn urgency(tier: Tier) -> &'static str {
    match tier {
        Tier::L1 | Tier::L2 => "It was not handled within the expected timeframe.",
        Tier::L3 => "It has been significantly delayed and needs immediate attention.",
        Tier::L4 => "It has missed multiple service targets and needs executive attention.",
    }
}

/// A single rendered message handed to a [`crate::notify::Notifier`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub ticket_id: TicketId,
    pub role: RecipientRole,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub from: Tier,
    pub to: Tier,
    pub priority: Priority,
    pub category: String,
}

// ---------------------------------------------------------------------------
// QueuedNotification (outbox entry)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered { at: DateTime<Utc> },
    Skipped { reason: String },
    Failed { error: String },
}

impl DeliveryStatus {
    /// Settled recipients are not retried.
    pub fn is_settled(&self) -> bool {
        !matches!(self, DeliveryStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub request: NotificationRequest,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub deliveries: BTreeMap<RecipientRole, DeliveryStatus>,
    /// Set once every recipient is settled or attempts are exhausted.
    #[serde(default)]
    pub done: bool,
}

impl QueuedNotification {
    pub fn new(request: NotificationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            enqueued_at: now,
            request,
            attempts: 0,
            deliveries: BTreeMap::new(),
            done: false,
        }
    }

    /// Recipients that have not been delivered to or skipped yet.
    pub fn outstanding(&self) -> Vec<RecipientRole> {
        RecipientRole::all()
            .iter()
            .copied()
            .filter(|role| !self.deliveries.get(role).is_some_and(|d| d.is_settled()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
