//! In-process store with the same conditional-write semantics as `RedbStore`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, TierwatchError};
use crate::notify::{NotificationRequest, QueuedNotification};
use crate::run::RunReport;
use crate::ticket::{NewTicket, Ticket, TicketId, TierChange};
use crate::types::TicketStatus;

use super::{
    check_change, CasOutcome, Lease, LeaseGrant, NotificationQueue, RunLease, RunLog, TicketStore,
};

#[derive(Default)]
struct Inner {
    tickets: BTreeMap<TicketId, Ticket>,
    lease: Option<Lease>,
    outbox: Vec<QueuedNotification>,
    runs: Vec<RunReport>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing tickets, keeping their ids and versions.
    pub fn with_tickets(tickets: impl IntoIterator<Item = Ticket>) -> Self {
        let store = Self::default();
        if let Ok(mut inner) = store.inner.lock() {
            inner.tickets = tickets.into_iter().map(|t| (t.id, t)).collect();
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TierwatchError::Store("memory store lock poisoned".into()))
    }
}

impl TicketStore for MemoryStore {
    fn insert(&self, new: NewTicket) -> Result<Ticket> {
        let mut inner = self.lock()?;
        let id = inner.tickets.keys().next_back().copied().unwrap_or(0) + 1;
        let ticket = Ticket::new(id, new);
        inner.tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    fn get(&self, id: TicketId) -> Result<Ticket> {
        self.lock()?
            .tickets
            .get(&id)
            .cloned()
            .ok_or(TierwatchError::TicketNotFound(id))
    }

    fn list(&self) -> Result<Vec<Ticket>> {
        Ok(self.lock()?.tickets.values().cloned().collect())
    }

    fn compare_and_set_tier(
        &self,
        id: TicketId,
        expected_version: u64,
        change: &TierChange,
    ) -> Result<CasOutcome> {
        let mut inner = self.lock()?;
        let ticket = inner
            .tickets
            .get_mut(&id)
            .ok_or(TierwatchError::TicketNotFound(id))?;
        if let Some(reason) = check_change(ticket, expected_version, change.event.to) {
            return Ok(CasOutcome::Conflict(reason));
        }
        ticket.apply(change);
        Ok(CasOutcome::Applied(ticket.clone()))
    }

    fn set_status(&self, id: TicketId, status: TicketStatus, now: DateTime<Utc>) -> Result<Ticket> {
        let mut inner = self.lock()?;
        let ticket = inner
            .tickets
            .get_mut(&id)
            .ok_or(TierwatchError::TicketNotFound(id))?;
        ticket.set_status(status, now);
        Ok(ticket.clone())
    }
}

impl RunLease for MemoryStore {
    fn try_acquire(
        &self,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LeaseGrant> {
        let mut inner = self.lock()?;
        let grant = Lease::grant(inner.lease.clone(), holder, now, ttl);
        if let LeaseGrant::Acquired(lease) = &grant {
            inner.lease = Some(lease.clone());
        }
        Ok(grant)
    }

    fn release(&self, holder: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.lease.as_ref().is_some_and(|l| l.holder == holder) {
            inner.lease = None;
        }
        Ok(())
    }
}

impl NotificationQueue for MemoryStore {
    fn enqueue(&self, request: &NotificationRequest, now: DateTime<Utc>) -> Result<QueuedNotification> {
        let entry = QueuedNotification::new(request.clone(), now);
        self.lock()?.outbox.push(entry.clone());
        Ok(entry)
    }

    fn pending(&self) -> Result<Vec<QueuedNotification>> {
        Ok(self
            .lock()?
            .outbox
            .iter()
            .filter(|e| !e.done)
            .cloned()
            .collect())
    }

    fn update(&self, entry: &QueuedNotification) -> Result<()> {
        let mut inner = self.lock()?;
        if entry.done {
            inner.outbox.retain(|e| e.id != entry.id);
            return Ok(());
        }
        match inner.outbox.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry.clone(),
            None => inner.outbox.push(entry.clone()),
        }
        Ok(())
    }
}

impl RunLog for MemoryStore {
    fn record(&self, report: &RunReport) -> Result<()> {
        self.lock()?.runs.push(report.clone());
        Ok(())
    }

    fn prune(&self, keep: usize) -> Result<usize> {
        let mut inner = self.lock()?;
        let excess = inner.runs.len().saturating_sub(keep);
        inner.runs.drain(..excess);
        Ok(excess)
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunReport>> {
        Ok(self.lock()?.runs.iter().rev().take(limit).cloned().collect())
    }
}
