//! Persistent ticket store using redb.
//!
//! # Table design
//!
//! ```text
//! tickets  u64 ticket id                               → JSON Ticket
//! outbox   [ enqueued_ms: u64 BE | uuid: 16 bytes ]    → JSON QueuedNotification (live only)
//! runs     [ started_ms:  u64 BE | uuid: 16 bytes ]    → JSON RunReport (pruned to run.keep_reports)
//! meta     "ticket_seq" → u64 BE, "run_lease" → JSON Lease
//! ```
//!
//! The timestamp occupies the high bytes of the composite keys in big-endian
//! encoding, so byte ordering equals time ordering for the outbox and run log.
//!
//! `compare_and_set_tier` re-reads the ticket inside the same write
//! transaction that replaces it; redb serializes write transactions, so the
//! version check and the write are atomic with respect to every other writer.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{Result, TierwatchError};
use crate::notify::{NotificationRequest, QueuedNotification};
use crate::run::RunReport;
use crate::ticket::{NewTicket, Ticket, TicketId, TierChange};
use crate::types::TicketStatus;

use super::{
    check_change, CasOutcome, Lease, LeaseGrant, NotificationQueue, RunLease, RunLog, TicketStore,
};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const TICKETS: TableDefinition<u64, &[u8]> = TableDefinition::new("tickets");
const OUTBOX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("outbox");
const RUNS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("runs");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const TICKET_SEQ: &str = "ticket_seq";
const RUN_LEASE: &str = "run_lease";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> TierwatchError {
    TierwatchError::Store(e.to_string())
}

fn time_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn decode_seq(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    u64::from_be_bytes(buf)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        // Ensure the tables exist before any reads
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(TICKETS).map_err(db_err)?;
        wt.open_table(OUTBOX).map_err(db_err)?;
        wt.open_table(RUNS).map_err(db_err)?;
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn read_ticket(table: &impl ReadableTable<u64, &'static [u8]>, id: TicketId) -> Result<Ticket> {
        let bytes = table
            .get(id)
            .map_err(db_err)?
            .map(|v| v.value().to_vec())
            .ok_or(TierwatchError::TicketNotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl TicketStore for RedbStore {
    fn insert(&self, new: NewTicket) -> Result<Ticket> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let ticket = {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let seq = meta
                .get(TICKET_SEQ)
                .map_err(db_err)?
                .map(|v| decode_seq(v.value()))
                .unwrap_or(0);
            let id = seq + 1;
            meta.insert(TICKET_SEQ, id.to_be_bytes().as_slice())
                .map_err(db_err)?;

            let ticket = Ticket::new(id, new);
            let value = serde_json::to_vec(&ticket)?;
            let mut tickets = wt.open_table(TICKETS).map_err(db_err)?;
            tickets.insert(id, value.as_slice()).map_err(db_err)?;
            ticket
        };
        wt.commit().map_err(db_err)?;
        Ok(ticket)
    }

    fn get(&self, id: TicketId) -> Result<Ticket> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TICKETS).map_err(db_err)?;
        Self::read_ticket(&table, id)
    }

    fn list(&self) -> Result<Vec<Ticket>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(TICKETS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    fn compare_and_set_tier(
        &self,
        id: TicketId,
        expected_version: u64,
        change: &TierChange,
    ) -> Result<CasOutcome> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut table = wt.open_table(TICKETS).map_err(db_err)?;
            let mut ticket = Self::read_ticket(&table, id)?;
            match check_change(&ticket, expected_version, change.event.to) {
                Some(reason) => CasOutcome::Conflict(reason),
                None => {
                    ticket.apply(change);
                    let value = serde_json::to_vec(&ticket)?;
                    table.insert(id, value.as_slice()).map_err(db_err)?;
                    CasOutcome::Applied(ticket)
                }
            }
        };
        match outcome {
            CasOutcome::Applied(_) => wt.commit().map_err(db_err)?,
            CasOutcome::Conflict(_) => wt.abort().map_err(db_err)?,
        }
        Ok(outcome)
    }

    fn set_status(&self, id: TicketId, status: TicketStatus, now: DateTime<Utc>) -> Result<Ticket> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let ticket = {
            let mut table = wt.open_table(TICKETS).map_err(db_err)?;
            let mut ticket = Self::read_ticket(&table, id)?;
            ticket.set_status(status, now);
            let value = serde_json::to_vec(&ticket)?;
            table.insert(id, value.as_slice()).map_err(db_err)?;
            ticket
        };
        wt.commit().map_err(db_err)?;
        Ok(ticket)
    }
}

impl RunLease for RedbStore {
    fn try_acquire(
        &self,
        holder: Uuid,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<LeaseGrant> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let grant = {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let current: Option<Lease> = match meta.get(RUN_LEASE).map_err(db_err)? {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            let grant = Lease::grant(current, holder, now, ttl);
            if let LeaseGrant::Acquired(lease) = &grant {
                let value = serde_json::to_vec(lease)?;
                meta.insert(RUN_LEASE, value.as_slice()).map_err(db_err)?;
            }
            grant
        };
        wt.commit().map_err(db_err)?;
        Ok(grant)
    }

    fn release(&self, holder: Uuid) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            let current: Option<Lease> = match meta.get(RUN_LEASE).map_err(db_err)? {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            if current.is_some_and(|l| l.holder == holder) {
                meta.remove(RUN_LEASE).map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

impl NotificationQueue for RedbStore {
    fn enqueue(&self, request: &NotificationRequest, now: DateTime<Utc>) -> Result<QueuedNotification> {
        let entry = QueuedNotification::new(request.clone(), now);
        self.update(&entry)?;
        Ok(entry)
    }

    fn pending(&self) -> Result<Vec<QueuedNotification>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(OUTBOX).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let queued: QueuedNotification = serde_json::from_slice(v.value())?;
            if !queued.done {
                result.push(queued);
            }
        }
        Ok(result)
    }

    /// Insert or replace the entry; the key is stable for an entry's lifetime.
    /// Settled entries are deleted so `pending` only walks live ones.
    fn update(&self, entry: &QueuedNotification) -> Result<()> {
        let key = time_key(entry.enqueued_at, entry.id);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(OUTBOX).map_err(db_err)?;
            if entry.done {
                table.remove(key.as_slice()).map_err(db_err)?;
            } else {
                let value = serde_json::to_vec(entry)?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

impl RunLog for RedbStore {
    fn record(&self, report: &RunReport) -> Result<()> {
        let key = time_key(report.started_at, report.id);
        let value = serde_json::to_vec(report)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(RUNS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn prune(&self, keep: usize) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = wt.open_table(RUNS).map_err(db_err)?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (k, _) = entry.map_err(db_err)?;
                keys.push(k.value().to_vec());
            }
            // Keys sort oldest first.
            let excess = keys.len().saturating_sub(keep);
            for key in &keys[..excess] {
                table.remove(key.as_slice()).map_err(db_err)?;
            }
            excess
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunReport>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RUNS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)?.rev().take(limit) {
            let (_, v) = entry.map_err(db_err)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
