use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::NotificationQueue;

use super::notifier::Notifier;
use super::request::DeliveryStatus;

/// Counts from one pass over the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub requests: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Entries given up on after `max_attempts` with recipients still failing.
    pub exhausted: usize,
}

/// Drains the notification outbox, one notification per recipient.
///
/// Delivery outcomes are recorded per recipient, so a retry only re-sends to
/// the recipients that failed. Failures never touch ticket state.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_attempts: u32,
}

impl FanOut {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn drain(
        &self,
        queue: &dyn NotificationQueue,
        notifier: &dyn Notifier,
        now: DateTime<Utc>,
    ) -> Result<FanOutReport> {
        let mut report = FanOutReport::default();

        for mut entry in queue.pending()? {
            report.requests += 1;
            for role in entry.outstanding() {
                let status = match entry.request.notification(role) {
                    None => {
                        report.skipped += 1;
                        warn!(
                            ticket = entry.request.ticket_id,
                            %role,
                            "no address, notification skipped"
                        );
                        DeliveryStatus::Skipped {
                            reason: format!("no {role} address"),
                        }
                    }
                    Some(n) => match notifier.send(&n) {
                        Ok(()) => {
                            report.delivered += 1;
                            DeliveryStatus::Delivered { at: now }
                        }
                        Err(e) => {
                            report.failed += 1;
                            warn!(ticket = entry.request.ticket_id, %role, "notification failed: {e}");
                            DeliveryStatus::Failed {
                                error: e.to_string(),
                            }
                        }
                    },
                };
                entry.deliveries.insert(role, status);
            }

            entry.attempts += 1;
            if entry.outstanding().is_empty() {
                entry.done = true;
            } else if entry.attempts >= self.max_attempts {
                entry.done = true;
                report.exhausted += 1;
                warn!(
                    ticket = entry.request.ticket_id,
                    attempts = entry.attempts,
                    "giving up on notification"
                );
            }

            if let Err(e) = queue.update(&entry) {
                warn!(ticket = entry.request.ticket_id, "could not record delivery: {e}");
            }
        }

        debug!(?report, "outbox drained");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TierwatchError;
    use crate::notify::request::{Notification, NotificationRequest, RecipientRole};
    use crate::store::MemoryStore;
    use crate::ticket::EscalationReason;
    use crate::types::{Priority, Tier};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(RecipientRole, String)>>,
        fail_role: Option<RecipientRole>,
    }

    impl Notifier for Recording {
        fn send(&self, n: &Notification) -> Result<()> {
            if self.fail_role == Some(n.role) {
                return Err(TierwatchError::Notify("connection refused".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((n.role, n.recipient.clone()));
            Ok(())
        }
    }

    fn request(outgoing: Option<&str>) -> NotificationRequest {
        NotificationRequest {
            ticket_id: 3,
            subject: "Login loop".into(),
            category: "auth".into(),
            priority: Priority::Urgent,
            from: Tier::L1,
            to: Tier::L2,
            escalated_at: Utc::now(),
            reason: EscalationReason::ElapsedBreach {
                priority: Priority::Urgent,
                threshold_secs: 1_800,
                elapsed_secs: 1_900,
            },
            customer: Some("c@example.com".into()),
            outgoing_owner: outgoing.map(String::from),
            incoming_owner: Some("lead@example.com".into()),
        }
    }

    #[test]
    fn delivers_to_each_recipient_once() {
        let store = MemoryStore::new();
        store.enqueue(&request(Some("agent@example.com")), Utc::now()).unwrap();
        let notifier = Recording::default();

        let report = FanOut::new(3).drain(&store, &notifier, Utc::now()).unwrap();
        assert_eq!(report.requests, 1);
        assert_eq!(report.delivered, 3);
        assert_eq!(notifier.sent.lock().unwrap().len(), 3);
        assert!(store.pending().unwrap().is_empty());

        let again = FanOut::new(3).drain(&store, &notifier, Utc::now()).unwrap();
        assert_eq!(again, FanOutReport::default());
    }

    #[test]
    fn missing_address_is_skipped_not_failed() {
        let store = MemoryStore::new();
        store.enqueue(&request(None), Utc::now()).unwrap();

        let report = FanOut::new(3)
            .drain(&store, &Recording::default(), Utc::now())
            .unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.skipped, 1);
        assert!(store.pending().unwrap().is_empty());
    }

    #[test]
    fn failed_recipient_is_retried_alone_until_exhausted() {
        let store = MemoryStore::new();
        store.enqueue(&request(Some("agent@example.com")), Utc::now()).unwrap();
        let notifier = Recording {
            fail_role: Some(RecipientRole::Customer),
            ..Recording::default()
        };
        let fanout = FanOut::new(2);

        let first = fanout.drain(&store, &notifier, Utc::now()).unwrap();
        assert_eq!((first.delivered, first.failed), (2, 1));
        let pending = store.pending().unwrap();
        assert_eq!(pending[0].outstanding(), vec![RecipientRole::Customer]);

        let second = fanout.drain(&store, &notifier, Utc::now()).unwrap();
        assert_eq!((second.delivered, second.failed), (0, 1));
        assert_eq!(second.exhausted, 1);
        assert!(store.pending().unwrap().is_empty());
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }
}
