//! Run orchestration: lease, evaluate, execute, report.
//!
//! A run moves through IDLE → EVALUATING → EXECUTING → REPORTING → IDLE.
//! Only one run holds the lease at a time; a trigger that finds the lease
//! held produces a `Skipped` report and touches nothing. The per-ticket
//! version check stays the correctness guard even if a lease expires under
//! a slow run.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, RunConfig};
use crate::error::{Result, TierwatchError};
use crate::evaluator::{evaluate, EscalationDecision, PolicyGap};
use crate::executor::{Executor, Outcome, TicketOutcome};
use crate::policy::EscalationPolicy;
use crate::store::{LeaseGrant, NotificationQueue, RunLease, RunLog, TicketStore};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Evaluating,
    Executing,
    Reporting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Another run held the lease.
    Skipped {
        holder: Uuid,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub decisions: usize,
    pub applied: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub deferred: usize,
    pub policy_gaps: usize,
}

impl RunSummary {
    fn tally(&mut self, outcomes: &[TicketOutcome]) {
        for o in outcomes {
            match o.outcome {
                Outcome::Applied { .. } => self.applied += 1,
                Outcome::Conflict { .. } => self.conflicts += 1,
                Outcome::Failed { .. } => self.failed += 1,
                Outcome::Deferred => self.deferred += 1,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub summary: RunSummary,
    #[serde(default)]
    pub outcomes: Vec<TicketOutcome>,
    #[serde(default)]
    pub gaps: Vec<PolicyGap>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Arc<dyn TicketStore>,
    lease: Arc<dyn RunLease>,
    queue: Arc<dyn NotificationQueue>,
    log: Arc<dyn RunLog>,
    phase: Mutex<RunPhase>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        lease: Arc<dyn RunLease>,
        queue: Arc<dyn NotificationQueue>,
        log: Arc<dyn RunLog>,
    ) -> Self {
        Self {
            store,
            lease,
            queue,
            log,
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    /// Use one backend for tickets, lease, outbox and run log.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: TicketStore + RunLease + NotificationQueue + RunLog + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.lock().map(|p| *p).unwrap_or(RunPhase::Idle)
    }

    fn enter(&self, phase: RunPhase) {
        if let Ok(mut p) = self.phase.lock() {
            *p = phase;
        }
    }

    /// Execute one full run as of `now`.
    ///
    /// Errors only when the run as a whole cannot proceed (invalid policy,
    /// lease or candidate query failure). Per-ticket problems are outcomes.
    pub async fn run_once(&self, config: &Config, now: DateTime<Utc>) -> Result<RunReport> {
        let policy = config.policy()?;
        let clock = Instant::now();
        let holder = Uuid::new_v4();

        let lease = self.lease.clone();
        let ttl = config.run.lease_ttl();
        let grant = blocking(move || lease.try_acquire(holder, now, ttl)).await?;
        if let LeaseGrant::Held(current) = grant {
            warn!(
                holder = %current.holder,
                expires_at = %current.expires_at,
                "another run holds the lease, skipping"
            );
            let report = RunReport {
                id: holder,
                started_at: now,
                finished_at: finished_at(now, clock),
                status: RunStatus::Skipped {
                    holder: current.holder,
                    expires_at: current.expires_at,
                },
                summary: RunSummary::default(),
                outcomes: Vec::new(),
                gaps: Vec::new(),
            };
            self.record(&report, config.run.keep_reports).await;
            return Ok(report);
        }

        let result = self.run_leased(config, &policy, holder, now, clock).await;

        let lease = self.lease.clone();
        if let Err(e) = blocking(move || lease.release(holder)).await {
            warn!(run = %holder, "could not release run lease: {e}");
        }
        self.enter(RunPhase::Idle);

        if let Err(e) = &result {
            error!(run = %holder, "escalation run failed: {e}");
        }
        result
    }

    async fn run_leased(
        &self,
        config: &Config,
        policy: &EscalationPolicy,
        id: Uuid,
        now: DateTime<Utc>,
        clock: Instant,
    ) -> Result<RunReport> {
        self.enter(RunPhase::Evaluating);
        let store = self.store.clone();
        let max_tier = policy.max_tier();
        let candidates = blocking(move || store.list_escalation_candidates(max_tier)).await?;

        let evaluation = evaluate(&candidates, policy, now, config.run.window());
        for gap in &evaluation.gaps {
            warn!(
                ticket = gap.ticket_id,
                priority = %gap.priority,
                tier = %gap.tier,
                "no escalation rule, ticket skipped"
            );
        }

        let mut summary = RunSummary {
            candidates: candidates.len(),
            decisions: evaluation.decisions.len(),
            policy_gaps: evaluation.gaps.len(),
            ..RunSummary::default()
        };

        self.enter(RunPhase::Executing);
        let mut decisions = evaluation.decisions;
        let deferred = match config.run.max_escalations_per_run {
            Some(cap) if decisions.len() > cap => decisions.split_off(cap),
            _ => Vec::new(),
        };
        let executor = Executor::new(
            self.store.clone(),
            self.queue.clone(),
            Arc::new(config.owners.clone()),
            max_tier,
        );
        let mut outcomes = execute_all(&executor, &decisions, &config.run, now).await;
        outcomes.extend(
            deferred
                .iter()
                .map(|d| TicketOutcome::new(d, Outcome::Deferred)),
        );

        self.enter(RunPhase::Reporting);
        summary.tally(&outcomes);
        let report = RunReport {
            id,
            started_at: now,
            finished_at: finished_at(now, clock),
            status: RunStatus::Completed,
            summary,
            outcomes,
            gaps: evaluation.gaps,
        };
        self.record(&report, config.run.keep_reports).await;

        let s = &report.summary;
        info!(
            run = %id,
            candidates = s.candidates,
            applied = s.applied,
            conflicts = s.conflicts,
            failed = s.failed,
            deferred = s.deferred,
            policy_gaps = s.policy_gaps,
            "escalation run complete"
        );
        Ok(report)
    }

    async fn record(&self, report: &RunReport, keep: usize) {
        let log = self.log.clone();
        let report = report.clone();
        let id = report.id;
        let saved = blocking(move || {
            log.record(&report)?;
            log.prune(keep)
        })
        .await;
        match saved {
            Ok(0) => {}
            Ok(pruned) => debug!(run = %id, pruned, "pruned old run reports"),
            Err(e) => warn!(run = %id, "could not record run report: {e}"),
        }
    }
}

/// Run each decision on a blocking thread, at most `max_concurrency` at a
/// time, each bounded by `ticket_timeout`. Outcomes keep decision order.
async fn execute_all(
    executor: &Executor,
    decisions: &[EscalationDecision],
    run: &RunConfig,
    now: DateTime<Utc>,
) -> Vec<TicketOutcome> {
    let semaphore = Arc::new(Semaphore::new(run.max_concurrency.max(1)));
    let timeout = run.ticket_timeout();
    let mut tasks = JoinSet::new();

    for (idx, decision) in decisions.iter().cloned().enumerate() {
        let sem = semaphore.clone();
        let executor = executor.clone();
        tasks.spawn(async move {
            let outcome = match sem.acquire_owned().await {
                Err(_) => Outcome::Failed {
                    error: "semaphore closed".into(),
                },
                Ok(permit) => {
                    let d = decision.clone();
                    // The permit stays taken until the blocking write returns,
                    // even after the timeout has given up on it.
                    let work = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        executor.execute(&d, now)
                    });
                    match tokio::time::timeout(timeout, work).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => Outcome::Failed {
                            error: format!("task join error: {e}"),
                        },
                        Err(_) => {
                            warn!(ticket = decision.ticket_id, "escalation timed out");
                            Outcome::Failed {
                                error: format!(
                                    "timed out after {}s, write may still complete",
                                    timeout.as_secs()
                                ),
                            }
                        }
                    }
                }
            };
            (idx, TicketOutcome::new(&decision, outcome))
        });
    }

    let mut slots: Vec<Option<TicketOutcome>> = vec![None; decisions.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, outcome)) => slots[idx] = Some(outcome),
            Err(e) => warn!("escalation task join error: {e}"),
        }
    }
    decisions
        .iter()
        .zip(slots)
        .map(|(d, slot)| {
            slot.unwrap_or_else(|| {
                TicketOutcome::new(
                    d,
                    Outcome::Failed {
                        error: "task aborted".into(),
                    },
                )
            })
        })
        .collect()
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TierwatchError::Runtime(format!("task join error: {e}")))?
}

fn finished_at(started_at: DateTime<Utc>, clock: Instant) -> DateTime<Utc> {
    started_at + chrono::Duration::from_std(clock.elapsed()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
