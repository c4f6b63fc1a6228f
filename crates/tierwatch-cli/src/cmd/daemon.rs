use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use chrono::Utc;
use tierwatch_core::config::Config;
use tierwatch_core::notify::{notifier_from_config, FanOut};
use tierwatch_core::run::Orchestrator;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// The scheduler trigger: one run per interval, then drain the outbox.
///
/// Config and the database are reopened on every tick, so edits take effect
/// on the next run and other `tierwatch` commands can use the database
/// between ticks. A failed tick is logged and retried on the next one.
pub fn run(root: &Path, interval: Option<u64>) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    for w in config.validate() {
        warn!("config: {}", w.message);
    }

    let period = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.run.interval());
    if period.is_zero() {
        bail!("interval must be at least one second");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let root = root.to_path_buf();

    rt.block_on(async move {
        info!(
            root = %root.display(),
            interval_secs = period.as_secs(),
            "escalation daemon started"
        );
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("could not listen for ctrl-c: {e}");
            }
        };
        let root: &Path = &root;
        until_shutdown(period, shutdown, move || tick(root)).await;
        info!("escalation daemon stopping");
        Ok(())
    })
}

/// Call `tick` once per `period` until `shutdown` resolves.
///
/// `shutdown` is polled during a tick as well; a tick in progress is allowed
/// to finish so the run lease is released.
async fn until_shutdown<S, F, Fut>(period: Duration, shutdown: S, mut tick: F)
where
    S: Future<Output = ()>,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let run = tick();
                tokio::pin!(run);
                let result = tokio::select! {
                    result = &mut run => result,
                    _ = &mut shutdown => {
                        info!("stop requested, finishing the current run");
                        let result = run.await;
                        log_tick(result);
                        return;
                    }
                };
                log_tick(result);
            }
            _ = &mut shutdown => return,
        }
    }
}

fn log_tick(result: anyhow::Result<()>) {
    if let Err(e) = result {
        error!("escalation tick failed: {e:#}");
    }
}

async fn tick(root: &Path) -> anyhow::Result<()> {
    let opened = root.to_path_buf();
    let (config, store) = tokio::task::spawn_blocking(move || {
        let config = Config::load(&opened)?;
        let store = super::open_store(&opened)?;
        Ok::<_, anyhow::Error>((config, store))
    })
    .await??;

    Orchestrator::with_store(store.clone())
        .run_once(&config, Utc::now())
        .await?;

    let notifications = config.notifications;
    let delivery = tokio::task::spawn_blocking(move || {
        let notifier = notifier_from_config(&notifications)?;
        FanOut::new(notifications.max_attempts).drain(
            store.as_ref(),
            notifier.as_ref(),
            Utc::now(),
        )
    })
    .await??;

    if delivery.requests > 0 {
        info!(
            requests = delivery.requests,
            delivered = delivery.delivered,
            failed = delivery.failed,
            skipped = delivery.skipped,
            "notifications drained"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn shutdown_during_a_tick_stops_after_it_finishes() {
        let finished = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let counter = finished.clone();
        let daemon = until_shutdown(
            Duration::from_secs(60),
            async move {
                let _ = rx.await;
            },
            move || {
                let counter = counter.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            },
        );

        let signal = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        };
        let ((), ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(daemon, signal)
        })
        .await
        .expect("daemon did not stop");

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_between_ticks_stops_without_another_run() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        tokio::time::timeout(
            Duration::from_secs(5),
            until_shutdown(
                Duration::from_secs(60),
                tokio::time::sleep(Duration::from_millis(50)),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, anyhow::Error>(()) }
                },
            ),
        )
        .await
        .expect("daemon did not stop");

        // The first interval tick fires immediately; the next is a minute away.
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
