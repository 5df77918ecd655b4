//! The two periodic timers that drive the core: the advance check and the
//! heartbeat resync.  Both share one cancellation token so they always stop
//! together.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::SyncEvent;

pub struct Scheduler {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(
        event_tx: mpsc::Sender<SyncEvent>,
        advance_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let handles = vec![
            spawn_timer(
                "advance",
                advance_interval,
                event_tx.clone(),
                token.clone(),
                || SyncEvent::AdvanceTick,
            ),
            spawn_timer(
                "heartbeat",
                heartbeat_interval,
                event_tx,
                token.clone(),
                || SyncEvent::HeartbeatTick,
            ),
        ];
        info!(
            "Scheduler started (advance every {:?}, heartbeat every {:?})",
            advance_interval, heartbeat_interval
        );
        Self { token, handles }
    }

    /// Stop both timers and wait for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}

fn spawn_timer(
    name: &'static str,
    period: Duration,
    event_tx: mpsc::Sender<SyncEvent>,
    token: CancellationToken,
    make_event: fn() -> SyncEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    // A skipped tick is harmless: the next one re-checks everything
                    match event_tx.try_send(make_event()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("{} tick skipped, event loop is busy", name);
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("{} timer: event loop gone", name);
                            break;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(rx: &mut mpsc::Receiver<SyncEvent>) -> (usize, usize) {
        let (mut advance, mut heartbeat) = (0, 0);
        while let Ok(evt) = rx.try_recv() {
            match evt {
                SyncEvent::AdvanceTick => advance += 1,
                SyncEvent::HeartbeatTick => heartbeat += 1,
                other => panic!("unexpected event {:?}", other),
            }
        }
        (advance, heartbeat)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_tick_independently() {
        let (tx, mut rx) = mpsc::channel(64);
        let scheduler = Scheduler::start(tx, Duration::from_secs(1), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(count(&mut rx), (10, 2));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_both_timers() {
        let (tx, mut rx) = mpsc::channel(64);
        let scheduler = Scheduler::start(tx, Duration::from_secs(1), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.shutdown().await;
        let _ = count(&mut rx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        // Every sender was owned by the timer tasks, so the channel is closed
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_exits_when_loop_is_gone() {
        let (tx, rx) = mpsc::channel(64);
        let scheduler = Scheduler::start(tx, Duration::from_secs(1), Duration::from_secs(5));
        drop(rx);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(scheduler.handles.iter().all(|h| h.is_finished()));
        scheduler.shutdown().await;
    }
}
