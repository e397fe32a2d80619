use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::machine::{ExamSession, Inner, TickOutcome};
use crate::shell::spawn_contained;

/// Handle to the once-per-second countdown of an attempt. Dropping it stops
/// the loop just like [`Countdown::cancel`].
pub(super) struct Countdown {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub(super) fn start(session: Weak<Inner>, epoch: u64, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = spawn_contained("countdown", async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(inner) = session.upgrade() else {
                            break;
                        };
                        if ExamSession::from_inner(inner).tick(epoch).await == TickOutcome::Stop {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(epoch, "Countdown stopped");
        });

        Self { shutdown, task }
    }

    pub(super) fn cancel(self) {
        let _ = self.shutdown.send(true);
    }

    pub(super) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
