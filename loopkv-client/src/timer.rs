//! Per-command timers on the event loop's runtime.
//!
//! A timer is a spawned task that reports firings as command ids over an
//! unbounded channel; the loop looks the id up in its registry, so a firing for
//! a command that is already gone is simply ignored.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::command::Schedule;

/// Stops the timer task when dropped.
pub(crate) struct TimerGuard {
    task: JoinHandle<()>,
}

impl TimerGuard {
    pub(crate) fn stop(self) {}
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts the timer for `id`. Must be called from within the loop's runtime.
pub(crate) fn arm(id: u64, schedule: Schedule, fires: UnboundedSender<u64>) -> TimerGuard {
    let task = tokio::spawn(async move {
        time::sleep(schedule.after).await;
        if fires.send(id).is_err() || !schedule.is_looping() {
            return;
        }
        let mut ticker = time::interval_at(Instant::now() + schedule.repeat, schedule.repeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if fires.send(id).is_err() {
                break;
            }
        }
    });
    TimerGuard { task }
}
