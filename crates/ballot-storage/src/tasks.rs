//! Background tasks: the process lifecycle monitor and the reservation
//! reaper.
//!
//! Both are plain interval loops on the caller's tokio runtime, observing
//! the storage-wide cancellation channel. The loops never hold either
//! storage mutex across an await; every tick calls into the synchronous
//! public surface and logs failures instead of exiting.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Storage;

/// Join handles of the spawned background tasks.
pub struct BackgroundTasks {
    /// The process lifecycle monitor.
    pub monitor: JoinHandle<()>,
    /// The stale-reservation reaper.
    pub reaper: JoinHandle<()>,
}

impl Storage {
    /// Spawns the lifecycle monitor and the reservation reaper on the
    /// current tokio runtime. Both exit when [`Storage::close`] is called.
    pub fn spawn_background_tasks(&self) -> BackgroundTasks {
        let monitor = tokio::spawn(monitor_loop(self.clone(), self.cancel_signal()));
        let reaper = tokio::spawn(reaper_loop(self.clone(), self.cancel_signal()));
        BackgroundTasks { monitor, reaper }
    }
}

async fn monitor_loop(storage: Storage, mut cancel: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(storage.config().monitor_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match storage.end_expired_processes() {
                    Ok(0) => {}
                    Ok(ended) => tracing::info!(ended, "lifecycle monitor ended processes"),
                    Err(err) => tracing::error!(error = %err, "lifecycle monitor pass failed"),
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tracing::debug!("lifecycle monitor stopping");
                    return;
                }
            }
        }
    }
}

async fn reaper_loop(storage: Storage, mut cancel: watch::Receiver<bool>) {
    let max_age = storage.config().reservation_ttl();
    let mut ticker = tokio::time::interval(storage.config().reaper_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = storage.release_stale_reservations(max_age) {
                    tracing::error!(error = %err, "reservation reaper pass failed");
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tracing::debug!("reservation reaper stopping");
                    return;
                }
            }
        }
    }
}
