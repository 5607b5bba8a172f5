//! Poll scheduler.
//!
//! Every device gets its own task that polls, then sleeps. The next sleep
//! only starts once the previous poll has returned, so polls of one device
//! never overlap. All devices share one account quota, so the interval is
//! the per-device floor times the device count and is pushed to every task
//! whenever a device comes or goes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vicare_core::config::aggregate_poll_interval;

use crate::session::{DeviceSession, PollOutcome};

struct ScheduledDevice {
    session: Arc<DeviceSession>,
    /// `None` stops the task.
    interval_tx: watch::Sender<Option<Duration>>,
    handle: JoinHandle<()>,
}

/// Runs one poll task per device.
pub struct PollScheduler {
    floor: Duration,
    devices: Mutex<BTreeMap<String, ScheduledDevice>>,
}

impl PollScheduler {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub async fn device_count(&self) -> usize {
        self.devices.lock().await.len()
    }

    /// Interval currently applied to every device.
    pub async fn current_interval(&self) -> Duration {
        aggregate_poll_interval(self.floor, self.device_count().await)
    }

    pub async fn session(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.devices
            .lock()
            .await
            .get(device_id)
            .map(|d| d.session.clone())
    }

    /// Start polling an initialized session. The first poll runs at once.
    ///
    /// A session already scheduled under the same id is replaced.
    pub async fn add_device(&self, session: Arc<DeviceSession>) {
        let device_id = session.device_id().to_string();
        let mut devices = self.devices.lock().await;

        if let Some(previous) = devices.remove(&device_id) {
            Self::stop(previous);
        }

        let interval = aggregate_poll_interval(self.floor, devices.len() + 1);
        let (interval_tx, interval_rx) = watch::channel(Some(interval));
        let handle = tokio::spawn(poll_loop(session.clone(), interval_rx));

        devices.insert(
            device_id.clone(),
            ScheduledDevice {
                session,
                interval_tx,
                handle,
            },
        );
        info!(category = "poll", device_id = %device_id, devices = devices.len(), "Device scheduled");
        self.apply_interval(&devices);
    }

    /// Stop polling a device and tear its session down.
    ///
    /// A poll already running completes against the closed session and
    /// changes nothing.
    pub async fn remove_device(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        let mut devices = self.devices.lock().await;
        let removed = devices.remove(device_id)?;
        let session = removed.session.clone();
        Self::stop(removed);
        info!(category = "poll", device_id = %device_id, devices = devices.len(), "Device unscheduled");
        self.apply_interval(&devices);
        Some(session)
    }

    /// Stop every device.
    pub async fn shutdown(&self) {
        let mut devices = self.devices.lock().await;
        for (_, scheduled) in std::mem::take(&mut *devices) {
            Self::stop(scheduled);
        }
    }

    fn stop(scheduled: ScheduledDevice) {
        scheduled.session.on_uninit();
        let _ = scheduled.interval_tx.send(None);
        // The handle is dropped, not aborted, so an in-flight poll can finish
        drop(scheduled.handle);
    }

    /// Push the recomputed interval to every device, one after another.
    fn apply_interval(&self, devices: &BTreeMap<String, ScheduledDevice>) {
        let interval = aggregate_poll_interval(self.floor, devices.len());
        for (device_id, scheduled) in devices {
            if scheduled.interval_tx.send(Some(interval)).is_err() {
                warn!(category = "poll", device_id = %device_id, "Poll task is gone");
            }
        }
        debug!(
            category = "poll",
            interval_secs = interval.as_secs(),
            devices = devices.len(),
            "Poll interval applied"
        );
    }
}

/// Poll, then wait for the interval (doubled while backing off). An
/// interval change restarts the wait without polling.
async fn poll_loop(session: Arc<DeviceSession>, mut interval_rx: watch::Receiver<Option<Duration>>) {
    let mut backoff = false;

    loop {
        let outcome = session.on_poll_tick().await;
        if outcome.is_success() {
            backoff = false;
        } else if outcome.requests_backoff() && !backoff {
            backoff = true;
            warn!(category = "poll", device_id = %session.device_id(), "Backing off poll interval");
        }
        if matches!(outcome, PollOutcome::Skipped) {
            return;
        }

        loop {
            let Some(interval) = *interval_rx.borrow_and_update() else {
                return;
            };
            let wait = if backoff {
                interval.saturating_mul(2)
            } else {
                interval
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
