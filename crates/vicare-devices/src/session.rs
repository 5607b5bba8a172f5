//! Device session: one paired device's state machine.
//!
//! A session is driven from outside through four calls: [`on_init`],
//! [`on_poll_tick`], [`on_capability_write`] and [`on_uninit`]. Polls and
//! writes for one device are serialized on the session lock; different
//! devices never share state.
//!
//! [`on_init`]: DeviceSession::on_init
//! [`on_poll_tick`]: DeviceSession::on_poll_tick
//! [`on_capability_write`]: DeviceSession::on_capability_write
//! [`on_uninit`]: DeviceSession::on_uninit

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vicare_core::SharedEventBus;
use vicare_core::config::polling;
use vicare_storage::{DeviceStateStore, PathConstraints};

use crate::context::DeviceContext;
use crate::dispatcher;
use crate::error::{DeviceError, Result};
use crate::host::DeviceHost;
use crate::provisioner::{self, ReconcileReport};
use crate::remote::{DeviceAddress, RemoteClient};
use crate::state::DeviceState;
use crate::sync::{self, SyncReport};
use crate::table::CapabilityTable;

/// Reason shown when the account's credentials stop working.
pub const AUTHENTICATION_REASON: &str = "Authentication failed, please re-authorize the ViCare account";

/// When consecutive poll failures escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub unavailable_after: u32,
    pub backoff_after: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            unavailable_after: polling::UNAVAILABLE_AFTER_FAILURES,
            backoff_after: polling::BACKOFF_AFTER_FAILURES,
        }
    }
}

/// What a failure means for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureVerdict {
    pub consecutive: u32,
    pub mark_unavailable: bool,
    pub backoff: bool,
}

/// Consecutive poll failure counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureCounter {
    consecutive: u32,
    policy: FailurePolicy,
}

impl FailureCounter {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            consecutive: 0,
            policy,
        }
    }

    /// Count a failure. Authentication failures count toward
    /// unavailability but never request back-off.
    pub fn record(&mut self, authentication: bool) -> FailureVerdict {
        self.consecutive = self.consecutive.saturating_add(1);
        FailureVerdict {
            consecutive: self.consecutive,
            mark_unavailable: self.consecutive >= self.policy.unavailable_after,
            backoff: !authentication && self.consecutive >= self.policy.backoff_after,
        }
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Result of one poll tick.
#[derive(Debug)]
pub enum PollOutcome {
    Synced(SyncReport),
    /// The feature fetch failed.
    FetchFailed {
        consecutive: u32,
        backoff: bool,
        authentication: bool,
    },
    /// The batch was fetched but could not be applied.
    ApplyFailed(String),
    /// The session was torn down; nothing was touched.
    Skipped,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Synced(_))
    }

    pub fn requests_backoff(&self) -> bool {
        matches!(self, PollOutcome::FetchFailed { backoff: true, .. })
    }
}

/// Static per-device settings, usually from pairing or the config file.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_id: String,
    pub address: DeviceAddress,
    /// Used when nothing is persisted yet.
    pub roles: Vec<String>,
    /// Merged over persisted overrides.
    pub path_overrides: BTreeMap<String, String>,
    /// Features known at pairing time.
    pub initial_features: BTreeSet<String>,
    /// Constraints reported at pairing time; replace persisted ones.
    pub initial_constraints: BTreeMap<String, PathConstraints>,
    pub failure_policy: FailurePolicy,
}

impl SessionConfig {
    pub fn new(device_id: impl Into<String>, address: DeviceAddress) -> Self {
        Self {
            device_id: device_id.into(),
            address,
            roles: Vec::new(),
            path_overrides: BTreeMap::new(),
            initial_features: BTreeSet::new(),
            initial_constraints: BTreeMap::new(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_constraints(mut self, constraints: BTreeMap<String, PathConstraints>) -> Self {
        self.initial_constraints = constraints;
        self
    }

    pub fn with_path_override(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.path_overrides.insert(from.into(), to.into());
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

struct SessionInner {
    table: Arc<CapabilityTable>,
    state: DeviceState,
    failures: FailureCounter,
}

/// Runtime of one paired device.
pub struct DeviceSession {
    ctx: DeviceContext,
    config: SessionConfig,
    base_table: Arc<CapabilityTable>,
    store: DeviceStateStore,
    inner: Mutex<SessionInner>,
    torn_down: AtomicBool,
}

impl DeviceSession {
    pub fn new(
        config: SessionConfig,
        base_table: Arc<CapabilityTable>,
        host: Arc<dyn DeviceHost>,
        remote: Arc<dyn RemoteClient>,
        store: DeviceStateStore,
    ) -> Self {
        let ctx = DeviceContext::new(config.device_id.clone(), config.address.clone(), host, remote);
        let inner = SessionInner {
            table: base_table.clone(),
            state: DeviceState::new(config.roles.clone()),
            failures: FailureCounter::new(config.failure_policy),
        };
        Self {
            ctx,
            config,
            base_table,
            store,
            inner: Mutex::new(inner),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.ctx = self.ctx.with_events(events);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.ctx.device_id
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.ctx.address
    }

    pub fn host(&self) -> &Arc<dyn DeviceHost> {
        &self.ctx.host
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Table before this device's path overrides are applied.
    pub fn base_table(&self) -> &Arc<CapabilityTable> {
        &self.base_table
    }

    /// Effective capability table of this device.
    pub async fn table(&self) -> Arc<CapabilityTable> {
        self.inner.lock().await.table.clone()
    }

    pub async fn state(&self) -> DeviceState {
        self.inner.lock().await.state.clone()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.failures.consecutive()
    }

    pub async fn capability_value(&self, name: &str) -> Option<Value> {
        self.ctx.host.get_capability_value(name).await
    }

    /// Load persisted state, seed the value cache and provision.
    pub async fn on_init(&self) -> Result<ReconcileReport> {
        let device_id = self.device_id();
        let mut inner = self.inner.lock().await;

        self.store.upgrade(device_id)?;
        let persisted = self.store.load(device_id)?;
        let mut state = DeviceState::from_persisted(persisted);

        if state.roles.is_empty() {
            state.roles = self.config.roles.clone();
        }
        state
            .enabled_features
            .extend(self.config.initial_features.iter().cloned());
        for (path, constraints) in &self.config.initial_constraints {
            state.update_constraints(path, constraints.clone());
        }
        for (from, to) in &self.config.path_overrides {
            state.path_overrides.insert(from.clone(), to.clone());
        }

        let table = if state.path_overrides.is_empty() {
            self.base_table.clone()
        } else {
            Arc::new(self.base_table.effective_for(&state.path_overrides))
        };

        for name in self.ctx.host.get_capabilities().await {
            if let Some(value) = self.ctx.host.get_capability_value(&name).await {
                state.current_values.insert(name, value);
            }
        }

        let report = provisioner::reconcile(&table, &mut state, &self.ctx).await;
        dispatcher::register_listeners(&table, &mut state, &self.ctx).await?;

        inner.table = table;
        inner.state = state;
        self.persist(&inner.state);

        info!(
            category = "device",
            device_id = %device_id,
            roles = ?inner.state.roles,
            features = inner.state.enabled_features.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            "Device session initialized"
        );

        Ok(report)
    }

    /// Fetch and apply the device's features.
    ///
    /// Never fails: errors become availability transitions.
    pub async fn on_poll_tick(&self) -> PollOutcome {
        if self.is_torn_down() {
            return PollOutcome::Skipped;
        }
        let mut inner = self.inner.lock().await;
        if self.is_torn_down() {
            return PollOutcome::Skipped;
        }

        let table = inner.table.clone();
        let filter = table.paths();
        let fetched = self
            .ctx
            .remote
            .get_features(&self.ctx.address, Some(&filter))
            .await;

        if self.is_torn_down() {
            debug!(category = "poll", device_id = %self.device_id(), "Poll completed after teardown, dropped");
            return PollOutcome::Skipped;
        }

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                let e = DeviceError::from(e);
                let authentication = e.is_authentication();
                let verdict = inner.failures.record(authentication);
                warn!(
                    category = "poll",
                    device_id = %self.device_id(),
                    consecutive = verdict.consecutive,
                    error = %e,
                    "Feature fetch failed"
                );
                if verdict.mark_unavailable {
                    let reason = match &e {
                        DeviceError::Authentication(_) => AUTHENTICATION_REASON.to_string(),
                        other => other.to_string(),
                    };
                    self.ctx.mark_unavailable(&mut inner.state, &reason).await;
                }
                return PollOutcome::FetchFailed {
                    consecutive: verdict.consecutive,
                    backoff: verdict.backoff,
                    authentication,
                };
            }
        };

        match sync::apply_update(&table, &mut inner.state, &self.ctx, &records, true).await {
            Ok(report) => {
                inner.failures.reset();
                self.persist(&inner.state);
                PollOutcome::Synced(report)
            }
            Err(e) => {
                error!(
                    category = "sync",
                    device_id = %self.device_id(),
                    error = %e,
                    "Failed to apply feature update"
                );
                let reason = e.to_string();
                self.ctx.mark_unavailable(&mut inner.state, &reason).await;
                PollOutcome::ApplyFailed(reason)
            }
        }
    }

    /// Handle a user or automation write of a capability.
    ///
    /// Remote errors are returned to the caller unchanged.
    pub async fn on_capability_write(&self, name: &str, value: Value) -> Result<()> {
        if self.is_torn_down() {
            return Err(DeviceError::Host(format!(
                "device {} has been removed",
                self.device_id()
            )));
        }
        let mut inner = self.inner.lock().await;
        let table = inner.table.clone();
        let resolved = table.find_descriptor_by_capability_name(name).ok_or_else(|| {
            DeviceError::ConfigLookup(format!("No capability found with name: {}", name))
        })?;

        dispatcher::execute_command(
            &self.ctx,
            &mut inner.state,
            resolved.path,
            resolved.descriptor,
            value,
        )
        .await
    }

    /// Tear the session down. In-flight work finishes as a no-op.
    pub fn on_uninit(&self) {
        if !self.torn_down.swap(true, Ordering::SeqCst) {
            info!(category = "device", device_id = %self.device_id(), "Device session closed");
        }
    }

    fn persist(&self, state: &DeviceState) {
        if let Err(e) = self.store.save(self.device_id(), &state.to_persisted()) {
            warn!(
                category = "storage",
                device_id = %self.device_id(),
                error = %e,
                "Failed to persist device state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_thresholds() {
        let mut counter = FailureCounter::new(FailurePolicy::default());
        let verdicts: Vec<FailureVerdict> = (0..5).map(|_| counter.record(false)).collect();

        assert!(!verdicts[1].mark_unavailable);
        assert!(verdicts[2].mark_unavailable);
        assert!(!verdicts[3].backoff);
        assert!(verdicts[4].backoff);

        counter.reset();
        assert_eq!(counter.consecutive(), 0);
    }

    #[test]
    fn test_authentication_failures_never_back_off() {
        let mut counter = FailureCounter::new(FailurePolicy::default());
        let last = (0..6).map(|_| counter.record(true)).last().unwrap();
        assert!(last.mark_unavailable);
        assert!(!last.backoff);
    }
}
