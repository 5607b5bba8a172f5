//! Feature sync: one polled batch of feature records applied to the host.
//!
//! Per record the order is fixed: extract, check the capability is exposed,
//! map, compare against the cache, write. Only changed values reach the
//! host, so applying the same batch twice writes nothing the second time.

use tracing::{debug, info, trace};

use crate::context::DeviceContext;
use crate::dispatcher;
use crate::error::Result;
use crate::extractor::extract_by_path;
use crate::provisioner::{self, ReconcileReport};
use crate::remote::FeatureRecord;
use crate::state::DeviceState;
use crate::table::CapabilityTable;

/// Outcome of one applied batch.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Host value writes performed.
    pub writes: usize,
    /// Feature paths newly enabled by discovery.
    pub discovered: Vec<String>,
    /// Set when discovery triggered a provisioning pass.
    pub reconcile: Option<ReconcileReport>,
    /// Whether any feature's constraints changed.
    pub constraints_changed: bool,
}

/// Enable newly reported features and refresh constraints.
///
/// Returns the paths added to `enabled_features` and whether any
/// constraints changed.
fn discover(
    table: &CapabilityTable,
    state: &mut DeviceState,
    records: &[FeatureRecord],
) -> (Vec<String>, bool) {
    let mut discovered = Vec::new();
    let mut constraints_changed = false;

    for record in records.iter().filter(|r| r.is_active()) {
        if !state.enabled_features.contains(&record.feature) {
            state.enabled_features.insert(record.feature.clone());
            discovered.push(record.feature.clone());
        }
        if table.contains(&record.feature) {
            constraints_changed |= state.update_constraints(&record.feature, record.constraints());
        }
    }

    (discovered, constraints_changed)
}

/// Apply a batch of feature records.
///
/// With `discover_new_features`, enabled records not yet known to the
/// device are added to its feature set and the device is re-provisioned
/// before values are written. Marks the device available on success.
pub async fn apply_update(
    table: &CapabilityTable,
    state: &mut DeviceState,
    ctx: &DeviceContext,
    records: &[FeatureRecord],
    discover_new_features: bool,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    if discover_new_features {
        let (discovered, constraints_changed) = discover(table, state, records);
        report.constraints_changed = constraints_changed;
        if !discovered.is_empty() || constraints_changed {
            if !discovered.is_empty() {
                info!(
                    category = "sync",
                    device_id = %ctx.device_id,
                    count = discovered.len(),
                    "Discovered new features"
                );
            }
            report.reconcile = Some(provisioner::reconcile(table, state, ctx).await);
            dispatcher::register_listeners(table, state, ctx).await?;
        }
        report.discovered = discovered;
    }

    for record in records {
        if !record.is_enabled || !record.has_properties() || record.is_disconnected() {
            continue;
        }
        let Some(feature) = table.feature(&record.feature) else {
            trace!(category = "sync", feature = %record.feature, "Unmodelled feature");
            continue;
        };
        if !feature.is_role_eligible(&state.roles) {
            continue;
        }

        let properties = serde_json::Value::Object(record.properties.clone());
        for descriptor in &feature.capabilities {
            let Some(raw) = extract_by_path(&properties, &descriptor.property_path) else {
                continue;
            };
            let name = &descriptor.capability_name;
            if !ctx.host.has_capability(name).await {
                continue;
            }
            let value = descriptor.map_read(raw);
            if ctx.write_if_changed(state, name, value, "sync").await? {
                report.writes += 1;
            }
        }
    }

    ctx.mark_available(state).await?;

    debug!(
        category = "sync",
        device_id = %ctx.device_id,
        records = records.len(),
        writes = report.writes,
        "Applied feature update"
    );

    Ok(report)
}
