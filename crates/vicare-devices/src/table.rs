//! The capability table: remote feature paths mapped to host capabilities.
//!
//! [`CapabilityTable::viessmann`] is built once per process and never
//! mutated. Installations whose paths differ (another circuit or compressor
//! index) get their own copy through [`CapabilityTable::effective_for`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use crate::capability::{
    CapabilityDescriptor, CapabilityOptions, CommandTemplate, EnumValue, FeatureDescriptor,
};

/// Feature paths of the Viessmann API data points.
pub mod paths {
    pub const HOT_WATER_TEMP: &str = "heating.dhw.sensors.temperature.hotWaterStorage";
    pub const HOT_WATER_TARGET: &str = "heating.dhw.temperature.main";
    pub const HOT_WATER_TARGET_2: &str = "heating.dhw.temperature.temp2";
    pub const HEATING_CIRCUIT_0_TARGET: &str = "heating.circuits.0.operating.programs.normal";
    pub const HOT_WATER_CHARGE: &str = "heating.dhw.oneTimeCharge";
    pub const HEATING_CIRCUIT_0_MODE: &str = "heating.circuits.0.operating.modes.active";
    pub const OUTSIDE_TEMP: &str = "heating.sensors.temperature.outside";
    pub const HEATING_CIRCUIT_0_ROOM_TEMP: &str = "heating.circuits.0.sensors.temperature.room";
    pub const HEATING_CIRCUIT_0_TEMP: &str = "heating.circuits.0.temperature";
    pub const HEATING_CIRCUIT_0_SUPPLY_TEMP: &str =
        "heating.circuits.0.sensors.temperature.supply";
    pub const BUFFER_TEMP: &str = "heating.bufferCylinder.sensors.temperature.main";
    pub const RETURN_TEMP: &str = "heating.sensors.temperature.return";
    pub const PRIMARY_SUPPLY_TEMP: &str = "heating.primaryCircuit.sensors.temperature.supply";
    pub const PRIMARY_RETURN_TEMP: &str = "heating.primaryCircuit.sensors.temperature.return";
    pub const SECONDARY_SUPPLY_TEMP: &str = "heating.secondaryCircuit.sensors.temperature.supply";
    pub const BOILER_MAIN_TEMP: &str = "heating.boiler.sensors.temperature.main";
    pub const BOILER_COMMON_SUPPLY_TEMP: &str = "heating.boiler.sensors.temperature.commonSupply";
    pub const COMPRESSOR: &str = "heating.compressors.0";
    pub const COMPRESSOR_STATS: &str = "heating.compressors.0.statistics";
    pub const BURNER: &str = "heating.burners.0";
    pub const BURNER_MODULATION: &str = "heating.burners.0.modulation";
    pub const BURNER_STATS: &str = "heating.burners.0.statistics";
    pub const FUEL_CELL_RETURN_TEMP: &str = "fuelCell.sensors.temperature.return";
    pub const FUEL_CELL_SUPPLY_TEMP: &str = "fuelCell.sensors.temperature.supply";
    pub const FUEL_CELL_STATS: &str = "fuelCell.statistics";
    pub const FUEL_CELL_PHASE: &str = "fuelCell.operating.phase";
    pub const FUEL_CELL_MODE: &str = "fuelCell.operating.modes.active";
}

/// Role tags reported by the devices endpoint.
pub mod roles {
    pub const HEATPUMP: &str = "type:heatpump";
    pub const BOILER: &str = "type:boiler";
}

/// Ordered map of feature path -> feature descriptor.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: Vec<(String, FeatureDescriptor)>,
    index: HashMap<String, usize>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the descriptor of `path`.
    pub fn insert(&mut self, path: impl Into<String>, feature: FeatureDescriptor) {
        let path = path.into();
        match self.index.get(&path) {
            Some(&i) => self.entries[i].1 = feature,
            None => {
                self.index.insert(path.clone(), self.entries.len());
                self.entries.push((path, feature));
            }
        }
    }

    pub fn with_feature(mut self, path: impl Into<String>, feature: FeatureDescriptor) -> Self {
        self.insert(path, feature);
        self
    }

    pub fn feature(&self, path: &str) -> Option<&FeatureDescriptor> {
        self.index.get(path).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureDescriptor)> {
        self.entries.iter().map(|(p, f)| (p.as_str(), f))
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of this table with path segments substituted.
    ///
    /// Each override maps a run of whole segments to its replacement, so
    /// `circuits.0 -> circuits.1` rewrites `heating.circuits.0.temperature`
    /// but leaves `heating.circuits.01` alone.
    pub fn effective_for(&self, overrides: &BTreeMap<String, String>) -> CapabilityTable {
        let mut table = CapabilityTable::new();
        for (path, feature) in &self.entries {
            let mut effective = path.clone();
            for (from, to) in overrides {
                effective = substitute_segments(&effective, from, to);
            }
            table.insert(effective, feature.clone());
        }
        table
    }

    /// The shipped Viessmann table.
    pub fn viessmann() -> Arc<CapabilityTable> {
        static TABLE: OnceLock<Arc<CapabilityTable>> = OnceLock::new();
        TABLE.get_or_init(|| Arc::new(build_viessmann_table())).clone()
    }
}

/// Replace every occurrence of the segment run `from` in `path` by `to`.
fn substitute_segments(path: &str, from: &str, to: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    let pattern: Vec<&str> = from.split('.').collect();
    if from.is_empty() || pattern.len() > segments.len() {
        return path.to_string();
    }

    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    let mut i = 0;
    while i < segments.len() {
        if segments[i..].starts_with(&pattern) {
            out.push(to);
            i += pattern.len();
        } else {
            out.push(segments[i]);
            i += 1;
        }
    }
    out.join(".")
}

fn temperature(name: &str, title: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        format!("measure_temperature.{}", name),
        "value.value",
        CapabilityOptions::titled(title)
            .with_units("°C")
            .with_decimals(1),
    )
}

fn untagged_temperature(name: &str, title: &str) -> CapabilityDescriptor {
    let mut desc = temperature(name, title);
    desc.options.prevent_tag = true;
    desc
}

fn thermostat(name: &str, title: &str, max: f64) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        format!("target_temperature.{}", name),
        "value.value",
        CapabilityOptions::titled(title)
            .with_units("°C")
            .with_range(10.0, max, 1.0)
            .prevent_insights(true),
    )
    .with_command(CommandTemplate::named("setTargetTemperature", "temperature"))
}

fn active(name: &str, title: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        format!("measure_{}_active", name),
        "active.value",
        CapabilityOptions::titled(title),
    )
}

fn modulation(name: &str, title: &str) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        format!("measure_{}_number.{}Modulation", name, name),
        "value.value",
        CapabilityOptions::titled(title)
            .with_units("%")
            .prevent_tag(true),
    )
}

fn counter(
    capability: String,
    property_path: &str,
    title: String,
    units: &str,
) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        capability,
        property_path,
        CapabilityOptions::titled(title)
            .with_units(units)
            .prevent_insights(true)
            .prevent_tag(true),
    )
}

fn statistics(prefix: &str, unit_name: &str) -> Vec<CapabilityDescriptor> {
    vec![
        counter(
            format!("measure_{}_number.{}Hours", prefix, prefix),
            "hours.value",
            format!("{} runtime", unit_name),
            "hours",
        ),
        counter(
            format!("measure_{}_number.{}Starts", prefix, prefix),
            "starts.value",
            format!("{} starts", unit_name),
            "times",
        ),
    ]
}

fn mode(name: &str, title: &str, values: &[(&str, &str)]) -> CapabilityDescriptor {
    CapabilityDescriptor::new(
        format!("thermostat_mode.{}", name),
        "value.value",
        CapabilityOptions::titled(title)
            .with_values(
                values
                    .iter()
                    .map(|(id, title)| EnumValue::new(*id, *title))
                    .collect(),
            )
            .prevent_insights(true),
    )
    .with_command(CommandTemplate::named("setMode", "mode"))
}

fn build_viessmann_table() -> CapabilityTable {
    use paths::*;

    let one = |desc: CapabilityDescriptor| FeatureDescriptor::new(vec![desc]);

    let mut heating_target = thermostat("heating", "Heating thermostat", 30.0);
    heating_target.property_path = "temperature.value".to_string();
    heating_target.command = Some(CommandTemplate::named("setTemperature", "targetTemperature"));

    let mut burner = active("burner", "Burner running");
    burner.options = burner.options.with_bool_titles("Yes", "No");

    let one_time_charge = CapabilityDescriptor::new(
        "thermostat_mode.hotWaterOneTimeCharge",
        "active.value",
        CapabilityOptions::titled("Hot water one time charge")
            .with_values(vec![
                EnumValue::new("activate", "Active"),
                EnumValue::new("deactivate", "Inactive"),
            ])
            .prevent_insights(true),
    )
    .with_command(CommandTemplate::ValueAsCommand)
    .with_value_mapping([("true", "activate"), ("false", "deactivate")]);

    CapabilityTable::new()
        .with_feature(HOT_WATER_TEMP, one(temperature("hotWater", "Hot water temperature")))
        .with_feature(OUTSIDE_TEMP, one(temperature("outside", "Outside temperature")))
        .with_feature(BUFFER_TEMP, one(temperature("buffer", "Buffer cylinder temperature")))
        .with_feature(HOT_WATER_TARGET, one(thermostat("hotWater", "Hot water Normal", 60.0)))
        .with_feature(HOT_WATER_TARGET_2, one(thermostat("hotWater2", "Hot water Temp 2", 60.0)))
        .with_feature(HEATING_CIRCUIT_0_TARGET, one(heating_target))
        .with_feature(
            COMPRESSOR,
            one(active("compressor", "Compressor running")).requiring_role(roles::HEATPUMP),
        )
        .with_feature(BURNER, one(burner))
        .with_feature(
            COMPRESSOR_STATS,
            FeatureDescriptor::new(statistics("compressor", "Compressor"))
                .requiring_role(roles::HEATPUMP),
        )
        .with_feature(BURNER_STATS, FeatureDescriptor::new(statistics("burner", "Burner")))
        .with_feature(BURNER_MODULATION, one(modulation("burner", "Burner modulation")))
        .with_feature(RETURN_TEMP, one(temperature("return", "Heating return temperature")))
        .with_feature(
            HEATING_CIRCUIT_0_MODE,
            one(mode(
                "heating",
                "Operating mode",
                &[
                    ("dhw", "Hot water"),
                    ("dhwAndHeating", "Hot water and heating"),
                    ("heating", "Heating"),
                    ("standby", "Standby"),
                ],
            )),
        )
        .with_feature(
            PRIMARY_SUPPLY_TEMP,
            one(untagged_temperature("supply", "Primary supply temperature")),
        )
        .with_feature(
            PRIMARY_RETURN_TEMP,
            one(untagged_temperature("primaryReturn", "Primary return temperature")),
        )
        .with_feature(
            SECONDARY_SUPPLY_TEMP,
            one(untagged_temperature("secondarySupply", "Secondary supply temperature")),
        )
        .with_feature(
            HEATING_CIRCUIT_0_TEMP,
            one(untagged_temperature("circuit0", "Heating circuit target temperature")),
        )
        .with_feature(
            BOILER_COMMON_SUPPLY_TEMP,
            one(untagged_temperature("boilerCommonSupply", "Boiler exit temperature"))
                .requiring_role(roles::BOILER),
        )
        .with_feature(
            BOILER_MAIN_TEMP,
            one(temperature("boiler_main", "Boiler main temperature")).requiring_role(roles::BOILER),
        )
        .with_feature(
            HEATING_CIRCUIT_0_SUPPLY_TEMP,
            one(untagged_temperature("circuit0_supply", "Heating circuit supply temperature")),
        )
        .with_feature(
            HEATING_CIRCUIT_0_ROOM_TEMP,
            one(temperature("circuit0_room", "Room temperature")),
        )
        .with_feature(HOT_WATER_CHARGE, one(one_time_charge))
        .with_feature(
            FUEL_CELL_RETURN_TEMP,
            one(untagged_temperature("fuelCellReturn", "Fuel cell return temperature")),
        )
        .with_feature(
            FUEL_CELL_SUPPLY_TEMP,
            one(untagged_temperature("fuelCellSupply", "Fuel cell supply temperature")),
        )
        .with_feature(
            FUEL_CELL_STATS,
            FeatureDescriptor::new(vec![
                counter(
                    "measure_fuelcell_number.operationHours".to_string(),
                    "operationHours.value",
                    "Fuel cell operation hours".to_string(),
                    "hours",
                ),
                counter(
                    "measure_fuelcell_number.productionHours".to_string(),
                    "productionHours.value",
                    "Fuel cell production hours".to_string(),
                    "hours",
                ),
                counter(
                    "measure_fuelcell_number.productionStarts".to_string(),
                    "productionStarts.value",
                    "Fuel cell starts".to_string(),
                    "times",
                ),
            ]),
        )
        .with_feature(
            FUEL_CELL_PHASE,
            one(CapabilityDescriptor::new(
                "measure_fuelcell_phase",
                "value.value",
                CapabilityOptions::titled("Fuel cell phase"),
            )),
        )
        .with_feature(
            FUEL_CELL_MODE,
            one(mode(
                "fuelCell",
                "Fuel cell mode",
                &[
                    ("standby", "Standby"),
                    ("maintenance", "Maintenance"),
                    ("heatControlled", "Heat controlled"),
                    ("economical", "Economical"),
                    ("ecological", "Ecological"),
                ],
            )),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_viessmann_table_is_shared() {
        let a = CapabilityTable::viessmann();
        let b = CapabilityTable::viessmann();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.contains(paths::HOT_WATER_TEMP));
    }

    #[test]
    fn test_capability_names_are_unique() {
        let table = CapabilityTable::viessmann();
        let mut seen = HashSet::new();
        for (_, feature) in table.iter() {
            for cap in &feature.capabilities {
                assert!(seen.insert(cap.capability_name.clone()), "{}", cap.capability_name);
            }
        }
    }

    #[test]
    fn test_compressor_requires_heatpump() {
        let table = CapabilityTable::viessmann();
        let feature = table.feature(paths::COMPRESSOR).unwrap();
        assert_eq!(feature.require_role.as_deref(), Some(roles::HEATPUMP));
        assert_eq!(
            feature.capabilities[0].capability_name,
            "measure_compressor_active"
        );
    }

    #[test]
    fn test_substitute_segments_matches_whole_segments() {
        assert_eq!(
            substitute_segments("heating.circuits.0.temperature", "circuits.0", "circuits.1"),
            "heating.circuits.1.temperature"
        );
        assert_eq!(
            substitute_segments("heating.circuits.01", "circuits.0", "circuits.1"),
            "heating.circuits.01"
        );
        assert_eq!(substitute_segments("a.b", "", "x"), "a.b");
    }

    #[test]
    fn test_effective_table_leaves_base_untouched() {
        let base = CapabilityTable::viessmann();
        let mut overrides = BTreeMap::new();
        overrides.insert("compressors.0".to_string(), "compressors.1".to_string());

        let effective = base.effective_for(&overrides);
        assert!(effective.contains("heating.compressors.1"));
        assert!(effective.contains("heating.compressors.1.statistics"));
        assert!(!effective.contains(paths::COMPRESSOR));
        assert!(base.contains(paths::COMPRESSOR));
        assert_eq!(effective.len(), base.len());
    }
}
