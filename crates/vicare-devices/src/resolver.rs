//! Lookups over the capability table.
//!
//! All functions are pure. The failing variants are for callers holding a
//! path or name they expect to exist (flow cards, command writes); a miss
//! there is a table defect and surfaces as [`DeviceError::ConfigLookup`].

use crate::capability::{CapabilityDescriptor, CapabilityOptions, FeatureDescriptor};
use crate::error::{DeviceError, Result};
use crate::table::CapabilityTable;

/// A capability descriptor together with where it lives in the table.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCapability<'a> {
    pub path: &'a str,
    pub feature: &'a FeatureDescriptor,
    pub descriptor: &'a CapabilityDescriptor,
}

impl<'a> ResolvedCapability<'a> {
    pub fn require_role(&self) -> Option<&'a str> {
        self.feature.require_role.as_deref()
    }
}

impl CapabilityTable {
    /// First capability of `path`.
    pub fn get_capability(&self, path: &str) -> Result<&CapabilityDescriptor> {
        self.get_all_capabilities(path)?
            .first()
            .ok_or_else(|| DeviceError::ConfigLookup(format!("No capability found for feature: {}", path)))
    }

    /// Every capability of `path`.
    pub fn get_all_capabilities(&self, path: &str) -> Result<&[CapabilityDescriptor]> {
        match self.feature(path) {
            Some(feature) if !feature.capabilities.is_empty() => Ok(&feature.capabilities),
            _ => Err(DeviceError::ConfigLookup(format!(
                "No capabilities found for feature: {}",
                path
            ))),
        }
    }

    /// Options of the capability called `name`.
    pub fn get_capability_options(&self, name: &str) -> Result<&CapabilityOptions> {
        self.find_descriptor_by_capability_name(name)
            .map(|resolved| &resolved.descriptor.options)
            .ok_or_else(|| {
                DeviceError::ConfigLookup(format!("No capability options found for: {}", name))
            })
    }

    /// Non-failing reverse lookup: capability name -> owning entry.
    pub fn find_descriptor_by_capability_name(&self, name: &str) -> Option<ResolvedCapability<'_>> {
        self.owners_of(name).next()
    }

    /// Every entry that declares a capability called `name`.
    pub fn owners_of<'a>(&'a self, name: &str) -> impl Iterator<Item = ResolvedCapability<'a>> + 'a {
        let name = name.to_owned();
        self.iter().filter_map(move |(path, feature)| {
            feature.capability(&name).map(|descriptor| ResolvedCapability {
                path,
                feature,
                descriptor,
            })
        })
    }

    /// Every capability name, in table order.
    pub fn capability_names(&self) -> Vec<&str> {
        self.iter()
            .flat_map(|(_, feature)| feature.capabilities.iter())
            .map(|c| c.capability_name.as_str())
            .collect()
    }
}
