//! ViCare device engine.
//!
//! This crate maps Viessmann cloud features onto host capabilities and keeps
//! them in sync.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `http` | ✅ | reqwest-based Viessmann API client |
//!
//! ## Architecture
//!
//! - **CapabilityTable**: static mapping from feature paths to capabilities
//! - **DeviceSession**: per-device state machine (init, poll, write, teardown)
//! - **PollScheduler**: one poll task per device on a shared, rate-limited interval
//! - **RemoteClient**: vendor API interface, implemented by `ViessmannClient`
//! - **DeviceHost**: the capability surface a device is exposed through
//!
//! A poll fetches feature records, the sync step extracts and maps values
//! and writes changed ones to the host. Host writes travel the other way
//! through the dispatcher as remote commands.

pub mod adapters;
pub mod capability;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod flow;
pub mod host;
pub mod pairing;
pub mod poller;
pub mod provisioner;
pub mod remote;
pub mod resolver;
pub mod session;
pub mod state;
pub mod sync;
pub mod table;

pub use capability::{
    CapabilityDescriptor, CapabilityOptions, CommandTemplate, EnumValue, FeatureDescriptor,
    FeaturePath,
};
pub use error::{DeviceError, RemoteError, RemoteResult, Result};
pub use extractor::extract_by_path;
pub use flow::{FlowAction, FlowCondition, FlowTrigger};
pub use host::{DeviceHost, HostCall, MemoryDeviceHost};
pub use pairing::{DiscoveredDevice, discover_devices, initial_features};
pub use poller::PollScheduler;
pub use provisioner::ReconcileReport;
pub use remote::{Device, DeviceAddress, FeatureRecord, Gateway, Installation, RemoteClient};
pub use resolver::ResolvedCapability;
pub use session::{
    AUTHENTICATION_REASON, DeviceSession, FailurePolicy, PollOutcome, SessionConfig,
};
pub use state::DeviceState;
pub use sync::SyncReport;
pub use table::{CapabilityTable, paths, roles};

#[cfg(feature = "http")]
pub use adapters::{ViessmannClient, ViessmannClientConfig};
