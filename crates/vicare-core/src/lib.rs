//! Core types shared across the ViCare bridge crates.
//!
//! This crate holds the configuration defaults, the event model and the
//! broadcast event bus that devices publish availability changes and flow
//! triggers through.

pub mod config;
pub mod event;
pub mod eventbus;

pub use event::{EventMetadata, VicareEvent};
pub use eventbus::{DEFAULT_CHANNEL_CAPACITY, EventBus, FilterBuilder, SharedEventBus, Subscription};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{endpoints, env_vars, polling};
    pub use crate::event::{EventMetadata, VicareEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
}
