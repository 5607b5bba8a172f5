//! Remote client implementations.

#[cfg(feature = "http")]
pub mod viessmann;

#[cfg(feature = "http")]
pub use viessmann::{ViessmannClient, ViessmannClientConfig};
