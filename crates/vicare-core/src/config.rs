//! Configuration defaults shared by every crate.
//!
//! Constants and small env-var helpers live here so the CLI, the poll
//! scheduler and the tests agree on the same numbers.

use std::time::Duration;

/// Remote API endpoints.
pub mod endpoints {
    pub const VIESSMANN_API: &str = "https://api.viessmann.com/iot/v2";
}

/// Polling and failure-escalation defaults.
pub mod polling {
    /// Per-device poll floor in seconds. The aggregate interval is this value
    /// multiplied by the number of paired devices.
    pub const DEFAULT_POLL_FLOOR_SECS: u64 = 120;
    /// Consecutive failures before a device is marked unavailable.
    pub const UNAVAILABLE_AFTER_FAILURES: u32 = 3;
    /// Consecutive non-auth failures before the poll interval is doubled.
    pub const BACKOFF_AFTER_FAILURES: u32 = 5;
    /// HTTP request timeout in seconds.
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// Environment variable names.
pub mod env_vars {
    use super::polling;

    pub const ACCESS_TOKEN: &str = "VICARE_ACCESS_TOKEN";
    pub const API_URL: &str = "VICARE_API_URL";
    pub const POLL_FLOOR_SECS: &str = "VICARE_POLL_FLOOR_SECS";
    pub const LOG_JSON: &str = "VICARE_LOG_JSON";
    pub const CONFIG_PATH: &str = "VICARE_CONFIG";

    /// Poll floor from the environment, or the default.
    pub fn poll_floor_secs() -> u64 {
        std::env::var(POLL_FLOOR_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(polling::DEFAULT_POLL_FLOOR_SECS)
    }

    /// API base url from the environment, or the public endpoint.
    pub fn api_url() -> String {
        std::env::var(API_URL).unwrap_or_else(|_| super::endpoints::VIESSMANN_API.to_string())
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Aggregate poll interval for `device_count` devices sharing one account.
///
/// The vendor rate limit is per account, so every extra device stretches the
/// interval of all of them. A count of zero is treated as one.
pub fn aggregate_poll_interval(floor: Duration, device_count: usize) -> Duration {
    let count = device_count.max(1) as u32;
    floor.saturating_mul(count)
}

/// Normalize an API base url: trim whitespace and trailing slashes.
pub fn normalize_api_url(url: impl Into<String>) -> String {
    let url = url.into();
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_interval_scales_with_device_count() {
        let floor = Duration::from_secs(120);
        assert_eq!(aggregate_poll_interval(floor, 0), Duration::from_secs(120));
        assert_eq!(aggregate_poll_interval(floor, 1), Duration::from_secs(120));
        assert_eq!(aggregate_poll_interval(floor, 3), Duration::from_secs(360));
    }

    #[test]
    fn test_normalize_api_url() {
        assert_eq!(
            normalize_api_url(" https://api.viessmann.com/iot/v2/ "),
            "https://api.viessmann.com/iot/v2"
        );
    }
}
