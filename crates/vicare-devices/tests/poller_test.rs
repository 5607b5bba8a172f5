//! Poll scheduling under paused time.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use vicare_devices::{PollScheduler, RemoteError, paths, roles};

const FLOOR: Duration = Duration::from_secs(100);

fn gaps(times: &[tokio::time::Instant]) -> Vec<u64> {
    times
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_first_poll_is_immediate_then_periodic() {
    let h = harness(&[roles::HEATPUMP], &[paths::HOT_WATER_TEMP]);
    h.session.on_init().await.unwrap();
    h.remote
        .set_features(vec![value_record(paths::HOT_WATER_TEMP, json!(45.0))])
        .await;

    let scheduler = PollScheduler::new(FLOOR);
    scheduler.add_device(h.session.clone()).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.remote.fetch_count().await, 1);
    assert_eq!(h.host.is_available().await, Some(true));

    tokio::time::sleep(Duration::from_secs(250)).await;
    assert_eq!(h.remote.fetch_count().await, 3);
    assert_eq!(gaps(&h.remote.fetch_times().await), vec![100, 100]);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_scales_with_device_count() {
    let a = harness_for("device-a", &[roles::HEATPUMP], &[]);
    let b = harness_for("device-b", &[roles::HEATPUMP], &[]);
    let scheduler = PollScheduler::new(FLOOR);

    scheduler.add_device(a.session.clone()).await;
    assert_eq!(scheduler.current_interval().await, FLOOR);

    // Device a polled at t=0; at t=50 b joins and a's wait restarts at 200s
    tokio::time::sleep(Duration::from_secs(50)).await;
    scheduler.add_device(b.session.clone()).await;
    assert_eq!(scheduler.current_interval().await, FLOOR * 2);

    tokio::time::sleep(Duration::from_secs(210)).await;
    let a_times = a.remote.fetch_times().await;
    let b_times = b.remote.fetch_times().await;
    assert_eq!(a_times.len(), 2);
    assert_eq!(gaps(&a_times), vec![250]);
    assert_eq!(b_times.len(), 2);
    assert_eq!(gaps(&b_times), vec![200]);

    let removed = scheduler.remove_device("device-b").await.unwrap();
    assert!(removed.is_torn_down());
    assert_eq!(scheduler.current_interval().await, FLOOR);
    assert_eq!(scheduler.device_count().await, 1);

    let b_count = b.remote.fetch_count().await;
    tokio::time::sleep(Duration::from_secs(500)).await;
    assert_eq!(b.remote.fetch_count().await, b_count);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_doubles_while_backing_off() {
    let h = harness(&[roles::HEATPUMP], &[]);
    h.remote
        .fail_fetches(Some(RemoteError::Transport("timeout".to_string())))
        .await;

    let scheduler = PollScheduler::new(FLOOR);
    scheduler.add_device(h.session.clone()).await;

    // Failures 1-4 at the floor, the 5th starts back-off
    tokio::time::sleep(Duration::from_secs(650)).await;
    assert_eq!(gaps(&h.remote.fetch_times().await), vec![100, 100, 100, 100, 200]);
    assert_eq!(h.host.is_available().await, Some(false));

    // Recovery restores the normal interval
    h.remote.fail_fetches(None).await;
    tokio::time::sleep(Duration::from_secs(400)).await;
    let gaps = gaps(&h.remote.fetch_times().await);
    assert_eq!(&gaps[5..], &[200, 100, 100]);
    assert_eq!(h.host.is_available().await, Some(true));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failures_keep_interval() {
    let h = harness(&[roles::HEATPUMP], &[]);
    h.remote
        .fail_fetches(Some(RemoteError::Unauthorized("revoked".to_string())))
        .await;

    let scheduler = PollScheduler::new(FLOOR);
    scheduler.add_device(h.session.clone()).await;

    tokio::time::sleep(Duration::from_secs(750)).await;
    let gaps = gaps(&h.remote.fetch_times().await);
    assert_eq!(gaps.len(), 7);
    assert!(gaps.iter().all(|g| *g == 100));

    scheduler.shutdown().await;
}
