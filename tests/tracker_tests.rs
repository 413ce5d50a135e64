mod support;

use std::sync::Arc;
use std::time::Duration;

use ridecell::config::Config;
use ridecell::location::ManualLocation;
use ridecell::models::{LocationPoint, RequestStatus};
use ridecell::profile::StaticProfiles;
use ridecell::request::RequestService;
use ridecell::store::MemoryStore;
use ridecell::tracker::DriverLocationTracker;

use support::config;

/// 1 米约等于的纬度
const METER_IN_DEGREES: f64 = 1.0 / 111_194.93;

async fn assigned_request(store: &MemoryStore) -> ridecell::models::RideRequest {
    let profiles = Arc::new(StaticProfiles::new());
    let rider = RequestService::new(Arc::new(store.clone()), profiles.clone(), config(), "rider");
    let driver = RequestService::new(Arc::new(store.clone()), profiles, config(), "driver");

    let request = rider
        .create_request(LocationPoint::new(19.4326, -99.1332), None)
        .await
        .unwrap();
    let assigned = driver
        .assign_driver(&request.reference(), "driver")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(assigned.status, RequestStatus::Assigned);
    assigned
}

#[tokio::test]
async fn sample_publishes_first_then_only_real_movement() {
    let store = MemoryStore::new();
    let request = assigned_request(&store).await;
    let location = Arc::new(ManualLocation::at(19.4326, -99.1332));
    let tracker = DriverLocationTracker::new(
        Arc::new(store.clone()),
        location.clone(),
        &Config::default(),
    );

    // 未开始跟踪时不发布
    assert!(!tracker.sample_location().await);

    let mut tracker = tracker;
    tracker.start_tracking(request.cell_id.clone(), request.request_id.clone());
    assert!(tracker.is_tracking());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // 计时器的首次采样已经发布过，原地不动不再发布
    assert!(!tracker.sample_location().await);
    assert!(!tracker.sample_location().await);

    location.set(19.4326 + 5.0 * METER_IN_DEGREES, -99.1332);
    assert!(tracker.sample_location().await);

    let service = RequestService::new(
        Arc::new(store.clone()),
        Arc::new(StaticProfiles::new()),
        config(),
        "driver",
    );
    let stored = service
        .get_request(&request.reference())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.driver_lat, Some(19.4326 + 5.0 * METER_IN_DEGREES));
    assert!(stored.driver_location_updated_at.is_some());
    assert_eq!(tracker.buffer().len(), 3);

    tracker.stop_tracking();
    assert!(!tracker.is_tracking());
    assert!(tracker.buffer().is_empty());
    assert!(tracker.should_publish(&LocationPoint::new(0.0, 0.0)));
}

#[tokio::test(start_paused = true)]
async fn restart_resets_buffer_and_timer() {
    let store = MemoryStore::new();
    let request = assigned_request(&store).await;
    let location = Arc::new(ManualLocation::at(19.4326, -99.1332));
    let mut tracker = DriverLocationTracker::new(
        Arc::new(store.clone()),
        location.clone(),
        &Config::default(),
    );

    tracker.start_tracking(request.cell_id.clone(), request.request_id.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tracker.buffer().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(tracker.buffer().len(), 2);

    tracker.start_tracking(request.cell_id.clone(), request.request_id.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tracker.buffer().len(), 1, "buffer reset and sampled immediately");

    tracker.stop_tracking();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(tracker.buffer().is_empty());
}
