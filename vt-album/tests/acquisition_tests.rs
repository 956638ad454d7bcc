//! Photo batch acquisition against a local fake of the search API

mod helpers;

use helpers::fake_flickr::{image_bytes, FakeFlickr, SearchBehavior};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, RwLock};
use vt_album::acquisition::{AcquisitionState, ExistingPhotos, PhotoAcquisition};
use vt_album::expected_count::ExpectedCount;
use vt_album::flickr::{FlickrClient, MAX_PAGES};
use vt_album::registry::LocationRegistry;
use vt_album::{AcquisitionError, TieredStore};
use vt_common::events::{EventBus, TouristEvent};
use vt_common::models::{Coordinate, Pin, TierKind};

struct Harness {
    _dir: TempDir,
    store: TieredStore,
    registry: Arc<RwLock<LocationRegistry>>,
    current_pin: Arc<RwLock<Option<Pin>>>,
    expected: ExpectedCount,
    events: broadcast::Receiver<TouristEvent>,
    acquisition: PhotoAcquisition,
    pin: Pin,
}

async fn harness(fake: &FakeFlickr) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = TieredStore::open(dir.path().join("model.sqlite")).await.unwrap();
    let bus = EventBus::new(512);
    let events = bus.subscribe();
    let expected = ExpectedCount::new(bus.clone());
    let registry = Arc::new(RwLock::new(LocationRegistry::new()));
    let current_pin = Arc::new(RwLock::new(None));
    let flickr = Arc::new(FlickrClient::new(&fake.config()).unwrap());

    let created = store
        .run_background_batch(|ctx| Ok(ctx.insert_pin(Coordinate::new(40.0, -74.0))))
        .await
        .unwrap();
    let pin = store.resolve_pin(created.id(), TierKind::Main).await.unwrap();

    let acquisition = PhotoAcquisition::new(
        store.clone(),
        flickr,
        Arc::clone(&registry),
        Arc::clone(&current_pin),
        expected.clone(),
        bus,
    );

    Harness {
        _dir: dir,
        store,
        registry,
        current_pin,
        expected,
        events,
        acquisition,
        pin,
    }
}

fn drain(events: &mut broadcast::Receiver<TouristEvent>) -> Vec<TouristEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_acquire_populates_pin_with_photos() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("3"), 3)).await;
    let mut h = harness(&fake).await;

    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    assert_eq!(report.page, 1);
    assert_eq!(report.page_count, 1);
    assert_eq!(report.total, 3);
    assert_eq!(report.expected, 3);
    assert_eq!(report.created, 3);
    assert_eq!(report.arrived, 3);
    assert_eq!(report.discarded, 0);
    assert_eq!(report.final_state(), AcquisitionState::Done);
    assert_eq!(
        report.transitions,
        vec![
            AcquisitionState::Idle,
            AcquisitionState::PageCountRequested,
            AcquisitionState::PageChosen,
            AcquisitionState::PhotosRequested,
            AcquisitionState::Populating,
            AcquisitionState::Done,
        ]
    );

    let photos = h.store.photos_of(h.pin.id());
    assert_eq!(photos.len(), 3);
    assert!(photos.iter().all(|p| p.has_image()));
    let mut images: Vec<Vec<u8>> = photos.iter().map(|p| p.image().unwrap().to_vec()).collect();
    images.sort();
    assert_eq!(images, (0..3).map(image_bytes).collect::<Vec<_>>());

    assert_eq!(h.expected.get(), 3);
    assert!(h.registry.read().await.find_pin(40.0, -74.0).is_some());
    assert!(!h.acquisition.is_in_flight());

    let events = drain(&mut h.events);
    assert!(matches!(
        events.first(),
        Some(TouristEvent::ExpectedCountChanged { count: 3, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(TouristEvent::BatchCompleted { success: true, reason: None, .. })
    ));
    let added = events
        .iter()
        .filter(|e| matches!(e, TouristEvent::PhotoAdded { .. }))
        .count();
    let arrived = events
        .iter()
        .filter(|e| matches!(e, TouristEvent::PhotoArrived { .. }))
        .count();
    assert_eq!((added, arrived), (3, 3));
}

#[tokio::test]
async fn test_search_requests_carry_expected_parameters() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("1"), 1)).await;
    let h = harness(&fake).await;

    h.acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request["method"], "flickr.photos.search");
        assert_eq!(request["api_key"], "test-key");
        assert_eq!(request["bbox"], "-75,39,-73,41");
        assert_eq!(request["extras"], "url_m");
        assert_eq!(request["format"], "json");
        assert_eq!(request["nojsoncallback"], "1");
        assert_eq!(request["safe_search"], "1");
        assert_eq!(request["per_page"], "30");
    }
    assert!(!requests[0].contains_key("page"));
    assert_eq!(requests[1]["page"], "1");
}

#[tokio::test]
async fn test_page_choice_is_clamped_to_result_cap() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(200), json!("4000"), 2)).await;
    let h = harness(&fake).await;

    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    assert_eq!(report.page_count, MAX_PAGES);
    assert!((1..=MAX_PAGES).contains(&report.page));
    let expected = if report.page == MAX_PAGES { 10 } else { 30 };
    assert_eq!(report.expected, expected);
    assert_eq!(fake.requests()[1]["page"], report.page.to_string());
}

#[tokio::test]
async fn test_expected_count_trusts_reported_total() {
    // The service claims 4000 results but returns three on the only page
    let fake = FakeFlickr::start(SearchBehavior::photos(json!("1"), json!(4000), 3)).await;
    let h = harness(&fake).await;

    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    assert_eq!(report.expected, 10);
    assert_eq!(report.arrived, 3);
    assert_ne!(report.expected, h.store.photos_of(h.pin.id()).len());
}

#[tokio::test]
async fn test_failed_image_download_discards_photo() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("3"), 3)).await;
    fake.break_image(1);
    let mut h = harness(&fake).await;

    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    assert_eq!(report.created, 3);
    assert_eq!(report.arrived, 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(h.store.photos_of(h.pin.id()).len(), 2);

    let events = drain(&mut h.events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, TouristEvent::PhotoDiscarded { .. }))
            .count(),
        1
    );
    assert!(matches!(
        events.last(),
        Some(TouristEvent::BatchCompleted { success: true, .. })
    ));
}

#[tokio::test]
async fn test_results_without_image_url_are_skipped() {
    let fake = FakeFlickr::start(SearchBehavior::Photos {
        pages: json!(1),
        total: json!("3"),
        with_url: vec![true, false, true],
    })
    .await;
    let h = harness(&fake).await;

    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.created, 2);
    assert_eq!(fake.image_request_count(), 2);
    assert_eq!(h.store.photos_of(h.pin.id()).len(), 2);
}

#[tokio::test]
async fn test_zero_pages_is_a_pagination_failure() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(0), json!("0"), 0)).await;
    let mut h = harness(&fake).await;

    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();

    assert!(matches!(err, AcquisitionError::Pagination(_)));
    assert_eq!(fake.requests().len(), 1);
    assert!(h.store.photos_of(h.pin.id()).is_empty());

    let events = drain(&mut h.events);
    match events.last() {
        Some(TouristEvent::BatchCompleted {
            success: false,
            reason: Some(reason),
            ..
        }) => assert_eq!(reason, &err.user_message()),
        other => panic!("expected failed BatchCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_rejection_is_a_transport_failure() {
    let fake = FakeFlickr::start(SearchBehavior::Fail {
        code: 100,
        message: "Invalid API Key (Key has invalid format)".to_string(),
    })
    .await;
    let mut h = harness(&fake).await;

    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();

    assert!(matches!(err, AcquisitionError::Transport(_)));
    assert!(err.to_string().contains("Invalid API Key"));

    let events = drain(&mut h.events);
    match events.last() {
        Some(TouristEvent::BatchCompleted {
            success: false,
            reason: Some(reason),
            ..
        }) => assert!(!reason.contains("Invalid API Key")),
        other => panic!("expected failed BatchCompleted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_error_status_is_a_transport_failure() {
    let fake = FakeFlickr::start(SearchBehavior::Status(503)).await;
    let h = harness(&fake).await;

    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Transport(_)));
}

#[tokio::test]
async fn test_missing_fields_are_parse_failures() {
    let fake = FakeFlickr::start(SearchBehavior::Raw(json!({"stat": "ok"}))).await;
    let h = harness(&fake).await;
    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Parse(_)));

    // Page count readable, but the page has no total
    fake.set_behavior(SearchBehavior::Raw(json!({
        "photos": {"pages": 1, "photo": []},
        "stat": "ok",
    })));
    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Parse(_)));

    fake.set_behavior(SearchBehavior::Raw(json!({
        "photos": {"pages": 1, "total": "5"},
        "stat": "ok",
    })));
    let err = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Parse(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_a_transport_failure() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("1"), 1)).await;
    let h = harness(&fake).await;

    // Nothing listens on a port we bound and released
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let mut config = fake.config();
    config.base_url = format!("http://127.0.0.1:{}", port);

    let acquisition = PhotoAcquisition::new(
        h.store.clone(),
        Arc::new(FlickrClient::new(&config).unwrap()),
        Arc::clone(&h.registry),
        Arc::clone(&h.current_pin),
        h.expected.clone(),
        EventBus::new(16),
    );

    let err = acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Transport(_)));
}

#[tokio::test]
async fn test_second_acquisition_while_in_flight_is_rejected() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("2"), 2)).await;
    fake.set_image_delay(Duration::from_millis(300));
    let h = harness(&fake).await;

    let (first, second) = tokio::join!(
        h.acquisition.acquire(&h.pin, ExistingPhotos::Keep),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(h.acquisition.is_in_flight());
            h.acquisition.acquire(&h.pin, ExistingPhotos::Keep).await
        }
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(AcquisitionError::InFlight)));
    assert_eq!(h.store.photos_of(h.pin.id()).len(), 2);
    assert!(!h.acquisition.is_in_flight());
}

#[tokio::test]
async fn test_replace_deletes_previous_photos_first() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("3"), 3)).await;
    let h = harness(&fake).await;

    h.acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();
    let old: Vec<_> = h.store.photos_of(h.pin.id()).iter().map(|p| p.id()).collect();
    assert_eq!(old.len(), 3);

    fake.set_behavior(SearchBehavior::photos(json!(1), json!("2"), 2));
    let report = h
        .acquisition
        .acquire(&h.pin, ExistingPhotos::Replace)
        .await
        .unwrap();

    assert_eq!(report.replaced, 3);
    let new = h.store.photos_of(h.pin.id());
    assert_eq!(new.len(), 2);
    assert!(new.iter().all(|p| !old.contains(&p.id())));
}

#[tokio::test]
async fn test_current_pin_is_refreshed_from_main() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("2"), 2)).await;
    let h = harness(&fake).await;
    *h.current_pin.write().await = Some(h.pin.clone());

    h.acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();

    let current = h.current_pin.read().await.clone().unwrap();
    assert_eq!(current.id(), h.pin.id());
    assert_eq!(current.tier(), TierKind::Main);
    assert_eq!(current.photos().len(), 2);
}

#[tokio::test]
async fn test_acquired_photos_reach_disk_after_save() {
    let fake = FakeFlickr::start(SearchBehavior::photos(json!(1), json!("4"), 4)).await;
    fake.break_image(3);
    let h = harness(&fake).await;

    h.acquisition
        .acquire(&h.pin, ExistingPhotos::Keep)
        .await
        .unwrap();
    h.store.save();
    h.store.flush().await.unwrap();

    let pool = vt_common::db::init_database(h.store.db_path()).await.unwrap();
    let stored = vt_common::db::photos::load_photos_for_pin(&pool, h.pin.id())
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|p| p.image.is_some()));
    pool.close().await;
}
