//! Availability caching, download and warmup through the controller.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use hearth::clock::ManualClock;
use hearth::diagnostics::{DiagnosticsStore, WarmupStatus};
use hearth::engine::EngineAvailability;
use hearth::engine::scripted::ScriptedEngine;
use hearth::{
    AvailabilityStatus, Capabilities, GenerationController, GenerationOutcome, ProgressCallback,
    ProgressEvent,
};

use crate::helpers::{controller_for, conversation, test_config};

#[tokio::test]
async fn cached_status_is_reused_until_forced() {
    let engine = ScriptedEngine::new();
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let controller = GenerationController::builder(
        Capabilities::none().with_language_model(Arc::new(engine.clone())),
    )
    .config(test_config())
    .clock(clock.clone())
    .build()
    .unwrap();
    let availability = controller.availability();

    assert!(availability.cached().is_none());
    let first = availability.check_availability(false).await;
    assert_eq!(first.status, AvailabilityStatus::Ready);
    assert_eq!(first.checked_at, start);
    assert_eq!(engine.availability_queries(), 1);

    clock.advance(chrono::Duration::seconds(1));
    let cached = availability.check_availability(false).await;
    assert_eq!(cached, first);
    assert_eq!(engine.availability_queries(), 1);

    let fresh = availability.check_availability(true).await;
    assert_eq!(engine.availability_queries(), 2);
    assert_eq!(fresh.checked_at, start + chrono::Duration::seconds(1));
}

#[tokio::test]
async fn ensure_downloaded_is_a_noop_when_ready() {
    let engine = ScriptedEngine::new();
    let controller = controller_for(&engine);

    let outcome = controller.availability().ensure_downloaded(None).await.unwrap();
    assert_eq!(outcome.status, AvailabilityStatus::Ready);
    assert!(!outcome.downloaded);
    assert_eq!(engine.sessions_created(), 0);
}

#[tokio::test]
async fn download_then_generate() {
    let engine = ScriptedEngine::with_availability(EngineAvailability::Downloadable);
    let controller = controller_for(&engine);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback = Arc::new(move |e| sink.lock().unwrap().push(e));

    let request = controller.request_builder(conversation("c1"), "Hi").build();
    assert!(controller.generate(request.clone()).await.is_err());

    let outcome = controller
        .availability()
        .ensure_downloaded(Some(callback))
        .await
        .unwrap();
    assert!(outcome.downloaded);
    assert_eq!(outcome.status, AvailabilityStatus::Ready);
    assert_eq!(engine.live_sessions(), 0);

    let fractions: Vec<f64> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(ProgressEvent::fraction)
        .collect();
    assert_eq!(fractions.last().copied(), Some(1.0));

    let result = controller.generate(request).await.unwrap().outcome().await;
    assert!(matches!(result, GenerationOutcome::Completed { .. }));
}

#[tokio::test]
async fn warmup_outcome_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diagnostics.json");
    let engine = ScriptedEngine::new();

    let controller = GenerationController::builder(
        Capabilities::none().with_language_model(Arc::new(engine.clone())),
    )
    .config(test_config())
    .diagnostics(Arc::new(DiagnosticsStore::new(&path)))
    .build()
    .unwrap();
    let report = controller.availability().warm_up(None).await;
    assert_eq!(report.status, WarmupStatus::Success);
    assert_eq!(engine.live_sessions(), 0);

    let reloaded = DiagnosticsStore::new(&path).snapshot().await;
    assert_eq!(reloaded.last_warmup_status, Some(WarmupStatus::Success));
    assert_eq!(reloaded.availability, Some(AvailabilityStatus::Ready));
    assert!(reloaded.last_warmup_error.is_none());
}

#[tokio::test]
async fn stalled_download_awaits_download() {
    let engine = ScriptedEngine::with_availability(EngineAvailability::Downloadable);
    engine.stall_download(true);
    let controller = controller_for(&engine);

    let report = controller.availability().warm_up(None).await;
    assert_eq!(report.status, WarmupStatus::AwaitingDownload);
    let record = controller.diagnostics().snapshot().await;
    assert_eq!(record.last_warmup_status, Some(WarmupStatus::AwaitingDownload));
}
