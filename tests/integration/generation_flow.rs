//! End-to-end generation through the controller: streaming, supersession,
//! fallback and failure reporting.

use std::io::Cursor;
use std::time::Duration;

use hearth::engine::scripted::{ScriptStep, ScriptedEngine, ScriptedFault};
use hearth::error::error_codes;
use hearth::{Attachment, ExecutionPath, GenerationEvent, GenerationOutcome, HearthError, SamplingConfig};

use crate::helpers::{Recorder, controller_for, conversation};

const PROMPT_EXIT: Duration = Duration::from_secs(2);

async fn wait_for_create_attempts(engine: &ScriptedEngine, attempts: usize) {
    while engine.created_with().len() < attempts {
        tokio::task::yield_now().await;
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
}

#[tokio::test]
async fn streams_deltas_into_full_text() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![
        ScriptStep::text("The "),
        ScriptStep::text("quick "),
        ScriptStep::text("fox"),
    ]);
    let controller = controller_for(&engine);

    let request = controller.request_builder(conversation("c1"), "Tell me").build();
    let recorder = Recorder::default();
    let outcome = controller.generate(request).await.unwrap().drive(&recorder).await;

    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            text: "The quick fox".into(),
            path: ExecutionPath::Primary,
        }
    );
    let calls = recorder.calls();
    assert_eq!(calls.first().map(String::as_str), Some("chunk:The "));
    assert_eq!(calls.last().map(String::as_str), Some("complete:The quick fox"));
}

#[tokio::test]
async fn explicit_replace_corrects_earlier_text() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![
        ScriptStep::text("Helo"),
        ScriptStep::replace("Hello"),
        ScriptStep::text(" world"),
    ]);
    let controller = controller_for(&engine);

    let request = controller.request_builder(conversation("c1"), "Greet").build();
    let outcome = controller.generate(request).await.unwrap().outcome().await;
    assert!(matches!(outcome, GenerationOutcome::Completed { text, .. } if text == "Hello world"));
}

#[tokio::test]
async fn fallback_completes_exactly_once_after_mid_stream_fault() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::text("Hello"), ScriptStep::fail("engine crashed")]);
    engine.push_reply(Ok("Hello, world".into()));
    let controller = controller_for(&engine);

    let request = controller.request_builder(conversation("c1"), "Say hello").build();
    let recorder = Recorder::default();
    let outcome = controller.generate(request).await.unwrap().drive(&recorder).await;

    assert_eq!(
        outcome,
        GenerationOutcome::Completed {
            text: "Hello, world".into(),
            path: ExecutionPath::Fallback,
        }
    );
    assert_eq!(recorder.calls(), vec!["chunk:Hello", "complete:Hello, world"]);
    assert_eq!(controller.fallback_count(), 1);
    // Both the failed pooled session and the boundary session are gone.
    assert_eq!(engine.live_sessions(), 0);
    assert_eq!(controller.pooled_sessions().await, 0);
}

#[tokio::test]
async fn fallback_failure_is_terminal() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::fail("primary down")]);
    engine.push_reply(Err(ScriptedFault::Transient("fallback down".into())));
    let controller = controller_for(&engine);

    let request = controller.request_builder(conversation("c1"), "Hi").build();
    let recorder = Recorder::default();
    let outcome = controller.generate(request).await.unwrap().drive(&recorder).await;

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed { code, ref message }
            if code == error_codes::FALLBACK_FAILED && !message.contains("fallback down")
    ));
    assert_eq!(recorder.calls(), vec![format!("error:{}", error_codes::FALLBACK_FAILED)]);
    assert_eq!(controller.fallback_count(), 1);
    assert_eq!(engine.live_sessions(), 0);
}

#[tokio::test]
async fn restricted_origin_skips_fallback() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::fail("blocked")]);
    let controller = controller_for(&engine);

    let request = controller
        .request_builder(conversation("c1"), "Summarise this page")
        .origin("chrome://extensions")
        .build();
    let outcome = controller.generate(request).await.unwrap().outcome().await;

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed { code, .. } if code == error_codes::RESTRICTED_CONTEXT
    ));
    assert_eq!(controller.fallback_count(), 0);
}

#[tokio::test]
async fn restricted_engine_error_is_not_retried() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::Fail(ScriptedFault::Restricted("policy".into()))]);
    let controller = controller_for(&engine);

    let request = controller.request_builder(conversation("c1"), "Hi").build();
    let outcome = controller.generate(request).await.unwrap().outcome().await;
    assert!(matches!(
        outcome,
        GenerationOutcome::Failed { code, .. } if code == error_codes::RESTRICTED_CONTEXT
    ));
    assert_eq!(controller.fallback_count(), 0);
}

#[tokio::test]
async fn new_generation_cancels_previous_before_first_chunk() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::text("first"), ScriptStep::Hang]);
    engine.push_stream(vec![ScriptStep::text("second")]);
    let controller = controller_for(&engine);
    let c1 = conversation("c1");

    let mut first = controller
        .generate(controller.request_builder(c1.clone(), "one").build())
        .await
        .unwrap();
    assert_eq!(
        first.next_event().await,
        Some(GenerationEvent::Chunk { text: "first".into() })
    );

    let mut second = controller
        .generate(controller.request_builder(c1, "two").build())
        .await
        .unwrap();
    // Cancellation is signalled before the second generation can deliver.
    assert!(first.is_cancelled());
    assert_eq!(first.next_event().await, Some(GenerationEvent::Aborted));

    assert_eq!(
        second.next_event().await,
        Some(GenerationEvent::Chunk { text: "second".into() })
    );
    assert!(matches!(
        second.next_event().await,
        Some(GenerationEvent::Completed { .. })
    ));
    assert_eq!(engine.sessions_created(), 2);
    assert_eq!(engine.live_sessions(), 1);
}

#[tokio::test]
async fn single_flight_spans_conversations() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::text("a"), ScriptStep::Hang]);
    let controller = controller_for(&engine);

    let mut first = controller
        .generate(controller.request_builder(conversation("a"), "one").build())
        .await
        .unwrap();
    assert!(matches!(first.next_event().await, Some(GenerationEvent::Chunk { .. })));
    let second = controller
        .generate(controller.request_builder(conversation("b"), "two").build())
        .await
        .unwrap();

    assert_eq!(first.outcome().await, GenerationOutcome::Aborted);
    assert!(matches!(second.outcome().await, GenerationOutcome::Completed { .. }));
}

#[tokio::test]
async fn stop_during_session_creation_aborts_and_frees_the_next_run() {
    let engine = ScriptedEngine::new();
    engine.hang_create_attempt(1);
    let controller = controller_for(&engine);

    let first = controller
        .generate(controller.request_builder(conversation("c1"), "one").build())
        .await
        .unwrap();
    wait_for_create_attempts(&engine, 1).await;
    assert!(controller.stop(None));

    let outcome = tokio::time::timeout(PROMPT_EXIT, first.outcome()).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Aborted);
    assert_eq!(controller.pooled_sessions().await, 0);

    let second = controller
        .generate(controller.request_builder(conversation("c1"), "two").build())
        .await
        .unwrap();
    let outcome = tokio::time::timeout(PROMPT_EXIT, second.outcome()).await.unwrap();
    assert!(matches!(outcome, GenerationOutcome::Completed { .. }));
    assert_eq!(engine.sessions_created(), 1);
}

#[tokio::test]
async fn superseding_a_run_stuck_in_session_creation() {
    let engine = ScriptedEngine::new();
    engine.hang_create_attempt(1);
    let controller = controller_for(&engine);

    let first = controller
        .generate(controller.request_builder(conversation("c1"), "one").build())
        .await
        .unwrap();
    wait_for_create_attempts(&engine, 1).await;
    let second = controller
        .generate(controller.request_builder(conversation("c1"), "two").build())
        .await
        .unwrap();

    let first = tokio::time::timeout(PROMPT_EXIT, first.outcome()).await.unwrap();
    assert_eq!(first, GenerationOutcome::Aborted);
    let second = tokio::time::timeout(PROMPT_EXIT, second.outcome()).await.unwrap();
    assert!(matches!(second, GenerationOutcome::Completed { .. }));
}

#[tokio::test]
async fn cancel_reaches_fallback_session_creation() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![ScriptStep::fail("engine crashed")]);
    // Attempt 1 is the pooled session, attempt 2 the fallback's own.
    engine.hang_create_attempt(2);
    let controller = controller_for(&engine);

    let handle = controller
        .generate(controller.request_builder(conversation("c1"), "Hi").build())
        .await
        .unwrap();
    wait_for_create_attempts(&engine, 2).await;
    handle.cancel();

    let outcome = tokio::time::timeout(PROMPT_EXIT, handle.outcome()).await.unwrap();
    assert_eq!(outcome, GenerationOutcome::Aborted);
    assert_eq!(controller.fallback_count(), 1);
    assert_eq!(engine.live_sessions(), 0);
    assert!(!controller.is_generating());
}

#[tokio::test]
async fn cancelling_the_handle_reports_abort_not_error() {
    let engine = ScriptedEngine::new();
    engine.push_stream(vec![
        ScriptStep::text("partial"),
        ScriptStep::Delay(Duration::from_secs(30)),
        ScriptStep::text(" never"),
    ]);
    let controller = controller_for(&engine);

    let mut handle = controller
        .generate(controller.request_builder(conversation("c1"), "Hi").build())
        .await
        .unwrap();
    assert!(matches!(handle.next_event().await, Some(GenerationEvent::Chunk { .. })));
    handle.cancel();

    let recorder = Recorder::default();
    assert_eq!(handle.drive(&recorder).await, GenerationOutcome::Aborted);
    assert_eq!(recorder.calls(), vec!["abort"]);
    assert_eq!(controller.fallback_count(), 0);
}

#[tokio::test]
async fn sampling_is_validated_before_any_session_exists() {
    let engine = ScriptedEngine::new();
    let controller = controller_for(&engine);

    let request = controller
        .request_builder(conversation("c1"), "Hi")
        .sampling(SamplingConfig::default().with_temperature(99.0))
        .build();
    let err = controller.generate(request).await.unwrap_err();

    assert!(matches!(err, HearthError::ConfigValidation(_)));
    assert_eq!(engine.sessions_created(), 0);
    assert!(engine.created_with().is_empty());
}

#[tokio::test]
async fn reset_twice_is_harmless() {
    let engine = ScriptedEngine::new();
    let controller = controller_for(&engine);
    let c1 = conversation("c1");

    controller
        .generate(controller.request_builder(c1.clone(), "Hi").build())
        .await
        .unwrap()
        .outcome()
        .await;
    assert_eq!(controller.pooled_sessions().await, 1);

    assert_eq!(controller.reset(Some(&c1)).await, 1);
    assert_eq!(controller.reset(Some(&c1)).await, 0);
    assert_eq!(controller.pooled_sessions().await, 0);
    assert_eq!(engine.sessions_destroyed(), 1);
}

#[tokio::test]
async fn changed_sampling_recreates_the_session() {
    let engine = ScriptedEngine::new();
    let controller = controller_for(&engine);
    let c1 = conversation("c1");

    for temperature in [0.5, 0.5, 0.9] {
        let request = controller
            .request_builder(c1.clone(), "Hi")
            .sampling(SamplingConfig::default().with_temperature(temperature))
            .build();
        controller.generate(request).await.unwrap().outcome().await;
    }
    assert_eq!(engine.sessions_created(), 2);
    assert_eq!(engine.live_sessions(), 1);
}

#[tokio::test]
async fn images_reach_the_engine_as_resized_pixels() {
    let engine = ScriptedEngine::new();
    let mut config = crate::helpers::test_config();
    config.attachments.max_image_width = 8;
    let controller = hearth::GenerationController::builder(
        hearth::Capabilities::none().with_language_model(std::sync::Arc::new(engine.clone())),
    )
    .config(config)
    .build()
    .unwrap();

    let request = controller
        .request_builder(conversation("c1"), "What is this?")
        .attachment(Attachment::image("image/png", png(16, 4)))
        .attachment(Attachment::text("application/pdf", Some("notes.pdf".into()), "page one"))
        .build();
    let outcome = controller.generate(request).await.unwrap().outcome().await;
    assert!(matches!(outcome, GenerationOutcome::Completed { .. }));

    let prompts = engine.prompts();
    let input = prompts.last().unwrap();
    assert_eq!(input.images.len(), 1);
    assert_eq!((input.images[0].width, input.images[0].height), (8, 2));
    assert!(input.text.contains("page one"));
}

#[tokio::test]
async fn corrupt_image_fails_without_fallback() {
    let engine = ScriptedEngine::new();
    let controller = controller_for(&engine);

    let request = controller
        .request_builder(conversation("c1"), "What is this?")
        .attachment(Attachment::image("image/png", b"not an image".to_vec()))
        .build();
    let outcome = controller.generate(request).await.unwrap().outcome().await;

    assert!(matches!(
        outcome,
        GenerationOutcome::Failed { code, .. } if code == error_codes::IMAGE_DECODE
    ));
    assert_eq!(engine.sessions_created(), 0);
    assert_eq!(controller.fallback_count(), 0);
}
