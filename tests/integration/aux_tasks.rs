//! Auxiliary tasks reached through the controller.

use std::sync::Arc;

use hearth::engine::TranslatorAvailability;
use hearth::engine::scripted::{ScriptedDetector, ScriptedEngine, ScriptedSpeech, ScriptedTranslator};
use hearth::tasks::{SpeechOutcome, SpeechRequest};
use hearth::{Capabilities, GenerationController, HearthError};
use tokio_util::sync::CancellationToken;

use crate::helpers::test_config;

struct Host {
    engine: ScriptedEngine,
    translator: Arc<ScriptedTranslator>,
    speech: Arc<ScriptedSpeech>,
    controller: GenerationController,
}

fn host(detected: &str) -> Host {
    let engine = ScriptedEngine::new();
    let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Available));
    let speech = Arc::new(ScriptedSpeech::new());
    let capabilities = Capabilities::none()
        .with_language_model(Arc::new(engine.clone()))
        .with_language_detector(Arc::new(ScriptedDetector::detecting(detected, 0.9)))
        .with_translator(translator.clone())
        .with_speech(speech.clone());
    let controller = GenerationController::builder(capabilities)
        .config(test_config())
        .build()
        .unwrap();
    Host {
        engine,
        translator,
        speech,
        controller,
    }
}

#[tokio::test]
async fn same_language_translation_makes_no_translator_calls() {
    let host = host("en");
    let outcome = host
        .controller
        .translation()
        .translate("Good morning", "en-US", None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.same_language);
    assert_eq!(outcome.translated_text, "Good morning");
    assert_eq!(host.translator.total_calls(), 0);
}

#[tokio::test]
async fn translation_to_another_language() {
    let host = host("es");
    let outcome = host
        .controller
        .translation()
        .translate("Buenos días", "en", None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.same_language);
    assert_eq!(outcome.translated_text, "[es->en] Buenos días");
    assert_eq!(host.translator.destroyed(), 1);
}

#[tokio::test]
async fn smart_replies_are_normalized() {
    let host = host("en");
    host.engine.push_reply(Ok("1. Do X\n- Do Y\n\nDo Z".into()));
    let replies = host
        .controller
        .replies()
        .suggest("What should I do?", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(replies, vec!["Do X", "Do Y", "Do Z"]);
    assert_eq!(host.engine.live_sessions(), 0);
}

#[tokio::test]
async fn titles_use_their_own_session() {
    let host = host("en");
    host.engine.push_reply(Ok("Title: \"Packing for Iceland\"".into()));
    let title = host
        .controller
        .titles()
        .generate("What should I pack for Iceland?", "Layers.", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(title, "Packing for Iceland");
    assert_eq!(host.controller.pooled_sessions().await, 0);
    assert_eq!(host.engine.live_sessions(), 0);
}

#[tokio::test]
async fn speech_interruption_is_normal_completion() {
    let host = host("en");
    host.speech.hold_until_cancel(true);
    let speaker = host.controller.speaker();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        stopper.cancel();
    });
    let outcome = speaker
        .speak(SpeechRequest::new("Reading aloud"), &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, SpeechOutcome::Interrupted { .. }));
}

#[tokio::test]
async fn aux_sampling_outside_the_engine_domain_fails_fast() {
    let engine = ScriptedEngine::new();
    let mut config = test_config();
    config.titles.temperature = 9.0;
    config.replies.temperature = 9.0;
    let controller = GenerationController::builder(
        Capabilities::none().with_language_model(Arc::new(engine.clone())),
    )
    .config(config)
    .build()
    .unwrap();
    let cancel = CancellationToken::new();

    let err = controller
        .titles()
        .generate("Packing list?", "Layers.", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, HearthError::ConfigValidation(_)));
    let err = controller.replies().suggest("Lunch?", &cancel).await.unwrap_err();
    assert!(matches!(err, HearthError::ConfigValidation(_)));
    assert!(engine.created_with().is_empty());
}

#[tokio::test]
async fn missing_capabilities_are_engine_unavailable() {
    let controller = GenerationController::builder(Capabilities::none())
        .config(test_config())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    let err = controller.replies().suggest("hi", &cancel).await.unwrap_err();
    assert!(matches!(err, HearthError::EngineUnavailable(_)));
    let err = controller
        .speaker()
        .speak(SpeechRequest::new("hi"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, HearthError::EngineUnavailable(_)));
}
