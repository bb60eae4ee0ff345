//! Deterministic in-process capabilities.
//!
//! [`ScriptedEngine`], [`ScriptedTranslator`], [`ScriptedDetector`] and
//! [`ScriptedSpeech`] replay queued responses and count every call. Host
//! applications use them to exercise the controller without a browser or
//! platform runtime; the crate's own tests use them throughout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ChunkStream, DetectedLanguage, EngineAvailability, EngineChunk, EngineSession,
    LanguageDetector, LanguageEngine, PromptInput, SessionOptions, SpeechSynthesizer,
    SynthesisError, Translation, TranslatorAvailability, TranslatorEngine, Utterance,
};
use crate::error::{HearthError, Result};
use crate::progress::DownloadMonitor;
use crate::types::{EngineParams, SamplingConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A failure to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFault {
    /// Becomes [`HearthError::TransientEngineFault`].
    Transient(String),
    /// Becomes [`HearthError::RestrictedContext`].
    Restricted(String),
    /// Becomes [`HearthError::EngineUnavailable`].
    Unavailable(String),
}

impl ScriptedFault {
    /// Convert into the crate error it stands for.
    pub fn to_error(&self) -> HearthError {
        match self {
            Self::Transient(m) => HearthError::TransientEngineFault(m.clone()),
            Self::Restricted(m) => HearthError::RestrictedContext(m.clone()),
            Self::Unavailable(m) => HearthError::EngineUnavailable(m.clone()),
        }
    }
}

/// One step of a scripted streaming response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a chunk.
    Chunk(EngineChunk),
    /// Yield an error and end the stream.
    Fail(ScriptedFault),
    /// Wait before the next step.
    Delay(Duration),
    /// Never yield again.
    Hang,
}

impl ScriptStep {
    /// A [`EngineChunk::Text`] step.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Chunk(EngineChunk::Text(text.into()))
    }

    /// A [`EngineChunk::Replace`] step.
    pub fn replace(text: impl Into<String>) -> Self {
        Self::Chunk(EngineChunk::Replace(text.into()))
    }

    /// A transient failure step.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(ScriptedFault::Transient(message.into()))
    }
}

struct EngineState {
    availability: Mutex<EngineAvailability>,
    availability_fault: Mutex<Option<ScriptedFault>>,
    params: Mutex<EngineParams>,
    download_steps: Mutex<Vec<(u64, u64)>>,
    stall_download: AtomicBool,
    create_faults: Mutex<VecDeque<ScriptedFault>>,
    hung_creates: Mutex<Vec<usize>>,
    streams: Mutex<VecDeque<Vec<ScriptStep>>>,
    replies: Mutex<VecDeque<std::result::Result<String, ScriptedFault>>>,
    default_reply: Mutex<String>,
    hang_prompts: AtomicBool,
    fail_destroy: AtomicBool,
    availability_queries: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_destroyed: AtomicUsize,
    destroy_calls: AtomicUsize,
    prompts: Mutex<Vec<PromptInput>>,
    created_with: Mutex<Vec<Option<SamplingConfig>>>,
}

/// A scripted [`LanguageEngine`].
///
/// Streaming prompts consume queued scripts in order; when the queue is
/// empty the default reply is streamed as a single chunk. Non-streaming
/// prompts consume queued replies the same way.
#[derive(Clone)]
pub struct ScriptedEngine {
    name: String,
    state: Arc<EngineState>,
}

impl ScriptedEngine {
    /// An engine that is ready and replies `"OK"`.
    pub fn new() -> Self {
        Self::with_availability(EngineAvailability::Available)
    }

    /// An engine starting in `availability`.
    pub fn with_availability(availability: EngineAvailability) -> Self {
        Self {
            name: "scripted".to_owned(),
            state: Arc::new(EngineState {
                availability: Mutex::new(availability),
                availability_fault: Mutex::new(None),
                params: Mutex::new(EngineParams::default()),
                download_steps: Mutex::new(vec![(0, 100), (50, 100), (100, 100)]),
                stall_download: AtomicBool::new(false),
                create_faults: Mutex::new(VecDeque::new()),
                hung_creates: Mutex::new(Vec::new()),
                streams: Mutex::new(VecDeque::new()),
                replies: Mutex::new(VecDeque::new()),
                default_reply: Mutex::new("OK".to_owned()),
                hang_prompts: AtomicBool::new(false),
                fail_destroy: AtomicBool::new(false),
                availability_queries: AtomicUsize::new(0),
                sessions_created: AtomicUsize::new(0),
                sessions_destroyed: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                created_with: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Change the reported availability.
    pub fn set_availability(&self, availability: EngineAvailability) {
        *lock(&self.state.availability) = availability;
    }

    /// Make availability queries fail (or succeed again with `None`).
    pub fn fail_availability(&self, fault: Option<ScriptedFault>) {
        *lock(&self.state.availability_fault) = fault;
    }

    /// Replace the reported parameter domain.
    pub fn set_params(&self, params: EngineParams) {
        *lock(&self.state.params) = params;
    }

    /// `(loaded, total)` pairs reported while a session download runs.
    pub fn set_download_steps(&self, steps: Vec<(u64, u64)>) {
        *lock(&self.state.download_steps) = steps;
    }

    /// When set, downloads report progress but never finish and session
    /// creation fails.
    pub fn stall_download(&self, stall: bool) {
        self.state.stall_download.store(stall, Ordering::SeqCst);
    }

    /// Fail the next session creation with `fault`.
    pub fn fail_next_create(&self, fault: ScriptedFault) {
        lock(&self.state.create_faults).push_back(fault);
    }

    /// Make the `attempt`-th session creation (counting from 1) never
    /// resolve.
    pub fn hang_create_attempt(&self, attempt: usize) {
        lock(&self.state.hung_creates).push(attempt);
    }

    /// Queue a streaming script.
    pub fn push_stream(&self, steps: Vec<ScriptStep>) {
        lock(&self.state.streams).push_back(steps);
    }

    /// Queue a non-streaming reply.
    pub fn push_reply(&self, reply: std::result::Result<String, ScriptedFault>) {
        lock(&self.state.replies).push_back(reply);
    }

    /// Reply used when no script is queued.
    pub fn set_default_reply(&self, reply: impl Into<String>) {
        *lock(&self.state.default_reply) = reply.into();
    }

    /// Make non-streaming prompts wait forever.
    pub fn hang_prompts(&self, hang: bool) {
        self.state.hang_prompts.store(hang, Ordering::SeqCst);
    }

    /// Make session teardown report an error (after releasing).
    pub fn fail_destroy(&self, fail: bool) {
        self.state.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Number of availability queries answered.
    pub fn availability_queries(&self) -> usize {
        self.state.availability_queries.load(Ordering::SeqCst)
    }

    /// Number of sessions created.
    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    /// Number of sessions destroyed (each counted once).
    pub fn sessions_destroyed(&self) -> usize {
        self.state.sessions_destroyed.load(Ordering::SeqCst)
    }

    /// Every `destroy` call, repeats included.
    pub fn destroy_calls(&self) -> usize {
        self.state.destroy_calls.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet destroyed.
    pub fn live_sessions(&self) -> usize {
        self.sessions_created()
            .saturating_sub(self.sessions_destroyed())
    }

    /// Every prompt input received, in order.
    pub fn prompts(&self) -> Vec<PromptInput> {
        lock(&self.state.prompts).clone()
    }

    /// Sampling passed to each session creation attempt, in order.
    pub fn created_with(&self) -> Vec<Option<SamplingConfig>> {
        lock(&self.state.created_with).clone()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn availability(&self) -> Result<EngineAvailability> {
        self.state
            .availability_queries
            .fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = lock(&self.state.availability_fault).as_ref() {
            return Err(fault.to_error());
        }
        Ok(*lock(&self.state.availability))
    }

    async fn params(&self) -> Result<EngineParams> {
        Ok(lock(&self.state.params).clone())
    }

    async fn create_session(&self, options: SessionOptions) -> Result<Arc<dyn EngineSession>> {
        let attempt = {
            let mut created_with = lock(&self.state.created_with);
            created_with.push(options.sampling.clone());
            created_with.len()
        };
        let hang = lock(&self.state.hung_creates).contains(&attempt);
        if hang {
            std::future::pending::<()>().await;
        }
        let fault = lock(&self.state.create_faults).pop_front();
        if let Some(fault) = fault {
            return Err(fault.to_error());
        }

        let availability = *lock(&self.state.availability);
        match availability {
            EngineAvailability::Unavailable => {
                return Err(HearthError::EngineUnavailable(
                    "scripted engine is unavailable".to_owned(),
                ));
            }
            EngineAvailability::Downloadable | EngineAvailability::Downloading => {
                self.set_availability(EngineAvailability::Downloading);
                let steps = lock(&self.state.download_steps).clone();
                for (loaded, total) in steps {
                    if let Some(monitor) = &options.monitor {
                        monitor(loaded, total);
                    }
                    tokio::task::yield_now().await;
                }
                if self.state.stall_download.load(Ordering::SeqCst) {
                    return Err(HearthError::TransientEngineFault(
                        "model download has not finished".to_owned(),
                    ));
                }
                self.set_availability(EngineAvailability::Available);
            }
            EngineAvailability::Available => {}
        }

        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            state: Arc::clone(&self.state),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedSession {
    state: Arc<EngineState>,
    destroyed: AtomicBool,
}

impl ScriptedSession {
    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(HearthError::TransientEngineFault(
                "session has been destroyed".to_owned(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn prompt(&self, input: PromptInput) -> Result<String> {
        self.ensure_live()?;
        lock(&self.state.prompts).push(input);
        if self.state.hang_prompts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let reply = lock(&self.state.replies).pop_front();
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(fault)) => Err(fault.to_error()),
            None => Ok(lock(&self.state.default_reply).clone()),
        }
    }

    async fn prompt_streaming(&self, input: PromptInput) -> Result<ChunkStream> {
        self.ensure_live()?;
        lock(&self.state.prompts).push(input);
        let script = lock(&self.state.streams).pop_front();
        let steps = script.unwrap_or_else(|| {
            vec![ScriptStep::text(lock(&self.state.default_reply).clone())]
        });

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    ScriptStep::Chunk(chunk) => yield Ok(chunk),
                    ScriptStep::Fail(fault) => {
                        yield Err(fault.to_error());
                        break;
                    }
                    ScriptStep::Delay(delay) => tokio::time::sleep(delay).await,
                    ScriptStep::Hang => std::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn destroy(&self) -> Result<()> {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.state.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
        }
        if self.state.fail_destroy.load(Ordering::SeqCst) {
            return Err(HearthError::TransientEngineFault(
                "scripted teardown failure".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A scripted [`LanguageDetector`].
pub struct ScriptedDetector {
    result: Mutex<std::result::Result<Vec<DetectedLanguage>, ScriptedFault>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    /// Always detect `language` with `confidence`.
    pub fn detecting(language: impl Into<String>, confidence: f32) -> Self {
        Self {
            result: Mutex::new(Ok(vec![DetectedLanguage {
                language: language.into(),
                confidence,
            }])),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail.
    pub fn failing(fault: ScriptedFault) -> Self {
        Self {
            result: Mutex::new(Err(fault)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of detect calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageDetector for ScriptedDetector {
    async fn detect(&self, _text: &str) -> Result<Vec<DetectedLanguage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.result).clone().map_err(|f| f.to_error())
    }
}

/// A scripted [`TranslatorEngine`].
///
/// Translations are rendered as `"[source->target] text"`.
pub struct ScriptedTranslator {
    availability: Mutex<TranslatorAvailability>,
    download_steps: Mutex<Vec<(u64, u64)>>,
    translate_fault: Mutex<Option<ScriptedFault>>,
    availability_calls: AtomicUsize,
    create_calls: AtomicUsize,
    translate_calls: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl ScriptedTranslator {
    /// A translator reporting `availability` for every pair.
    pub fn new(availability: TranslatorAvailability) -> Self {
        Self {
            availability: Mutex::new(availability),
            download_steps: Mutex::new(vec![(0, 10), (10, 10)]),
            translate_fault: Mutex::new(None),
            availability_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            translate_calls: Arc::new(AtomicUsize::new(0)),
            destroyed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make translate calls fail.
    pub fn fail_translate(&self, fault: Option<ScriptedFault>) {
        *lock(&self.translate_fault) = fault;
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.availability_calls.load(Ordering::SeqCst)
            + self.create_calls.load(Ordering::SeqCst)
            + self.translate_calls.load(Ordering::SeqCst)
    }

    /// Number of translate calls.
    pub fn translate_calls(&self) -> usize {
        self.translate_calls.load(Ordering::SeqCst)
    }

    /// Number of translators destroyed.
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranslatorEngine for ScriptedTranslator {
    async fn availability(&self, _source: &str, _target: &str) -> Result<TranslatorAvailability> {
        self.availability_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*lock(&self.availability))
    }

    async fn create(
        &self,
        source: &str,
        target: &str,
        monitor: Option<DownloadMonitor>,
    ) -> Result<Arc<dyn Translation>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let availability = *lock(&self.availability);
        match availability {
            TranslatorAvailability::Unavailable => {
                return Err(HearthError::EngineUnavailable(format!(
                    "no translator for {source}->{target}"
                )));
            }
            TranslatorAvailability::Downloadable | TranslatorAvailability::Downloading => {
                let steps = lock(&self.download_steps).clone();
                for (loaded, total) in steps {
                    if let Some(monitor) = &monitor {
                        monitor(loaded, total);
                    }
                }
                *lock(&self.availability) = TranslatorAvailability::Available;
            }
            TranslatorAvailability::Available => {}
        }
        Ok(Arc::new(ScriptedTranslation {
            prefix: format!("[{source}->{target}]"),
            fault: lock(&self.translate_fault).clone(),
            calls: Arc::clone(&self.translate_calls),
            destroyed: Arc::clone(&self.destroyed),
            released: AtomicBool::new(false),
        }))
    }
}

struct ScriptedTranslation {
    prefix: String,
    fault: Option<ScriptedFault>,
    calls: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    released: AtomicBool,
}

#[async_trait]
impl Translation for ScriptedTranslation {
    async fn translate(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = &self.fault {
            return Err(fault.to_error());
        }
        Ok(format!("{} {text}", self.prefix))
    }

    fn destroy(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A scripted [`SpeechSynthesizer`].
pub struct ScriptedSpeech {
    result: Mutex<std::result::Result<(), SynthesisError>>,
    hold_until_cancel: AtomicBool,
    cancelled: tokio::sync::Notify,
    spoken: Mutex<Vec<Utterance>>,
    cancels: AtomicUsize,
}

impl ScriptedSpeech {
    /// Speech that finishes immediately.
    pub fn new() -> Self {
        Self {
            result: Mutex::new(Ok(())),
            hold_until_cancel: AtomicBool::new(false),
            cancelled: tokio::sync::Notify::new(),
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Finish every utterance with `error`.
    pub fn fail_with(&self, error: SynthesisError) {
        *lock(&self.result) = Err(error);
    }

    /// Keep speaking until [`SpeechSynthesizer::cancel`] is called.
    pub fn hold_until_cancel(&self, hold: bool) {
        self.hold_until_cancel.store(hold, Ordering::SeqCst);
    }

    /// Every utterance received.
    pub fn spoken(&self) -> Vec<Utterance> {
        lock(&self.spoken).clone()
    }

    /// Number of cancel calls.
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    async fn speak(&self, utterance: Utterance) -> std::result::Result<(), SynthesisError> {
        lock(&self.spoken).push(utterance);
        if self.hold_until_cancel.load(Ordering::SeqCst) {
            self.cancelled.notified().await;
            return Err(SynthesisError::new("interrupted", "speech cancelled"));
        }
        lock(&self.result).clone()
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_one();
    }
}
