//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};

use hearth::engine::scripted::ScriptedEngine;
use hearth::{Capabilities, ConversationId, GenerationCallbacks, GenerationController, HearthConfig};

/// Defaults with diagnostics kept in memory and no background priming.
pub(crate) fn test_config() -> HearthConfig {
    let mut config = HearthConfig::default();
    config.diagnostics.in_memory = true;
    config.availability.prime_on_init = false;
    config
}

/// A controller whose only capability is `engine`.
pub(crate) fn controller_for(engine: &ScriptedEngine) -> GenerationController {
    GenerationController::builder(
        Capabilities::none().with_language_model(Arc::new(engine.clone())),
    )
    .config(test_config())
    .build()
    .expect("build controller")
}

pub(crate) fn conversation(id: &str) -> ConversationId {
    ConversationId::new(id).expect("valid conversation id")
}

/// Records callbacks as `kind:payload` strings.
#[derive(Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }
}

impl GenerationCallbacks for Recorder {
    fn on_chunk(&self, text: &str) {
        self.push(format!("chunk:{text}"));
    }

    fn on_complete(&self, text: &str) {
        self.push(format!("complete:{text}"));
    }

    fn on_error(&self, code: &str, _message: &str) {
        self.push(format!("error:{code}"));
    }

    fn on_abort(&self) {
        self.push("abort".to_owned());
    }
}
