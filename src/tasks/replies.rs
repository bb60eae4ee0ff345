//! Smart reply suggestions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::run_single_prompt;
use crate::config::ReplyConfig;
use crate::engine::{LanguageEngine, PromptInput};
use crate::error::Result;
use crate::generation::prompt::truncate_chars;
use crate::types::SamplingConfig;

const BULLETS: [char; 6] = ['-', '*', '+', '\u{2022}', '\u{2013}', '>'];
const QUOTES: [char; 5] = ['"', '\'', '\u{201c}', '\u{201d}', '`'];

fn strip_marker(line: &str) -> &str {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix(BULLETS) {
        return rest.trim_start();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')', ':']) {
            return rest.trim_start();
        }
    }
    line
}

/// Turn raw model output into at most `count` suggestions of at most
/// `max_chars` characters each.
///
/// One suggestion per line; leading bullets and numbering are removed and
/// blank lines skipped.
pub fn normalize_suggestions(raw: &str, count: usize, max_chars: usize) -> Vec<String> {
    raw.lines()
        .map(|line| strip_marker(line).trim().trim_matches(QUOTES).trim())
        .filter(|line| !line.is_empty())
        .map(|line| truncate_chars(line, max_chars).trim_end().to_owned())
        .take(count)
        .collect()
}

/// Produces reply suggestions on a dedicated session.
pub struct ReplySuggester {
    engine: Option<Arc<dyn LanguageEngine>>,
    config: ReplyConfig,
}

impl ReplySuggester {
    /// A suggester on `engine`.
    pub fn new(engine: Option<Arc<dyn LanguageEngine>>, config: ReplyConfig) -> Self {
        Self { engine, config }
    }

    /// Suggestions the user could send in answer to `last_message`.
    ///
    /// # Errors
    ///
    /// Fails like [`run_single_prompt`].
    pub async fn suggest(
        &self,
        last_message: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let message = truncate_chars(last_message.trim(), self.config.input_chars);
        let prompt = format!(
            "Suggest {} short replies the user could send next, one per line, \
             without numbering or commentary.\n\nMessage:\n{message}",
            self.config.count
        );
        let temperature = self.config.temperature;

        let raw = run_single_prompt(
            self.engine.as_ref(),
            move |base: SamplingConfig| base.with_temperature(temperature),
            PromptInput::text(prompt),
            cancel,
            "smart replies",
        )
        .await?;
        Ok(normalize_suggestions(&raw, self.config.count, self.config.max_chars))
    }
}
