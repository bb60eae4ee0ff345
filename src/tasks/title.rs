//! Conversation title synthesis.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::run_single_prompt;
use crate::clock::Clock;
use crate::config::TitleConfig;
use crate::engine::{LanguageEngine, PromptInput};
use crate::error::Result;
use crate::generation::prompt::truncate_chars;
use crate::types::SamplingConfig;

/// Words that carry no information on their own. A short title made only of
/// these gets a time suffix so sidebars don't fill with identical entries.
const GENERIC_WORDS: &[&str] = &[
    "a", "an", "the", "new", "chat", "conversation", "question", "questions", "quick", "general",
    "help", "hello", "hi", "hey", "greeting", "greetings", "untitled", "assistance", "request",
    "inquiry", "discussion", "topic", "misc", "test", "simple", "query",
];

const WRAPPING: &[char] = &[
    '"', '\'', '`', '*', '#', '_', '.', ',', ':', ';', '!', '-', '\u{201c}', '\u{201d}',
    '\u{2018}', '\u{2019}', '\u{ab}', '\u{bb}',
];

/// Strip labels, quotes and punctuation from a raw model title and bound
/// its length.
pub fn clean_title(raw: &str, max_chars: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = match line.get(..6) {
        Some(label) if label.eq_ignore_ascii_case("title:") => &line[6..],
        _ => line,
    };
    let stripped = line.trim().trim_matches(WRAPPING).trim();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
        .trim_end()
        .trim_end_matches(WRAPPING)
        .to_owned()
}

/// Whether `title` is short and made only of generic words.
pub fn is_generic_title(title: &str, max_chars: usize) -> bool {
    if title.is_empty() || title.chars().count() > max_chars {
        return false;
    }
    title
        .split_whitespace()
        .map(|w| w.trim_matches(WRAPPING).to_lowercase())
        .all(|w| GENERIC_WORDS.contains(&w.as_str()))
}

/// Produces titles on a dedicated low-temperature session.
pub struct TitleGenerator {
    engine: Option<Arc<dyn LanguageEngine>>,
    config: TitleConfig,
    clock: Arc<dyn Clock>,
}

impl TitleGenerator {
    /// A generator on `engine`.
    pub fn new(
        engine: Option<Arc<dyn LanguageEngine>>,
        config: TitleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            config,
            clock,
        }
    }

    /// Title for a conversation opening with `user_text` and
    /// `assistant_text`.
    ///
    /// # Errors
    ///
    /// Fails like [`run_single_prompt`].
    pub async fn generate(
        &self,
        user_text: &str,
        assistant_text: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let user = truncate_chars(user_text.trim(), self.config.input_chars);
        let assistant = truncate_chars(assistant_text.trim(), self.config.input_chars);
        let prompt = format!(
            "Write a title of at most six words for this conversation. \
             Reply with the title only.\n\nUser: {user}\n\nAssistant: {assistant}"
        );
        let temperature = self.config.temperature;

        let raw = run_single_prompt(
            self.engine.as_ref(),
            move |base: SamplingConfig| {
                base.with_temperature(temperature)
                    .with_system_prompt("You write short, specific conversation titles.")
            },
            PromptInput::text(prompt),
            cancel,
            "title",
        )
        .await?;

        let mut title = clean_title(&raw, self.config.max_title_chars);
        if title.is_empty() {
            title = clean_title(user, self.config.max_title_chars);
        }
        if is_generic_title(&title, self.config.generic_max_chars) {
            title = format!("{title} \u{b7} {}", self.clock.now().format("%b %-d %H:%M"));
        }
        tracing::debug!(title, "generated title");
        Ok(title)
    }
}
