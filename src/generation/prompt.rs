//! Prompt composition.

use crate::attachments::PreparedAttachment;

const TRUNCATION_MARK: &str = "\n[truncated]";

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Lay out context, text attachments and the prompt.
///
/// The prompt is always kept whole. Context and attachment text share what
/// is left of `max_chars` and are cut, in that order, when they do not fit.
pub fn compose_prompt(
    prompt: &str,
    context: Option<&str>,
    attachments: &[PreparedAttachment],
    max_chars: usize,
) -> String {
    let mut supplement = String::new();
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        supplement.push_str("Context:\n");
        supplement.push_str(context);
        supplement.push_str("\n\n");
    }
    for attachment in attachments {
        if let PreparedAttachment::Text { mime, name, text } = attachment {
            let label = name.as_deref().unwrap_or(mime);
            supplement.push_str(&format!("Attachment ({label}):\n{}\n\n", text.trim()));
        }
    }

    let budget = max_chars.saturating_sub(prompt.chars().count());
    let supplement_chars = supplement.chars().count();
    let mut composed = if supplement_chars > budget {
        let keep = budget.saturating_sub(TRUNCATION_MARK.chars().count() + 2);
        let mut cut = truncate_chars(&supplement, keep).to_owned();
        if keep > 0 {
            cut.push_str(TRUNCATION_MARK);
            cut.push_str("\n\n");
        }
        cut
    } else {
        supplement
    };
    composed.push_str(prompt);
    composed
}
