//! Question decomposition.
//!
//! A student message often carries several questions pasted from an
//! assignment sheet. The decomposer splits the message into discrete
//! questions so each can be retrieved and answered independently. If
//! nothing survives the filters, the entire message is treated as a
//! single question — the output is never empty.

/// Lines shorter than this are treated as noise, not questions.
const MIN_QUESTION_LEN: usize = 8;

/// Instructional boilerplate that must not become a question of its own.
const BOILERPLATE: &[&str] = &["answer the following questions:", "answer the following questions"];

/// Split a message into an ordered, non-empty list of questions.
pub fn split_questions(message: &str) -> Vec<String> {
    let mut questions = Vec::new();

    for line in message.lines() {
        let stripped = strip_list_prefix(line.trim());
        if stripped.len() < MIN_QUESTION_LEN {
            continue;
        }
        let lowered = stripped.to_lowercase();
        if BOILERPLATE.iter().any(|b| lowered == *b) {
            continue;
        }
        questions.push(stripped.to_string());
    }

    if questions.is_empty() {
        let whole = message.trim();
        if !whole.is_empty() {
            questions.push(whole.to_string());
        }
    }

    questions
}

/// Remove a leading bullet or numbering prefix: `-`, `*`, `•`, `1.`,
/// `2)`, `Q3:` and similar.
fn strip_list_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();

    // Bullet characters.
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = trimmed.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }

    // `Q7:` / `q7.` style.
    if let Some(rest) = trimmed.strip_prefix('Q').or_else(|| trimmed.strip_prefix('q')) {
        if let Some(after) = strip_number_prefix(rest) {
            return after;
        }
    }

    // Bare `12.` / `12)` numbering.
    if let Some(after) = strip_number_prefix(trimmed) {
        return after;
    }

    trimmed
}

/// If `s` starts with digits followed by `.`, `)` or `:`, return the rest.
fn strip_number_prefix(s: &str) -> Option<&str> {
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &s[digits..];
    rest.strip_prefix(['.', ')', ':'])
        .map(|r| r.trim_start())
}
