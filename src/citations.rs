//! Citation reconciliation.
//!
//! Each sub-answer numbers its sources locally, starting at 1 within its
//! own prompt context. Merging the sub-answers therefore requires
//! renumbering: every `[Source N]` marker is mapped from its sub-answer's
//! local numbering into one global, deduplicated scheme assigned in
//! first-seen order across the whole response.
//!
//! Rewriting happens as tokenize → map → re-render in a single pass.
//! Sequential find-and-replace is deliberately avoided: replacing "1"→"2"
//! and then "2"→"3" would re-touch the first replacement.

use std::collections::HashMap;

use crate::models::{ReconciledSource, Source, SubAnswer};

/// Characters of chunk text contributing to a source's identity key.
/// Two chunks from the same file and page whose text agrees this far are
/// the same source for citation purposes.
const KEY_TEXT_PREFIX: usize = 80;

/// Merge sub-answers into one response, renumbering citations globally.
/// Sub-answers are visited strictly in order so numbering is reproducible.
pub fn reconcile(sub_answers: &[SubAnswer]) -> (String, Vec<ReconciledSource>) {
    let mut key_to_global: HashMap<String, usize> = HashMap::new();
    let mut global_sources: Vec<ReconciledSource> = Vec::new();
    let mut next_global = 1usize;

    let mut parts: Vec<String> = Vec::with_capacity(sub_answers.len());

    for sub in sub_answers {
        let tokens = tokenize(&sub.text);

        // Local numbers are meaningless outside this sub-answer; the map
        // is rebuilt from scratch every iteration.
        let mut local_to_global: HashMap<usize, usize> = HashMap::new();

        for token in &tokens {
            let Token::Marker(local) = token else {
                continue;
            };
            if local_to_global.contains_key(local) {
                continue;
            }
            let Some(source) = sub.sources.iter().find(|s| s.number == *local) else {
                // The model cited a number we never gave it; leave the
                // marker as-is rather than invent a source.
                continue;
            };

            let key = source_key(source);
            let global = *key_to_global.entry(key).or_insert_with(|| {
                let assigned = next_global;
                next_global += 1;
                global_sources.push(ReconciledSource {
                    number: assigned,
                    file: source.file.clone(),
                    page_number: source.page_number,
                    content: source.content.clone(),
                });
                assigned
            });
            local_to_global.insert(*local, global);
        }

        parts.push(render(&tokens, &local_to_global));
    }

    global_sources.sort_by_key(|s| s.number);
    (parts.join("\n\n"), global_sources)
}

/// Identity key for deduplication across sub-answers: file id, page, and
/// a bounded prefix of the chunk text.
fn source_key(source: &Source) -> String {
    let prefix: String = source.content.chars().take(KEY_TEXT_PREFIX).collect();
    format!("{}|{}|{}", source.file.id, source.page_number, prefix)
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Marker(usize),
}

/// Split answer text into literal runs and `[Source N]` markers.
fn tokenize(text: &str) -> Vec<Token> {
    const OPEN: &str = "[Source ";

    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(OPEN) {
        let after = &rest[pos + OPEN.len()..];
        let digits = after.chars().take_while(|c| c.is_ascii_digit()).count();

        let number = if digits > 0 && after[digits..].starts_with(']') {
            // A digit run too large for usize is not a real marker.
            after[..digits].parse::<usize>().ok()
        } else {
            None
        };

        if let Some(number) = number {
            literal.push_str(&rest[..pos]);
            if !literal.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Marker(number));
            rest = &after[digits + 1..];
        } else {
            // "[Source" not followed by a parseable "N]" is ordinary text.
            literal.push_str(&rest[..pos + OPEN.len()]);
            rest = after;
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        tokens.push(Token::Text(literal));
    }

    tokens
}

fn render(tokens: &[Token], local_to_global: &HashMap<usize, usize>) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(t) => out.push_str(t),
            Token::Marker(local) => match local_to_global.get(local) {
                Some(global) => out.push_str(&format!("[Source {}]", global)),
                None => out.push_str(&format!("[Source {}]", local)),
            },
        }
    }
    out
}
