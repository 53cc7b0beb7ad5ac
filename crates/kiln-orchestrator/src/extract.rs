//! Code and confidence extraction from raw model replies
//!
//! ## Code
//!
//! The first fenced block wins:
//!
//! ````text
//! Here is the program:
//! ```python
//! print(2 + 3)
//! ```
//! Confidence: 90%
//! ````
//!
//! A fence that is opened but never closed runs to the end of the reply.
//! Without any fence the whole reply is taken, minus confidence statements
//! trailing the code. Lines inside the code are never dropped.
//! A result that is only whitespace means there is no code.
//!
//! ## Confidence
//!
//! `Confidence: 90%`, `confidence = 0.9` and `90% confident` are all read as
//! 0.9. Values are clamped to [0, 1].

use regex::Regex;
use std::sync::OnceLock;

const FENCE: &str = "```";

/// A code payload and the language tag of its fence, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

/// Extract the code payload from a reply
pub fn extract_code(text: &str) -> Option<String> {
    extract_block(text).map(|block| block.code)
}

/// Like [`extract_code`], keeping the fence's language tag
pub fn extract_block(text: &str) -> Option<CodeBlock> {
    let Some(open) = text.find(FENCE) else {
        let code = strip_confidence_lines(text);
        return non_blank(code).map(|code| CodeBlock {
            language: None,
            code,
        });
    };

    let after_fence = &text[open + FENCE.len()..];
    let (language, body) = match after_fence.find('\n') {
        Some(newline) => (
            language_tag(&after_fence[..newline]),
            &after_fence[newline + 1..],
        ),
        // Single-line block such as ```print(1)```
        None => (None, after_fence),
    };

    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };

    let code = body
        .trim_end()
        .trim_start_matches(|c| c == '\n' || c == '\r')
        .to_string();

    non_blank(code).map(|code| CodeBlock { language, code })
}

/// Self-reported confidence in [0, 1], if the reply states one
pub fn parse_confidence(text: &str) -> Option<f32> {
    let captures = labelled_pattern()
        .and_then(|re| re.captures(text))
        .or_else(|| suffixed_pattern().and_then(|re| re.captures(text)))?;

    let value: f32 = captures.get(1)?.as_str().parse().ok()?;
    let percent = captures.get(2).is_some() || value > 1.0;
    let value = if percent { value / 100.0 } else { value };
    Some(value.clamp(0.0, 1.0))
}

fn labelled_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)confidence\s*[:=]\s*(\d+(?:\.\d+)?)\s*(%)?").ok())
        .as_ref()
}

fn suffixed_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(%)\s*confiden").ok())
        .as_ref()
}

/// A whole line of prose stating confidence, e.g. `Confidence: 90%`
fn confidence_statement() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)^\s*(?:\*\*)?confidence(?:\*\*)?\s*:\s*(?:\*\*)?\d+(?:\.\d+)?\s*%?(?:\*\*)?\s*\.?\s*$|^\s*(?:i(?:'m| am)\s+)?\d+(?:\.\d+)?\s*%\s*confident\b[^=;(){}]*$",
            )
            .ok()
        })
        .as_ref()
}

fn strip_confidence_lines(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(last) = lines.last() {
        let statement = confidence_statement().is_some_and(|re| re.is_match(last));
        if last.trim().is_empty() || statement {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n").trim().to_string()
}

fn language_tag(info: &str) -> Option<String> {
    let tag = info.trim();
    let valid = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '-' | '_' | '.'));
    valid.then(|| tag.to_lowercase())
}

fn non_blank(code: String) -> Option<String> {
    if code.trim().is_empty() {
        None
    } else {
        Some(code)
    }
}
