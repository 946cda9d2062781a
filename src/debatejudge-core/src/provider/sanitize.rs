//! Cleanup of raw model output before it enters a transcript.

use regex::Regex;
use std::sync::LazyLock;

/// Tags whose whole block is internal reasoning and never meant for the audience.
const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

static REASONING_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).ok())
        .collect()
});

/// An unmatched opening or closing reasoning tag. Other angle brackets are
/// ordinary prose ("a<b and c>d") and stay.
static ORPHAN_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)</?(?:{})\b[^>]*>", REASONING_TAGS.join("|"))).ok()
});

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[ \t]+").ok());

static BLANK_LINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n\s*\n+").ok());

/// Strip reasoning blocks, leftover markup and emphasis markers.
///
/// Paragraph breaks are kept so judges' structured answers stay readable.
pub fn sanitize_response(response: &str) -> String {
    let mut result = response.to_string();

    for block in REASONING_BLOCKS.iter() {
        result = block.replace_all(&result, "").into_owned();
    }

    // DeepSeek-R1 style output sometimes drops the opening tag.
    if let Some(idx) = result.find("</think>") {
        result = result[idx + "</think>".len()..].to_string();
    }

    if let Some(re) = ORPHAN_TAG.as_ref() {
        result = re.replace_all(&result, "").into_owned();
    }

    result = result.replace('*', "");

    if let Some(re) = WHITESPACE.as_ref() {
        result = re.replace_all(&result, " ").into_owned();
    }
    if let Some(re) = BLANK_LINES.as_ref() {
        result = re.replace_all(&result, "\n\n").into_owned();
    }

    result
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
