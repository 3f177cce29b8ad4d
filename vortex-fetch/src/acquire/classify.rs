//! Downloader failure classification

use std::fmt;

/// Why a download failed, as far as the downloader's output tells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    UnsupportedSource,
    ContentUnavailable,
    TooLarge,
    AuthenticationBlocked,
    Other,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::UnsupportedSource => "unsupported source",
            FailureCategory::ContentUnavailable => "content unavailable",
            FailureCategory::TooLarge => "too large",
            FailureCategory::AuthenticationBlocked => "authentication blocked",
            FailureCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// Marker substrings, checked in order
const MARKERS: &[(&str, FailureCategory)] = &[
    ("Unsupported URL", FailureCategory::UnsupportedSource),
    ("is not a valid URL", FailureCategory::UnsupportedSource),
    ("Video unavailable", FailureCategory::ContentUnavailable),
    ("This video is unavailable", FailureCategory::ContentUnavailable),
    ("Private video", FailureCategory::ContentUnavailable),
    ("This video has been removed", FailureCategory::ContentUnavailable),
    ("File is larger than the maximum", FailureCategory::TooLarge),
    ("File is larger than max-filesize", FailureCategory::TooLarge),
    ("Sign in to confirm", FailureCategory::AuthenticationBlocked),
    ("Signature extraction failed", FailureCategory::AuthenticationBlocked),
    ("login required", FailureCategory::AuthenticationBlocked),
    ("HTTP Error 403", FailureCategory::AuthenticationBlocked),
];

const EXCERPT_LIMIT: usize = 300;

/// Find the first known marker, looking at stderr before stdout
pub fn classify_failure(stderr: &str, stdout: &str) -> Option<FailureCategory> {
    [stderr, stdout].into_iter().find_map(|text| {
        MARKERS
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, category)| *category)
    })
}

/// Short diagnostic for logs and error values
///
/// Prefers the last `ERROR:` line, otherwise the last non-empty line of
/// stderr then stdout. Truncated to 300 characters.
pub fn diagnostic_excerpt(stderr: &str, stdout: &str) -> String {
    let lines = || stderr.lines().chain(stdout.lines()).map(str::trim);
    let chosen = lines()
        .filter(|l| l.starts_with("ERROR:"))
        .last()
        .or_else(|| lines().filter(|l| !l.is_empty()).last())
        .unwrap_or("no output");
    truncate_chars(chosen, EXCERPT_LIMIT)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
