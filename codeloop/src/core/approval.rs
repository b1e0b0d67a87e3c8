//! Deterministic approval classification of free-text reviews.
//!
//! Reviewers are asked for a `## Review Summary` and a `## Critical Issues`
//! section but do not reliably follow the template. The verdict is assembled
//! from three independent signals:
//!
//! 1. The summary section tentatively approves when it says `APPROVED` and no
//!    blocking marker (`NEEDS_CHANGES`, `REJECTED`, ...).
//! 2. A non-empty critical issues section vetoes approval. An empty section or
//!    one that only states "none" never upgrades a verdict on its own.
//! 3. Without a summary header, a bare `APPROVED` anywhere in the text decides.
//!
//! Anything ambiguous resolves to [`Verdict::NeedsChanges`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Markers that cancel an `APPROVED` keyword in the same scope.
const BLOCKING_MARKERS: [&str; 4] = ["NEEDS_CHANGES", "NEEDS CHANGES", "NOT APPROVED", "REJECTED"];

static SUMMARY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*#{1,6}[ \t]*review summary\b").expect("summary header regex")
});

static CRITICAL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*#{1,6}[ \t]*critical issues\b").expect("critical header regex")
});

/// A level-1 or level-2 header closes a section; deeper headers stay inside it.
static SECTION_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*#{1,2}[ \t]").expect("section end regex"));

/// A whole line that only states there is nothing to report.
static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(none|n/?a|nothing|no (critical |major |blocking |known |significant )?(issues?|problems?|bugs?|concerns?))( (were |was )?(found|identified|detected|noted|observed))?[ \t]*[.!]?$",
    )
    .expect("negation regex")
});

/// Binary outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsChanges,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approved => "approved",
            Verdict::NeedsChanges => "needs-changes",
        }
    }
}

/// Classify a review document.
pub fn classify(review: &str) -> Verdict {
    let tentative = summary_signal(review).unwrap_or_else(|| fallback_signal(review));
    if tentative && !critical_issues_veto(review) {
        Verdict::Approved
    } else {
        Verdict::NeedsChanges
    }
}

/// Tentative verdict from the `Review Summary` section.
///
/// Returns `None` when the document has no summary header at all. The header
/// line itself counts as part of the section (`## Review Summary: APPROVED`).
pub fn summary_signal(review: &str) -> Option<bool> {
    let header = SUMMARY_HEADER.find(review)?;
    let section = section_after(review, header.end());
    Some(approves(&section.to_uppercase()))
}

/// True when a `Critical Issues` section lists at least one real issue.
///
/// The remainder of the header line (e.g. `(Must Fix)`) is not content.
pub fn critical_issues_veto(review: &str) -> bool {
    let Some(header) = CRITICAL_HEADER.find(review) else {
        return false;
    };
    let section = section_after(review, header.end());
    let body = match section.find('\n') {
        Some(idx) => &section[idx + 1..],
        None => "",
    };
    !is_empty_or_negated(body)
}

/// Bare keyword check used when no summary section exists.
pub fn fallback_signal(review: &str) -> bool {
    approves(&review.to_uppercase())
}

fn approves(upper: &str) -> bool {
    upper.contains("APPROVED") && !BLOCKING_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Text from `start` up to the next level-1/2 header (or end of document).
///
/// Lines inside fenced code blocks never end a section, so a `# comment` in
/// quoted code stays part of the issue it illustrates.
fn section_after(text: &str, start: usize) -> &str {
    let rest = &text[start..];
    // The header line never ends its own section.
    let Some(newline) = rest.find('\n') else {
        return rest;
    };
    let mut offset = newline + 1;
    let mut in_fence = false;
    for line in rest[offset..].split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if !in_fence && SECTION_END.is_match(line) {
            return &rest[..offset];
        }
        offset += line.len();
    }
    rest
}

/// A section is "empty" when it has no text, or when every non-empty line is
/// a negation ("None identified.", "- N/A").
fn is_empty_or_negated(body: &str) -> bool {
    body.lines()
        .map(strip_decoration)
        .filter(|line| !line.is_empty())
        .all(|line| NEGATION.is_match(&line))
}

fn strip_decoration(line: &str) -> String {
    line.trim()
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '+' | '•' | '_' | '>' | '[' | ']'))
        .trim()
        .trim_end_matches(|c: char| matches!(c, '*' | '_'))
        .trim()
        .to_lowercase()
}
