//! Answer extraction and stop rules for the single-agent reasoning
//! strategies (chain of thought, self-consistency, reflexion).

use std::sync::LazyLock;

use regex::Regex;

static FINAL_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t>#*-]*final answer[ \t*]*:[ \t*]*(.*?)[ \t*]*$")
        .expect("final answer regex")
});

static ACCEPTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcorrect\b").expect("accepts regex"));

static OBJECTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(incorrect|errors?|wrong|bugs?|mistakes?)\b").expect("objects regex")
});

/// The answer a reasoning sample settles on: the last `Final Answer:` line,
/// else the last non-empty line.
pub fn final_answer(response: &str) -> String {
    FINAL_ANSWER
        .captures_iter(response)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|answer| !answer.is_empty())
        .last()
        .or_else(|| response.lines().map(str::trim).rfind(|line| !line.is_empty()))
        .unwrap_or_default()
        .to_string()
}

/// Index of the first sample holding the most common answer and the number
/// of samples that agree with it. Answers compare case- and
/// whitespace-insensitively, ignoring trailing punctuation.
pub fn majority(answers: &[String]) -> Option<(usize, usize)> {
    let normalized: Vec<String> = answers.iter().map(|a| normalize_answer(a)).collect();
    let mut best: Option<(usize, usize)> = None;
    for (idx, answer) in normalized.iter().enumerate() {
        if normalized[..idx].contains(answer) {
            continue;
        }
        let votes = normalized.iter().filter(|other| *other == answer).count();
        if best.is_none_or(|(_, top)| votes > top) {
            best = Some((idx, votes));
        }
    }
    best
}

/// True when a critique calls the solution correct and raises no error.
pub fn critique_accepts(critique: &str) -> bool {
    ACCEPTS.is_match(critique) && !OBJECTS.is_match(critique)
}

fn normalize_answer(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '*'])
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn final_answer_prefers_the_last_marker() {
        let response = "Step 1: add\nFinal Answer: 3\nWait, recheck.\n**Final Answer:** 4\nDone.";
        assert_eq!(final_answer(response), "4");
    }

    #[test]
    fn final_answer_falls_back_to_last_line() {
        assert_eq!(final_answer("reasoning\n\nthe answer is 42\n\n"), "the answer is 42");
        assert_eq!(final_answer(""), "");
    }

    #[test]
    fn majority_picks_most_common_then_earliest() {
        let answers = owned(&["12", "Twelve", "twelve.", "12 "]);
        // "12" and "twelve" both have two votes; "12" was seen first.
        assert_eq!(majority(&answers), Some((0, 2)));

        let answers = owned(&["a", "B", "b"]);
        assert_eq!(majority(&answers), Some((1, 2)));
        assert_eq!(majority(&[]), None);
    }

    #[test]
    fn critique_acceptance() {
        assert!(critique_accepts("The solution is correct and complete."));
        assert!(!critique_accepts("This is incorrect: the loop is off by one."));
        assert!(!critique_accepts("Mostly correct, but there is an error in step 2."));
        assert!(!critique_accepts("Consider memoizing the recursion."));
    }
}
