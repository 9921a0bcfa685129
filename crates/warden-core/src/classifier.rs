//! Necessity classifier (C5): decide whether a Task's description/prompt
//! describes work direct tools already handle, so spawning an agent for it
//! is a waste of tokens.
//!
//! Two passes, first match wins: a fixed regex list over direct-tool
//! intents, then — only on a regex miss — a fuzzy word-ratio match against
//! a canonical corpus of paraphrases of those same intents.

use std::sync::LazyLock;

use regex::Regex;

use crate::similarity::word_ratio_str;

/// Minimum [`crate::similarity::word_ratio_str`] score for the fuzzy pass to fire.
pub const FUZZY_THRESHOLD: f64 = 0.55;

/// Characters the combined `description + " " + prompt` is truncated to
/// before either pass runs.
const MAX_INPUT_CHARS: usize = 200;

/// Outcome of classifying a Task's description and prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierResult {
    /// Whether R5 should block this spawn.
    pub should_block: bool,
    /// Human-readable suggestion for what to do instead, when blocking.
    pub suggestion: Option<String>,
    /// Stable pattern name (`fuzzy_`-prefixed for fuzzy-pass matches), for
    /// the audit log's `pattern` field.
    pub pattern: Option<String>,
}

impl ClassifierResult {
    fn allow() -> Self {
        Self {
            should_block: false,
            suggestion: None,
            pattern: None,
        }
    }

    fn block(name: &str, suggestion: &str) -> Self {
        Self {
            should_block: true,
            suggestion: Some(suggestion.to_string()),
            pattern: Some(name.to_string()),
        }
    }
}

struct RegexPattern {
    name: &'static str,
    pattern: &'static str,
    suggestion: &'static str,
}

const REGEX_PATTERNS: &[RegexPattern] = &[
    RegexPattern {
        name: "search_grep",
        pattern: r"\b(search|grep|look for|find)\b.{0,40}\b(function|method|class|variable|usage|reference|pattern|string|definition)\b",
        suggestion: "Use Grep or a direct code search instead of spawning an agent.",
    },
    RegexPattern {
        name: "read_file",
        pattern: r"\b(read|open)\b.{0,40}\bfile\b|\bshow me the contents\b",
        suggestion: "Use Read directly on the file instead of spawning an agent.",
    },
    RegexPattern {
        name: "check_verify",
        pattern: r"\b(check|verify|confirm)\b.{0,40}\b(if|whether|that)\b",
        suggestion: "Check this directly with Read/Grep instead of spawning an agent.",
    },
    RegexPattern {
        name: "edit_fix",
        pattern: r"\b(edit|fix|change|update|modify)\b.{0,40}\b(file|function|line|bug|typo)\b",
        suggestion: "Use Edit directly instead of spawning an agent for a targeted change.",
    },
    RegexPattern {
        name: "analyze_inspect",
        pattern: r"\b(analyze|inspect|look at|examine)\b.{0,40}\b(code|file|function|module|implementation)\b",
        suggestion: "Read the code directly instead of spawning an agent to analyze it.",
    },
    RegexPattern {
        name: "what_does",
        pattern: r"\bwhat does\b.{0,60}\bdo\b",
        suggestion: "Read the implementation directly instead of spawning an agent to explain it.",
    },
    RegexPattern {
        name: "list_show",
        pattern: r"\b(list|show)\b.{0,40}\b(files|functions|methods|classes|directory|contents)\b",
        suggestion: "Use Glob/Grep/Read directly instead of spawning an agent to enumerate this.",
    },
    RegexPattern {
        name: "count_occurrences",
        pattern: r"\bcount\b.{0,40}\b(occurrences|instances|times|lines|matches)\b",
        suggestion: "Use Grep's count mode directly instead of spawning an agent.",
    },
    RegexPattern {
        name: "compare_diff",
        pattern: r"\b(compare|diff)\b.{0,40}\b(files|versions|branches|implementations)\b",
        suggestion: "Diff the files directly instead of spawning an agent to compare them.",
    },
    RegexPattern {
        name: "run_execute",
        pattern: r"\b(run|execute)\b.{0,40}\b(tests|script|command|build)\b",
        suggestion: "Run this directly with Bash instead of spawning an agent.",
    },
];

static COMPILED_PATTERNS: LazyLock<Vec<(&'static RegexPattern, Regex)>> = LazyLock::new(|| {
    REGEX_PATTERNS
        .iter()
        .map(|p| {
            (
                p,
                Regex::new(&format!("(?i){}", p.pattern)).expect("static pattern is valid regex"),
            )
        })
        .collect()
});

struct CanonicalPhrase {
    /// Base pattern name; the fuzzy match reports this with a `fuzzy_` prefix.
    base_pattern: &'static str,
    phrase: &'static str,
}

const CANONICAL_PHRASES: &[CanonicalPhrase] = &[
    CanonicalPhrase { base_pattern: "search_grep", phrase: "find where this helper is used across all files" },
    CanonicalPhrase { base_pattern: "search_grep", phrase: "locate every call site of this function" },
    CanonicalPhrase { base_pattern: "search_grep", phrase: "track down all usages of this variable" },
    CanonicalPhrase { base_pattern: "search_grep", phrase: "hunt for references to this class across the codebase" },
    CanonicalPhrase { base_pattern: "search_grep", phrase: "figure out everywhere this string literal shows up" },
    CanonicalPhrase { base_pattern: "read_file", phrase: "pull up the contents of this file for me" },
    CanonicalPhrase { base_pattern: "read_file", phrase: "take a look inside this source file" },
    CanonicalPhrase { base_pattern: "read_file", phrase: "open this file and tell me what is in it" },
    CanonicalPhrase { base_pattern: "read_file", phrase: "display the text of this configuration file" },
    CanonicalPhrase { base_pattern: "read_file", phrase: "load this document so we can see its contents" },
    CanonicalPhrase { base_pattern: "check_verify", phrase: "make sure this condition actually holds true" },
    CanonicalPhrase { base_pattern: "check_verify", phrase: "double check whether this assumption is correct" },
    CanonicalPhrase { base_pattern: "check_verify", phrase: "confirm this value matches what we expect" },
    CanonicalPhrase { base_pattern: "check_verify", phrase: "validate that the configuration is set up properly" },
    CanonicalPhrase { base_pattern: "check_verify", phrase: "see whether the test suite still passes" },
    CanonicalPhrase { base_pattern: "edit_fix", phrase: "patch this small bug in the function" },
    CanonicalPhrase { base_pattern: "edit_fix", phrase: "correct the typo on this line" },
    CanonicalPhrase { base_pattern: "edit_fix", phrase: "swap out this value for the right one" },
    CanonicalPhrase { base_pattern: "edit_fix", phrase: "tweak this one line of configuration" },
    CanonicalPhrase { base_pattern: "edit_fix", phrase: "make a one line change to this file" },
    CanonicalPhrase { base_pattern: "analyze_inspect", phrase: "walk through how this module is put together" },
    CanonicalPhrase { base_pattern: "analyze_inspect", phrase: "take a closer look at how this code works" },
    CanonicalPhrase { base_pattern: "analyze_inspect", phrase: "dig into the implementation of this feature" },
    CanonicalPhrase { base_pattern: "analyze_inspect", phrase: "study this function to understand its behavior" },
    CanonicalPhrase { base_pattern: "analyze_inspect", phrase: "go over this module and explain the design" },
    CanonicalPhrase { base_pattern: "what_does", phrase: "tell me what this piece of code is doing" },
    CanonicalPhrase { base_pattern: "what_does", phrase: "explain what this function actually accomplishes" },
    CanonicalPhrase { base_pattern: "what_does", phrase: "describe the purpose of this block of code" },
    CanonicalPhrase { base_pattern: "what_does", phrase: "clarify what this script is responsible for" },
    CanonicalPhrase { base_pattern: "what_does", phrase: "summarize what this class is used for" },
    CanonicalPhrase { base_pattern: "list_show", phrase: "enumerate every file under this directory" },
    CanonicalPhrase { base_pattern: "list_show", phrase: "give me the names of all the functions here" },
    CanonicalPhrase { base_pattern: "list_show", phrase: "print out the directory structure of this project" },
    CanonicalPhrase { base_pattern: "list_show", phrase: "display all the classes defined in this module" },
    CanonicalPhrase { base_pattern: "list_show", phrase: "show me everything inside this folder" },
    CanonicalPhrase { base_pattern: "count_occurrences", phrase: "tally up how many times this pattern appears" },
    CanonicalPhrase { base_pattern: "count_occurrences", phrase: "figure out the number of matches for this string" },
    CanonicalPhrase { base_pattern: "count_occurrences", phrase: "how many lines in this file contain that word" },
    CanonicalPhrase { base_pattern: "count_occurrences", phrase: "total up the instances of this keyword" },
    CanonicalPhrase { base_pattern: "count_occurrences", phrase: "get a total count of occurrences of this term" },
    CanonicalPhrase { base_pattern: "compare_diff", phrase: "see what changed between these two versions" },
    CanonicalPhrase { base_pattern: "compare_diff", phrase: "line up these two files and spot the differences" },
    CanonicalPhrase { base_pattern: "compare_diff", phrase: "figure out how this branch diverged from main" },
    CanonicalPhrase { base_pattern: "compare_diff", phrase: "contrast the old implementation with the new one" },
    CanonicalPhrase { base_pattern: "compare_diff", phrase: "spot the discrepancies between these two modules" },
    CanonicalPhrase { base_pattern: "run_execute", phrase: "kick off the test suite and report the results" },
    CanonicalPhrase { base_pattern: "run_execute", phrase: "fire off this build script for me" },
    CanonicalPhrase { base_pattern: "run_execute", phrase: "invoke this command and capture the output" },
    CanonicalPhrase { base_pattern: "run_execute", phrase: "launch the benchmark and see how it performs" },
    CanonicalPhrase { base_pattern: "run_execute", phrase: "trigger the lint step and show me any failures" },
];

fn suggestion_for(base_pattern: &str) -> &'static str {
    REGEX_PATTERNS
        .iter()
        .find(|p| p.name == base_pattern)
        .map_or("Use direct tools instead of spawning an agent.", |p| p.suggestion)
}

fn normalize(description: &str, prompt: &str) -> String {
    let combined = format!("{description} {prompt}").to_lowercase();
    combined.chars().take(MAX_INPUT_CHARS).collect()
}

/// Classify a Task's description/prompt. See module docs for the pipeline.
#[must_use]
pub fn classify(description: &str, prompt: &str) -> ClassifierResult {
    let text = normalize(description, prompt);

    for (meta, regex) in COMPILED_PATTERNS.iter() {
        if regex.is_match(&text) {
            return ClassifierResult::block(meta.name, meta.suggestion);
        }
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut best: Option<(&CanonicalPhrase, f64)> = None;
    for canonical in CANONICAL_PHRASES {
        let canonical_words: Vec<&str> = canonical.phrase.split_whitespace().collect();
        let ratio = word_ratio_str(&words.join(" "), &canonical_words.join(" "));
        if best.as_ref().is_none_or(|(_, best_ratio)| ratio > *best_ratio) {
            best = Some((canonical, ratio));
        }
    }

    match best {
        Some((canonical, ratio)) if ratio >= FUZZY_THRESHOLD => {
            let name = format!("fuzzy_{}", canonical.base_pattern);
            ClassifierResult::block(&name, suggestion_for(canonical.base_pattern))
        }
        _ => ClassifierResult::allow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_pass_blocks_direct_search_request() {
        let result = classify("search for function in the codebase", "");
        assert!(result.should_block);
        assert_eq!(result.pattern.as_deref(), Some("search_grep"));
    }

    #[test]
    fn fuzzy_pass_blocks_paraphrased_search_request() {
        let result = classify("find where this helper is used across all files", "");
        assert!(result.should_block);
        assert_eq!(result.pattern.as_deref(), Some("fuzzy_search_grep"));
    }

    #[test]
    fn genuinely_novel_work_is_allowed() {
        let result = classify("design a new caching layer for the billing service", "think about tradeoffs between write-through and write-back");
        assert!(!result.should_block);
        assert!(result.pattern.is_none());
    }

    #[test]
    fn regex_pass_takes_priority_over_fuzzy_pass() {
        // Matches the read_file regex outright; must not fall through to fuzzy scoring.
        let result = classify("please read this file for me", "");
        assert_eq!(result.pattern.as_deref(), Some("read_file"));
    }

    #[test]
    fn input_is_case_insensitive() {
        let result = classify("SEARCH FOR FUNCTION IN THE CODEBASE", "");
        assert!(result.should_block);
    }
}
