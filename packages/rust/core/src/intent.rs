//! Trigger-word detection for code execution requests.
//!
//! The detector is advisory: its output is shown to the oracle and used to
//! pick the execution mode, but it never forces a transition on its own.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Trigger words, in the order matches are reported.
pub const TRIGGER_WORDS: [&str; 9] = [
    "EXECUTE",
    "RUN_CODE",
    "CODE_EXEC",
    "SHELL_EXEC",
    "PYTHON_EXEC",
    "ANALYZE_DATA",
    "PROCESS_DATA",
    "COMPUTE",
    "CALCULATE",
];

static TRIGGER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    TRIGGER_WORDS
        .iter()
        .map(|word| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).expect("valid regex"))
        .collect()
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Kind of execution a question most likely asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionCategory {
    Python,
    Shell,
    DataAnalysis,
    Calculation,
    DataProcessing,
    General,
}

impl ExecutionCategory {
    /// Keyword groups checked in order; the first group with a substring hit wins.
    const GROUPS: [(Self, &'static [&'static str]); 5] = [
        (Self::Python, &["python", "script", "code"]),
        (Self::Shell, &["shell", "bash", "command"]),
        (Self::DataAnalysis, &["analyze", "analysis", "data"]),
        (Self::Calculation, &["calculate", "compute", "math"]),
        (Self::DataProcessing, &["process", "transform", "convert"]),
    ];

    fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();
        Self::GROUPS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
            .map_or(Self::General, |(category, _)| *category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Shell => "shell",
            Self::DataAnalysis => "data_analysis",
            Self::Calculation => "calculation",
            Self::DataProcessing => "data_processing",
            Self::General => "general",
        }
    }
}

impl fmt::Display for ExecutionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the detector found in a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionIntent {
    pub triggered: bool,
    /// One entry per occurrence, in trigger-word order, using the canonical spelling.
    pub matched: Vec<String>,
    /// The question with trigger words removed and whitespace collapsed.
    pub cleaned: String,
    pub category: ExecutionCategory,
}

/// Scan `text` for trigger words and classify the request.
pub fn detect_intent(text: &str) -> ExecutionIntent {
    let mut matched = Vec::new();
    let mut cleaned = text.to_string();

    for (word, pattern) in TRIGGER_WORDS.iter().zip(TRIGGER_PATTERNS.iter()) {
        let hits = pattern.find_iter(text).count();
        if hits > 0 {
            matched.extend(std::iter::repeat_n(word.to_string(), hits));
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }
    }

    let cleaned = WHITESPACE_RE.replace_all(&cleaned, " ").trim().to_string();

    ExecutionIntent {
        triggered: !matched.is_empty(),
        matched,
        cleaned,
        category: ExecutionCategory::classify(text),
    }
}
