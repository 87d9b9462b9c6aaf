//! Text analysis: the CPU-bound work behind every job.
//!
//! `analyze_text` is a pure function. The `Analyzer` trait is the seam the job
//! queue and the worker pool call through, so both paths run the same code.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Average adult reading speed used for `reading_time_minutes`.
const WORDS_PER_MINUTE: usize = 200;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}\p{N}]+)*").expect("word pattern is valid")
});

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("sentence pattern is valid"));

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph pattern is valid"));

/// The most frequent word and how often it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordFrequency {
    pub word: String,
    pub count: usize,
}

/// Structured counts for a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub word_count: usize,
    pub unique_word_count: usize,
    pub character_count: usize,
    pub character_count_no_spaces: usize,
    pub sentence_count: usize,
    pub paragraph_count: usize,
    /// Characters per word, rounded to two decimals.
    pub average_word_length: f64,
    pub reading_time_minutes: usize,
    pub most_frequent_word: Option<WordFrequency>,
}

/// Runs the analysis for a piece of content.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, content: &str) -> Result<AnalysisResult, AnalysisError>;
}

/// The production analyzer; never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextAnalyzer;

impl Analyzer for TextAnalyzer {
    fn analyze(&self, content: &str) -> Result<AnalysisResult, AnalysisError> {
        Ok(analyze_text(content))
    }
}

/// Analyze `content`. Empty or whitespace-only input yields the zero value.
pub fn analyze_text(content: &str) -> AnalysisResult {
    if content.trim().is_empty() {
        return AnalysisResult::default();
    }

    let words: Vec<String> = WORD_RE
        .find_iter(content)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    // word -> (count, first position)
    let mut frequencies: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in words.iter().enumerate() {
        frequencies
            .entry(word.as_str())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, position));
    }

    let most_frequent_word = frequencies
        .iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(word, (count, _))| WordFrequency {
            word: (*word).to_string(),
            count: *count,
        });

    let letters: usize = words.iter().map(|w| w.chars().count()).sum();
    let average_word_length = if words.is_empty() {
        0.0
    } else {
        ((letters as f64 / words.len() as f64) * 100.0).round() / 100.0
    };

    let sentence_count = SENTENCE_END_RE
        .split(content)
        .filter(|segment| WORD_RE.is_match(segment))
        .count();

    let paragraph_count = PARAGRAPH_BREAK_RE
        .split(content)
        .filter(|block| !block.trim().is_empty())
        .count();

    AnalysisResult {
        word_count: words.len(),
        unique_word_count: frequencies.len(),
        character_count: content.chars().count(),
        character_count_no_spaces: content.chars().filter(|c| !c.is_whitespace()).count(),
        sentence_count,
        paragraph_count,
        average_word_length,
        reading_time_minutes: words.len().div_ceil(WORDS_PER_MINUTE),
        most_frequent_word,
    }
}
