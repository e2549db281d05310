//! Cleaning up raw OCR output.
//!
//! OCR engines do a good job on running text, but scanned financial and legal
//! documents are full of tables, dotted leaders, stamps and signatures, which
//! come back as noise. We look at each line on its own, and either keep it,
//! repair it, or drop it.
//!
//! The default rules are tuned for Swedish scans. See [`FilterConfig`] for
//! what can be changed.

use std::sync::LazyLock;

use regex::Regex;

use self::repeats::{RepeatRule, is_word_char};
use crate::prelude::*;

pub mod repeats;

/// Runs of three or more periods.
static DOT_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{3,}").expect("failed to compile regex"));

/// Runs of three or more hyphens.
static HYPHEN_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{3,}").expect("failed to compile regex"));

/// Any whitespace.
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("failed to compile regex"));

/// Page numbers, dates and similar fragments.
static NUMERIC_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s\-/]+$").expect("failed to compile regex"));

/// Tunable settings for [`ArtifactFilter`].
#[derive(Clone, Debug, PartialEq)]
pub struct FilterConfig {
    /// Uppercase letters to accept in addition to ASCII `A-Z`.
    pub extra_uppercase: String,
    /// Drop lines where less than this fraction of characters are
    /// alphanumeric or whitespace.
    pub min_alnum_ratio: f64,
    /// After repair, drop lines where more than this fraction of characters
    /// are symbols.
    pub max_symbol_ratio: f64,
    /// After repair, drop lines shorter than this.
    pub min_line_chars: usize,
    /// Minimum number of leading short uppercase/bracket tokens which mark a
    /// line as a misread table or figure.
    pub fragment_min_tokens: usize,
    /// Maximum length of a fragment token.
    pub fragment_max_token_len: usize,
    /// Maximum length of a repeated uppercase abbreviation.
    pub repeated_token_max_len: usize,
    /// Minimum number of copies of an uppercase abbreviation to remove.
    pub repeated_token_min_run: usize,
    /// Minimum number of copies of a single character to remove.
    pub repeated_char_min_run: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extra_uppercase: "ÅÄÖ".to_owned(),
            min_alnum_ratio: 0.4,
            max_symbol_ratio: 0.6,
            min_line_chars: 3,
            fragment_min_tokens: 3,
            fragment_max_token_len: 2,
            repeated_token_max_len: 3,
            repeated_token_min_run: 4,
            repeated_char_min_run: 5,
        }
    }
}

/// Why was a line dropped?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Nothing but whitespace.
    Empty,
    /// Scattered short uppercase or bracket glyphs.
    Fragment,
    /// Mostly punctuation and symbols.
    LowAlnumDensity,
    /// Nothing but dots and whitespace once repeats were removed.
    OnlyDots,
    /// Too short once repaired.
    TooShort,
    /// Only digits, hyphens and slashes.
    NumericFragment,
    /// Still mostly symbols once repaired.
    SymbolDense,
}

/// What should we do with a line of OCR output?
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineVerdict {
    /// Keep the trimmed line as-is.
    Keep,
    /// Drop the line.
    Drop(DropReason),
    /// Replace the line with repaired text.
    Repair(String),
}

/// Removes OCR artifacts from recognized text.
#[derive(Clone, Debug)]
pub struct ArtifactFilter {
    config: FilterConfig,
    fragment: Regex,
}

impl ArtifactFilter {
    /// Create a new filter, checking the configuration.
    pub fn new(config: FilterConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.min_alnum_ratio)
            || !(0.0..=1.0).contains(&config.max_symbol_ratio)
        {
            return Err(anyhow!("filter ratios must be between 0.0 and 1.0"));
        }
        if config.fragment_min_tokens == 0
            || config.fragment_max_token_len == 0
            || config.repeated_token_max_len == 0
        {
            return Err(anyhow!("filter token counts and lengths must be positive"));
        }
        if config.repeated_token_min_run < 2 || config.repeated_char_min_run < 2 {
            return Err(anyhow!("a repeated run needs at least 2 copies"));
        }
        let pattern = format!(
            r"^(?:[A-Z{}\[\]()]{{1,{}}}\s+){{{},}}",
            regex::escape(&config.extra_uppercase),
            config.fragment_max_token_len,
            config.fragment_min_tokens,
        );
        let fragment = Regex::new(&pattern)
            .with_context(|| format!("invalid fragment pattern {pattern:?}"))?;
        Ok(Self { config, fragment })
    }

    /// Our configuration.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Clean up a page of raw OCR text. Surviving lines are trimmed and kept
    /// in their original order.
    pub fn clean(&self, raw_text: &str) -> String {
        let mut kept = vec![];
        for line in raw_text.split('\n') {
            match self.classify_line(line) {
                LineVerdict::Keep => kept.push(line.trim().to_owned()),
                LineVerdict::Repair(repaired) => kept.push(repaired),
                LineVerdict::Drop(reason) => {
                    trace!(?reason, text = line, "Dropping OCR line");
                }
            }
        }
        kept.join("\n")
    }

    /// Decide what to do with a single line.
    pub fn classify_line(&self, line: &str) -> LineVerdict {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineVerdict::Drop(DropReason::Empty);
        }
        if self.fragment.is_match(trimmed) {
            return LineVerdict::Drop(DropReason::Fragment);
        }
        let wordy = trimmed
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .count();
        if ratio(wordy, trimmed.chars().count()) < self.config.min_alnum_ratio {
            return LineVerdict::Drop(DropReason::LowAlnumDensity);
        }

        let extra_uppercase = self.config.extra_uppercase.as_str();
        let abbreviations = RepeatRule {
            is_token_char: |c: char| {
                c.is_ascii_uppercase() || extra_uppercase.contains(c)
            },
            max_token_len: self.config.repeated_token_max_len,
            min_run: self.config.repeated_token_min_run,
        };
        let repaired = abbreviations.remove_runs(trimmed);
        if !repaired.is_empty()
            && repaired.chars().all(|c| c == '.' || c.is_whitespace())
        {
            return LineVerdict::Drop(DropReason::OnlyDots);
        }

        let repaired = DOT_RUNS.replace_all(&repaired, "...");
        let repaired = HYPHEN_RUNS.replace_all(&repaired, "---");
        let glyphs = RepeatRule {
            is_token_char: is_word_char,
            max_token_len: 1,
            min_run: self.config.repeated_char_min_run,
        };
        let repaired = glyphs.remove_runs(&repaired);
        let repaired = WHITESPACE_RUNS.replace_all(&repaired, " ");

        let result = repaired.trim();
        if result.chars().count() < self.config.min_line_chars {
            return LineVerdict::Drop(DropReason::TooShort);
        }
        if NUMERIC_FRAGMENT.is_match(result) {
            return LineVerdict::Drop(DropReason::NumericFragment);
        }
        let symbols = repaired
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        let total = repaired.chars().count();
        if symbols as f64 > total as f64 * self.config.max_symbol_ratio {
            return LineVerdict::Drop(DropReason::SymbolDense);
        }

        if result == trimmed {
            LineVerdict::Keep
        } else {
            LineVerdict::Repair(result.to_owned())
        }
    }
}

impl Default for ArtifactFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default()).expect("default filter config should be valid")
    }
}

/// `part / total`, treating an empty total as fully dense.
fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        part as f64 / total as f64
    }
}
