//! Sentiment labels and extraction of a label from free-form model output.
//!
//! Model responses are rarely the bare `Label: positive` line the prompt asks
//! for. The normalizer scans the lowercased text for the first word built on
//! one of the stems `positiv*`, `negativ*` or `neutral` and maps it to its
//! canonical label. Later mentions never override the first one.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

lazy_static! {
    static ref SENTIMENT_WORD: Regex =
        Regex::new(r"\b(positiv\w*|negativ\w*|neutral)\b").expect("sentiment pattern is valid");
}

/// Errors raised when a stored label cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("Unrecognized sentiment label: {0:?}")]
    Unrecognized(String),
}

/// Canonical sentiment label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Positive,
    Negative,
    Neutral,
    /// No sentiment word was found in the output
    Unknown,
}

impl Label {
    /// All labels a gold answer may carry
    pub const GOLD: [Self; 3] = [Self::Positive, Self::Negative, Self::Neutral];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Map one matched sentiment word to its label by stem
    fn from_word(word: &str) -> Self {
        if word.contains("positiv") {
            Self::Positive
        } else if word.contains("negativ") {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Label {
    type Err = LabelError;

    /// Parse a stored label (case-insensitive, surrounding whitespace ignored)
    ///
    /// # Errors
    ///
    /// Returns `LabelError::Unrecognized` for anything other than the four labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            "unknown" => Ok(Self::Unknown),
            _ => Err(LabelError::Unrecognized(s.to_string())),
        }
    }
}

/// Extract the first sentiment label mentioned in raw model output.
///
/// Returns [`Label::Unknown`] when no sentiment word is present.
#[must_use]
pub fn normalize(raw_output: &str) -> Label {
    let lowered = raw_output.to_lowercase();
    SENTIMENT_WORD
        .find(&lowered)
        .map_or(Label::Unknown, |m| Label::from_word(m.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_normalize_label_line() {
        assert_eq!(normalize("Label: Positive"), Label::Positive);
        assert_eq!(normalize("Label: negative"), Label::Negative);
        assert_eq!(normalize("label: NEUTRAL."), Label::Neutral);
    }

    #[test]
    fn test_normalize_first_match_wins() {
        assert_eq!(normalize("This is NEGATIVE, not neutral"), Label::Negative);
        assert_eq!(normalize("neutral? no, positive"), Label::Neutral);
    }

    #[test]
    fn test_normalize_stem_variants() {
        assert_eq!(normalize("Positively glowing"), Label::Positive);
        assert_eq!(normalize("strong negativity here"), Label::Negative);
        assert_eq!(normalize("the tone is positiv"), Label::Positive);
    }

    #[test]
    fn test_normalize_requires_word_boundary() {
        // "neutrality" is not the exact word "neutral"
        assert_eq!(normalize("complete neutrality"), Label::Unknown);
        assert_eq!(normalize("nonpositive"), Label::Unknown);
    }

    #[test]
    fn test_normalize_unknown() {
        assert_eq!(normalize("I cannot determine"), Label::Unknown);
        assert_eq!(normalize(""), Label::Unknown);
    }

    #[test]
    fn test_label_from_str() {
        assert_eq!(Label::from_str(" Positive ").unwrap(), Label::Positive);
        assert_eq!(Label::from_str("UNKNOWN").unwrap(), Label::Unknown);
        assert!(matches!(
            Label::from_str("happy"),
            Err(LabelError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_label_display_matches_serde() {
        for label in [
            Label::Positive,
            Label::Negative,
            Label::Neutral,
            Label::Unknown,
        ] {
            let json = serde_json::to_string(&label).unwrap();
            assert_eq!(json, format!("\"{label}\""));
        }
    }
}
