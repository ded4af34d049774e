//! Agreement scoring across independent runs of the same sweep.
//!
//! Runs are joined on `(prompt_id, shot, format)`, not on row position. The
//! first run fixes the output order, and every other run must cover exactly
//! the same cells. From the joined labels the scorer derives two numbers per
//! cell:
//!
//! - **accuracy**: share of parseable labels that match the gold answer, after
//!   applying the label-collapsing rules. `unknown` labels are left out of both
//!   numerator and denominator. A cell where every run is `unknown` gets the
//!   `unknown` sentinel.
//! - **reproducibility**: share of unordered run pairs with identical labels.
//!   `unknown == unknown` counts as agreement and no rules are applied.

use crate::config::{OverrideRule, ScoringConfig};
use crate::dataset::GoldAnswers;
use crate::label::Label;
use crate::results::{Accuracy, AccuracyRow, CellKey, ReproducibilityRow, RunTable};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised when runs cannot be scored together
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    #[error("At least {required} runs are needed, got {found}")]
    TooFewRuns { required: usize, found: usize },

    #[error("Run {run} has {found} rows, expected {expected}")]
    RowCountMismatch {
        run: usize,
        expected: usize,
        found: usize,
    },

    #[error("Run {run} contains {key} more than once")]
    DuplicateKey { run: usize, key: CellKey },

    #[error("Run {run} contains {key}, which is not in run 1")]
    UnexpectedKey { run: usize, key: CellKey },

    #[error("Gold answers hold {found} rows, expected {expected}")]
    GoldLengthMismatch { expected: usize, found: usize },

    #[error("No gold answer for prompt {0}")]
    MissingGold(i64),
}

/// Label-collapsing rules keyed by prompt id
#[derive(Debug, Clone, Default)]
pub struct LabelOverrides {
    rules: HashMap<i64, Vec<(Label, Label)>>,
}

impl LabelOverrides {
    /// No rules
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_rules(rules: &[OverrideRule]) -> Self {
        let mut overrides = Self::default();
        for rule in rules {
            for id in &rule.prompt_ids {
                overrides.add(*id, rule.from, rule.to);
            }
        }
        overrides
    }

    /// Rewrite `from` to `to` for `prompt_id`
    pub fn add(&mut self, prompt_id: i64, from: Label, to: Label) {
        self.rules.entry(prompt_id).or_default().push((from, to));
    }

    /// Apply the first matching rule
    #[must_use]
    pub fn apply(&self, prompt_id: i64, label: Label) -> Label {
        self.rules
            .get(&prompt_id)
            .and_then(|rules| rules.iter().find(|(from, _)| *from == label))
            .map_or(label, |(_, to)| *to)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Labels of N runs joined cell by cell
#[derive(Debug, Clone)]
pub struct AlignedRuns {
    keys: Vec<CellKey>,
    /// `labels[cell][run]`
    labels: Vec<Vec<Label>>,
    run_count: usize,
}

impl AlignedRuns {
    /// Join run tables on their cell keys.
    ///
    /// # Errors
    ///
    /// Fails when no runs are given, when a run has a different row count or
    /// repeats a key, or when it holds a key the first run lacks.
    pub fn align(runs: &[RunTable]) -> Result<Self, ScoringError> {
        let Some(reference) = runs.first() else {
            return Err(ScoringError::TooFewRuns {
                required: 1,
                found: 0,
            });
        };

        let mut index = HashMap::with_capacity(reference.len());
        let mut keys = Vec::with_capacity(reference.len());
        for row in reference.iter() {
            let key = row.key();
            if index.insert(key, keys.len()).is_some() {
                return Err(ScoringError::DuplicateKey { run: 1, key });
            }
            keys.push(key);
        }

        let mut labels: Vec<Vec<Label>> = reference
            .iter()
            .map(|row| {
                let mut cell = Vec::with_capacity(runs.len());
                cell.push(row.label);
                cell
            })
            .collect();

        for (i, run) in runs.iter().enumerate().skip(1) {
            let run_number = i + 1;
            if run.len() != keys.len() {
                return Err(ScoringError::RowCountMismatch {
                    run: run_number,
                    expected: keys.len(),
                    found: run.len(),
                });
            }
            let mut placed: Vec<Option<Label>> = vec![None; keys.len()];
            for row in run.iter() {
                let key = row.key();
                let pos = *index.get(&key).ok_or(ScoringError::UnexpectedKey {
                    run: run_number,
                    key,
                })?;
                if placed[pos].replace(row.label).is_some() {
                    return Err(ScoringError::DuplicateKey {
                        run: run_number,
                        key,
                    });
                }
            }
            // Equal length, no duplicates and no foreign keys: every slot is filled
            for (cell, label) in labels.iter_mut().zip(placed) {
                cell.push(label.unwrap_or(Label::Unknown));
            }
        }

        Ok(Self {
            keys,
            labels,
            run_count: runs.len(),
        })
    }

    #[must_use]
    pub const fn run_count(&self) -> usize {
        self.run_count
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn keys(&self) -> &[CellKey] {
        &self.keys
    }

    /// Iterate cells in reference order with the labels of every run
    pub fn cells(&self) -> impl Iterator<Item = (&CellKey, &[Label])> {
        self.keys
            .iter()
            .zip(self.labels.iter().map(Vec::as_slice))
    }
}

/// Tallies behind one accuracy value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccuracyCounts {
    pub correct: usize,
    pub unknown: usize,
    pub total: usize,
}

impl AccuracyCounts {
    /// Count correct and `unknown` labels against `gold`
    #[must_use]
    pub fn tally(labels: &[Label], gold: Label) -> Self {
        let unknown = labels.iter().filter(|l| l.is_unknown()).count();
        let correct = labels
            .iter()
            .filter(|l| !l.is_unknown() && **l == gold)
            .count();
        Self {
            correct,
            unknown,
            total: labels.len(),
        }
    }

    /// Runs that produced a parseable label
    #[must_use]
    pub const fn denominator(&self) -> usize {
        self.total - self.unknown
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> Accuracy {
        match self.denominator() {
            0 => Accuracy::Unknown,
            d => Accuracy::Value(round2(self.correct as f64 / d as f64)),
        }
    }
}

/// Matching and total unordered pairs among `labels`
#[must_use]
pub fn agreement_pairs(labels: &[Label]) -> (usize, usize) {
    let n = labels.len();
    let mut matching = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if labels[i] == labels[j] {
                matching += 1;
            }
        }
    }
    (matching, n * n.saturating_sub(1) / 2)
}

/// Share of agreeing run pairs; `None` below two runs
///
/// The ratio is kept unrounded. It is cut to two decimals only when written.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn reproducibility(labels: &[Label]) -> Option<f64> {
    let (matching, total) = agreement_pairs(labels);
    (total > 0).then(|| matching as f64 / total as f64)
}

/// Round to two decimals from the exact binary value of `value`
///
/// Float formatting is exact, so `1/40` (stored just above 0.025) becomes
/// 0.03 and a true tie such as 0.125 goes to the even digit.
#[must_use]
pub fn round2(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

/// Scores aligned runs into accuracy and reproducibility tables
#[derive(Debug, Clone, Default)]
pub struct AgreementScorer {
    overrides: LabelOverrides,
    apply_to_gold: bool,
}

impl AgreementScorer {
    #[must_use]
    pub const fn new(overrides: LabelOverrides, apply_to_gold: bool) -> Self {
        Self {
            overrides,
            apply_to_gold,
        }
    }

    #[must_use]
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            LabelOverrides::from_rules(&config.overrides),
            config.apply_overrides_to_gold,
        )
    }

    #[must_use]
    pub const fn overrides(&self) -> &LabelOverrides {
        &self.overrides
    }

    /// Accuracy per cell against the gold answers
    ///
    /// # Errors
    ///
    /// Fails when positional gold answers do not match the cell count or a
    /// keyed gold table lacks a prompt.
    pub fn score_accuracy(
        &self,
        runs: &AlignedRuns,
        gold: &GoldAnswers,
    ) -> Result<Vec<AccuracyRow>, ScoringError> {
        if let GoldAnswers::Positional(labels) = gold {
            if labels.len() != runs.cell_count() {
                return Err(ScoringError::GoldLengthMismatch {
                    expected: runs.cell_count(),
                    found: labels.len(),
                });
            }
        }

        let mut rows = Vec::with_capacity(runs.cell_count());
        let mut unknown_cells = 0;
        for (pos, (key, labels)) in runs.cells().enumerate() {
            let gold_label = match gold {
                GoldAnswers::Positional(gold_labels) => gold_labels[pos],
                GoldAnswers::ByPrompt(map) => *map
                    .get(&key.prompt_id)
                    .ok_or(ScoringError::MissingGold(key.prompt_id))?,
            };
            let gold_label = if self.apply_to_gold {
                self.overrides.apply(key.prompt_id, gold_label)
            } else {
                gold_label
            };

            let collapsed: Vec<Label> = labels
                .iter()
                .map(|l| self.overrides.apply(key.prompt_id, *l))
                .collect();
            let counts = AccuracyCounts::tally(&collapsed, gold_label);
            let accuracy = counts.accuracy();
            if accuracy == Accuracy::Unknown {
                unknown_cells += 1;
            }
            tracing::debug!(
                cell = %key,
                gold = %gold_label,
                correct = counts.correct,
                denominator = counts.denominator(),
                accuracy = %accuracy,
                "Scored accuracy"
            );

            rows.push(AccuracyRow {
                prompt_id: key.prompt_id,
                shot: key.shot,
                format: key.format,
                accuracy,
            });
        }

        tracing::info!(
            cells = rows.len(),
            runs = runs.run_count(),
            unknown_cells,
            "Accuracy scored"
        );
        Ok(rows)
    }

    /// Pairwise agreement per cell
    ///
    /// # Errors
    ///
    /// Fails with `TooFewRuns` when fewer than two runs are aligned.
    pub fn score_reproducibility(
        &self,
        runs: &AlignedRuns,
    ) -> Result<Vec<ReproducibilityRow>, ScoringError> {
        if runs.run_count() < 2 {
            return Err(ScoringError::TooFewRuns {
                required: 2,
                found: runs.run_count(),
            });
        }

        let rows: Vec<ReproducibilityRow> = runs
            .cells()
            .map(|(key, labels)| ReproducibilityRow {
                prompt_id: key.prompt_id,
                shot: key.shot,
                format: key.format,
                reproducibility: reproducibility(labels).unwrap_or(0.0),
            })
            .collect();

        tracing::info!(
            cells = rows.len(),
            runs = runs.run_count(),
            pairs = runs.run_count() * (runs.run_count() - 1) / 2,
            "Reproducibility scored"
        );
        Ok(rows)
    }
}
