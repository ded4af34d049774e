//! Cross-model report generation.
//!
//! Reads per-model accuracy and reproducibility tables from a results
//! directory or a zip archive and produces:
//! - Mean accuracy and consistency per (model, format, shot)
//! - Three-way ANOVA tables for both metrics (skipped with a warning when
//!   the design is not balanced)
//! - Tukey HSD comparisons between formats
//! - Bonferroni-corrected Welch t-tests between formats
//! - Box-plot summaries by format and by shot, split by model
//! - Per-model summaries with bootstrap confidence intervals

use crate::config::PromptFormat;
use crate::metrics::{
    bonferroni_correction, bootstrap_ci, compute_mean, factorial_anova, tukey_hsd, welch_t_test,
    AnovaError, AnovaRow, BoxStats, Factor, Observation, SignificanceResult, StatConfig,
    TukeyComparison,
};
use crate::results::{
    read_accuracy, read_reproducibility, save_rows, Accuracy, AccuracyRow, CellKey,
    MetricsLayout, ReproducibilityRow, ResultsError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use thiserror::Error;

/// Errors that can occur while building a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Metrics source not found: {0}")]
    NotFound(String),

    #[error("{path} not found in {location}")]
    MissingFile { location: String, path: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("No models requested")]
    NoModels,

    #[error("No merged rows for model {0}")]
    NoData(String),

    #[error("Unbalanced design for {metric}: cell sizes range from {min} to {max}")]
    UnbalancedDesign {
        metric: &'static str,
        min: usize,
        max: usize,
    },

    #[error("ANOVA failed for {metric}: {source}")]
    Anova {
        metric: &'static str,
        #[source]
        source: AnovaError,
    },

    #[error(transparent)]
    Results(#[from] ResultsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Accuracy and reproducibility of one cell for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub model: String,
    pub prompt_id: i64,
    pub shot: usize,
    pub format: PromptFormat,
    pub accuracy: Accuracy,
    pub reproducibility: f64,
}

/// Metric analysed by the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Accuracy,
    Consistency,
}

impl Metric {
    pub const BOTH: [Self; 2] = [Self::Accuracy, Self::Consistency];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Consistency => "consistency",
        }
    }

    /// Value used in tests and means; `unknown` accuracy counts as 0
    #[must_use]
    pub fn value(self, row: &MergedRow) -> f64 {
        match self {
            Self::Accuracy => row.accuracy.value().unwrap_or(0.0),
            Self::Consistency => row.reproducibility,
        }
    }

    /// Value used in distributions; `unknown` accuracy is left out
    #[must_use]
    pub fn observed(self, row: &MergedRow) -> Option<f64> {
        match self {
            Self::Accuracy => row.accuracy.value(),
            Self::Consistency => Some(row.reproducibility),
        }
    }
}

/// Where per-model metric files are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsSource {
    /// Unpacked tree containing `results/<model>/...`
    Directory(PathBuf),
    /// Zip archive with the same layout
    Archive(PathBuf),
}

impl MetricsSource {
    /// Pick the source kind from what exists at `path`
    ///
    /// # Errors
    ///
    /// Returns `ReportError::NotFound` if nothing exists at `path`.
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let path = path.as_ref();
        if path.is_dir() {
            Ok(Self::Directory(path.to_path_buf()))
        } else if path.is_file() {
            Ok(Self::Archive(path.to_path_buf()))
        } else {
            Err(ReportError::NotFound(path.display().to_string()))
        }
    }

    fn location(&self) -> String {
        match self {
            Self::Directory(p) | Self::Archive(p) => p.display().to_string(),
        }
    }

    /// Read and merge the metric tables of every model
    ///
    /// # Errors
    ///
    /// Fails if a model's files are missing or malformed, or a model has no
    /// cells in common between its two tables.
    pub fn load(&self, models: &[String]) -> Result<Vec<MergedRow>, ReportError> {
        if models.is_empty() {
            return Err(ReportError::NoModels);
        }
        let location = self.location();
        let mut reader = match self {
            Self::Directory(root) => SourceReader::Directory(root.clone()),
            Self::Archive(path) => SourceReader::Archive(zip::ZipArchive::new(File::open(path)?)?),
        };

        let mut merged = Vec::new();
        for model in models {
            let layout = MetricsLayout::new(model.as_str());
            let acc_path = layout.accuracy_path();
            let rep_path = layout.reproducibility_path();

            let accuracy = read_accuracy(
                reader.read(&acc_path, &location)?.as_bytes(),
                &format!("{location}:{acc_path}"),
            )?;
            let reproducibility = read_reproducibility(
                reader.read(&rep_path, &location)?.as_bytes(),
                &format!("{location}:{rep_path}"),
            )?;

            let rows = merge_metrics(model, &accuracy, &reproducibility);
            if rows.is_empty() {
                return Err(ReportError::NoData(model.clone()));
            }
            tracing::info!(
                model = %model,
                accuracy_rows = accuracy.len(),
                reproducibility_rows = reproducibility.len(),
                merged = rows.len(),
                "Loaded model metrics"
            );
            merged.extend(rows);
        }
        Ok(merged)
    }
}

enum SourceReader {
    Directory(PathBuf),
    Archive(zip::ZipArchive<File>),
}

impl SourceReader {
    fn read(&mut self, relative: &str, location: &str) -> Result<String, ReportError> {
        let missing = || ReportError::MissingFile {
            location: location.to_string(),
            path: relative.to_string(),
        };
        let mut content = String::new();
        match self {
            Self::Directory(root) => {
                let path = root.join(relative);
                if !path.is_file() {
                    return Err(missing());
                }
                File::open(path)?.read_to_string(&mut content)?;
            }
            Self::Archive(archive) => {
                let mut entry = archive.by_name(relative).map_err(|e| match e {
                    zip::result::ZipError::FileNotFound => missing(),
                    other => ReportError::Archive(other),
                })?;
                entry.read_to_string(&mut content)?;
            }
        }
        Ok(content)
    }
}

/// Inner join of one model's tables on `(prompt_id, shot, format)`,
/// in accuracy-table order
#[must_use]
pub fn merge_metrics(
    model: &str,
    accuracy: &[AccuracyRow],
    reproducibility: &[ReproducibilityRow],
) -> Vec<MergedRow> {
    let by_key: HashMap<CellKey, f64> = reproducibility
        .iter()
        .map(|r| (r.key(), r.reproducibility))
        .collect();

    let merged: Vec<MergedRow> = accuracy
        .iter()
        .filter_map(|a| {
            by_key.get(&a.key()).map(|&reproducibility| MergedRow {
                model: model.to_string(),
                prompt_id: a.prompt_id,
                shot: a.shot,
                format: a.format,
                accuracy: a.accuracy,
                reproducibility,
            })
        })
        .collect();

    let dropped = (accuracy.len() + reproducibility.len()).saturating_sub(2 * merged.len());
    if dropped > 0 {
        tracing::warn!(model, dropped, "Rows without a partner were dropped");
    }
    merged
}

/// Mean metrics for one (model, format, shot) condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanResultRow {
    pub model: String,
    pub format: PromptFormat,
    pub shot: usize,
    pub mean_accuracy: f64,
    pub mean_consistency: f64,
}

/// Means per condition, sorted by model, format name and shot
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_results(rows: &[MergedRow]) -> Vec<MeanResultRow> {
    let mut groups: BTreeMap<(String, &'static str, usize), (PromptFormat, f64, f64, usize)> =
        BTreeMap::new();
    for row in rows {
        let entry = groups
            .entry((row.model.clone(), row.format.as_str(), row.shot))
            .or_insert((row.format, 0.0, 0.0, 0));
        entry.1 += Metric::Accuracy.value(row);
        entry.2 += Metric::Consistency.value(row);
        entry.3 += 1;
    }

    groups
        .into_iter()
        .map(|((model, _, shot), (format, acc, cons, n))| MeanResultRow {
            model,
            format,
            shot,
            mean_accuracy: acc / n as f64,
            mean_consistency: cons / n as f64,
        })
        .collect()
}

/// Three-way ANOVA `metric ~ model * format * shot`
///
/// # Errors
///
/// Returns `UnbalancedDesign` when conditions hold different numbers of
/// cells, and `Anova` for any other failure of the fit.
pub fn anova(rows: &[MergedRow], metric: Metric) -> Result<Vec<AnovaRow>, ReportError> {
    let models = unique_sorted(rows.iter().map(|r| r.model.clone()));
    let formats = unique_sorted(rows.iter().map(|r| r.format.as_str().to_string()));
    let shots = unique_sorted(rows.iter().map(|r| r.shot));

    let index_of = |levels: &[String], value: &str| levels.iter().position(|l| l == value);
    let observations: Vec<Observation> = rows
        .iter()
        .filter_map(|r| {
            Some(Observation {
                levels: vec![
                    index_of(&models, &r.model)?,
                    index_of(&formats, r.format.as_str())?,
                    shots.iter().position(|s| *s == r.shot)?,
                ],
                value: metric.value(r),
            })
        })
        .collect();

    let factors = [
        Factor {
            name: "model".to_string(),
            levels: models,
        },
        Factor {
            name: "format".to_string(),
            levels: formats,
        },
        Factor {
            name: "shot".to_string(),
            levels: shots.iter().map(ToString::to_string).collect(),
        },
    ];

    factorial_anova(&factors, &observations).map_err(|e| match e {
        AnovaError::Unbalanced { min, max } => ReportError::UnbalancedDesign {
            metric: metric.as_str(),
            min,
            max,
        },
        source => ReportError::Anova {
            metric: metric.as_str(),
            source,
        },
    })
}

fn unique_sorted<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut v: Vec<T> = values.collect();
    v.sort();
    v.dedup();
    v
}

/// Tukey HSD between formats, pooled across models and shots.
///
/// Formats are ordered by name and `unknown` accuracy counts as 0.
#[must_use]
pub fn tukey_formats(rows: &[MergedRow], metric: Metric, alpha: f64) -> Vec<TukeyComparison> {
    let mut formats = PromptFormat::ALL.to_vec();
    formats.sort_by_key(|f| f.as_str());
    let groups: Vec<(String, Vec<f64>)> = formats
        .into_iter()
        .map(|f| {
            let values = rows
                .iter()
                .filter(|r| r.format == f)
                .map(|r| metric.value(r))
                .collect();
            (f.as_str().to_string(), values)
        })
        .collect();

    tukey_hsd(&groups, alpha).unwrap_or_else(|| {
        tracing::warn!(
            metric = metric.as_str(),
            "Too few formats or observations for Tukey HSD"
        );
        Vec::new()
    })
}

/// One post-hoc comparison between two formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseComparison {
    pub metric: Metric,
    pub group1: PromptFormat,
    pub group2: PromptFormat,
    pub mean1: f64,
    pub mean2: f64,
    /// `mean2 - mean1`
    pub meandiff: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    /// Bonferroni-adjusted p-value, capped at 1
    pub p_adj: f64,
    pub cohens_d: f64,
    pub reject: bool,
}

/// Welch t-tests between every pair of formats, pooled across models and
/// shots, with Bonferroni correction over the number of pairs
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pairwise_formats(rows: &[MergedRow], metric: Metric, alpha: f64) -> Vec<PairwiseComparison> {
    let groups: Vec<(PromptFormat, Vec<f64>)> = PromptFormat::ALL
        .iter()
        .map(|&f| {
            let values: Vec<f64> = rows
                .iter()
                .filter(|r| r.format == f)
                .map(|r| metric.value(r))
                .collect();
            (f, values)
        })
        .filter(|(_, v)| !v.is_empty())
        .collect();

    let pairs = groups.len() * groups.len().saturating_sub(1) / 2;
    let threshold = bonferroni_correction(alpha, pairs);

    let mut comparisons = Vec::with_capacity(pairs);
    for (i, (f1, v1)) in groups.iter().enumerate() {
        for (f2, v2) in &groups[i + 1..] {
            let Some(test) = welch_t_test(v1, v2, alpha) else {
                tracing::warn!(
                    metric = metric.as_str(),
                    group1 = %f1,
                    group2 = %f2,
                    "Welch test skipped for groups without variance; see the Tukey table"
                );
                continue;
            };
            let (mean1, mean2) = (compute_mean(v1), compute_mean(v2));
            comparisons.push(PairwiseComparison {
                metric,
                group1: *f1,
                group2: *f2,
                mean1,
                mean2,
                meandiff: mean2 - mean1,
                t_statistic: test.t_statistic,
                p_value: test.p_value,
                p_adj: (test.p_value * pairs as f64).min(1.0),
                cohens_d: test.cohens_d,
                reject: test.p_value < threshold,
            });
        }
    }
    comparisons
}

/// Grouping variable of a box-plot summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    Format,
    Shot,
}

/// Box-plot summary of one metric for one model at one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxGroup {
    pub metric: Metric,
    pub grouping: Grouping,
    pub model: String,
    pub level: String,
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: usize,
}

/// Box-plot summaries of `metric` by `grouping`, one per model and level.
/// Levels follow sweep order; `unknown` accuracy is excluded.
#[must_use]
pub fn box_groups(
    rows: &[MergedRow],
    models: &[String],
    metric: Metric,
    grouping: Grouping,
) -> Vec<BoxGroup> {
    let levels: Vec<String> = match grouping {
        Grouping::Format => PromptFormat::ALL
            .iter()
            .map(|f| f.as_str().to_string())
            .collect(),
        Grouping::Shot => unique_sorted(rows.iter().map(|r| r.shot))
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    let level_of = |r: &MergedRow| match grouping {
        Grouping::Format => r.format.as_str().to_string(),
        Grouping::Shot => r.shot.to_string(),
    };

    let mut out = Vec::new();
    for level in &levels {
        for model in models {
            let values: Vec<f64> = rows
                .iter()
                .filter(|r| &r.model == model && &level_of(r) == level)
                .filter_map(|r| metric.observed(r))
                .collect();
            if let Some(s) = BoxStats::from_samples(&values) {
                out.push(BoxGroup {
                    metric,
                    grouping,
                    model: model.clone(),
                    level: level.clone(),
                    count: s.count,
                    min: s.min,
                    q1: s.q1,
                    median: s.median,
                    q3: s.q3,
                    max: s.max,
                    mean: s.mean,
                    whisker_low: s.whisker_low,
                    whisker_high: s.whisker_high,
                    outliers: s.outliers,
                });
            }
        }
    }
    out
}

/// Mean consistency of one model at one shot level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyPoint {
    pub model: String,
    pub shot: usize,
    pub mean_consistency: f64,
}

/// Mean consistency against shot count, per model
#[must_use]
pub fn consistency_by_shot(rows: &[MergedRow], models: &[String]) -> Vec<ConsistencyPoint> {
    let shots = unique_sorted(rows.iter().map(|r| r.shot));
    models
        .iter()
        .flat_map(|model| {
            shots.iter().filter_map(move |&shot| {
                let values: Vec<f64> = rows
                    .iter()
                    .filter(|r| &r.model == model && r.shot == shot)
                    .map(|r| r.reproducibility)
                    .collect();
                (!values.is_empty()).then(|| ConsistencyPoint {
                    model: model.clone(),
                    shot,
                    mean_consistency: compute_mean(&values),
                })
            })
        })
        .collect()
}

/// Full cross-model report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullReport {
    pub metadata: ReportMetadata,
    pub model_summaries: Vec<ModelSummary>,
    pub mean_results: Vec<MeanResultRow>,
    /// `None` when the design could not be fitted; see `warnings`
    pub anova_accuracy: Option<Vec<AnovaRow>>,
    pub anova_consistency: Option<Vec<AnovaRow>>,
    pub tukey_accuracy: Vec<TukeyComparison>,
    pub tukey_consistency: Vec<TukeyComparison>,
    pub format_comparisons: Vec<PairwiseComparison>,
    pub model_comparisons: Vec<StatisticalComparison>,
    pub box_plots: Vec<BoxGroup>,
    pub consistency_by_shot: Vec<ConsistencyPoint>,
    /// Parts of the analysis that were skipped, and why
    pub warnings: Vec<String>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub title: String,
    /// Where the metric tables were read from
    pub source: String,
    pub models: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub framework_version: String,
    pub stat_config: StatConfigSummary,
}

/// Statistical configuration summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatConfigSummary {
    pub bootstrap_n: usize,
    pub confidence: f64,
    pub alpha: f64,
}

impl From<&StatConfig> for StatConfigSummary {
    fn from(config: &StatConfig) -> Self {
        Self {
            bootstrap_n: config.bootstrap_n,
            confidence: config.confidence,
            alpha: config.alpha,
        }
    }
}

/// Metric value with confidence interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWithCI {
    pub value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// Headline numbers for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub cells: usize,
    /// Cells whose accuracy is `unknown`
    pub unknown_cells: usize,
    pub accuracy: MetricWithCI,
    pub consistency: MetricWithCI,
}

/// Statistical comparison between two models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalComparison {
    pub model_a: String,
    pub model_b: String,
    pub metric: Metric,
    pub significance: SignificanceResult,
}

/// Report builder for constructing full reports
pub struct ReportBuilder {
    rows: Vec<MergedRow>,
    source: String,
    stat_config: StatConfig,
}

impl ReportBuilder {
    #[must_use]
    pub fn new(rows: Vec<MergedRow>) -> Self {
        Self {
            rows,
            source: String::new(),
            stat_config: StatConfig::default(),
        }
    }

    /// Set statistical configuration
    #[must_use]
    pub fn with_stat_config(mut self, config: StatConfig) -> Self {
        self.stat_config = config;
        self
    }

    /// Record where the rows came from
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Build the full report
    ///
    /// An ANOVA that cannot be fitted is left out and recorded in
    /// `warnings`; every other table is still produced.
    ///
    /// # Errors
    ///
    /// Fails when there are no rows.
    pub fn build(self) -> Result<FullReport, ReportError> {
        let models = self.models();
        if models.is_empty() {
            return Err(ReportError::NoModels);
        }

        let mut warnings = Vec::new();
        let mut fit = |metric: Metric| match anova(&self.rows, metric) {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::warn!(metric = metric.as_str(), error = %e, "ANOVA skipped");
                warnings.push(format!("ANOVA skipped: {e}"));
                None
            }
        };
        let anova_accuracy = fit(Metric::Accuracy);
        let anova_consistency = fit(Metric::Consistency);

        let alpha = self.stat_config.alpha;
        let format_comparisons = Metric::BOTH
            .iter()
            .flat_map(|&m| pairwise_formats(&self.rows, m, alpha))
            .collect();

        let mut box_plots = Vec::new();
        for metric in Metric::BOTH {
            for grouping in [Grouping::Format, Grouping::Shot] {
                box_plots.extend(box_groups(&self.rows, &models, metric, grouping));
            }
        }

        let report = FullReport {
            metadata: ReportMetadata {
                title: format!("Prompt Format Report: {}", models.join(" vs ")),
                source: self.source.clone(),
                models: models.clone(),
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                stat_config: StatConfigSummary::from(&self.stat_config),
            },
            model_summaries: self.build_model_summaries(&models),
            mean_results: mean_results(&self.rows),
            anova_accuracy,
            anova_consistency,
            tukey_accuracy: tukey_formats(&self.rows, Metric::Accuracy, alpha),
            tukey_consistency: tukey_formats(&self.rows, Metric::Consistency, alpha),
            format_comparisons,
            model_comparisons: self.build_model_comparisons(&models),
            box_plots,
            consistency_by_shot: consistency_by_shot(&self.rows, &models),
            warnings,
        };

        tracing::info!(
            models = models.len(),
            rows = self.rows.len(),
            "Report built"
        );
        Ok(report)
    }

    /// Models in order of first appearance
    fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for row in &self.rows {
            if !models.contains(&row.model) {
                models.push(row.model.clone());
            }
        }
        models
    }

    fn samples(&self, model: &str, metric: Metric) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|r| r.model == model)
            .map(|r| metric.value(r))
            .collect()
    }

    fn build_model_summaries(&self, models: &[String]) -> Vec<ModelSummary> {
        models
            .iter()
            .map(|model| {
                let with_ci = |metric| {
                    let samples = self.samples(model, metric);
                    let (ci_lower, ci_upper) = bootstrap_ci(&samples, &self.stat_config);
                    MetricWithCI {
                        value: compute_mean(&samples),
                        ci_lower,
                        ci_upper,
                    }
                };
                let rows = self.rows.iter().filter(|r| &r.model == model);
                ModelSummary {
                    model: model.clone(),
                    cells: rows.clone().count(),
                    unknown_cells: rows.filter(|r| r.accuracy == Accuracy::Unknown).count(),
                    accuracy: with_ci(Metric::Accuracy),
                    consistency: with_ci(Metric::Consistency),
                }
            })
            .collect()
    }

    fn build_model_comparisons(&self, models: &[String]) -> Vec<StatisticalComparison> {
        let mut comparisons = Vec::new();

        for metric in Metric::BOTH {
            for i in 0..models.len() {
                for j in (i + 1)..models.len() {
                    if let Some(significance) = welch_t_test(
                        &self.samples(&models[i], metric),
                        &self.samples(&models[j], metric),
                        self.stat_config.alpha,
                    ) {
                        comparisons.push(StatisticalComparison {
                            model_a: models[i].clone(),
                            model_b: models[j].clone(),
                            metric,
                            significance,
                        });
                    }
                }
            }
        }

        comparisons
    }
}

#[derive(Tabled)]
struct SummaryTableRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Cells")]
    cells: usize,
    #[tabled(rename = "Unknown")]
    unknown: usize,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Consistency")]
    consistency: String,
}

#[derive(Tabled)]
struct MeanTableRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Shot")]
    shot: usize,
    #[tabled(rename = "Mean Accuracy")]
    accuracy: String,
    #[tabled(rename = "Mean Consistency")]
    consistency: String,
}

#[derive(Tabled)]
struct AnovaTableRow {
    #[tabled(rename = "Effect")]
    effect: String,
    #[tabled(rename = "Sum Sq")]
    sum_sq: String,
    #[tabled(rename = "df")]
    df: String,
    #[tabled(rename = "F")]
    f_value: String,
    #[tabled(rename = "PR(>F)")]
    p_value: String,
}

#[derive(Tabled)]
struct TukeyTableRow {
    #[tabled(rename = "group1")]
    group1: String,
    #[tabled(rename = "group2")]
    group2: String,
    #[tabled(rename = "meandiff")]
    meandiff: String,
    #[tabled(rename = "p-adj")]
    p_adj: String,
    #[tabled(rename = "lower")]
    lower: String,
    #[tabled(rename = "upper")]
    upper: String,
    #[tabled(rename = "reject")]
    reject: bool,
}

#[derive(Tabled)]
struct BoxTableRow {
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "n")]
    count: usize,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Q1")]
    q1: String,
    #[tabled(rename = "Median")]
    median: String,
    #[tabled(rename = "Q3")]
    q3: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Outliers")]
    outliers: usize,
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

impl FullReport {
    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render report as markdown
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Source:** {}", self.metadata.source).ok();
        writeln!(
            output,
            "**Framework Version:** {}",
            self.metadata.framework_version
        )
        .ok();
        writeln!(output).ok();

        writeln!(output, "## Model Summary").ok();
        writeln!(output).ok();
        let rows: Vec<SummaryTableRow> = self
            .model_summaries
            .iter()
            .map(|s| SummaryTableRow {
                model: s.model.clone(),
                cells: s.cells,
                unknown: s.unknown_cells,
                accuracy: format!(
                    "{:.3} [{:.3}-{:.3}]",
                    s.accuracy.value, s.accuracy.ci_lower, s.accuracy.ci_upper
                ),
                consistency: format!(
                    "{:.3} [{:.3}-{:.3}]",
                    s.consistency.value, s.consistency.ci_lower, s.consistency.ci_upper
                ),
            })
            .collect();
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        writeln!(output, "## Mean Results").ok();
        writeln!(output).ok();
        let rows: Vec<MeanTableRow> = self
            .mean_results
            .iter()
            .map(|m| MeanTableRow {
                model: m.model.clone(),
                format: m.format.to_string(),
                shot: m.shot,
                accuracy: format!("{:.3}", m.mean_accuracy),
                consistency: format!("{:.3}", m.mean_consistency),
            })
            .collect();
        writeln!(output, "{}", Table::new(rows)).ok();
        writeln!(output).ok();

        if !self.warnings.is_empty() {
            writeln!(output, "## Warnings").ok();
            writeln!(output).ok();
            for warning in &self.warnings {
                writeln!(output, "- {warning}").ok();
            }
            writeln!(output).ok();
        }

        for (metric, table) in [
            (Metric::Accuracy, &self.anova_accuracy),
            (Metric::Consistency, &self.anova_consistency),
        ] {
            let Some(table) = table else {
                continue;
            };
            writeln!(output, "## ANOVA: {}", metric.as_str()).ok();
            writeln!(output).ok();
            let rows: Vec<AnovaTableRow> = table
                .iter()
                .map(|r| AnovaTableRow {
                    effect: r.effect.clone(),
                    sum_sq: format!("{:.4}", r.sum_sq),
                    df: format!("{}", r.df),
                    f_value: fmt_opt(r.f_value),
                    p_value: fmt_opt(r.p_value),
                })
                .collect();
            writeln!(output, "{}", Table::new(rows)).ok();
            writeln!(output).ok();
        }

        for (metric, table) in [
            (Metric::Accuracy, &self.tukey_accuracy),
            (Metric::Consistency, &self.tukey_consistency),
        ] {
            if table.is_empty() {
                continue;
            }
            writeln!(output, "## Tukey HSD: {} by format", metric.as_str()).ok();
            writeln!(output).ok();
            let rows: Vec<TukeyTableRow> = table
                .iter()
                .map(|c| TukeyTableRow {
                    group1: c.group1.clone(),
                    group2: c.group2.clone(),
                    meandiff: format!("{:.4}", c.meandiff),
                    p_adj: format!("{:.4}", c.p_adj),
                    lower: format!("{:.4}", c.lower),
                    upper: format!("{:.4}", c.upper),
                    reject: c.reject,
                })
                .collect();
            writeln!(output, "{}", Table::new(rows)).ok();
            writeln!(output).ok();
        }

        if !self.format_comparisons.is_empty() {
            writeln!(output, "## Format Comparisons (Welch, Bonferroni)").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "| Metric | Comparison | Mean Diff | p-value | p-adj | Effect Size | Reject |"
            )
            .ok();
            writeln!(
                output,
                "|--------|------------|-----------|---------|-------|-------------|--------|"
            )
            .ok();
            for c in &self.format_comparisons {
                writeln!(
                    output,
                    "| {} | {} vs {} | {:.3} | {:.4} | {:.4} | {:.2} | {} |",
                    c.metric.as_str(),
                    c.group1,
                    c.group2,
                    c.meandiff,
                    c.p_value,
                    c.p_adj,
                    c.cohens_d,
                    if c.reject { "Yes" } else { "No" }
                )
                .ok();
            }
            writeln!(output).ok();
        }

        if !self.model_comparisons.is_empty() {
            writeln!(output, "## Model Comparisons").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "| Metric | Comparison | t-stat | p-value | Effect Size | Significant |"
            )
            .ok();
            writeln!(
                output,
                "|--------|------------|--------|---------|-------------|-------------|"
            )
            .ok();
            for test in &self.model_comparisons {
                writeln!(
                    output,
                    "| {} | {} vs {} | {:.3} | {:.4} | {} ({:.2}) | {} |",
                    test.metric.as_str(),
                    test.model_a,
                    test.model_b,
                    test.significance.t_statistic,
                    test.significance.p_value,
                    test.significance.effect_interpretation,
                    test.significance.cohens_d,
                    if test.significance.is_significant {
                        "Yes"
                    } else {
                        "No"
                    }
                )
                .ok();
            }
            writeln!(output).ok();
        }

        for metric in Metric::BOTH {
            for (grouping, label) in [(Grouping::Format, "Format"), (Grouping::Shot, "Shots")] {
                let rows: Vec<BoxTableRow> = self
                    .box_plots
                    .iter()
                    .filter(|b| b.metric == metric && b.grouping == grouping)
                    .map(|b| BoxTableRow {
                        level: b.level.clone(),
                        model: b.model.clone(),
                        count: b.count,
                        min: format!("{:.2}", b.min),
                        q1: format!("{:.2}", b.q1),
                        median: format!("{:.2}", b.median),
                        q3: format!("{:.2}", b.q3),
                        max: format!("{:.2}", b.max),
                        outliers: b.outliers,
                    })
                    .collect();
                if rows.is_empty() {
                    continue;
                }
                writeln!(output, "## {} by {label}", capitalize(metric.as_str())).ok();
                writeln!(output).ok();
                writeln!(output, "{}", Table::new(rows)).ok();
                writeln!(output).ok();
            }
        }

        writeln!(output, "## Consistency vs Shots").ok();
        writeln!(output).ok();
        writeln!(output, "| Model | Shots | Mean Consistency |").ok();
        writeln!(output, "|-------|-------|------------------|").ok();
        for p in &self.consistency_by_shot {
            writeln!(
                output,
                "| {} | {} | {:.3} |",
                p.model, p.shot, p.mean_consistency
            )
            .ok();
        }
        writeln!(output).ok();

        writeln!(output, "## Configuration").ok();
        writeln!(output).ok();
        writeln!(
            output,
            "- Bootstrap resamples: {}",
            self.metadata.stat_config.bootstrap_n
        )
        .ok();
        writeln!(
            output,
            "- Confidence level: {}%",
            self.metadata.stat_config.confidence * 100.0
        )
        .ok();
        writeln!(
            output,
            "- Significance threshold (α): {}",
            self.metadata.stat_config.alpha
        )
        .ok();
        writeln!(output, "- Unknown accuracy counts as 0 in means and tests; box summaries leave it out").ok();

        output
    }

    /// Write every table and both renderings into `dir`.
    /// ANOVA files are only written for fitted tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn write_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let mut save = |name: &str, f: &dyn Fn(&Path) -> Result<(), ResultsError>| {
            let path = dir.join(name);
            f(&path)?;
            written.push(path);
            Ok::<_, ReportError>(())
        };

        save("mean_results.csv", &|p| save_rows(p, &self.mean_results))?;
        if let Some(table) = &self.anova_accuracy {
            save("anova_accuracy.csv", &|p| save_rows(p, table))?;
        }
        if let Some(table) = &self.anova_consistency {
            save("anova_consistency.csv", &|p| save_rows(p, table))?;
        }
        save("tukey_accuracy_format.csv", &|p| {
            save_rows(p, &self.tukey_accuracy)
        })?;
        save("tukey_consistency_format.csv", &|p| {
            save_rows(p, &self.tukey_consistency)
        })?;
        for metric in Metric::BOTH {
            let rows: Vec<&PairwiseComparison> = self
                .format_comparisons
                .iter()
                .filter(|c| c.metric == metric)
                .collect();
            save(&format!("pairwise_{}_format.csv", metric.as_str()), &|p| {
                save_rows(p, &rows)
            })?;
        }
        save("box_stats.csv", &|p| save_rows(p, &self.box_plots))?;
        save("consistency_vs_shots.csv", &|p| {
            save_rows(p, &self.consistency_by_shot)
        })?;

        let md = dir.join("report.md");
        std::fs::write(&md, self.to_markdown())?;
        written.push(md);
        let json = dir.join("report.json");
        std::fs::write(&json, self.to_json()?)?;
        written.push(json);

        for path in &written {
            tracing::info!(path = %path.display(), "Wrote report file");
        }
        Ok(written)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |c| {
        c.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::results::{save_accuracy, save_reproducibility};
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const FORMATS: [PromptFormat; 2] = [PromptFormat::Text, PromptFormat::Json];

    /// Balanced grid: 2 prompts × shots {0, 1} × formats {text, json}
    fn model_rows(model: &str, offset: f64) -> Vec<MergedRow> {
        let mut rows = Vec::new();
        for prompt_id in 1..=2 {
            for shot in [0, 1] {
                for (fi, format) in FORMATS.iter().enumerate() {
                    let base = offset + 0.1 * shot as f64 + 0.05 * fi as f64;
                    rows.push(MergedRow {
                        model: model.to_string(),
                        prompt_id,
                        shot,
                        format: *format,
                        accuracy: Accuracy::Value(base + 0.02 * prompt_id as f64),
                        reproducibility: base + 0.03 * prompt_id as f64,
                    });
                }
            }
        }
        rows
    }

    fn two_models() -> Vec<MergedRow> {
        let mut rows = model_rows("model_1", 0.4);
        rows.extend(model_rows("model_2", 0.6));
        rows
    }

    fn split(rows: &[MergedRow]) -> (Vec<AccuracyRow>, Vec<ReproducibilityRow>) {
        let acc = rows
            .iter()
            .map(|r| AccuracyRow {
                prompt_id: r.prompt_id,
                shot: r.shot,
                format: r.format,
                accuracy: r.accuracy,
            })
            .collect();
        let rep = rows
            .iter()
            .map(|r| ReproducibilityRow {
                prompt_id: r.prompt_id,
                shot: r.shot,
                format: r.format,
                reproducibility: (r.reproducibility * 100.0).round() / 100.0,
            })
            .collect();
        (acc, rep)
    }

    #[test]
    fn test_merge_is_inner_join() {
        let rows = model_rows("m", 0.5);
        let (acc, mut rep) = split(&rows);
        rep.remove(0);
        rep.reverse();
        let merged = merge_metrics("m", &acc, &rep);
        assert_eq!(merged.len(), rows.len() - 1);
        assert_eq!(merged[0].prompt_id, acc[1].prompt_id);
        assert_eq!(merged[0].format, acc[1].format);
        assert!(merged.iter().all(|r| r.model == "m"));
    }

    #[test]
    fn test_mean_results_treat_unknown_as_zero() {
        let mut rows = model_rows("m", 0.5);
        rows[0].accuracy = Accuracy::Unknown;
        let means = mean_results(&rows);
        // json sorts before text
        assert_eq!(means[0].format, PromptFormat::Json);
        assert_eq!(means.len(), 4);
        let text_zero = means
            .iter()
            .find(|m| m.format == PromptFormat::Text && m.shot == 0)
            .unwrap();
        // prompt 1 unknown (0.0), prompt 2 = 0.5 + 0.04
        assert!((text_zero.mean_accuracy - 0.27).abs() < 1e-9);
    }

    #[test]
    fn test_box_groups_skip_unknown() {
        let mut rows = model_rows("m", 0.5);
        rows[0].accuracy = Accuracy::Unknown;
        let groups = box_groups(&rows, &["m".to_string()], Metric::Accuracy, Grouping::Format);
        let levels: Vec<&str> = groups.iter().map(|g| g.level.as_str()).collect();
        assert_eq!(levels, vec!["text", "json"]);
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[1].count, 4);

        let by_shot = box_groups(&rows, &["m".to_string()], Metric::Consistency, Grouping::Shot);
        assert_eq!(by_shot.len(), 2);
        assert!(by_shot.iter().all(|g| g.count == 4));
    }

    #[test]
    fn test_anova_effects() {
        let table = anova(&two_models(), Metric::Accuracy).unwrap();
        let effects: Vec<&str> = table.iter().map(|r| r.effect.as_str()).collect();
        assert_eq!(
            effects,
            vec![
                "C(model)",
                "C(format)",
                "C(shot)",
                "C(model):C(format)",
                "C(model):C(shot)",
                "C(format):C(shot)",
                "C(model):C(format):C(shot)",
                "Residual"
            ]
        );
        assert_eq!(table.last().unwrap().df, 8.0);
        // model offset dominates
        assert!(table[0].p_value.unwrap() < 0.001);
    }

    #[test]
    fn test_anova_single_model() {
        let table = anova(&model_rows("m", 0.5), Metric::Consistency).unwrap();
        assert_eq!(table[0].effect, "C(format)");
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_anova_unbalanced() {
        let mut rows = two_models();
        rows.pop();
        assert!(matches!(
            anova(&rows, Metric::Accuracy),
            Err(ReportError::UnbalancedDesign {
                metric: "accuracy",
                ..
            })
        ));
    }

    #[test]
    fn test_tukey_formats_sorted_by_name() {
        let table = tukey_formats(&two_models(), Metric::Accuracy, 0.05);
        assert_eq!(table.len(), 1);
        let c = &table[0];
        assert_eq!((c.group1.as_str(), c.group2.as_str()), ("json", "text"));
        // json rows sit 0.05 above text rows
        assert!((c.meandiff + 0.05).abs() < 1e-9);
        assert!(c.lower < c.meandiff && c.meandiff < c.upper);
        assert!((0.0..=1.0).contains(&c.p_adj));
    }

    #[test]
    fn test_tukey_formats_keeps_constant_groups() {
        let rows: Vec<MergedRow> = model_rows("m", 0.5)
            .into_iter()
            .map(|mut r| {
                r.reproducibility = 1.0;
                r
            })
            .collect();
        assert!(pairwise_formats(&rows, Metric::Consistency, 0.05).is_empty());
        let table = tukey_formats(&rows, Metric::Consistency, 0.05);
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].p_adj, 1.0);
        assert!(!table[0].reject);
    }

    #[test]
    fn test_unbalanced_design_still_reports() {
        let mut rows = two_models();
        rows.pop();
        let report = ReportBuilder::new(rows)
            .with_stat_config(StatConfig {
                bootstrap_n: 100,
                ..StatConfig::default()
            })
            .build()
            .unwrap();
        assert!(report.anova_accuracy.is_none());
        assert!(report.anova_consistency.is_none());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("Unbalanced design for accuracy"));
        assert_eq!(report.mean_results.len(), 8);
        assert!(!report.box_plots.is_empty());
        assert_eq!(report.consistency_by_shot.len(), 4);

        let md = report.to_markdown();
        assert!(md.contains("## Warnings"));
        assert!(!md.contains("## ANOVA"));

        let dir = TempDir::new().unwrap();
        let written = report.write_outputs(dir.path()).unwrap();
        assert_eq!(written.len(), 9);
        assert!(!dir.path().join("anova_accuracy.csv").exists());
        assert!(dir.path().join("consistency_vs_shots.csv").is_file());
    }

    #[test]
    fn test_pairwise_formats_bonferroni() {
        let comparisons = pairwise_formats(&two_models(), Metric::Accuracy, 0.05);
        assert_eq!(comparisons.len(), 1);
        let c = &comparisons[0];
        assert_eq!((c.group1, c.group2), (PromptFormat::Text, PromptFormat::Json));
        assert!((c.meandiff - 0.05).abs() < 1e-9);
        assert!((c.p_adj - c.p_value).abs() < 1e-12);
    }

    #[test]
    fn test_consistency_by_shot() {
        let points = consistency_by_shot(&two_models(), &["model_1".to_string()]);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].shot, 0);
        assert!(points[1].mean_consistency > points[0].mean_consistency);
    }

    fn write_layout(root: &Path, rows: &[MergedRow], model: &str) {
        let layout = MetricsLayout::new(model);
        let (acc, rep) = split(rows);
        save_accuracy(&root.join(layout.accuracy_path()), &acc).unwrap();
        save_reproducibility(&root.join(layout.reproducibility_path()), &rep).unwrap();
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        write_layout(dir.path(), &model_rows("model_1", 0.4), "model_1");
        write_layout(dir.path(), &model_rows("model_2", 0.6), "model_2");

        let source = MetricsSource::detect(dir.path()).unwrap();
        assert!(matches!(source, MetricsSource::Directory(_)));
        let rows = source
            .load(&["model_1".to_string(), "model_2".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 16);
        assert_eq!(rows[8].model, "model_2");
    }

    #[test]
    fn test_load_from_archive() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("results.zip");
        let mut zip = zip::ZipWriter::new(File::create(&zip_path).unwrap());
        let options = SimpleFileOptions::default();
        let layout = MetricsLayout::new("model_1");
        let (acc, rep) = split(&model_rows("model_1", 0.4));

        let mut buf = Vec::new();
        crate::results::write_rows(&mut buf, &acc).unwrap();
        zip.start_file(layout.accuracy_path(), options).unwrap();
        zip.write_all(&buf).unwrap();
        let mut buf = Vec::new();
        crate::results::write_rows(&mut buf, &rep).unwrap();
        zip.start_file(layout.reproducibility_path(), options).unwrap();
        zip.write_all(&buf).unwrap();
        zip.finish().unwrap();

        let source = MetricsSource::detect(&zip_path).unwrap();
        assert!(matches!(source, MetricsSource::Archive(_)));
        let rows = source.load(&["model_1".to_string()]).unwrap();
        assert_eq!(rows.len(), 8);

        let err = source.load(&["model_9".to_string()]).unwrap_err();
        assert!(matches!(err, ReportError::MissingFile { .. }));
    }

    #[test]
    fn test_detect_missing() {
        assert!(matches!(
            MetricsSource::detect("/nonexistent/results.zip"),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_build_and_write_report() {
        let config = StatConfig {
            bootstrap_n: 200,
            ..StatConfig::default()
        };
        let report = ReportBuilder::new(two_models())
            .with_stat_config(config)
            .with_source("memory")
            .build()
            .unwrap();

        assert_eq!(report.metadata.models, vec!["model_1", "model_2"]);
        assert_eq!(report.model_summaries.len(), 2);
        assert_eq!(report.mean_results.len(), 8);
        assert_eq!(report.model_comparisons.len(), 2);
        assert!(report.model_summaries[1].accuracy.value > report.model_summaries[0].accuracy.value);

        let md = report.to_markdown();
        assert!(md.contains("## ANOVA: accuracy"));
        assert!(md.contains("## Accuracy by Format"));
        assert!(md.contains("C(model):C(format):C(shot)"));

        assert!(report.warnings.is_empty());
        assert_eq!(report.tukey_accuracy.len(), 1);
        assert!(md.contains("## Tukey HSD: accuracy by format"));

        let dir = TempDir::new().unwrap();
        let written = report.write_outputs(dir.path()).unwrap();
        assert_eq!(written.len(), 11);
        let tukey_csv =
            std::fs::read_to_string(dir.path().join("tukey_accuracy_format.csv")).unwrap();
        assert!(tukey_csv.starts_with("group1,group2,meandiff,p-adj,lower,upper,reject\njson,text,"));
        let anova_csv = std::fs::read_to_string(dir.path().join("anova_accuracy.csv")).unwrap();
        assert!(anova_csv.starts_with("Effect,sum_sq,df,F,PR(>F)"));
        let means = std::fs::read_to_string(dir.path().join("mean_results.csv")).unwrap();
        assert!(means.starts_with("model,format,shot,mean_accuracy,mean_consistency"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(json["anova_accuracy"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn test_build_without_rows() {
        assert!(matches!(
            ReportBuilder::new(Vec::new()).build(),
            Err(ReportError::NoModels)
        ));
    }
}
