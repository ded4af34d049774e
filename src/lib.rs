//! # Prompt Format Eval
//!
//! Experiment harness measuring how prompt formatting and few-shot count
//! affect the accuracy and run-to-run reproducibility of LLM sentiment
//! classification.
//!
//! ## Methodology
//!
//! - Every sentence is classified under each (shot level, format) pair
//! - A sweep is repeated N times per model at non-zero temperature
//! - Accuracy is the share of parseable runs matching the gold label
//! - Reproducibility is the share of agreeing run pairs, out of N(N-1)/2
//! - Models are compared with three-way ANOVA over model, format and shot
//! - Formats are compared pairwise with Tukey HSD
//!
//! ## Architecture
//!
//! ```text
//! Prompt Formatter (text | markdown | yaml | json)
//!        ↓
//! Completion Client (OpenAI-style /v1/completions)
//!        ↓
//! Label Normalizer (first sentiment word wins)
//!        ↓
//! Run Orchestrator (one CSV per run, rewritten per row)
//!        ↓
//! Agreement Scorer (accuracy + reproducibility per model)
//!        ↓
//! Report (means, ANOVA, Tukey HSD, box summaries)
//! ```

pub mod client;
pub mod config;
pub mod dataset;
pub mod label;
pub mod metrics;
pub mod prompt;
pub mod report;
pub mod results;
pub mod runner;
pub mod scoring;

pub use client::{is_error_sentinel, ClientError, CompletionClient, HttpCompletionClient};
pub use config::{
    CompletionConfig, ConfigError, ExperimentConfig, OverrideRule, PromptFormat, RendererKind,
    ScoringConfig, SweepConfig,
};
pub use dataset::{load_prompts, DatasetError, GoldAnswers, PromptItem, ShotExample, ShotPool};
pub use label::{normalize, Label, LabelError};
pub use metrics::{
    bonferroni_correction, bootstrap_ci, factorial_anova, studentized_range_cdf,
    studentized_range_quantile, tukey_hsd, welch_t_test, AnovaError, AnovaRow, BoxStats,
    SignificanceResult, StatConfig, TukeyComparison,
};
pub use prompt::{renderer_for, EscapedRenderer, PromptRenderer, RenderedPrompt, TemplateRenderer};
pub use report::{FullReport, MergedRow, MetricsSource, ReportBuilder, ReportError};
pub use results::{
    Accuracy, AccuracyRow, CellKey, MetricsLayout, ReproducibilityRow, ResultRow, ResultsError,
    RunTable,
};
pub use runner::{ExperimentRunner, RunnerError};
pub use scoring::{AgreementScorer, AlignedRuns, LabelOverrides, ScoringError};
