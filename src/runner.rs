//! Sweep execution engine.
//!
//! Walks prompts × shot levels × formats, sends each rendered prompt to a
//! completion client, normalizes the reply and rewrites the run table after
//! every row so an interrupted sweep leaves a valid partial table behind.

use crate::client::{is_error_sentinel, CompletionClient};
use crate::config::{ExperimentConfig, SweepConfig};
use crate::dataset::{DatasetError, PromptItem, ShotPool};
use crate::label::{normalize, Label};
use crate::prompt::{renderer_for, PromptRenderer};
use crate::results::{ResultRow, ResultsError, RunTable};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur during a sweep
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("No prompts to classify")]
    NoPrompts,

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Failed to persist run table: {0}")]
    Results(#[from] ResultsError),
}

/// Label recorded for a raw completion; error sentinels are never scanned
#[must_use]
pub fn label_for_output(raw_output: &str) -> Label {
    if is_error_sentinel(raw_output) {
        Label::Unknown
    } else {
        normalize(raw_output)
    }
}

/// Runs one full sweep against a completion client
pub struct ExperimentRunner<C: CompletionClient> {
    sweep: SweepConfig,
    max_tokens: u32,
    client: C,
    renderer: Box<dyn PromptRenderer + Send + Sync>,
}

impl<C: CompletionClient> ExperimentRunner<C> {
    /// Create a runner using the sweep and completion settings of `config`
    #[must_use]
    pub fn new(config: &ExperimentConfig, client: C) -> Self {
        Self {
            sweep: config.sweep.clone(),
            max_tokens: config.completion.max_tokens,
            client,
            renderer: renderer_for(config.sweep.renderer),
        }
    }

    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Execute the sweep, rewriting `output` after every row.
    ///
    /// Shot levels form the outer loop and formats the inner loop for each
    /// prompt. Completion failures are recorded as `unknown` rows and do not
    /// stop the sweep.
    ///
    /// # Errors
    ///
    /// Fails before any request when there are no prompts or the shot pool
    /// cannot cover the largest shot level, and at any point when the table
    /// cannot be written.
    pub fn run(
        &self,
        prompts: &[PromptItem],
        pool: &ShotPool,
        output: &Path,
    ) -> Result<RunTable, RunnerError> {
        if prompts.is_empty() {
            return Err(RunnerError::NoPrompts);
        }
        pool.take(self.sweep.max_shots())?;

        let total = prompts.len() * self.sweep.combinations();
        let delay = self.sweep.request_delay();
        let start = Instant::now();
        let mut table = RunTable::new();
        let mut failures = 0usize;

        tracing::info!(
            client = self.client.name(),
            prompts = prompts.len(),
            combinations = self.sweep.combinations(),
            total,
            output = %output.display(),
            "Starting sweep"
        );

        for item in prompts {
            for &shot in &self.sweep.shot_levels {
                let examples = pool.take(shot)?;
                for &format in &self.sweep.formats {
                    let prompt = self.renderer.render(&item.prompt, examples, format);
                    let raw_output = self.client.complete(&prompt.text(), self.max_tokens);
                    let label = label_for_output(&raw_output);
                    if is_error_sentinel(&raw_output) {
                        failures += 1;
                        tracing::warn!(
                            prompt_id = item.id,
                            shot,
                            format = %format,
                            output = %raw_output,
                            "Completion failed"
                        );
                    }

                    table.push(ResultRow {
                        prompt_id: item.id,
                        prompt: item.prompt.clone(),
                        shot,
                        format,
                        label,
                        raw_output,
                    });
                    table.save(output)?;

                    tracing::info!(
                        row = table.len(),
                        total,
                        prompt_id = item.id,
                        shot,
                        format = %format,
                        label = %label,
                        "Row recorded"
                    );

                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        tracing::info!(
            rows = table.len(),
            failures,
            elapsed_ms = start.elapsed().as_millis(),
            "Sweep complete"
        );
        Ok(table)
    }
}
