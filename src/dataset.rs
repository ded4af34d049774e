//! Input datasets for the sentiment sweep.
//!
//! Three CSV inputs drive an experiment: the sentences to classify
//! (`id,prompt`), the few-shot pool (`input,output`) and the gold answers.
//! Malformed inputs are fatal at load time; nothing is partially recovered.

use crate::label::Label;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during dataset loading
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset file not found: {0}")]
    NotFound(String),

    #[error("Dataset {source_name} is missing required column '{column}'")]
    MissingColumn { source_name: String, column: String },

    #[error("No rows found in dataset {0}")]
    Empty(String),

    #[error("Shot pool holds {available} examples but {requested} were requested")]
    InsufficientShots { requested: usize, available: usize },

    #[error("Invalid gold label {value:?} on row {row}")]
    InvalidGoldLabel { row: usize, value: String },

    #[error("Conflicting gold labels for prompt {0}")]
    ConflictingGold(i64),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One sentence to classify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptItem {
    pub id: i64,
    pub prompt: String,
}

/// One labeled few-shot exemplar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotExample {
    pub input: String,
    pub output: String,
}

impl ShotExample {
    #[must_use]
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Load the classification items (`id,prompt`)
///
/// # Errors
///
/// Returns an error if the file is missing, lacks a column or has no rows.
pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Vec<PromptItem>, DatasetError> {
    let path = path.as_ref();
    read_rows(open(path)?, &path.display().to_string(), &["id", "prompt"])
}

/// Read classification items from any CSV source
///
/// # Errors
///
/// Returns an error if a column is missing, a row is malformed or there are no rows.
pub fn read_prompts<R: Read>(reader: R) -> Result<Vec<PromptItem>, DatasetError> {
    read_rows(reader, "<prompts>", &["id", "prompt"])
}

/// Ordered pool of few-shot exemplars; a shot level of `k` uses the first `k`
#[derive(Debug, Clone, Default)]
pub struct ShotPool {
    examples: Vec<ShotExample>,
}

impl ShotPool {
    #[must_use]
    pub fn new(examples: Vec<ShotExample>) -> Self {
        Self { examples }
    }

    /// Load the few-shot pool (`input,output`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, lacks a column or has no rows.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let examples = read_rows(open(path)?, &path.display().to_string(), &["input", "output"])?;
        Ok(Self { examples })
    }

    /// Read the few-shot pool from any CSV source
    ///
    /// # Errors
    ///
    /// Returns an error if a column is missing, a row is malformed or there are no rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let examples = read_rows(reader, "<shots>", &["input", "output"])?;
        Ok(Self { examples })
    }

    /// The first `k` examples
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::InsufficientShots` if the pool is smaller than `k`.
    pub fn take(&self, k: usize) -> Result<&[ShotExample], DatasetError> {
        self.examples
            .get(..k)
            .ok_or(DatasetError::InsufficientShots {
                requested: k,
                available: self.examples.len(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Gold answers for a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoldAnswers {
    /// One label per run-table row, in row order
    Positional(Vec<Label>),
    /// One label per sentence, keyed by prompt id
    ByPrompt(HashMap<i64, Label>),
}

impl GoldAnswers {
    /// Load gold answers.
    ///
    /// The label is always the last column. When a `prompt_id` column is
    /// present the answers are keyed by prompt; otherwise they are positional.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, empty, or holds a label other
    /// than positive, negative or neutral.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        Self::read(open(path)?, &path.display().to_string())
    }

    /// Read gold answers from any CSV source
    ///
    /// # Errors
    ///
    /// See [`GoldAnswers::load`].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        Self::read(reader, "<gold>")
    }

    fn read<R: Read>(reader: R, source_name: &str) -> Result<Self, DatasetError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let id_column = headers.iter().position(|h| h.trim() == "prompt_id");

        let mut positional = Vec::new();
        let mut keyed = HashMap::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let value = record.iter().last().unwrap_or_default();
            let label = parse_gold(row + 1, value)?;
            match id_column {
                Some(col) => {
                    let id = record
                        .get(col)
                        .and_then(|v| v.trim().parse::<i64>().ok())
                        .ok_or_else(|| DatasetError::MissingColumn {
                            source_name: source_name.to_string(),
                            column: "prompt_id".to_string(),
                        })?;
                    if let Some(previous) = keyed.insert(id, label) {
                        if previous != label {
                            return Err(DatasetError::ConflictingGold(id));
                        }
                    }
                }
                None => positional.push(label),
            }
        }

        if positional.is_empty() && keyed.is_empty() {
            return Err(DatasetError::Empty(source_name.to_string()));
        }
        Ok(if id_column.is_some() {
            Self::ByPrompt(keyed)
        } else {
            Self::Positional(positional)
        })
    }

    /// Number of answers held
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(labels) => labels.len(),
            Self::ByPrompt(map) => map.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_gold(row: usize, value: &str) -> Result<Label, DatasetError> {
    match value.parse::<Label>() {
        Ok(label) if !label.is_unknown() => Ok(label),
        _ => Err(DatasetError::InvalidGoldLabel {
            row,
            value: value.to_string(),
        }),
    }
}

fn open(path: &Path) -> Result<std::fs::File, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound(path.display().to_string()));
    }
    Ok(std::fs::File::open(path)?)
}

/// Deserialize every row after checking the header carries `required` columns
fn read_rows<R: Read, T: DeserializeOwned>(
    reader: R,
    source_name: &str,
    required: &[&str],
) -> Result<Vec<T>, DatasetError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?;
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(DatasetError::MissingColumn {
                source_name: source_name.to_string(),
                column: (*column).to_string(),
            });
        }
    }

    let rows = rdr.deserialize().collect::<Result<Vec<T>, _>>()?;
    if rows.is_empty() {
        return Err(DatasetError::Empty(source_name.to_string()));
    }
    Ok(rows)
}
