//! Result tables and their CSV persistence.
//!
//! A [`RunTable`] holds one full sweep for one model and repetition. It is
//! rewritten in full after every appended row. Each rewrite goes to a sibling
//! temporary file that is then renamed over the target, so an interrupted run
//! always leaves the last complete table on disk.

use crate::config::PromptFormat;
use crate::label::Label;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur reading or writing result tables
#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Result file not found: {0}")]
    NotFound(String),

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Identity of one cell of the sweep grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub prompt_id: i64,
    pub shot: usize,
    pub format: PromptFormat,
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(prompt_id={}, shot={}, format={})",
            self.prompt_id, self.shot, self.format
        )
    }
}

/// One model response within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub prompt_id: i64,
    pub prompt: String,
    pub shot: usize,
    pub format: PromptFormat,
    /// Normalized label
    #[serde(rename = "gpt_output")]
    pub label: Label,
    pub raw_output: String,
}

impl ResultRow {
    #[must_use]
    pub const fn key(&self) -> CellKey {
        CellKey {
            prompt_id: self.prompt_id,
            shot: self.shot,
            format: self.format,
        }
    }
}

/// Ordered rows of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTable {
    rows: Vec<ResultRow>,
}

impl RunTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_rows(rows: Vec<ResultRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter()
    }

    /// Load a run table from CSV
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or a row does not parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ResultsError> {
        let rows = read_csv(path.as_ref())?;
        Ok(Self { rows })
    }

    /// Read a run table from any CSV source
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not parse.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ResultsError> {
        let rows = deserialize_all(reader, "<run table>")?;
        Ok(Self { rows })
    }

    /// Replace the table at `path` with the current rows
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ResultsError> {
        save_rows(path.as_ref(), &self.rows)
    }
}

impl IntoIterator for RunTable {
    type Item = ResultRow;
    type IntoIter = std::vec::IntoIter<ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Accuracy of one cell; `Unknown` when every run was unparseable
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accuracy {
    Value(f64),
    Unknown,
}

impl Accuracy {
    /// Numeric value, or `None` for the `unknown` sentinel
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Accuracy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_f64(*v),
            Self::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for Accuracy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("unknown") {
            return Ok(Self::Unknown);
        }
        raw.parse::<f64>()
            .map(Self::Value)
            .map_err(|_| serde::de::Error::custom(format!("invalid accuracy {raw:?}")))
    }
}

/// Accuracy for one cell across all runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRow {
    pub prompt_id: i64,
    pub shot: usize,
    pub format: PromptFormat,
    pub accuracy: Accuracy,
}

impl AccuracyRow {
    #[must_use]
    pub const fn key(&self) -> CellKey {
        CellKey {
            prompt_id: self.prompt_id,
            shot: self.shot,
            format: self.format,
        }
    }
}

/// Pairwise agreement for one cell across all runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityRow {
    pub prompt_id: i64,
    pub shot: usize,
    pub format: PromptFormat,
    #[serde(serialize_with = "two_decimals")]
    pub reproducibility: f64,
}

impl ReproducibilityRow {
    #[must_use]
    pub const fn key(&self) -> CellKey {
        CellKey {
            prompt_id: self.prompt_id,
            shot: self.shot,
            format: self.format,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:.2}"))
}

/// Where the metric files of one model live below a results root
#[derive(Debug, Clone)]
pub struct MetricsLayout {
    model: String,
}

impl MetricsLayout {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// `results/<model>/accuracy_<model>/accuracy_<model>.csv`
    #[must_use]
    pub fn accuracy_path(&self) -> String {
        format!(
            "results/{m}/accuracy_{m}/accuracy_{m}.csv",
            m = self.model
        )
    }

    /// `results/<model>/reproducibility_<model>/reproducibility_<model>.csv`
    #[must_use]
    pub fn reproducibility_path(&self) -> String {
        format!(
            "results/{m}/reproducibility_{m}/reproducibility_{m}.csv",
            m = self.model
        )
    }
}

/// Write accuracy rows to `path`
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_accuracy(path: &Path, rows: &[AccuracyRow]) -> Result<(), ResultsError> {
    save_rows(path, rows)
}

/// Write reproducibility rows to `path`
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_reproducibility(path: &Path, rows: &[ReproducibilityRow]) -> Result<(), ResultsError> {
    save_rows(path, rows)
}

/// Read accuracy rows from any CSV source
///
/// # Errors
///
/// Returns an error if a row does not parse.
pub fn read_accuracy<R: Read>(reader: R, source_name: &str) -> Result<Vec<AccuracyRow>, ResultsError> {
    deserialize_all(reader, source_name)
}

/// Read reproducibility rows from any CSV source
///
/// # Errors
///
/// Returns an error if a row does not parse.
pub fn read_reproducibility<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Vec<ReproducibilityRow>, ResultsError> {
    deserialize_all(reader, source_name)
}

/// Serialize rows as CSV into any writer
///
/// # Errors
///
/// Returns an error if serialization or the writer fails.
pub fn write_rows<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), ResultsError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row).map_err(|source| ResultsError::Csv {
            path: "<writer>".to_string(),
            source,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ResultsError> {
    if !path.exists() {
        return Err(ResultsError::NotFound(path.display().to_string()));
    }
    let file = std::fs::File::open(path)?;
    deserialize_all(file, &path.display().to_string())
}

fn deserialize_all<R: Read, T: serde::de::DeserializeOwned>(
    reader: R,
    source_name: &str,
) -> Result<Vec<T>, ResultsError> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| ResultsError::Csv {
            path: source_name.to_string(),
            source,
        })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write rows as CSV to `path` through a sibling temporary file
///
/// # Errors
///
/// Returns an error if the temporary file cannot be written or renamed.
pub fn save_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ResultsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let saved = std::fs::File::create(&tmp)
        .map_err(ResultsError::from)
        .and_then(|file| write_rows(std::io::BufWriter::new(file), rows))
        .and_then(|()| std::fs::rename(&tmp, path).map_err(ResultsError::from));
    if let Err(e) = saved {
        // The target keeps its previous content; only the partial copy goes
        if tmp.exists() {
            std::fs::remove_file(&tmp).ok();
        }
        return Err(match e {
            ResultsError::Csv { source, .. } => ResultsError::Csv {
                path: path.display().to_string(),
                source,
            },
            other => other,
        });
    }
    Ok(())
}
