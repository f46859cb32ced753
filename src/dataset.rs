//! Dataset builder: per-gesture recordings (JSON lines) -> normalized feature
//! matrix, label vector and class map.
//!
//! Outputs are written as `X.npy` (float32, n x 1530), `y.npy` (int64, n) and
//! a class map JSON, the layout the training script loads.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use ndarray_npy::write_npy;
use serde::{Deserialize, Serialize};

use crate::class_map::ClassMap;
use crate::error::GestureError;
use crate::landmarks::VECTOR_LEN;
use crate::normalize::normalize;

pub const FEATURES_FILE: &str = "X.npy";
pub const LABELS_FILE: &str = "y.npy";
pub const RECORDING_EXTENSION: &str = "jsonl";

/// One recorded frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Capture time, seconds since the Unix epoch
    pub timestamp: f64,
    pub label: String,
    pub vector: Vec<f32>,
}

impl Sample {
    /// Sample stamped with the current time
    pub fn new(label: impl Into<String>, vector: Vec<f32>) -> Self {
        let now = chrono::Utc::now();
        Self {
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            label: label.into(),
            vector,
        }
    }
}

/// Parse one recording line. `line_no` is 1-based and only used for errors.
pub fn parse_sample_line(line: &str, path: &Path, line_no: usize) -> Result<Sample, GestureError> {
    let malformed = |reason: String| GestureError::MalformedRecord {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    let sample: Sample = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
    if sample.vector.len() != VECTOR_LEN {
        return Err(malformed(format!(
            "expected {} values, got {}",
            VECTOR_LEN,
            sample.vector.len()
        )));
    }
    Ok(sample)
}

/// Recording files in `dir`, sorted by file name so class ids are reproducible.
pub fn list_recordings<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == RECORDING_EXTENSION) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Finished training set. Row i of `features` belongs to `labels[i]`.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f32>,
    pub labels: Array1<i64>,
    pub classes: ClassMap,
}

/// Where `Dataset::write` put its files
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub features: PathBuf,
    pub labels: PathBuf,
    pub classes: PathBuf,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Write `X.npy` and `y.npy` into `out_dir` and the class map to `classes_path`.
    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(&self, out_dir: P, classes_path: Q) -> Result<DatasetPaths> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let features = out_dir.join(FEATURES_FILE);
        write_npy(&features, &self.features)
            .with_context(|| format!("Failed to write {}", features.display()))?;

        let labels = out_dir.join(LABELS_FILE);
        write_npy(&labels, &self.labels)
            .with_context(|| format!("Failed to write {}", labels.display()))?;

        let classes = classes_path.as_ref().to_path_buf();
        self.classes.save(&classes)?;

        Ok(DatasetPaths { features, labels, classes })
    }
}

/// Accumulates normalized samples. Aborts on the first malformed record.
#[derive(Debug, Default)]
pub struct DatasetBuilder {
    features: Vec<f32>,
    labels: Vec<i64>,
    classes: ClassMap,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples added so far
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn classes(&self) -> &ClassMap {
        &self.classes
    }

    pub fn add_sample(&mut self, sample: &Sample) -> Result<(), GestureError> {
        let normalized = normalize(&sample.vector)?;
        if normalized.len() != VECTOR_LEN {
            return Err(GestureError::InvalidLength {
                expected: VECTOR_LEN,
                got: normalized.len(),
            });
        }
        let id = self.classes.get_or_insert(&sample.label);
        self.features.extend_from_slice(&normalized);
        self.labels.push(id as i64);
        Ok(())
    }

    /// Add every line of one recording. Blank lines are skipped.
    /// Returns the number of samples read.
    pub fn add_reader<R: BufRead>(&mut self, reader: R, path: &Path) -> Result<usize> {
        let mut count = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(GestureError::MalformedRecord {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        reason: e.to_string(),
                    }
                    .into());
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("Failed to read {}", path.display())));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let sample = parse_sample_line(&line, path, idx + 1)?;
            self.add_sample(&sample).map_err(|e| match e {
                GestureError::InvalidLength { expected, got } => GestureError::MalformedRecord {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: format!("expected {} values, got {}", expected, got),
                },
                other => other,
            })?;
            count += 1;
        }
        Ok(count)
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        self.add_reader(BufReader::new(file), path)
    }

    pub fn finish(self) -> Result<Dataset, GestureError> {
        if self.labels.is_empty() {
            return Err(GestureError::EmptyDataset);
        }
        let rows = self.labels.len();
        let values = self.features.len();
        let features = Array2::from_shape_vec((rows, VECTOR_LEN), self.features).map_err(|_| {
            GestureError::InvalidLength {
                expected: rows * VECTOR_LEN,
                got: values,
            }
        })?;
        Ok(Dataset {
            features,
            labels: Array1::from(self.labels),
            classes: self.classes,
        })
    }
}

/// Build a dataset from every recording in `dir` (sorted by file name).
pub fn build_from_dir<P: AsRef<Path>>(dir: P) -> Result<Dataset> {
    let mut builder = DatasetBuilder::new();
    for path in list_recordings(dir)? {
        builder.add_file(&path)?;
    }
    Ok(builder.finish()?)
}

/// Appends samples to a recording file, one JSON object per line.
pub struct RecordingWriter {
    out: BufWriter<File>,
}

impl RecordingWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    pub fn write(&mut self, sample: &Sample) -> Result<()> {
        serde_json::to_writer(&mut self.out, sample)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
