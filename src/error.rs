use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Errors raised by the normalization, dataset and inference layers.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureError {
    /// A vector does not match the 510-point (1530 value) layout
    InvalidLength { expected: usize, got: usize },
    /// A recording line could not be turned into a sample
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// The model artifact or class map could not be loaded
    ArtifactLoadFailure { path: PathBuf, reason: String },
    /// The predicted index has no entry in the class map
    UnknownClassIndex(usize),
    /// The forward pass failed or produced unusable scores
    RuntimeInferenceFailure(String),
    /// No samples were found while building a dataset
    EmptyDataset,
}

impl Display for GestureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GestureError::InvalidLength { expected, got } => {
                write!(f, "Invalid vector length: expected {}, got {}", expected, got)
            }
            GestureError::MalformedRecord { path, line, reason } => {
                write!(f, "{}:{}: malformed record: {}", path.display(), line, reason)
            }
            GestureError::ArtifactLoadFailure { path, reason } => {
                write!(f, "failed to load {}: {}", path.display(), reason)
            }
            GestureError::UnknownClassIndex(idx) => {
                write!(f, "class index {} is not in the class map", idx)
            }
            GestureError::RuntimeInferenceFailure(reason) => {
                write!(f, "inference failed: {}", reason)
            }
            GestureError::EmptyDataset => write!(f, "no samples found in recordings"),
        }
    }
}

impl Error for GestureError {}

impl GestureError {
    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl Display) -> Self {
        GestureError::ArtifactLoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_length_message_carries_both_widths() {
        let err = GestureError::InvalidLength { expected: 1530, got: 100 };
        assert_eq!(err.to_string(), "Invalid vector length: expected 1530, got 100");
    }

    #[test]
    fn test_malformed_record_message_points_at_line() {
        let err = GestureError::MalformedRecord {
            path: PathBuf::from("data_raw/data_Hello.jsonl"),
            line: 7,
            reason: "missing field `label`".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("data_raw/data_Hello.jsonl:7:"), "{}", msg);
    }
}
