//! Request handling for the live service: normalize, forward pass, softmax,
//! top class lookup.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::class_map::ReverseClassMap;
use crate::config::ModelConfig;
use crate::error::GestureError;
use crate::landmarks::VECTOR_LEN;
use crate::model::{load_model, LogitModel};
use crate::normalize::normalize;
use crate::protocol::{LandmarkRequest, PredictionResult};

/// Label reported when the predicted index has no class map entry
pub const UNKNOWN_LABEL: &str = "unknown";

/// Numerically stable softmax (the max score is subtracted before exp).
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Successful prediction
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    /// Softmax probability of `class_index`
    pub score: f32,
    /// False when the index was missing from the class map
    pub known: bool,
}

/// Model and class map, loaded once and shared read-only by every request.
pub struct ServiceContext {
    model: Box<dyn LogitModel>,
    classes: ReverseClassMap,
}

impl ServiceContext {
    pub fn new(model: Box<dyn LogitModel>, classes: ReverseClassMap) -> Result<Self, GestureError> {
        if model.input_width() != VECTOR_LEN {
            return Err(GestureError::artifact(
                model.name(),
                format!("model takes {} inputs, expected {}", model.input_width(), VECTOR_LEN),
            ));
        }
        Ok(Self { model, classes })
    }

    /// Load the configured model artifact and class map.
    pub fn load(config: &ModelConfig) -> Result<Self, GestureError> {
        let model = load_model(config)?;
        let classes = ReverseClassMap::load(&config.classes)?;
        Self::new(model, classes)
    }

    pub fn model(&self) -> &dyn LogitModel {
        self.model.as_ref()
    }

    pub fn classes(&self) -> &ReverseClassMap {
        &self.classes
    }

    /// (class map entries, model outputs) when the two disagree
    pub fn class_count_mismatch(&self) -> Option<(usize, usize)> {
        match self.model.output_width() {
            Some(width) if width != self.classes.len() => Some((self.classes.len(), width)),
            _ => None,
        }
    }

    pub fn class_label(&self, index: usize) -> Result<&str, GestureError> {
        self.classes
            .label_for(index)
            .ok_or(GestureError::UnknownClassIndex(index))
    }

    /// Handle one `landmark` request. Never panics and never returns `Err`:
    /// every failure becomes an error result.
    pub fn predict(&self, request: &LandmarkRequest) -> PredictionResult {
        let Some(vector) = request.vector.as_deref() else {
            return PredictionResult::error("No vector provided");
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(vector, request.normalized)));
        match outcome {
            Ok(Ok(p)) => PredictionResult::Label {
                label: p.label,
                score: p.score,
            },
            Ok(Err(e)) => PredictionResult::from_error(&e),
            Err(_) => PredictionResult::from_error(&GestureError::RuntimeInferenceFailure(
                "internal error during inference".to_string(),
            )),
        }
    }

    /// Normalize (unless already done), run the model and pick the top class.
    pub fn run(&self, vector: &[f32], already_normalized: bool) -> Result<Prediction, GestureError> {
        let input = if already_normalized {
            vector.to_vec()
        } else {
            normalize(vector)?
        };

        let expected = self.model.input_width();
        if input.len() != expected {
            return Err(GestureError::InvalidLength {
                expected,
                got: input.len(),
            });
        }

        let logits = self
            .model
            .forward(&input)
            .map_err(|e| GestureError::RuntimeInferenceFailure(format!("{:#}", e)))?;

        let probs = softmax(&logits);
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(GestureError::RuntimeInferenceFailure(
                "model produced non-finite scores".to_string(),
            ));
        }
        let class_index = argmax(&probs).ok_or_else(|| {
            GestureError::RuntimeInferenceFailure("model produced no scores".to_string())
        })?;

        let (label, known) = match self.class_label(class_index) {
            Ok(label) => (label.to_string(), true),
            Err(_) => (UNKNOWN_LABEL.to_string(), false),
        };

        Ok(Prediction {
            class_index,
            label,
            score: probs[class_index],
            known,
        })
    }
}
