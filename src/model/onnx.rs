use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use super::LogitModel;
use crate::error::GestureError;
use crate::landmarks::VECTOR_LEN;

/// Most sessions created when the pool size is not configured
pub const MAX_DEFAULT_SESSIONS: usize = 4;

fn hardware_threads() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Default pool size: half the hardware threads, between 1 and 4
pub fn default_session_count() -> usize {
    (hardware_threads() / 2).clamp(1, MAX_DEFAULT_SESSIONS)
}

/// Default intra-op threads per session: every hardware thread but one,
/// shared across the pool
pub fn default_intra_threads(sessions: usize) -> usize {
    (hardware_threads().saturating_sub(1) / sessions.max(1)).max(1)
}

/// Fixed set of interchangeable values, each behind its own lock.
struct Pool<T> {
    slots: Vec<Mutex<T>>,
    next: AtomicUsize,
}

impl<T> Pool<T> {
    /// `items` must not be empty.
    fn new(items: Vec<T>) -> Self {
        Self {
            slots: items.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// First idle slot, starting after the previous checkout. Waits on one
    /// slot only when every slot is busy.
    fn checkout(&self) -> MutexGuard<'_, T> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let n = self.slots.len();
        for i in 0..n {
            match self.slots[(start + i) % n].try_lock() {
                Ok(guard) => return guard,
                // A panic in an earlier run leaves the value itself usable
                Err(TryLockError::Poisoned(p)) => return p.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
        }
        self.slots[start % n].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .with_inter_threads(1)?;

    #[cfg(feature = "cuda")]
    let builder = {
        eprintln!("[ort] Attempting CUDA execution provider...");
        builder.with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])?
    };

    builder.commit_from_file(model_path).context("Failed to load ONNX model")
}

/// Last declared dimension, `None` when missing or dynamic (-1)
fn last_dim(shape: Option<&[i64]>) -> Option<usize> {
    shape
        .and_then(|s| s.last().copied())
        .filter(|&d| d > 0)
        .map(|d| d as usize)
}

/// Exported classifier run through ONNX Runtime.
///
/// ort needs exclusive access to a session for each run, so the model keeps a
/// small pool of identical sessions and each forward pass borrows an idle one.
/// Requests only wait on each other when every session is busy.
pub struct OnnxModel {
    sessions: Pool<Session>,
    input_name: String,
    output_name: String,
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
    output_width: Option<usize>,
}

impl OnnxModel {
    /// Load the artifact into `sessions` sessions. Fails if it declares an
    /// input width other than 1530.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        sessions: Option<usize>,
        intra_threads: Option<usize>,
    ) -> Result<Self, GestureError> {
        let model_path = model_path.as_ref();
        let count = sessions.unwrap_or_else(default_session_count).max(1);
        let threads = intra_threads.unwrap_or_else(|| default_intra_threads(count));

        let mut pool = Vec::with_capacity(count);
        for _ in 0..count {
            let session = build_session(model_path, threads)
                .map_err(|e| GestureError::artifact(model_path, format!("{:#}", e)))?;
            pool.push(session);
        }
        Self::from_sessions(pool).map_err(|e| GestureError::artifact(model_path, format!("{:#}", e)))
    }

    fn from_sessions(sessions: Vec<Session>) -> Result<Self> {
        let session = sessions.first().ok_or_else(|| anyhow!("no sessions created"))?;
        let input = session.inputs.first().ok_or_else(|| anyhow!("model declares no inputs"))?;
        let output = session.outputs.first().ok_or_else(|| anyhow!("model declares no outputs"))?;

        let input_shape: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let output_shape: Vec<i64> = output
            .output_type
            .tensor_shape()
            .map(|s| s.to_vec())
            .unwrap_or_default();

        if let Some(width) = last_dim(Some(input_shape.as_slice())) {
            if width != VECTOR_LEN {
                return Err(anyhow!(
                    "input '{}' expects {} values, landmark vectors have {}",
                    input.name,
                    width,
                    VECTOR_LEN
                ));
            }
        }

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        Ok(Self {
            input_name,
            output_name,
            output_width: last_dim(Some(output_shape.as_slice())),
            input_shape,
            output_shape,
            sessions: Pool::new(sessions),
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Declared input shape; -1 marks a dynamic dimension
    pub fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    /// Number of sessions in the pool
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl LogitModel for OnnxModel {
    fn name(&self) -> String {
        format!(
            "onnx {}{:?} -> {}{:?} x{} sessions",
            self.input_name,
            self.input_shape,
            self.output_name,
            self.output_shape,
            self.sessions.len()
        )
    }

    fn input_width(&self) -> usize {
        VECTOR_LEN
    }

    fn output_width(&self) -> Option<usize> {
        self.output_width
    }

    fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        let batch = Array2::from_shape_vec((1, input.len()), input.to_vec())?;
        let input_tensor = Tensor::from_array(batch)?;

        let mut session = self.sessions.checkout();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .context("Inference failed")?;
        let logits: ndarray::ArrayViewD<f32> = outputs[self.output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        let scores: Vec<f32> = logits.iter().copied().collect();
        Ok(scores)
    }
}
