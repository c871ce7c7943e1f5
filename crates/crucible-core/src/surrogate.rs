//! Surrogate evaluation seam.
//!
//! The engine consumes a trained model purely through [`Surrogate`]: a pure,
//! thread-safe function from parameter vector to objective vector plus a
//! confidence scalar. Training lives outside this crate; [`RbfSurrogate`]
//! only loads a pretrained artifact.
//!
//! Low confidence is not an error. It marks the result unreliable and the
//! loop controller applies the configured [`LowConfidencePolicy`]. Structural
//! problems (wrong input arity, unreadable artifact) are errors and fatal.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SurrogateError {
    #[error("input shape mismatch: got {got} parameters, model expects {expected}")]
    InputShape { got: usize, expected: usize },
    #[error("artifact error: {0}")]
    Artifact(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One evaluation result. Confidence in [0, 1] signals whether the input lay
/// inside the model's training distribution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    pub objectives: Vec<f64>,
    pub confidence: f64,
}

/// The evaluation capability. Implementations must be pure functions of
/// their weights and the input, safe to call from many workers at once.
pub trait Surrogate: Send + Sync {
    fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError>;

    fn objective_count(&self) -> usize;
}

/// What to do with an unreliable (low-confidence) evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowConfidencePolicy {
    /// Add a flat penalty to every objective, pushing the individual toward
    /// the back of the ranking without discarding it.
    Penalize { penalty: f64 },
    /// Route the individual to the external real evaluator. Falls back to a
    /// penalty when none is installed.
    Fallback,
}

impl Default for LowConfidencePolicy {
    fn default() -> Self {
        LowConfidencePolicy::Penalize { penalty: 1e3 }
    }
}

/// Radial-basis surrogate loaded from a JSON artifact produced by the
/// training pipeline. Confidence is the strongest kernel response against
/// the stored training centers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RbfSurrogate {
    pub input_dim: usize,
    pub objective_count: usize,
    pub length_scale: f64,
    /// Training-set centers, each of length `input_dim`.
    pub centers: Vec<Vec<f64>>,
    /// Per-center weight vector, each of length `objective_count`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl RbfSurrogate {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SurrogateError> {
        let raw = std::fs::read_to_string(path)?;
        let model: RbfSurrogate = serde_json::from_str(&raw)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), SurrogateError> {
        if self.length_scale <= 0.0 || !self.length_scale.is_finite() {
            return Err(SurrogateError::Artifact(
                "length_scale must be positive".to_string(),
            ));
        }
        if self.centers.len() != self.weights.len() {
            return Err(SurrogateError::Artifact(format!(
                "{} centers but {} weight vectors",
                self.centers.len(),
                self.weights.len()
            )));
        }
        if self.centers.iter().any(|c| c.len() != self.input_dim) {
            return Err(SurrogateError::Artifact(
                "center dimensionality does not match input_dim".to_string(),
            ));
        }
        if self.weights.iter().any(|w| w.len() != self.objective_count)
            || self.bias.len() != self.objective_count
        {
            return Err(SurrogateError::Artifact(
                "weight/bias arity does not match objective_count".to_string(),
            ));
        }
        Ok(())
    }

    fn kernel(&self, x: &[f64], center: &[f64]) -> f64 {
        let sq_dist: f64 = x
            .iter()
            .zip(center.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        (-sq_dist / (2.0 * self.length_scale * self.length_scale)).exp()
    }
}

impl Surrogate for RbfSurrogate {
    fn evaluate(&self, params: &[f64]) -> Result<Evaluation, SurrogateError> {
        if params.len() != self.input_dim {
            return Err(SurrogateError::InputShape {
                got: params.len(),
                expected: self.input_dim,
            });
        }

        let mut objectives = self.bias.clone();
        let mut max_kernel = 0.0_f64;
        for (center, weight) in self.centers.iter().zip(self.weights.iter()) {
            let k = self.kernel(params, center);
            max_kernel = max_kernel.max(k);
            for (obj, w) in objectives.iter_mut().zip(weight.iter()) {
                *obj += w * k;
            }
        }

        Ok(Evaluation {
            objectives,
            confidence: max_kernel.clamp(0.0, 1.0),
        })
    }

    fn objective_count(&self) -> usize {
        self.objective_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> RbfSurrogate {
        RbfSurrogate {
            input_dim: 2,
            objective_count: 2,
            length_scale: 1.0,
            centers: vec![vec![0.0, 0.0], vec![1.0, 1.0]],
            weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            bias: vec![0.5, 0.5],
        }
    }

    #[test]
    fn evaluates_at_a_center_with_full_confidence() {
        let m = model();
        let eval = m.evaluate(&[0.0, 0.0]).unwrap();
        assert!((eval.confidence - 1.0).abs() < 1e-12);
        // obj0 = bias + w00 * k(center0) = 0.5 + 1.0
        assert!((eval.objectives[0] - 1.5).abs() < 1e-12);
        // obj1 picks up only the far center's kernel
        assert!((eval.objectives[1] - (0.5 + (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn confidence_decays_away_from_training_data() {
        let m = model();
        let near = m.evaluate(&[0.1, 0.1]).unwrap();
        let far = m.evaluate(&[50.0, -50.0]).unwrap();
        assert!(near.confidence > 0.9);
        assert!(far.confidence < 1e-6);
    }

    #[test]
    fn wrong_arity_is_a_structural_error() {
        let m = model();
        let err = m.evaluate(&[0.0]).unwrap_err();
        assert!(matches!(err, SurrogateError::InputShape { got: 1, expected: 2 }));
    }

    #[test]
    fn validation_catches_mismatched_weights() {
        let mut m = model();
        m.weights.pop();
        assert!(m.validate().is_err());
    }
}
