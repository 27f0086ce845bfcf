use thiserror::Error;

use crate::predictor::BoxError;

/// Errors reported by the schedule, losses, sampler and parameter averager.
///
/// Configuration errors are returned by constructors before any computation
/// happens. Numerical failures carry the step index (for sampling) and the
/// process time at which they were observed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BfnError {
    #[error("Noise level sigma_1 must be in (0, 1), got {0}")]
    InvalidNoiseLevel(f64),

    #[error("{name} must be positive, got {value}")]
    InvalidCount { name: &'static str, value: usize },

    #[error("Averaging decay must be in (0, 1), got {0}")]
    InvalidDecay(f64),

    #[error("Process time must be in [0, 1], got {0}")]
    InvalidTime(f64),

    #[error("Precision increments must be non-negative, got {0}")]
    InvalidPrecision(f64),

    #[error("Invalid output range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("Invalid guidance setting {name} = {value}")]
    InvalidGuidance { name: &'static str, value: f64 },

    #[error("Shape mismatch in {context}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Predictor returned a non-finite value (step {step:?}, row {row}, t = {t})")]
    NonFinitePrediction {
        step: Option<usize>,
        row: usize,
        t: f64,
    },

    #[error("Predictor failed (step {step:?})")]
    Predictor {
        step: Option<usize>,
        #[source]
        source: BoxError,
    },

    #[error("Generation stopped at step {step} of {n_timesteps}")]
    GenerationIncomplete { step: usize, n_timesteps: usize },

    #[error("Parameter averager used before register")]
    NotRegistered,
}

pub type Result<T> = std::result::Result<T, BfnError>;

pub(crate) fn check_shape(
    context: &'static str,
    expected: &[usize],
    found: &[usize],
) -> Result<()> {
    if expected != found {
        return Err(BfnError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}
