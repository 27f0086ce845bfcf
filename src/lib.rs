//! Bayesian Flow Networks for continuous data.
//!
//! A BFN generates data by refining a gaussian belief about it. A predictor
//! maps the current belief mean to an estimate of the data, a sender sample
//! around that estimate is drawn with a precision given by the accuracy
//! schedule, and the belief is updated with Bayes' rule. The same pieces give
//! the continuous and discrete time training losses.

pub(crate) mod averager;
pub(crate) mod belief;
pub(crate) mod error;
pub(crate) mod loss;
pub(crate) mod math;
pub(crate) mod predictor;
pub(crate) mod sampler;
pub(crate) mod schedule;
pub(crate) mod sender;
pub(crate) mod settings;

pub use averager::{Averaged, ParameterAverager, Parameterized};
pub use belief::BeliefState;
pub use error::{BfnError, Result};
pub use loss::LossEngine;
pub use predictor::{
    BoxError, ConditionalPredictor, FnPredictor, Guided, NoisePrediction, Predictor, ProcessTime,
};
pub use sampler::{Generation, Sampler, StepInfo, Trace};
pub use schedule::AccuracySchedule;
pub use sender::{ReceiverDistribution, SenderDistribution};
pub use settings::{AveragerSettings, BfnSettings};
