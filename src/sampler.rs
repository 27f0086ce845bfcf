use ndarray::Array2;
use rand::Rng;

use crate::{
    belief::BeliefState,
    error::{BfnError, Result},
    predictor::{checked_predict, Predictor, ProcessTime},
    schedule::AccuracySchedule,
    sender::SenderDistribution,
    settings::{check_count, BfnSettings},
};

/// Information about one transition of a generation run.
#[derive(Debug, Clone)]
pub struct StepInfo {
    /// Step index, starting at 1.
    pub step: usize,
    /// Process time at which the predictor was evaluated.
    pub t: f64,
    /// Precision of the sender sample that was fused into the belief.
    pub alpha: f64,
    /// Precision of the belief after the update.
    pub rho: f64,
    /// The predictor's estimate of the data before the update.
    pub estimate: Array2<f64>,
}

/// All intermediate steps of a generation run.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub steps: Vec<StepInfo>,
}

/// Generates data by refining a belief with `n_timesteps` Bayesian updates.
#[derive(Debug)]
pub struct Sampler<P> {
    predictor: P,
    settings: BfnSettings,
    schedule: AccuracySchedule,
}

impl<P: Predictor> Sampler<P> {
    pub fn new(predictor: P, settings: BfnSettings) -> Result<Self> {
        let schedule = settings.validate()?;
        check_count("predictor dimension", predictor.dim())?;
        log::debug!(
            "Sampler with sigma_1 = {}, n_timesteps = {}, dim = {}",
            settings.sigma_1,
            settings.n_timesteps,
            predictor.dim()
        );
        Ok(Self {
            predictor,
            settings,
            schedule,
        })
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn into_predictor(self) -> P {
        self.predictor
    }

    pub fn settings(&self) -> &BfnSettings {
        &self.settings
    }

    pub fn schedule(&self) -> &AccuracySchedule {
        &self.schedule
    }

    /// Start a generation run of `n_samples` vectors from the prior.
    pub fn generation(&self, n_samples: usize) -> Result<Generation<'_, P>> {
        check_count("n_samples", n_samples)?;
        Ok(Generation {
            sampler: self,
            belief: BeliefState::prior(n_samples, self.predictor.dim()),
            step: 1,
        })
    }

    /// Draw `n_samples` vectors, returned as the rows of an array.
    pub fn sample<R: Rng + ?Sized>(&self, n_samples: usize, rng: &mut R) -> Result<Array2<f64>> {
        let mut generation = self.generation(n_samples)?;
        while generation.step(rng)?.is_some() {}
        generation.finish()
    }

    /// Like `sample`, but also return every intermediate step.
    pub fn sample_with_trace<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Trace)> {
        let mut generation = self.generation(n_samples)?;
        let mut trace = Trace {
            steps: Vec::with_capacity(self.settings.n_timesteps),
        };
        while let Some(info) = generation.step(rng)? {
            trace.steps.push(info);
        }
        Ok((generation.finish()?, trace))
    }
}

/// A generation run in progress.
///
/// Step `i` evaluates the predictor at `t = (i - 1) / n`, draws a sender
/// sample around that estimate with precision `beta(i / n) - beta(t)` and
/// fuses it into the belief. After the last step `finish` returns the
/// predictor's estimate at `t = 1`.
pub struct Generation<'a, P> {
    sampler: &'a Sampler<P>,
    belief: BeliefState,
    step: usize,
}

impl<P: Predictor> Generation<'_, P> {
    pub fn belief(&self) -> &BeliefState {
        &self.belief
    }

    /// Index of the next step, `n_timesteps + 1` once all steps are done.
    pub fn current_step(&self) -> usize {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step > self.sampler.settings.n_timesteps
    }

    /// Perform the next transition, or return `None` if all steps are done.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Option<StepInfo>> {
        if self.is_finished() {
            return Ok(None);
        }
        let n = self.sampler.settings.n_timesteps as f64;
        let step = self.step;
        let t = (step - 1) as f64 / n;
        let alpha = self.sampler.schedule.alpha(t, step as f64 / n);

        let estimate = checked_predict(
            &self.sampler.predictor,
            self.belief.mu(),
            ProcessTime::Shared(t),
            Some(step),
            self.sampler.settings.x_range,
        )?;
        let y = SenderDistribution::uniform(estimate.view(), alpha)?.sample(rng);
        self.belief.update_uniform(y.view(), alpha)?;
        self.step += 1;

        let rho = self.belief.rho().get(0).copied().unwrap_or(1.);
        log::trace!("Step {}: t = {}, alpha = {}, rho = {}", step, t, alpha, rho);
        Ok(Some(StepInfo {
            step,
            t,
            alpha,
            rho,
            estimate,
        }))
    }

    /// The predictor's estimate of the data given the final belief.
    pub fn finish(self) -> Result<Array2<f64>> {
        let n_timesteps = self.sampler.settings.n_timesteps;
        if !self.is_finished() {
            return Err(BfnError::GenerationIncomplete {
                step: self.step,
                n_timesteps,
            });
        }
        checked_predict(
            &self.sampler.predictor,
            self.belief.mu(),
            ProcessTime::Shared(1.),
            Some(n_timesteps + 1),
            self.sampler.settings.x_range,
        )
    }
}
