use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    error::{BfnError, Result},
    schedule::AccuracySchedule,
};

/// Settings shared by the losses and the sampler
#[derive(Debug, Clone, Copy)]
pub struct BfnSettings {
    /// Standard deviation of the final belief about the data. Must be in (0, 1).
    pub sigma_1: f64,
    /// Number of steps of the discrete time loss. `None` selects the
    /// continuous time loss.
    pub n_loss_steps: Option<usize>,
    /// Number of belief updates during sampling.
    pub n_timesteps: usize,
    /// Below this process time a noise prediction is replaced by zero,
    /// because `gamma(t)` is too small to divide by.
    pub t_min: f64,
    /// Clamp every data estimate to this range.
    pub x_range: Option<(f64, f64)>,
    pub seed: u64,
}

impl Default for BfnSettings {
    fn default() -> Self {
        Self {
            sigma_1: 0.001,
            n_loss_steps: None,
            n_timesteps: 100,
            t_min: 1e-6,
            x_range: None,
            seed: 0,
        }
    }
}

impl BfnSettings {
    /// Check every setting, and return the accuracy schedule they define.
    pub fn validate(&self) -> Result<AccuracySchedule> {
        let schedule = AccuracySchedule::new(self.sigma_1)?;
        if let Some(0) = self.n_loss_steps {
            return Err(BfnError::InvalidCount {
                name: "n_loss_steps",
                value: 0,
            });
        }
        check_count("n_timesteps", self.n_timesteps)?;
        if !(0. ..1.).contains(&self.t_min) {
            return Err(BfnError::InvalidTime(self.t_min));
        }
        if let Some((min, max)) = self.x_range {
            if !(min < max) {
                return Err(BfnError::InvalidRange { min, max });
            }
        }
        Ok(schedule)
    }

    /// A reproducible random number generator for this configuration.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    /// An independent random stream, for example one per training epoch.
    pub fn rng_for(&self, stream: u64) -> ChaCha8Rng {
        let mut rng = self.rng();
        rng.set_stream(stream);
        rng
    }
}

/// Settings for the parameter averager
#[derive(Debug, Clone, Copy)]
pub struct AveragerSettings {
    /// Weight of the previous shadow value in each update.
    pub decay: f64,
    /// Use `min(decay, (1 + k) / (10 + k))` after `k` updates, so that the
    /// shadow copy forgets its initial value quickly early in training.
    pub warmup: bool,
}

impl Default for AveragerSettings {
    fn default() -> Self {
        Self {
            decay: 0.9999,
            warmup: false,
        }
    }
}

impl AveragerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.decay > 0. && self.decay < 1.) {
            return Err(BfnError::InvalidDecay(self.decay));
        }
        Ok(())
    }
}

pub(crate) fn check_count(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(BfnError::InvalidCount { name, value });
    }
    Ok(value)
}
