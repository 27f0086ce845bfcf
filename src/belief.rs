use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    error::{check_shape, BfnError, Result},
    math::{lerp_row, scale_shift_row},
    schedule::{check_time, AccuracySchedule},
};

/// Gaussian belief `N(mu, 1 / rho)` about a batch of data vectors.
///
/// Every row of `mu` is the mean for one sample, and `rho` holds that
/// sample's precision, shared by all of its dimensions. The only way to
/// change a belief is [`BeliefState::update`], so `rho` never decreases.
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefState {
    mu: Array2<f64>,
    rho: Array1<f64>,
}

impl BeliefState {
    /// The prior `N(0, 1)` for `n_samples` vectors of dimension `dim`.
    pub fn prior(n_samples: usize, dim: usize) -> Self {
        Self {
            mu: Array2::zeros((n_samples, dim)),
            rho: Array1::ones(n_samples),
        }
    }

    /// Sample the belief at time `t` given the data `x`.
    ///
    /// This is the prior updated with a single sender sample of precision
    /// `beta(t)`, so that `mu ~ N(gamma x, gamma (1 - gamma))` and
    /// `rho = 1 + beta(t)`.
    pub fn flow<R: Rng + ?Sized>(
        x: ArrayView2<f64>,
        schedule: &AccuracySchedule,
        t: ArrayView1<f64>,
        rng: &mut R,
    ) -> Result<Self> {
        check_shape("flow times", &[x.nrows()], t.shape())?;
        for &t in t.iter() {
            check_time(t)?;
        }

        let mut mu: Array2<f64> =
            Array2::from_shape_simple_fn(x.raw_dim(), || rng.sample(StandardNormal));
        Zip::from(mu.rows_mut())
            .and(x.rows())
            .and(&t)
            .for_each(|mu, x, &t| {
                let gamma = schedule.gamma(t);
                // mu currently holds the noise; scale it and shift by gamma * x
                let shift = &x * gamma;
                scale_shift_row(mu, shift.view(), (gamma * (1. - gamma)).sqrt());
            });
        let rho = t.mapv(|t| 1. + schedule.beta(t));
        Ok(Self { mu, rho })
    }

    pub fn mu(&self) -> ArrayView2<f64> {
        self.mu.view()
    }

    pub fn rho(&self) -> ArrayView1<f64> {
        self.rho.view()
    }

    pub fn n_samples(&self) -> usize {
        self.mu.nrows()
    }

    pub fn dim(&self) -> usize {
        self.mu.ncols()
    }

    /// Fuse an observation `y` of precision `alpha` (one value per row) into
    /// the belief.
    ///
    /// `rho' = rho + alpha` and `mu' = (rho mu + alpha y) / rho'`. A zero
    /// precision leaves the row untouched, an infinite one replaces the mean
    /// by `y`.
    pub fn update(&mut self, y: ArrayView2<f64>, alpha: ArrayView1<f64>) -> Result<()> {
        check_shape("observation", self.mu.shape(), y.shape())?;
        check_shape("observation precision", self.rho.shape(), alpha.shape())?;
        if let Some(&bad) = alpha.iter().find(|&&alpha| !(alpha >= 0.)) {
            return Err(BfnError::InvalidPrecision(bad));
        }

        Zip::from(self.mu.rows_mut())
            .and(&mut self.rho)
            .and(y.rows())
            .and(&alpha)
            .for_each(|mut mu, rho, y, &alpha| {
                if alpha.is_infinite() {
                    mu.assign(&y);
                } else {
                    lerp_row(mu, y, alpha / (*rho + alpha));
                }
                *rho += alpha;
            });
        Ok(())
    }

    /// Like `update`, with the same precision for every row.
    pub fn update_uniform(&mut self, y: ArrayView2<f64>, alpha: f64) -> Result<()> {
        let alpha = Array1::from_elem(self.n_samples(), alpha);
        self.update(y, alpha.view())
    }

    pub fn into_parts(self) -> (Array2<f64>, Array1<f64>) {
        (self.mu, self.rho)
    }
}
