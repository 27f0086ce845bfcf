use std::fmt::Debug;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::{
    error::{check_shape, BfnError},
    schedule::AccuracySchedule,
    settings::BfnSettings,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Process time handed to a predictor.
///
/// Sampling evaluates the whole batch at one time, training draws a separate
/// time for every row.
#[derive(Debug, Clone, Copy)]
pub enum ProcessTime<'a> {
    Shared(f64),
    PerSample(ArrayView1<'a, f64>),
}

impl ProcessTime<'_> {
    /// Time of row `row` of the batch.
    pub fn get(&self, row: usize) -> f64 {
        match self {
            ProcessTime::Shared(t) => *t,
            ProcessTime::PerSample(t) => t[row],
        }
    }

    pub fn to_array(&self, n_samples: usize) -> Array1<f64> {
        match self {
            ProcessTime::Shared(t) => Array1::from_elem(n_samples, *t),
            ProcessTime::PerSample(t) => t.to_owned(),
        }
    }

    fn check_len(&self, n_samples: usize) -> Result<(), BfnError> {
        if let ProcessTime::PerSample(t) = self {
            check_shape("process time", &[n_samples], t.shape())?;
        }
        Ok(())
    }
}

/// Maps the mean of a belief state to an estimate of the data.
///
/// Implementations must be deterministic for fixed parameters and must
/// return an array with the same shape as `mu`.
pub trait Predictor {
    type Err: Into<BoxError> + Debug;

    /// Number of data dimensions (the number of columns of `mu`).
    fn dim(&self) -> usize;

    fn predict(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
    ) -> Result<Array2<f64>, Self::Err>;
}

impl<P: Predictor + ?Sized> Predictor for &P {
    type Err = P::Err;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn predict(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
    ) -> Result<Array2<f64>, Self::Err> {
        (**self).predict(mu, t)
    }
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    type Err = P::Err;

    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn predict(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
    ) -> Result<Array2<f64>, Self::Err> {
        (**self).predict(mu, t)
    }
}

/// A predictor defined by a closure.
pub struct FnPredictor<F> {
    dim: usize,
    func: F,
}

impl<F> FnPredictor<F>
where
    F: Fn(ArrayView2<f64>, ProcessTime) -> anyhow::Result<Array2<f64>>,
{
    pub fn new(dim: usize, func: F) -> Self {
        Self { dim, func }
    }
}

impl<F> Predictor for FnPredictor<F>
where
    F: Fn(ArrayView2<f64>, ProcessTime) -> anyhow::Result<Array2<f64>>,
{
    type Err = anyhow::Error;

    fn dim(&self) -> usize {
        self.dim
    }

    fn predict(&self, mu: ArrayView2<f64>, t: ProcessTime) -> anyhow::Result<Array2<f64>> {
        (self.func)(mu, t)
    }
}

/// Evaluate the predictor and check the result before the core uses it.
pub(crate) fn checked_predict<P: Predictor + ?Sized>(
    predictor: &P,
    mu: ArrayView2<f64>,
    t: ProcessTime,
    step: Option<usize>,
    x_range: Option<(f64, f64)>,
) -> Result<Array2<f64>, BfnError> {
    let mut x_hat = predictor
        .predict(mu, t)
        .map_err(|err| BfnError::Predictor {
            step,
            source: err.into(),
        })?;
    check_shape("predictor output", mu.shape(), x_hat.shape())?;

    let bad_row = x_hat
        .axis_iter(Axis(0))
        .position(|row| row.iter().any(|val| !val.is_finite()));
    if let Some(row) = bad_row {
        let t = t.get(row);
        log::warn!("Non-finite prediction at step {:?}, row {}, t = {}", step, row, t);
        return Err(BfnError::NonFinitePrediction { step, row, t });
    }

    if let Some((min, max)) = x_range {
        x_hat.mapv_inplace(|val| val.clamp(min, max));
    }
    Ok(x_hat)
}

/// Turn a network that predicts the sender noise into a data predictor.
///
/// Under the Bayesian flow `mu = gamma x + sqrt(gamma (1 - gamma)) eps`, so a
/// noise estimate `eps_hat` gives
/// `x_hat = mu / gamma - sqrt((1 - gamma) / gamma) eps_hat`. For `t < t_min`
/// gamma is too close to zero and the estimate is zero instead.
///
/// The estimate is not clamped here: the loss engine and the sampler clamp
/// every estimate to `BfnSettings::x_range`.
pub struct NoisePrediction<P> {
    inner: P,
    schedule: AccuracySchedule,
    t_min: f64,
}

impl<P: Predictor> NoisePrediction<P> {
    pub fn new(inner: P, settings: &BfnSettings) -> Result<Self, BfnError> {
        let schedule = settings.validate()?;
        Ok(Self {
            inner,
            schedule,
            t_min: settings.t_min,
        })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Predictor> Predictor for NoisePrediction<P> {
    type Err = BoxError;

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn predict(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
    ) -> Result<Array2<f64>, BoxError> {
        t.check_len(mu.nrows())?;
        let mut x_hat = self
            .inner
            .predict(mu, t)
            .map_err(Into::<BoxError>::into)?;
        check_shape("noise prediction", mu.shape(), x_hat.shape())?;

        let times = t.to_array(mu.nrows());
        Zip::from(x_hat.rows_mut())
            .and(mu.rows())
            .and(&times)
            .for_each(|mut x_hat, mu, &t| {
                if t < self.t_min {
                    x_hat.fill(0.);
                    return;
                }
                let gamma = self.schedule.gamma(t);
                let noise_scale = ((1. - gamma) / gamma).sqrt();
                Zip::from(&mut x_hat).and(&mu).for_each(|x, &mu| {
                    *x = mu / gamma - noise_scale * *x;
                });
            });
        Ok(x_hat)
    }
}

/// A network that can optionally be conditioned on side information.
pub trait ConditionalPredictor {
    type Err: Into<BoxError> + Debug;

    fn dim(&self) -> usize;

    /// `cond == None` evaluates the network with the null conditioning.
    fn predict_conditional(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
        cond: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, Self::Err>;
}

/// Classifier-free guidance around a conditional network.
///
/// The conditional estimate is pushed away from the unconditional one by
/// `cond_scale`. With `rescaled_phi > 0` the guided estimate is rescaled to
/// the per sample standard deviation of the conditional estimate and mixed
/// with the unrescaled one.
pub struct Guided<P> {
    inner: P,
    cond: Array2<f64>,
    cond_scale: f64,
    rescaled_phi: f64,
}

impl<P: ConditionalPredictor> Guided<P> {
    pub fn new(
        inner: P,
        cond: Array2<f64>,
        cond_scale: f64,
        rescaled_phi: f64,
    ) -> Result<Self, BfnError> {
        if !cond_scale.is_finite() {
            return Err(BfnError::InvalidGuidance {
                name: "cond_scale",
                value: cond_scale,
            });
        }
        if !(0. ..=1.).contains(&rescaled_phi) {
            return Err(BfnError::InvalidGuidance {
                name: "rescaled_phi",
                value: rescaled_phi,
            });
        }
        Ok(Self {
            inner,
            cond,
            cond_scale,
            rescaled_phi,
        })
    }

    pub fn cond(&self) -> ArrayView2<f64> {
        self.cond.view()
    }
}

impl<P: ConditionalPredictor> Predictor for Guided<P> {
    type Err = BoxError;

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn predict(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
    ) -> Result<Array2<f64>, BoxError> {
        check_shape(
            "guidance conditioning rows",
            &[mu.nrows()],
            &[self.cond.nrows()],
        )?;
        let cond = self
            .inner
            .predict_conditional(mu, t, Some(self.cond.view()))
            .map_err(Into::<BoxError>::into)?;
        if self.cond_scale == 1. {
            return Ok(cond);
        }
        let null = self
            .inner
            .predict_conditional(mu, t, None)
            .map_err(Into::<BoxError>::into)?;
        check_shape("unconditional prediction", cond.shape(), null.shape())?;

        let mut scaled = &null + &((&cond - &null) * self.cond_scale);
        if self.rescaled_phi == 0. {
            return Ok(scaled);
        }

        let phi = self.rescaled_phi;
        Zip::from(scaled.rows_mut())
            .and(cond.rows())
            .for_each(|mut scaled, cond| {
                let std_scaled = scaled.std(1.);
                let ratio = cond.std(1.) / std_scaled;
                let ratio = if ratio.is_finite() { ratio } else { 1. };
                scaled.mapv_inplace(|val| val * ratio * phi + val * (1. - phi));
            });
        Ok(scaled)
    }
}
