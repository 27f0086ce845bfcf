use ndarray::{Array1, ArrayView2, Zip};
use rand::Rng;

use crate::{
    belief::BeliefState,
    error::{check_shape, Result},
    math::squared_distance_row,
    predictor::{checked_predict, Predictor, ProcessTime},
    schedule::AccuracySchedule,
    sender::{ReceiverDistribution, SenderDistribution},
    settings::{check_count, BfnSettings},
};

/// Training objectives of a continuous BFN.
///
/// Both losses return one value per row of the data batch so that the
/// caller decides how to reduce them. The squared error of a row is summed
/// over its dimensions.
#[derive(Debug)]
pub struct LossEngine<P> {
    predictor: P,
    settings: BfnSettings,
    schedule: AccuracySchedule,
}

impl<P: Predictor> LossEngine<P> {
    pub fn new(predictor: P, settings: BfnSettings) -> Result<Self> {
        let schedule = settings.validate()?;
        check_count("predictor dimension", predictor.dim())?;
        log::debug!(
            "Loss engine with sigma_1 = {}, n_loss_steps = {:?}, dim = {}",
            settings.sigma_1,
            settings.n_loss_steps,
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

    /// Access the predictor between loss evaluations, for example to apply
    /// an optimizer step.
    pub fn predictor_mut(&mut self) -> &mut P {
        &mut self.predictor
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

    /// Continuous time loss `-ln(sigma_1) sigma_1^(-2t) ||x - x_hat||^2` with
    /// `t ~ U(0, 1)` drawn independently for every row.
    pub fn loss<R: Rng + ?Sized>(&self, x: ArrayView2<f64>, rng: &mut R) -> Result<Array1<f64>> {
        self.check_data(x)?;
        let t: Array1<f64> = Array1::from_shape_simple_fn(x.nrows(), || rng.random());

        let belief = BeliefState::flow(x, &self.schedule, t.view(), rng)?;
        let x_hat = checked_predict(
            &self.predictor,
            belief.mu(),
            ProcessTime::PerSample(t.view()),
            None,
            self.settings.x_range,
        )?;

        let mut loss = Array1::zeros(x.nrows());
        Zip::from(&mut loss)
            .and(x.rows())
            .and(x_hat.rows())
            .and(&t)
            .for_each(|loss, x, x_hat, &t| {
                *loss = self.schedule.loss_weight(t) * squared_distance_row(x, x_hat);
            });
        Ok(loss)
    }

    /// Discrete time loss with `n` steps.
    ///
    /// Every row draws a step `i ~ U{1..n}`, builds the belief at
    /// `t = (i - 1) / n` and pays `n` times the KL divergence between the
    /// sender and the receiver of step `i`, which is
    /// `n * alpha_i / 2 * ||x - x_hat||^2`.
    pub fn discrete_loss<R: Rng + ?Sized>(
        &self,
        x: ArrayView2<f64>,
        n: usize,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        check_count("n", n)?;
        self.check_data(x)?;
        let n_f = n as f64;
        let steps: Array1<usize> =
            Array1::from_shape_simple_fn(x.nrows(), || rng.random_range(1..=n));
        let t = steps.mapv(|i| (i - 1) as f64 / n_f);
        let alpha = steps.mapv(|i| self.schedule.alpha((i - 1) as f64 / n_f, i as f64 / n_f));

        let belief = BeliefState::flow(x, &self.schedule, t.view(), rng)?;
        let x_hat = checked_predict(
            &self.predictor,
            belief.mu(),
            ProcessTime::PerSample(t.view()),
            None,
            self.settings.x_range,
        )?;

        let sender = SenderDistribution::new(x, alpha)?;
        let receiver = ReceiverDistribution::matching(&sender, x_hat.view())?;
        Ok(receiver.kl_from(&sender)? * n_f)
    }

    /// The loss selected by `BfnSettings::n_loss_steps`.
    pub fn loss_with<R: Rng + ?Sized>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        match self.settings.n_loss_steps {
            Some(n) => self.discrete_loss(x, n, rng),
            None => self.loss(x, rng),
        }
    }

    /// Batch mean of `loss_with`.
    pub fn mean_loss<R: Rng + ?Sized>(&self, x: ArrayView2<f64>, rng: &mut R) -> Result<f64> {
        let loss = self.loss_with(x, rng)?;
        Ok(loss.mean().unwrap_or(0.))
    }

    fn check_data(&self, x: ArrayView2<f64>) -> Result<()> {
        check_shape("data", &[x.nrows(), self.predictor.dim()], x.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::BfnError,
        predictor::{
            test_predictors::{Constant, Identity},
            FnPredictor,
        },
    };
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{array, Array2};
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn settings(sigma_1: f64) -> BfnSettings {
        BfnSettings {
            sigma_1,
            ..Default::default()
        }
    }

    #[test]
    fn returns_one_value_per_row() {
        let engine = LossEngine::new(Identity { dim: 2 }, settings(0.01)).unwrap();
        let x = Array2::from_shape_fn((5, 2), |(i, j)| i as f64 - j as f64);
        let mut rng = StdRng::seed_from_u64(0);
        let loss = engine.loss(x.view(), &mut rng).unwrap();
        assert_eq!(loss.len(), 5);
        assert!(loss.iter().all(|v| v.is_finite() && *v >= 0.));

        let loss = engine.discrete_loss(x.view(), 20, &mut rng).unwrap();
        assert_eq!(loss.len(), 5);
        assert!(loss.iter().all(|v| v.is_finite() && *v >= 0.));
    }

    #[test]
    fn perfect_prediction_has_zero_loss() {
        let x = array![[0.5, -0.5], [0.5, -0.5]];
        let engine = LossEngine::new(Constant { value: vec![0.5, -0.5] }, settings(0.01)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(engine.loss(x.view(), &mut rng).unwrap(), array![0., 0.]);
        assert_eq!(
            engine.discrete_loss(x.view(), 7, &mut rng).unwrap(),
            array![0., 0.]
        );
    }

    #[test]
    fn continuous_loss_weight() {
        // The squared error of a constant zero prediction is known, so the
        // loss reveals the drawn time through its weight.
        let sigma_1: f64 = 0.1;
        let engine = LossEngine::new(Constant { value: vec![0.] }, settings(sigma_1)).unwrap();
        let x = Array2::from_elem((200, 1), 2.);
        let mut rng = StdRng::seed_from_u64(5);
        let loss = engine.loss(x.view(), &mut rng).unwrap();
        let lo = -sigma_1.ln() * 4.;
        let hi = lo * sigma_1.powi(-2);
        assert!(loss.iter().all(|&l| l >= lo && l <= hi));
    }

    #[test]
    fn discrete_loss_values() {
        // With a constant prediction each row costs n * alpha_i / 2 * ||x||^2
        // for some step i.
        let sigma_1 = 0.2;
        let n = 4;
        let engine = LossEngine::new(Constant { value: vec![0., 0.] }, settings(sigma_1)).unwrap();
        let schedule = *engine.schedule();
        let allowed: Vec<f64> = (1..=n)
            .map(|i| {
                let alpha = schedule.alpha((i - 1) as f64 / n as f64, i as f64 / n as f64);
                n as f64 * alpha / 2. * 2.
            })
            .collect();

        let x = Array2::from_elem((50, 2), 1.);
        let mut rng = StdRng::seed_from_u64(11);
        let loss = engine.discrete_loss(x.view(), n, &mut rng).unwrap();
        for value in loss.iter() {
            assert!(allowed
                .iter()
                .any(|allowed| (allowed - value).abs() < 1e-9 * allowed));
        }
        assert_relative_eq!(
            allowed.iter().sum::<f64>() / n as f64,
            schedule.beta(1.),
            max_relative = 1e-12
        );
    }

    #[test]
    fn contract_violations() {
        let engine = LossEngine::new(Identity { dim: 2 }, settings(0.01)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let x = Array2::zeros((3, 3));
        assert!(matches!(
            engine.loss(x.view(), &mut rng),
            Err(BfnError::ShapeMismatch { .. })
        ));
        let x = Array2::zeros((3, 2));
        assert!(matches!(
            engine.discrete_loss(x.view(), 0, &mut rng),
            Err(BfnError::InvalidCount { name: "n", .. })
        ));

        assert!(LossEngine::new(Identity { dim: 2 }, settings(1.)).is_err());
        assert!(LossEngine::new(Identity { dim: 0 }, settings(0.1)).is_err());

        let nan = FnPredictor::new(2, |mu, _t| Ok(mu.mapv(|_| f64::NAN)));
        let engine = LossEngine::new(nan, settings(0.01)).unwrap();
        assert!(matches!(
            engine.loss(x.view(), &mut rng),
            Err(BfnError::NonFinitePrediction { step: None, row: 0, .. })
        ));
    }

    #[test]
    fn loss_with_follows_settings() {
        let x = Array2::from_elem((64, 2), 1.);
        let continuous = LossEngine::new(Identity { dim: 2 }, settings(0.05)).unwrap();
        let discrete = LossEngine::new(
            Identity { dim: 2 },
            BfnSettings {
                n_loss_steps: Some(10),
                ..settings(0.05)
            },
        )
        .unwrap();

        let a = continuous
            .loss_with(x.view(), &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = continuous.loss(x.view(), &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);

        let a = discrete
            .loss_with(x.view(), &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = discrete
            .discrete_loss(x.view(), 10, &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);

        let mean = discrete
            .mean_loss(x.view(), &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_abs_diff_eq!(mean, b.mean().unwrap(), epsilon = 1e-12);
    }
}
