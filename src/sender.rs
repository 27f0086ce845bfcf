use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    error::{check_shape, BfnError, Result},
    math::{scale_shift_row, squared_distance_row},
};

/// Gaussian `N(center, 1 / alpha)` with one precision per row.
///
/// During training `center` is the data, during sampling it is the
/// predictor's estimate of the data.
#[derive(Debug, Clone)]
pub struct SenderDistribution<'a> {
    center: ArrayView2<'a, f64>,
    alpha: Array1<f64>,
}

impl<'a> SenderDistribution<'a> {
    pub fn new(center: ArrayView2<'a, f64>, alpha: Array1<f64>) -> Result<Self> {
        check_shape("sender precision", &[center.nrows()], alpha.shape())?;
        if let Some(&bad) = alpha.iter().find(|&&alpha| !(alpha >= 0.)) {
            return Err(BfnError::InvalidPrecision(bad));
        }
        Ok(Self { center, alpha })
    }

    pub fn uniform(center: ArrayView2<'a, f64>, alpha: f64) -> Result<Self> {
        Self::new(center, Array1::from_elem(center.nrows(), alpha))
    }

    pub fn center(&self) -> ArrayView2<'a, f64> {
        self.center
    }

    pub fn alpha(&self) -> ArrayView1<f64> {
        self.alpha.view()
    }

    /// Draw `y = center + eps / sqrt(alpha)`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array2<f64> {
        let mut y: Array2<f64> =
            Array2::from_shape_simple_fn(self.center.raw_dim(), || rng.sample(StandardNormal));
        Zip::from(y.rows_mut())
            .and(self.center.rows())
            .and(&self.alpha)
            .for_each(|y, center, &alpha| {
                scale_shift_row(y, center, alpha.sqrt().recip());
            });
        y
    }
}

/// The receiver: the sender distribution with the data replaced by the
/// predictor's estimate.
#[derive(Debug, Clone)]
pub struct ReceiverDistribution<'a> {
    prediction: ArrayView2<'a, f64>,
    alpha: Array1<f64>,
}

impl<'a> ReceiverDistribution<'a> {
    /// A receiver with the same precision as `sender`.
    pub fn matching(sender: &SenderDistribution, prediction: ArrayView2<'a, f64>) -> Result<Self> {
        check_shape("receiver", sender.center.shape(), prediction.shape())?;
        Ok(Self {
            prediction,
            alpha: sender.alpha.clone(),
        })
    }

    pub fn prediction(&self) -> ArrayView2<'a, f64> {
        self.prediction
    }

    pub fn alpha(&self) -> ArrayView1<f64> {
        self.alpha.view()
    }

    /// `KL(sender || receiver) = alpha / 2 * ||center - prediction||^2` per
    /// row. This is the per step loss of the discrete time objective.
    pub fn kl_from(&self, sender: &SenderDistribution) -> Result<Array1<f64>> {
        check_shape("receiver", sender.center.shape(), self.prediction.shape())?;
        check_shape("receiver precision", sender.alpha.shape(), self.alpha.shape())?;
        let mut kl = Array1::zeros(self.alpha.len());
        Zip::from(&mut kl)
            .and(sender.center.rows())
            .and(self.prediction.rows())
            .and(&self.alpha)
            .for_each(|kl, x, x_hat, &alpha| {
                *kl = alpha / 2. * squared_distance_row(x, x_hat);
            });
        Ok(kl)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array2<f64>> {
        Ok(SenderDistribution::new(self.prediction, self.alpha.clone())?.sample(rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{array, Axis};
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn sample_moments() {
        let center = Array2::from_elem((10_000, 2), 1.5);
        let sender = SenderDistribution::uniform(center.view(), 4.).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let y = sender.sample(&mut rng);
        assert_eq!(y.shape(), &[10_000, 2]);

        let mean = y.mean_axis(Axis(0)).unwrap();
        let var = y.var_axis(Axis(0), 1.);
        for dim in 0..2 {
            assert_abs_diff_eq!(mean[dim], 1.5, epsilon = 0.02);
            assert_relative_eq!(var[dim], 0.25, max_relative = 0.05);
        }
    }

    #[test]
    fn deterministic_given_seed() {
        let center = array![[0., 1.], [2., 3.]];
        let sender = SenderDistribution::new(center.view(), array![1., 100.]).unwrap();
        let a = sender.sample(&mut StdRng::seed_from_u64(7));
        let b = sender.sample(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn kl_closed_form() {
        let x = array![[1., -1.], [0., 0.]];
        let x_hat = array![[0., 0.], [0., 2.]];
        let sender = SenderDistribution::new(x.view(), array![2., 0.5]).unwrap();
        let receiver = ReceiverDistribution::matching(&sender, x_hat.view()).unwrap();
        let kl = receiver.kl_from(&sender).unwrap();
        assert_eq!(kl, array![2., 1.]);

        let wrong = array![[0., 0.]];
        assert!(ReceiverDistribution::matching(&sender, wrong.view()).is_err());
    }

    #[test]
    fn receiver_sample_moments() {
        let x = Array2::zeros((20_000, 2));
        let x_hat = Array2::from_elem((20_000, 2), -0.75);
        let sender = SenderDistribution::uniform(x.view(), 16.).unwrap();
        let receiver = ReceiverDistribution::matching(&sender, x_hat.view()).unwrap();

        let y = receiver.sample(&mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(y.shape(), &[20_000, 2]);
        let mean = y.mean_axis(Axis(0)).unwrap();
        let var = y.var_axis(Axis(0), 1.);
        for dim in 0..2 {
            assert_abs_diff_eq!(mean[dim], -0.75, epsilon = 0.01);
            assert_relative_eq!(var[dim], 1. / 16., max_relative = 0.05);
        }

        let again = receiver.sample(&mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(y, again);
    }

    #[test]
    fn rejects_negative_precision() {
        let x = array![[1.]];
        assert!(matches!(
            SenderDistribution::uniform(x.view(), -1.),
            Err(BfnError::InvalidPrecision(_))
        ));
    }
}
