use crate::error::{BfnError, Result};

/// The accuracy schedule `beta(t) = sigma_1^(-2t) - 1` of a continuous BFN.
///
/// `beta(t)` is the total precision the belief has received about the data
/// by process time `t`. It starts at zero and ends at `sigma_1^(-2) - 1`, so a
/// smaller `sigma_1` means a sharper final belief.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracySchedule {
    sigma_1: f64,
    ln_sigma_1: f64,
}

impl AccuracySchedule {
    /// `sigma_1` must be in (0, 1) and large enough that the final
    /// precision `sigma_1^(-2)` and its rate are finite.
    pub fn new(sigma_1: f64) -> Result<Self> {
        if !(sigma_1.is_finite() && sigma_1 > 0. && sigma_1 < 1.) {
            return Err(BfnError::InvalidNoiseLevel(sigma_1));
        }
        let ln_sigma_1 = sigma_1.ln();
        let final_rate = -2. * ln_sigma_1 * (-2. * ln_sigma_1).exp();
        if !final_rate.is_finite() {
            return Err(BfnError::InvalidNoiseLevel(sigma_1));
        }
        Ok(Self {
            sigma_1,
            ln_sigma_1,
        })
    }

    pub fn sigma_1(&self) -> f64 {
        self.sigma_1
    }

    /// Cumulative precision gained by time `t`.
    pub fn beta(&self, t: f64) -> f64 {
        (-2. * t * self.ln_sigma_1).exp_m1()
    }

    /// Precision injected between `t0` and `t1`.
    pub fn alpha(&self, t0: f64, t1: f64) -> f64 {
        debug_assert!(t0 <= t1);
        self.beta(t1) - self.beta(t0)
    }

    /// Derivative of `beta`, `-2 ln(sigma_1) sigma_1^(-2t)`.
    pub fn beta_rate(&self, t: f64) -> f64 {
        -2. * self.ln_sigma_1 * (-2. * t * self.ln_sigma_1).exp()
    }

    /// Weight of the squared error in the continuous time loss.
    ///
    /// This is `beta_rate(t) / 2 = -ln(sigma_1) sigma_1^(-2t)`, the limit of
    /// `n * alpha_i / 2` for a discretization with `n` steps.
    pub fn loss_weight(&self, t: f64) -> f64 {
        -self.ln_sigma_1 * (-2. * t * self.ln_sigma_1).exp()
    }

    /// `gamma(t) = beta / (1 + beta) = 1 - sigma_1^(2t)`, the fraction of the
    /// belief mean that comes from the data under the Bayesian flow.
    pub fn gamma(&self, t: f64) -> f64 {
        -(2. * t * self.ln_sigma_1).exp_m1()
    }
}

pub(crate) fn check_time(t: f64) -> Result<f64> {
    if !(0. ..=1.).contains(&t) {
        return Err(BfnError::InvalidTime(t));
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn alpha_is_nonnegative(
            sigma_1 in 1e-4f64..0.999,
            a in 0f64..=1.,
            b in 0f64..=1.,
        ) {
            let schedule = AccuracySchedule::new(sigma_1).unwrap();
            let (t0, t1) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(schedule.alpha(t0, t1) >= 0.);
        }

        #[test]
        fn boundary_values(sigma_1 in 1e-4f64..0.999) {
            let schedule = AccuracySchedule::new(sigma_1).unwrap();
            prop_assert_eq!(schedule.beta(0.), 0.);
            let expected = sigma_1.powi(-2) - 1.;
            prop_assert!((schedule.beta(1.) - expected).abs() <= 1e-9 * expected.max(1.));
        }

        #[test]
        fn gamma_matches_beta(sigma_1 in 1e-3f64..0.99, t in 0f64..=1.) {
            let schedule = AccuracySchedule::new(sigma_1).unwrap();
            let beta = schedule.beta(t);
            prop_assert!((schedule.gamma(t) - beta / (1. + beta)).abs() < 1e-10);
        }
    }

    #[test]
    fn rejects_invalid_noise_levels() {
        for sigma_1 in [0., 1., 1.5, -0.1, f64::NAN, f64::INFINITY, 1e-200, 1e-154] {
            assert!(matches!(
                AccuracySchedule::new(sigma_1),
                Err(BfnError::InvalidNoiseLevel(_))
            ));
        }
    }

    #[test]
    fn tiny_noise_levels_stay_finite() {
        let schedule = AccuracySchedule::new(1e-150).unwrap();
        for t in [0., 0.5, 1.] {
            assert!(schedule.beta(t).is_finite());
            assert!(schedule.beta_rate(t).is_finite());
            assert!(schedule.loss_weight(t).is_finite());
        }
        assert!(schedule.alpha(0.9, 1.) > 0.);
    }

    #[test]
    fn rate_matches_finite_difference() {
        let schedule = AccuracySchedule::new(0.01).unwrap();
        let h = 1e-6;
        for t in [0.05, 0.3, 0.5, 0.9] {
            let numeric = schedule.alpha(t - h, t + h) / (2. * h);
            assert_relative_eq!(schedule.beta_rate(t), numeric, max_relative = 1e-6);
            assert_relative_eq!(
                schedule.loss_weight(t),
                schedule.beta_rate(t) / 2.,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn time_bounds() {
        assert_eq!(check_time(0.).unwrap(), 0.);
        assert_eq!(check_time(1.).unwrap(), 1.);
        assert!(check_time(1.0001).is_err());
        assert!(check_time(f64::NAN).is_err());
    }
}
