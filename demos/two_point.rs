//! Loss and sampling for a dataset with two points, `[1, -1]` and `[-1, 1]`.
//!
//! The predictor is the exact posterior mean of the data given the belief,
//! so the samples should land on the two points in equal proportion.

use std::convert::Infallible;

use anyhow::Result;
use bfn_rs::{AccuracySchedule, BfnSettings, LossEngine, Predictor, ProcessTime, Sampler};
use ndarray::{array, Array1, Array2, ArrayView2, Axis, Zip};

struct PosteriorMean {
    point: Array1<f64>,
    schedule: AccuracySchedule,
}

impl Predictor for PosteriorMean {
    type Err = Infallible;

    fn dim(&self) -> usize {
        self.point.len()
    }

    fn predict(&self, mu: ArrayView2<f64>, t: ProcessTime) -> Result<Array2<f64>, Infallible> {
        let mut x_hat = Array2::zeros(mu.raw_dim());
        for (row, (mut x_hat, mu)) in x_hat
            .axis_iter_mut(Axis(0))
            .zip(mu.axis_iter(Axis(0)))
            .enumerate()
        {
            let gamma = self.schedule.gamma(t.get(row));
            // mu ~ N(gamma x, gamma (1 - gamma)), and the log odds of the two
            // points are 2 mu.a / (1 - gamma)
            let weight = (mu.dot(&self.point) / (1. - gamma)).tanh();
            Zip::from(&mut x_hat)
                .and(&self.point)
                .for_each(|x_hat, &a| *x_hat = weight * a);
        }
        Ok(x_hat)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = BfnSettings {
        sigma_1: 0.01,
        n_timesteps: 10,
        seed: 42,
        ..Default::default()
    };
    let predictor = PosteriorMean {
        point: array![1., -1.],
        schedule: settings.validate()?,
    };

    let mut rng = settings.rng();
    let x = Array2::from_shape_fn((2000, 2), |(i, j)| {
        let sign = if i % 2 == 0 { 1. } else { -1. };
        if j == 0 {
            sign
        } else {
            -sign
        }
    });

    let engine = LossEngine::new(&predictor, settings)?;
    println!("continuous loss: {:.4}", engine.mean_loss(x.view(), &mut rng)?);
    for n in [10, 100, 1000] {
        let loss = engine.discrete_loss(x.view(), n, &mut rng)?;
        println!("discrete loss, n = {n}: {:.4}", loss.mean().unwrap_or(0.));
    }

    let sampler = Sampler::new(&predictor, settings)?;
    let samples = sampler.sample(1000, &mut rng)?;
    let positive = samples
        .axis_iter(Axis(0))
        .filter(|row| row[0] > 0.)
        .count();
    println!("samples near [1, -1]: {positive} of {}", samples.nrows());
    println!("first samples:\n{:.3}", samples.slice(ndarray::s![..5, ..]));
    Ok(())
}
