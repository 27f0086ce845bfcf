//! Classifier-free guidance on the two point dataset.
//!
//! The conditional network knows which of the two points a sample should
//! become, the unconditional one only knows the posterior mean.

use std::convert::Infallible;

use anyhow::Result;
use bfn_rs::{
    AccuracySchedule, BfnSettings, ConditionalPredictor, Guided, ProcessTime, Sampler,
};
use ndarray::{array, Array1, Array2, ArrayView2, Axis};

struct TwoPoint {
    point: Array1<f64>,
    schedule: AccuracySchedule,
}

impl ConditionalPredictor for TwoPoint {
    type Err = Infallible;

    fn dim(&self) -> usize {
        self.point.len()
    }

    fn predict_conditional(
        &self,
        mu: ArrayView2<f64>,
        t: ProcessTime,
        cond: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, Infallible> {
        let weights: Vec<f64> = match cond {
            Some(label) => label.column(0).to_vec(),
            None => mu
                .axis_iter(Axis(0))
                .enumerate()
                .map(|(row, mu)| {
                    let gamma = self.schedule.gamma(t.get(row));
                    (mu.dot(&self.point) / (1. - gamma)).tanh()
                })
                .collect(),
        };
        Ok(Array2::from_shape_fn(mu.raw_dim(), |(i, j)| {
            weights[i] * self.point[j]
        }))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let settings = BfnSettings {
        sigma_1: 0.01,
        n_timesteps: 20,
        x_range: Some((-1.5, 1.5)),
        seed: 7,
        ..Default::default()
    };
    let n_samples = 6;
    let labels = Array2::from_shape_fn((n_samples, 1), |(i, _)| if i < 3 { 1. } else { -1. });

    for (stream, cond_scale) in [(0, 1.), (1, 3.)] {
        let network = TwoPoint {
            point: array![1., -1.],
            schedule: settings.validate()?,
        };
        let guided = Guided::new(network, labels.clone(), cond_scale, 0.7)?;
        let sampler = Sampler::new(guided, settings)?;
        let (samples, trace) = sampler.sample_with_trace(n_samples, &mut settings.rng_for(stream))?;

        println!("cond_scale = {cond_scale}");
        for (label, sample) in labels.column(0).iter().zip(samples.axis_iter(Axis(0))) {
            println!("  label {label:+}: {sample:.3}");
        }
        if let Some(last) = trace.steps.last() {
            println!("  final precision {:.1}", last.rho);
        }
    }
    Ok(())
}
