use std::ops::{Deref, DerefMut};

use crate::{
    error::{check_shape, BfnError, Result},
    math::lerp,
    settings::AveragerSettings,
};

/// A model with a flat vector of trainable parameters.
pub trait Parameterized {
    fn parameters(&self) -> &[f64];
    fn parameters_mut(&mut self) -> &mut [f64];
}

/// Exponential moving average of model parameters.
///
/// After every optimizer step call `update`, which performs
/// `shadow = decay * shadow + (1 - decay) * live`. The shadow copy can be
/// swapped into the model for evaluation and sampling with `swap_in`.
#[derive(Debug, Clone)]
pub struct ParameterAverager {
    settings: AveragerSettings,
    shadow: Option<Box<[f64]>>,
    num_updates: u64,
}

impl ParameterAverager {
    pub fn new(settings: AveragerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            shadow: None,
            num_updates: 0,
        })
    }

    /// Initialize the shadow copy with the live parameters.
    pub fn register<M: Parameterized + ?Sized>(&mut self, model: &M) {
        self.shadow = Some(model.parameters().into());
        self.num_updates = 0;
    }

    /// Decay used by the next update.
    pub fn decay(&self) -> f64 {
        if self.settings.warmup {
            let k = self.num_updates as f64;
            self.settings.decay.min((1. + k) / (10. + k))
        } else {
            self.settings.decay
        }
    }

    pub fn update<M: Parameterized + ?Sized>(&mut self, model: &M) -> Result<()> {
        let decay = self.decay();
        let Some(shadow) = self.shadow.as_mut() else {
            log::warn!("Parameter averager updated before register");
            return Err(BfnError::NotRegistered);
        };
        let live = model.parameters();
        check_shape("averaged parameters", &[shadow.len()], &[live.len()])?;
        lerp(shadow, live, 1. - decay);
        self.num_updates += 1;
        Ok(())
    }

    pub fn shadow(&self) -> Option<&[f64]> {
        self.shadow.as_deref()
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    /// Overwrite the model parameters with the shadow copy.
    pub fn copy_to<M: Parameterized + ?Sized>(&self, model: &mut M) -> Result<()> {
        let shadow = self.shadow.as_deref().ok_or(BfnError::NotRegistered)?;
        let live = model.parameters_mut();
        check_shape("averaged parameters", &[shadow.len()], &[live.len()])?;
        live.copy_from_slice(shadow);
        Ok(())
    }

    /// Temporarily replace the model parameters by the shadow copy.
    ///
    /// The live parameters come back when the returned guard is dropped. The
    /// number of parameters must not change while the guard is held,
    /// otherwise the live parameters are not restored and a warning is
    /// logged.
    pub fn swap_in<'m, M: Parameterized + ?Sized>(
        &self,
        model: &'m mut M,
    ) -> Result<Averaged<'m, M>> {
        let live: Box<[f64]> = model.parameters().into();
        self.copy_to(model)?;
        Ok(Averaged { model, live })
    }
}

/// A model that currently holds averaged parameters.
pub struct Averaged<'m, M: Parameterized + ?Sized> {
    model: &'m mut M,
    live: Box<[f64]>,
}

impl<M: Parameterized + ?Sized> Averaged<'_, M> {
    /// The parameters that will be restored.
    pub fn live_parameters(&self) -> &[f64] {
        &self.live
    }
}

impl<M: Parameterized + ?Sized> Deref for Averaged<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &*self.model
    }
}

impl<M: Parameterized + ?Sized> DerefMut for Averaged<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut *self.model
    }
}

impl<M: Parameterized + ?Sized> Drop for Averaged<'_, M> {
    fn drop(&mut self) {
        let params = self.model.parameters_mut();
        if params.len() != self.live.len() {
            log::warn!(
                "Model has {} parameters instead of {}, live parameters not restored",
                params.len(),
                self.live.len()
            );
            return;
        }
        params.copy_from_slice(&self.live);
    }
}
