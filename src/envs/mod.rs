mod arm;
mod wrappers;
#[cfg(feature = "gym")]
mod gym;

use {
    anyhow::Result,
    std::path::Path,
};

pub use crate::envs::{
    arm::{
        ArmEnv,
        ArmEnvConfig,
        ObservationMode,
    },
    wrappers::{
        FrameStack,
        VecNormalize,
    },
};
#[cfg(feature = "gym")]
pub use crate::envs::gym::GymEnv;


/// The outcome of a single environment step.
#[derive(Debug, Clone)]
pub struct Step {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}
impl Step {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// An environment with flat `f64` observations and actions.
///
/// Observations are flattened row-major according to `observation_space`;
/// image observations are channel-first `(C, H, W)`.
pub trait Environment {
    fn reset(
        &mut self,
        seed: u64,
    ) -> Result<Vec<f64>>;
    fn step(
        &mut self,
        action: &[f64],
    ) -> Result<Step>;
    fn action_space(&self) -> Vec<usize>;
    /// The upper bound of every action dimension; the lower bound is its negation.
    fn action_high(&self) -> Vec<f64>;
    fn observation_space(&self) -> Vec<usize>;
    fn is_discrete(&self) -> bool {
        false
    }
    /// Persist whatever state the environment wants to keep across runs.
    ///
    /// Returns `false` when the environment has nothing to save.
    fn write_state(
        &self,
        _path: &Path,
    ) -> Result<bool> {
        Ok(false)
    }
    /// Persist observation normalization statistics into `dir`.
    ///
    /// Returns `false` when the environment does not normalize.
    fn write_running_average(
        &self,
        _dir: &Path,
    ) -> Result<bool> {
        Ok(false)
    }
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f64>> {
        (**self).reset(seed)
    }
    fn step(&mut self, action: &[f64]) -> Result<Step> {
        (**self).step(action)
    }
    fn action_space(&self) -> Vec<usize> {
        (**self).action_space()
    }
    fn action_high(&self) -> Vec<f64> {
        (**self).action_high()
    }
    fn observation_space(&self) -> Vec<usize> {
        (**self).observation_space()
    }
    fn is_discrete(&self) -> bool {
        (**self).is_discrete()
    }
    fn write_state(&self, path: &Path) -> Result<bool> {
        (**self).write_state(path)
    }
    fn write_running_average(&self, dir: &Path) -> Result<bool> {
        (**self).write_running_average(dir)
    }
}
