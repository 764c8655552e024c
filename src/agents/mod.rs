mod checkpoint;
mod ddpg;
mod networks;

pub use ddpg::DDPG;
pub use networks::{
    kinds_for,
    ActorKind,
    ActorNetwork,
    CriticKind,
    CriticNetwork,
    NetworkMeta,
};


use {
    crate::components::{
        Memory,
        Transition,
    },
    candle_core::Result,
    std::{
        collections::BTreeMap,
        fmt::Display,
        path::Path,
    },
};


/// The execution mode of an agent is either training or testing.
///
/// Only in training mode does the agent explore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Test,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Train => write!(f, "Train"),
            RunMode::Test => write!(f, "Test"),
        }
    }
}

pub trait Algorithm {
    type Config;

    fn config(&self) -> &Self::Config;

    /// The action for a single flattened observation, and the critic's value
    /// estimate for it.
    fn act(
        &mut self,
        observation: &[f64],
        mode: RunMode,
    ) -> Result<(Vec<f64>, f64)>;

    /// One gradient step on a sampled batch.
    ///
    /// Returns the `(critic_loss, actor_loss)`, or `None` without touching
    /// any parameters when there is not enough data to sample a batch.
    fn train(&mut self) -> Result<Option<(f64, f64)>>;

    /// Called at every episode boundary.
    fn reset(&mut self) -> Result<()>;

    /// Named scalar diagnostics.
    fn stats(&mut self) -> Result<BTreeMap<String, f64>>;
}

pub trait OffPolicyAlgorithm: Algorithm {
    fn store(
        &mut self,
        transition: Transition,
    );

    fn memory(&self) -> &Memory;

    /// Rescale the parameter noise.
    ///
    /// Returns the measured action distance, or `None` when there is no
    /// parameter noise or not enough data to measure it.
    fn adapt_param_noise(&mut self) -> Result<Option<f64>>;

    fn update_target_net(&mut self) -> Result<()>;
}

/// Algorithms that can write themselves to disk and read themselves back.
pub trait SaveableAlgorithm: Algorithm {
    fn save(
        &self,
        path: &Path,
    ) -> anyhow::Result<()>;

    fn restore(
        &mut self,
        path: &Path,
    ) -> anyhow::Result<()>;
}
