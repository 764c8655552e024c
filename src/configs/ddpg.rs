use {
    crate::components::{
        ActionNoiseSpec,
        AdaptiveParamNoise,
    },
    serde::{
        Deserialize,
        Serialize,
    },
};


/// The hyperparameters of a [`DDPG`](crate::agents::DDPG) agent.
///
/// Fixed when the agent is constructed and written verbatim into every
/// checkpoint.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DDPG_Config {
    // The shapes of a single observation and a single action.
    pub observation_shape: Vec<usize>,
    pub action_shape: Vec<usize>,
    // Weight perturbation for exploration, if any.
    pub param_noise: Option<AdaptiveParamNoise>,
    // Action perturbation for exploration, if any.
    pub action_noise: Option<ActionNoiseSpec>,
    // The impact of the q value of the next state on the current state's q value.
    pub gamma: f64,
    // The weight for updating the target networks.
    pub tau: f64,
    // Whether to track running statistics of returns / observations and normalize with them.
    pub normalize_returns: bool,
    pub normalize_observations: bool,
    // The training batch size for each training iteration.
    pub batch_size: usize,
    // Clip ranges. `None` for the return range means unbounded.
    pub observation_range: (f64, f64),
    pub action_range: (f64, f64),
    pub return_range: Option<(f64, f64)>,
    // L2 regularization of the critic's hidden weights.
    pub critic_l2_reg: f64,
    // The learning rates for the Actor and Critic networks.
    pub actor_lr: f64,
    pub critic_lr: f64,
    // Global gradient norm to clip the actor gradients to.
    pub clip_norm: Option<f64>,
    // Multiplier for rewards before they are stored.
    pub reward_scale: f64,
}
impl DDPG_Config {
    /// Defaults for low-dimensional (already encoded) observations.
    pub fn mlp(
        observation_shape: &[usize],
        action_shape: &[usize],
    ) -> Self {
        Self {
            observation_shape: observation_shape.to_vec(),
            action_shape: action_shape.to_vec(),
            param_noise: None,
            action_noise: None,
            gamma: 0.99,
            tau: 0.01,
            normalize_returns: false,
            normalize_observations: false,
            batch_size: 64,
            observation_range: (-5.0, 5.0),
            action_range: (-1.0, 1.0),
            return_range: None,
            critic_l2_reg: 1e-2,
            actor_lr: 1e-4,
            critic_lr: 1e-3,
            clip_norm: None,
            reward_scale: 1.0,
        }
    }

    /// Defaults for raw pixel observations.
    pub fn cnn(
        observation_shape: &[usize],
        action_shape: &[usize],
    ) -> Self {
        Self {
            normalize_observations: true,
            batch_size: 16,
            ..Self::mlp(observation_shape, action_shape)
        }
    }

    pub fn with_noise(
        self,
        action_noise: Option<ActionNoiseSpec>,
        param_noise: Option<AdaptiveParamNoise>,
    ) -> Self {
        Self {
            action_noise,
            param_noise,
            ..self
        }
    }

    /// The number of action dimensions.
    pub fn nb_actions(&self) -> usize {
        self.action_shape.iter().product()
    }
}
