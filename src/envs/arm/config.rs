use {
    anyhow::{
        anyhow,
        Result,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    strum::Display,
};

/// What the [`ArmEnv`](super::ArmEnv) returns as its observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ObservationMode {
    /// A `1 x 64 x 64` raw grayscale render (values in `0..=255`).
    Pixels,
    /// The end effector position, relative to the button when the button moves.
    GroundTruth,
    /// The joint angles.
    Joints,
    /// The joint angles followed by the end effector position.
    JointsPosition,
}

/// The configuration struct for the [`ArmEnv`](super::ArmEnv) environment.
///
/// One value is built per training or replay run and handed to the
/// environment at construction; nothing about the environment is configured
/// through process-wide state.
///
/// # Fields
/// * `force_render` - Log an ASCII render of the scene after every step.
/// * `action_repeat` - How many simulation steps a single action is applied for.
/// * `shape_reward` - Reward `-distance` to the button instead of a sparse reward.
/// * `action_joints` - Actions move the joints rather than the end effector.
/// * `is_discrete` - Actions are a single index into a fixed set of moves.
/// * `button_random` - Place the button at a random position every episode.
/// * `observation` - See [`ObservationMode`].
/// * `max_steps` - The maximum number of steps before the episode is truncated.
///
/// # Example
/// ```
/// use arm_ddpg::envs::{
///     ArmEnvConfig,
///     ObservationMode,
/// };
///
/// let config = ArmEnvConfig::default();
/// assert_eq!(config.action_repeat, 1);
/// assert!(!config.shape_reward);
/// assert_eq!(config.observation, ObservationMode::Pixels);
/// assert_eq!(config.max_steps, 250);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmEnvConfig {
    pub force_render: bool,
    pub action_repeat: usize,
    pub shape_reward: bool,
    pub action_joints: bool,
    pub is_discrete: bool,
    pub button_random: bool,
    pub observation: ObservationMode,
    pub max_steps: usize,
}
impl Default for ArmEnvConfig {
    fn default() -> Self {
        Self {
            force_render: false,
            action_repeat: 1,
            shape_reward: false,
            action_joints: false,
            is_discrete: false,
            button_random: false,
            observation: ObservationMode::Pixels,
            max_steps: 250,
        }
    }
}
impl ArmEnvConfig {
    pub fn check(&self) -> Result<()> {
        if self.action_repeat == 0 {
            return Err(anyhow!("Action repeat must be at least 1"));
        }
        if self.max_steps == 0 {
            return Err(anyhow!("Max steps must be at least 1"));
        }
        Ok(())
    }
}
