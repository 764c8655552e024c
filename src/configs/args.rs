use {
    crate::{
        components::ActionNoiseKind,
        envs::{
            ArmEnvConfig,
            ObservationMode,
        },
    },
    clap::{
        ArgAction,
        Args,
        ValueEnum,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    std::path::PathBuf,
};


/// Which representation the agent observes.
///
/// `Raw` means pixels; the others are already-encoded feature vectors.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrlModel {
    #[serde(rename = "")]
    Raw,
    GroundTruth,
    Joints,
    JointsPosition,
}
impl SrlModel {
    pub fn is_raw(&self) -> bool {
        matches!(self, SrlModel::Raw)
    }

    pub fn observation_mode(&self) -> ObservationMode {
        match self {
            SrlModel::Raw => ObservationMode::Pixels,
            SrlModel::GroundTruth => ObservationMode::GroundTruth,
            SrlModel::Joints => ObservationMode::Joints,
            SrlModel::JointsPosition => ObservationMode::JointsPosition,
        }
    }
}


/// The arguments of a training run.
///
/// Written to `args.json` in the log directory so that a replay can rebuild
/// the same environment and agent.
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct TrainArgs {
    /// Environment ID.
    #[arg(long, default_value = "ArmButtonEnv-v0")]
    pub env: String,

    /// Random seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of workers training in parallel.
    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    /// State representation the agent learns from.
    #[arg(long, value_enum, default_value_t = SrlModel::Raw)]
    pub srl_model: SrlModel,

    /// Number of consecutive observations stacked together.
    #[arg(long, default_value_t = 1)]
    pub num_stack: usize,

    /// Capacity of the replay memory.
    #[arg(long, default_value_t = 100_000)]
    pub memory_limit: usize,

    /// Action noise used for exploration.
    #[arg(long, default_value_t = ActionNoiseKind::Ou)]
    pub noise_action: ActionNoiseKind,

    #[arg(long, default_value_t = 0.2)]
    pub noise_action_sigma: f64,

    /// Use adaptive parameter noise.
    #[arg(long)]
    pub noise_param: bool,

    #[arg(long, default_value_t = 0.2)]
    pub noise_param_sigma: f64,

    /// Disable layer normalization in the networks.
    #[arg(long)]
    pub no_layer_norm: bool,

    /// Where to write logs, checkpoints and statistics.
    #[arg(long, default_value = "logs/")]
    pub log_dir: PathBuf,

    /// Shape the reward (reward = - distance) instead of a sparse reward.
    #[arg(long)]
    pub shape_reward: bool,

    /// Number of simulation steps per environment step.
    #[arg(long, default_value_t = 1)]
    pub action_repeat: usize,

    /// Act in joint space rather than end effector space.
    #[arg(long)]
    pub action_joints: bool,

    /// Use a discrete action space.
    #[arg(long = "discrete", action = ArgAction::SetFalse)]
    pub continuous_actions: bool,

    /// Place the button at a random position every episode.
    #[arg(long)]
    pub relative: bool,

    /// Also run a separate evaluation environment without exploration.
    #[arg(long)]
    pub evaluate: bool,

    /// Override the number of training epochs.
    #[arg(long)]
    pub nb_epochs: Option<usize>,
}

impl TrainArgs {
    /// The arm environment these arguments describe.
    ///
    /// Rendering and reward shaping are passed separately because a replay
    /// chooses them itself.
    pub fn env_config(
        &self,
        globals: &EnvGlobals,
        force_render: bool,
        shape_reward: bool,
    ) -> ArmEnvConfig {
        ArmEnvConfig {
            force_render,
            action_repeat: globals.action_repeat,
            shape_reward,
            action_joints: self.action_joints,
            is_discrete: !self.continuous_actions,
            button_random: self.relative,
            observation: self.srl_model.observation_mode(),
            ..Default::default()
        }
    }
}


/// Environment settings that are not part of the training arguments,
/// written to `env_globals.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvGlobals {
    pub action_repeat: usize,
}


/// The arguments of a replay of a trained agent.
#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Folder with the saved agent model; must name the algorithm.
    #[arg(long)]
    pub log_dir: PathBuf,

    /// Random seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Number of workers; DDPG always replays with one.
    #[arg(long, default_value_t = 1)]
    pub num_cpu: usize,

    /// Number of environment steps to run.
    #[arg(long, default_value_t = 10_000)]
    pub num_timesteps: usize,

    /// Log an ASCII render of the scene after every step.
    #[arg(long)]
    pub render: bool,

    /// Shape the reward (reward = - distance) instead of a sparse reward.
    #[arg(long)]
    pub shape_reward: bool,
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        clap::Parser,
    };

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: TrainArgs,
    }

    #[test]
    fn defaults_match_the_training_setup() {
        let args = Cli::parse_from(["train"]).args;
        assert_eq!(args.env, "ArmButtonEnv-v0");
        assert_eq!(args.srl_model, SrlModel::Raw);
        assert_eq!(args.noise_action, ActionNoiseKind::Ou);
        assert_eq!(args.memory_limit, 100_000);
        assert!(args.continuous_actions);
        assert!(!args.no_layer_norm);
    }

    #[test]
    fn args_survive_json_and_build_the_env_config() {
        let args = Cli::parse_from([
            "train",
            "--srl-model", "joints-position",
            "--discrete",
            "--relative",
            "--noise-action", "normal",
        ])
        .args;
        let json = serde_json::to_string(&args).unwrap();
        assert!(json.contains("\"srl_model\":\"joints_position\""), "{json}");
        let args: TrainArgs = serde_json::from_str(&json).unwrap();

        let config = args.env_config(&EnvGlobals { action_repeat: 3 }, true, false);
        assert_eq!(config.observation, ObservationMode::JointsPosition);
        assert_eq!(config.action_repeat, 3);
        assert!(config.is_discrete && config.button_random && config.force_render);
        assert!(!config.shape_reward);
    }

    #[test]
    fn raw_pixels_are_stored_as_an_empty_name() {
        assert_eq!(serde_json::to_string(&SrlModel::Raw).unwrap(), "\"\"");
        assert!(SrlModel::Raw.is_raw());
    }
}
