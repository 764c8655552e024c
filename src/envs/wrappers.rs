//! Observation wrappers that sit between an [`Environment`] and the agent.
use {
    super::{
        Environment,
        Step,
    },
    crate::{
        components::RunningMeanStd,
        util::{
            read_config,
            write_config,
        },
    },
    anyhow::Result,
    std::{
        collections::VecDeque,
        path::Path,
    },
    tracing::warn,
};

const RUNNING_AVERAGE_FILE: &str = "running_average.ron";


/// Stack the last `num_stack` observations along the first axis.
///
/// For channel-first images this stacks frames as channels. With `scale`,
/// raw pixel values are mapped from `0..=255` to `0..=1`.
pub struct FrameStack<E: Environment> {
    env: E,
    num_stack: usize,
    scale: bool,
    frames: VecDeque<Vec<f64>>,
}
impl<E: Environment> FrameStack<E> {
    pub fn new(
        env: E,
        num_stack: usize,
        scale: bool,
    ) -> Self {
        let num_stack = num_stack.max(1);
        Self {
            env,
            num_stack,
            scale,
            frames: VecDeque::with_capacity(num_stack),
        }
    }

    fn prepare(
        &self,
        mut observation: Vec<f64>,
    ) -> Vec<f64> {
        if self.scale {
            observation.iter_mut().for_each(|x| *x /= 255.0);
        }
        observation
    }

    fn stacked(&self) -> Vec<f64> {
        self.frames.iter().flatten().copied().collect()
    }
}

impl<E: Environment> Environment for FrameStack<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f64>> {
        let observation = self.env.reset(seed)?;
        let observation = self.prepare(observation);
        self.frames.clear();
        for _ in 0..self.num_stack {
            self.frames.push_back(observation.clone());
        }
        Ok(self.stacked())
    }

    fn step(&mut self, action: &[f64]) -> Result<Step> {
        let step = self.env.step(action)?;
        let observation = self.prepare(step.observation);
        if self.frames.len() == self.num_stack {
            self.frames.pop_front();
        }
        self.frames.push_back(observation);
        Ok(Step {
            observation: self.stacked(),
            ..step
        })
    }

    fn action_space(&self) -> Vec<usize> {
        self.env.action_space()
    }

    fn action_high(&self) -> Vec<f64> {
        self.env.action_high()
    }

    fn observation_space(&self) -> Vec<usize> {
        let mut space = self.env.observation_space();
        if let Some(first) = space.first_mut() {
            *first *= self.num_stack;
        }
        space
    }

    fn is_discrete(&self) -> bool {
        self.env.is_discrete()
    }

    fn write_state(&self, path: &Path) -> Result<bool> {
        self.env.write_state(path)
    }

    fn write_running_average(&self, dir: &Path) -> Result<bool> {
        self.env.write_running_average(dir)
    }
}


/// Normalize observations with a running mean and standard deviation.
///
/// The statistics are only updated in training mode. They are saved as
/// `running_average.ron` so that a replay can load them again.
pub struct VecNormalize<E: Environment> {
    env: E,
    obs_rms: RunningMeanStd,
    clip_obs: f64,
    training: bool,
}
impl<E: Environment> VecNormalize<E> {
    pub fn new(
        env: E,
        training: bool,
    ) -> Self {
        let dim = env.observation_space().iter().product();
        Self {
            env,
            obs_rms: RunningMeanStd::new(dim),
            clip_obs: 10.0,
            training,
        }
    }

    pub fn training(&self) -> bool {
        self.training
    }

    pub fn set_training(
        &mut self,
        training: bool,
    ) {
        self.training = training;
    }

    pub fn running_average(&self) -> &RunningMeanStd {
        &self.obs_rms
    }

    pub fn save_running_average(
        &self,
        dir: &Path,
    ) -> Result<()> {
        write_config(&self.obs_rms, dir.join(RUNNING_AVERAGE_FILE))
    }

    /// Load previously saved statistics from `dir`.
    ///
    /// Returns `false` when there is nothing to load.
    pub fn load_running_average(
        &mut self,
        dir: &Path,
    ) -> Result<bool> {
        let path = dir.join(RUNNING_AVERAGE_FILE);
        if !path.try_exists()? {
            return Ok(false);
        }
        let obs_rms: RunningMeanStd = read_config(path)?;
        if obs_rms.dim() != self.obs_rms.dim() {
            warn!(
                "Running average has {} dimensions, expected {}; ignoring it",
                obs_rms.dim(),
                self.obs_rms.dim(),
            );
            return Ok(false);
        }
        self.obs_rms = obs_rms;
        Ok(true)
    }

    fn normalize(
        &mut self,
        observation: Vec<f64>,
    ) -> Vec<f64> {
        if self.training {
            self.obs_rms.update(&observation);
        }
        self.obs_rms.normalize(&observation, (-self.clip_obs, self.clip_obs))
    }
}

impl<E: Environment> Environment for VecNormalize<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f64>> {
        let observation = self.env.reset(seed)?;
        Ok(self.normalize(observation))
    }

    fn step(&mut self, action: &[f64]) -> Result<Step> {
        let step = self.env.step(action)?;
        let observation = self.normalize(step.observation);
        Ok(Step {
            observation,
            ..step
        })
    }

    fn action_space(&self) -> Vec<usize> {
        self.env.action_space()
    }

    fn action_high(&self) -> Vec<f64> {
        self.env.action_high()
    }

    fn observation_space(&self) -> Vec<usize> {
        self.env.observation_space()
    }

    fn is_discrete(&self) -> bool {
        self.env.is_discrete()
    }

    fn write_state(&self, path: &Path) -> Result<bool> {
        self.env.write_state(path)
    }

    fn write_running_average(&self, dir: &Path) -> Result<bool> {
        self.save_running_average(dir)?;
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::envs::{
            ArmEnv,
            ArmEnvConfig,
            ObservationMode,
        },
        std::{
            env::temp_dir,
            fs,
        },
    };

    fn feature_env() -> Result<Box<ArmEnv>> {
        ArmEnv::new(ArmEnvConfig {
            observation: ObservationMode::JointsPosition,
            ..Default::default()
        })
    }

    #[test]
    fn frames_are_stacked_oldest_first() -> Result<()> {
        let mut env = FrameStack::new(feature_env()?, 3, false);
        assert_eq!(env.observation_space(), vec![12]);

        let first = env.reset(1)?;
        assert_eq!(first.len(), 12);
        assert_eq!(first[0..4], first[8..12]);

        let step = env.step(&[1.0, 0.0])?;
        assert_eq!(step.observation[0..4], first[0..4]);
        assert_ne!(step.observation[8..12], first[8..12]);
        Ok(())
    }

    #[test]
    fn pixel_frames_are_scaled_and_stacked_as_channels() -> Result<()> {
        let env = ArmEnv::new(ArmEnvConfig::default())?;
        let mut env = FrameStack::new(env, 2, true);
        assert_eq!(env.observation_space(), vec![2, 64, 64]);
        let observation = env.reset(0)?;
        assert_eq!(observation.len(), 2 * 64 * 64);
        assert!(observation.iter().all(|&x| (0.0..=1.0).contains(&x)));
        assert!(observation.iter().any(|&x| x == 1.0));
        Ok(())
    }

    #[test]
    fn running_average_round_trips_through_disk() -> Result<()> {
        let dir = temp_dir().join(format!("arm_ddpg_vecnormalize_{}", std::process::id()));
        fs::create_dir_all(&dir)?;

        let mut env = VecNormalize::new(feature_env()?, true);
        env.reset(0)?;
        for _ in 0..10 {
            env.step(&[0.3, -0.2])?;
        }
        assert!(env.write_running_average(&dir)?);

        let mut replay = VecNormalize::new(feature_env()?, false);
        assert!(replay.load_running_average(&dir)?);
        assert_eq!(replay.running_average(), env.running_average());

        let mut missing = VecNormalize::new(feature_env()?, false);
        assert!(!missing.load_running_average(&dir.join("nowhere"))?);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
