use {
    super::{
        config::{
            ArmEnvConfig,
            ObservationMode,
        },
        kinematics,
        render,
    },
    crate::{
        envs::{
            Environment,
            Step,
        },
        util::write_config,
    },
    anyhow::{
        anyhow,
        Result,
    },
    rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    rand_distr::{
        Distribution,
        Normal,
    },
    serde::Serialize,
    std::{
        f64::consts::PI,
        path::Path,
    },
    tracing::info,
};

// Largest movement for a full-scale action, per simulation step.
const MAX_EFFECTOR_STEP: f64 = 0.05;
const MAX_JOINT_STEP: f64 = 0.1;
// The end effector presses the button when it gets this close.
const BUTTON_RADIUS: f64 = 0.05;
const FIXED_BUTTON: (f64, f64) = (0.55, 0.35);
const HOME_JOINTS: (f64, f64) = (PI / 2.0, -PI / 2.0);
// Std of the joint jitter at reset.
const RESET_JITTER: f64 = 0.05;

/// Discrete actions: +x, -x, +y, -y (or +q1, -q1, +q2, -q2 in joint mode).
const DISCRETE_MOVES: [(f64, f64); 4] = [(1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0)];

#[derive(Serialize)]
struct ArmEnvState {
    episodes: usize,
    timestep: usize,
    joints: (f64, f64),
    effector: (f64, f64),
    button: (f64, f64),
}

/// A planar two-link robotic arm that has to press a button.
///
/// The episode terminates once the end effector is within reach of the
/// button and is truncated after `max_steps` steps.
pub struct ArmEnv {
    config: ArmEnvConfig,
    joints: (f64, f64),
    button: (f64, f64),
    timestep: usize,
    episodes: usize,
    rng: StdRng,
}
impl ArmEnv {
    pub fn new(config: ArmEnvConfig) -> Result<Box<Self>> {
        config.check()?;
        Ok(Box::new(Self {
            config,
            joints: HOME_JOINTS,
            button: FIXED_BUTTON,
            timestep: 0,
            episodes: 0,
            rng: StdRng::seed_from_u64(0),
        }))
    }

    pub fn config(&self) -> &ArmEnvConfig {
        &self.config
    }

    pub fn effector(&self) -> (f64, f64) {
        kinematics::forward(self.joints).1
    }

    pub fn button(&self) -> (f64, f64) {
        self.button
    }

    fn distance_to_button(&self) -> f64 {
        let (x, y) = self.effector();
        (x - self.button.0).hypot(y - self.button.1)
    }

    fn image(&self) -> Vec<f64> {
        let (elbow, effector) = kinematics::forward(self.joints);
        render::render(elbow, effector, self.button, BUTTON_RADIUS)
    }

    /// An ASCII drawing of the current scene.
    pub fn render_ascii(&self) -> String {
        render::ascii(&self.image())
    }

    fn observation(&self) -> Vec<f64> {
        let (q1, q2) = self.joints;
        let (x, y) = self.effector();
        match self.config.observation {
            ObservationMode::Pixels => self.image(),
            ObservationMode::GroundTruth if self.config.button_random => {
                vec![x - self.button.0, y - self.button.1]
            }
            ObservationMode::GroundTruth => vec![x, y],
            ObservationMode::Joints => vec![q1, q2],
            ObservationMode::JointsPosition => vec![q1, q2, x, y],
        }
    }

    /// Turn an action into a movement direction in `[-1, 1]^2`.
    fn movement(
        &self,
        action: &[f64],
    ) -> Result<(f64, f64)> {
        if self.config.is_discrete {
            let index = action
                .first()
                .map(|a| a.round())
                .filter(|a| (0.0..DISCRETE_MOVES.len() as f64).contains(a))
                .ok_or_else(|| anyhow!("Invalid discrete action {action:?}"))?;
            Ok(DISCRETE_MOVES[index as usize])
        } else {
            match action {
                [a, b] => Ok((a.clamp(-1.0, 1.0), b.clamp(-1.0, 1.0))),
                _ => Err(anyhow!("Expected an action of length 2, got {action:?}")),
            }
        }
    }

    fn simulate(
        &mut self,
        movement: (f64, f64),
    ) {
        if self.config.action_joints {
            self.joints = (
                self.joints.0 + MAX_JOINT_STEP * movement.0,
                (self.joints.1 + MAX_JOINT_STEP * movement.1).clamp(-PI, PI),
            );
        } else {
            let (x, y) = self.effector();
            let target = (
                x + MAX_EFFECTOR_STEP * movement.0,
                y + MAX_EFFECTOR_STEP * movement.1,
            );
            self.joints = kinematics::inverse(target, self.joints);
        }
    }
}

impl Environment for ArmEnv {
    fn reset(&mut self, seed: u64) -> Result<Vec<f64>> {
        self.rng = StdRng::seed_from_u64(seed);
        self.timestep = 0;
        self.episodes += 1;

        let jitter = Normal::new(0.0, RESET_JITTER)?;
        self.joints = (
            HOME_JOINTS.0 + jitter.sample(&mut self.rng),
            HOME_JOINTS.1 + jitter.sample(&mut self.rng),
        );
        self.button = if self.config.button_random {
            let radius = self.rng.gen_range(0.3..0.85);
            let angle = self.rng.gen_range(0.1..(PI - 0.1));
            (radius * angle.cos(), radius * angle.sin())
        } else {
            FIXED_BUTTON
        };

        Ok(self.observation())
    }

    fn step(&mut self, action: &[f64]) -> Result<Step> {
        let movement = self.movement(action)?;
        self.timestep += 1;

        let mut pressed = false;
        for _ in 0..self.config.action_repeat {
            self.simulate(movement);
            if self.distance_to_button() < BUTTON_RADIUS {
                pressed = true;
                break;
            }
        }

        let distance = self.distance_to_button();
        let reward = if self.config.shape_reward {
            -distance
        } else if pressed {
            1.0
        } else {
            0.0
        };
        let terminated = pressed;
        let truncated = !terminated && self.timestep >= self.config.max_steps;

        let (x, y) = self.effector();
        info!(
            concat!(
                "\nArmEnv Step:",
                "\nE({:.3}, {:.3}) + B({:.3}, {:.3})",
                "\nA({:.3}, {:.3})",
                "\nR: {:?}",
            ),
            x, y, self.button.0, self.button.1,
            movement.0, movement.1,
            reward,
        );
        if self.config.force_render {
            info!("\n{}", self.render_ascii());
        }

        Ok(Step {
            observation: self.observation(),
            reward,
            terminated,
            truncated,
        })
    }

    fn action_space(&self) -> Vec<usize> {
        if self.config.is_discrete {
            vec![1]
        } else {
            vec![2]
        }
    }

    fn action_high(&self) -> Vec<f64> {
        if self.config.is_discrete {
            vec![(DISCRETE_MOVES.len() - 1) as f64]
        } else {
            vec![1.0, 1.0]
        }
    }

    fn observation_space(&self) -> Vec<usize> {
        match self.config.observation {
            ObservationMode::Pixels => vec![1, render::IMAGE_SIZE, render::IMAGE_SIZE],
            ObservationMode::GroundTruth | ObservationMode::Joints => vec![2],
            ObservationMode::JointsPosition => vec![4],
        }
    }

    fn is_discrete(&self) -> bool {
        self.config.is_discrete
    }

    fn write_state(&self, path: &Path) -> Result<bool> {
        let state = ArmEnvState {
            episodes: self.episodes,
            timestep: self.timestep,
            joints: self.joints,
            effector: self.effector(),
            button: self.button,
        };
        write_config(&state, path)?;
        Ok(true)
    }
}
