use {
    anyhow::{
        anyhow,
        Result,
    },
    serde::{
        Deserialize,
        Serialize,
    },
};


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    // The number of epochs; statistics are combined and logged after each one.
    nb_epochs: usize,
    // The number of rollout / train / eval cycles per epoch.
    nb_epoch_cycles: usize,
    // Environment steps per cycle.
    nb_rollout_steps: usize,
    // Training iterations per cycle.
    nb_train_steps: usize,
    // Evaluation steps per cycle (only with an evaluation environment).
    nb_eval_steps: usize,
    // Adapt the param noise every this many training iterations.
    param_noise_adaption_interval: usize,
}
impl TrainConfig {
    pub fn new(
        nb_epochs: usize,
        nb_epoch_cycles: usize,
        nb_rollout_steps: usize,
        nb_train_steps: usize,
        nb_eval_steps: usize,
        param_noise_adaption_interval: usize,
    ) -> Self {
        Self {
            nb_epochs,
            nb_epoch_cycles,
            nb_rollout_steps,
            nb_train_steps,
            nb_eval_steps,
            param_noise_adaption_interval,
        }
    }

    pub fn kuka() -> Self {
        Self {
            nb_epochs: 500,
            nb_epoch_cycles: 20,
            nb_rollout_steps: 100,
            nb_train_steps: 50,
            nb_eval_steps: 100,
            param_noise_adaption_interval: 50,
        }
    }

    /// Reject combinations the training loop cannot give a meaning to.
    pub fn check(
        &self,
        param_noise: bool,
    ) -> Result<()> {
        if param_noise && self.param_noise_adaption_interval == 0 {
            return Err(anyhow!("Param noise requires a param noise adaption interval greater than 0"));
        }
        if self.nb_epoch_cycles == 0 || self.nb_rollout_steps == 0 {
            return Err(anyhow!("Training needs at least one epoch cycle with at least one rollout step"));
        }
        Ok(())
    }
}

impl TrainConfig {
    pub fn nb_epochs(&self) -> usize {
        self.nb_epochs
    }
    pub fn nb_epoch_cycles(&self) -> usize {
        self.nb_epoch_cycles
    }
    pub fn nb_rollout_steps(&self) -> usize {
        self.nb_rollout_steps
    }
    pub fn nb_train_steps(&self) -> usize {
        self.nb_train_steps
    }
    pub fn nb_eval_steps(&self) -> usize {
        self.nb_eval_steps
    }
    pub fn param_noise_adaption_interval(&self) -> usize {
        self.param_noise_adaption_interval
    }
    pub fn set_nb_epochs(&mut self, nb_epochs: usize) {
        self.nb_epochs = nb_epochs;
    }
}
