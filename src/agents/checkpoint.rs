//! Saving and loading [`DDPG`] agents.
//!
//! A checkpoint at `<dir>/<name>.ron` holds the pair of the hyperparameters
//! and the network metadata; the weights (and the running statistics) live
//! next to it in `<dir>/<name>.safetensors`.
use {
    super::{
        Algorithm,
        NetworkMeta,
        SaveableAlgorithm,
        DDPG,
    },
    crate::{
        components::Memory,
        configs::DDPG_Config,
        util::{
            read_config,
            write_config,
        },
    },
    anyhow::{
        bail,
        Result,
    },
    candle_core::Device,
    std::path::{
        Path,
        PathBuf,
    },
    tracing::warn,
};

// Agents loaded for replay never train, so they only get a token memory.
const LOADED_MEMORY_LIMIT: usize = 100;

fn weights_path(path: &Path) -> PathBuf {
    path.with_extension("safetensors")
}

fn read_checkpoint(path: &Path) -> Result<(DDPG_Config, NetworkMeta)> {
    read_config(path)
}

impl DDPG {
    /// Build an agent from a checkpoint written by [`SaveableAlgorithm::save`].
    pub fn load(
        path: &Path,
        device: &Device,
    ) -> Result<Self> {
        let (config, meta) = read_checkpoint(path)?;
        warn!(
            "Loading {} / {} agent from {}",
            meta.actor_name,
            meta.critic_name,
            path.display(),
        );
        let memory = Memory::new(LOADED_MEMORY_LIMIT, &config.action_shape, &config.observation_shape);
        let mut agent = Self::from_meta(device, config, meta, memory)?;
        agent.load_named_tensors(&candle_core::safetensors::load(weights_path(path), device)?)?;
        Ok(agent)
    }
}

impl SaveableAlgorithm for DDPG {
    fn save(
        &self,
        path: &Path,
    ) -> Result<()> {
        write_config(&(self.config(), self.meta()), path)?;
        candle_core::safetensors::save(&self.named_tensors()?, weights_path(path))?;
        Ok(())
    }

    fn restore(
        &mut self,
        path: &Path,
    ) -> Result<()> {
        let (config, meta) = read_checkpoint(path)?;
        if &meta != self.meta() {
            bail!(
                "Checkpoint networks {meta:?} do not match the agent's {:?}",
                self.meta(),
            );
        }
        let tensors = candle_core::safetensors::load(weights_path(path), self.device())?;
        self.adopt_config(config)?;
        self.load_named_tensors(&tensors)
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            agents::{
                OffPolicyAlgorithm,
                RunMode,
            },
            components::{
                ActionNoiseSpec,
                AdaptiveParamNoise,
                Transition,
            },
        },
        std::{
            env::temp_dir,
            fs,
        },
    };

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = temp_dir().join(format!("arm_ddpg_{name}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config() -> DDPG_Config {
        let mut config = DDPG_Config::mlp(&[3], &[2]).with_noise(
            Some(ActionNoiseSpec::OrnsteinUhlenbeck { mu: 0.0, theta: 0.15, sigma: 0.2 }),
            Some(AdaptiveParamNoise::new(0.1, 0.2)),
        );
        config.normalize_observations = true;
        config
    }

    #[test]
    fn save_then_load_reproduces_config_networks_and_policy() -> Result<()> {
        let dir = scratch_dir("checkpoint_round_trip");
        let path = dir.join("ddpg_model.ron");

        let mut agent = DDPG::new(&Device::Cpu, config(), false, 1000)?;
        for i in 0..10 {
            agent.store(Transition {
                observation: vec![i as f64, 1.0, -1.0],
                action: vec![0.0, 0.0],
                reward: 1.0,
                next_observation: vec![i as f64 + 1.0, 1.0, -1.0],
                done: false,
            });
        }
        agent.save(&path)?;
        assert!(dir.join("ddpg_model.safetensors").try_exists()?);

        let mut loaded = DDPG::load(&path, &Device::Cpu)?;
        assert_eq!(loaded.config(), agent.config());
        assert_eq!(loaded.meta(), agent.meta());
        assert_eq!(loaded.meta().actor_name, "ActorMLP");
        assert_eq!(loaded.meta().critic_name, "CriticMLP");
        assert_eq!(loaded.memory().limit(), 100);

        let observation = [3.0, 0.5, -0.5];
        assert_eq!(
            loaded.act(&observation, RunMode::Test)?,
            agent.act(&observation, RunMode::Test)?,
        );

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn adapted_param_noise_scale_survives_a_checkpoint() -> Result<()> {
        let dir = scratch_dir("checkpoint_param_noise");
        let path = dir.join("ddpg_model.ron");

        // a tiny target distance makes every adaptation shrink the scale
        let mut config = config();
        config.param_noise = Some(AdaptiveParamNoise::new(0.2, 1e-6));
        let mut agent = DDPG::new(&Device::Cpu, config, false, 1000)?;
        for i in 0..200 {
            let x = i as f64 / 100.0;
            agent.store(Transition {
                observation: vec![x, 1.0 - x, x * x],
                action: vec![0.5, -0.5],
                reward: x,
                next_observation: vec![x + 0.01, 0.99 - x, x],
                done: i % 50 == 49,
            });
        }
        for _ in 0..20 {
            assert!(agent.adapt_param_noise()?.is_some());
        }
        let adapted = agent.param_noise().map(|noise| noise.current_stddev);
        assert!(adapted.is_some_and(|stddev| stddev < 0.2));

        agent.save(&path)?;
        let loaded = DDPG::load(&path, &Device::Cpu)?;
        assert_eq!(loaded.param_noise().map(|noise| noise.current_stddev), adapted);
        assert_eq!(loaded.config(), agent.config());

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn restore_adopts_the_stored_weights() -> Result<()> {
        let dir = scratch_dir("checkpoint_restore");
        let path = dir.join("ddpg_model.ron");

        let mut saved = DDPG::new(&Device::Cpu, config(), true, 100)?;
        saved.save(&path)?;

        let mut fresh = DDPG::new(&Device::Cpu, config(), true, 100)?;
        let observation = [0.2, -0.4, 0.9];
        let expected = saved.act(&observation, RunMode::Test)?;
        assert_ne!(fresh.act(&observation, RunMode::Test)?, expected);
        fresh.restore(&path)?;
        assert_eq!(fresh.act(&observation, RunMode::Test)?, expected);

        let mut other = DDPG::new(&Device::Cpu, config(), false, 100)?;
        let err = other.restore(&path).unwrap_err().to_string();
        assert!(err.contains("do not match"), "{err}");

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn unknown_network_names_are_rejected() -> Result<()> {
        let dir = scratch_dir("checkpoint_unknown");
        let path = dir.join("ddpg_model.ron");
        let meta = NetworkMeta {
            actor_name: "ActorLSTM".to_owned(),
            critic_name: "CriticMLP".to_owned(),
            nb_actions: 2,
            layer_norm: true,
        };
        write_config(&(config(), meta), &path)?;

        let err = DDPG::load(&path, &Device::Cpu).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("Unsupported actor network: ActorLSTM"), "{err}");

        fs::remove_dir_all(dir)?;
        Ok(())
    }
}
