use {
    super::{
        comm::Communicator,
        stats::ProgressTable,
        train::training_loop_off_policy,
        ALGO_NAME,
    },
    crate::{
        agents::DDPG,
        components::{
            ActionNoiseSpec,
            AdaptiveParamNoise,
        },
        configs::{
            EnvGlobals,
            TrainArgs,
            TrainConfig,
            DDPG_Config,
        },
        envs::{
            ArmEnv,
            ArmEnvConfig,
            Environment,
            FrameStack,
            VecNormalize,
        },
        util::{
            write_config,
            write_json,
        },
    },
    anyhow::{
        anyhow,
        bail,
        Result,
    },
    candle_core::Device,
    std::{
        fs::create_dir_all,
        sync::mpsc,
        thread,
    },
    tracing::warn,
};


/// The id of the robotic arm environment.
pub const ARM_ENV_ID: &str = "ArmButtonEnv-v0";

const WORKER_SEED_STRIDE: u64 = 1_000_000;

#[cfg(feature = "gym")]
fn gym_env(name: &str) -> Result<Box<dyn Environment>> {
    Ok(crate::envs::GymEnv::new(name)? as Box<dyn Environment>)
}

#[cfg(not(feature = "gym"))]
fn gym_env(name: &str) -> Result<Box<dyn Environment>> {
    bail!("Unknown environment {name}, Gymnasium environments need the `gym` feature")
}

/// Build the environment `name` with `num_stack` stacked observations.
///
/// The arm environment is configured by `config`; any other name is looked up
/// in Gymnasium.
pub fn make_env(
    name: &str,
    config: ArmEnvConfig,
    num_stack: usize,
    scale_pixels: bool,
) -> Result<Box<dyn Environment>> {
    let env = if name == ARM_ENV_ID {
        ArmEnv::new(config)? as Box<dyn Environment>
    } else {
        gym_env(name)?
    };
    Ok(Box::new(FrameStack::new(env, num_stack, scale_pixels)))
}

/// The environment a worker trains on.
///
/// Feature observations are normalized by a running average.
fn make_train_env(
    args: &TrainArgs,
    config: &ArmEnvConfig,
) -> Result<Box<dyn Environment>> {
    let raw = args.srl_model.is_raw();
    let env = make_env(&args.env, config.clone(), args.num_stack, raw)?;
    Ok(if raw {
        env
    } else {
        Box::new(VecNormalize::new(env, true))
    })
}

/// The agent configuration for the observation and action shapes of `env`.
fn agent_config(
    args: &TrainArgs,
    env: &dyn Environment,
) -> DDPG_Config {
    let observation_shape = env.observation_space();
    let action_shape = env.action_space();
    let config = if args.srl_model.is_raw() {
        DDPG_Config::cnn(&observation_shape, &action_shape)
    } else {
        DDPG_Config::mlp(&observation_shape, &action_shape)
    };
    config.with_noise(
        ActionNoiseSpec::from_kind(args.noise_action, args.noise_action_sigma),
        args.noise_param
            .then(|| AdaptiveParamNoise::new(args.noise_param_sigma, args.noise_param_sigma)),
    )
}

fn run_worker(
    args: &TrainArgs,
    env_config: &ArmEnvConfig,
    train_config: &TrainConfig,
    comm: &Communicator,
    device: &Device,
) -> Result<ProgressTable> {
    let seed = args.seed + WORKER_SEED_STRIDE * comm.rank() as u64;
    let mut env = make_train_env(args, env_config)?;
    let mut eval_env = if args.evaluate && comm.is_root() {
        Some(make_train_env(args, env_config)?)
    } else {
        None
    };
    if env.is_discrete() {
        bail!("{ALGO_NAME} only supports continuous action spaces");
    }

    let config = agent_config(args, env.as_ref());
    if comm.is_root() {
        write_config(&config, args.log_dir.join("config_algorithm.ron"))?;
    }
    let mut agent = DDPG::new(device, config, !args.no_layer_norm, args.memory_limit)?;
    warn!(
        "Worker {} of {} training {} / {} with seed {seed}",
        comm.rank(),
        comm.size(),
        agent.meta().actor_name,
        agent.meta().critic_name,
    );

    training_loop_off_policy(
        env.as_mut(),
        eval_env.as_deref_mut().map(|env| env as &mut dyn Environment),
        &mut agent,
        train_config,
        comm,
        Some(&args.log_dir),
        seed,
    )
}

/// Train a DDPG agent as described by `args`.
///
/// Writes the run arguments and configs into the log directory, then trains
/// on `args.num_workers` worker threads. The first worker error ends the run.
pub fn run_training(
    args: &TrainArgs,
    device: &Device,
) -> Result<()> {
    let mut train_config = TrainConfig::kuka();
    if let Some(nb_epochs) = args.nb_epochs {
        train_config.set_nb_epochs(nb_epochs);
    }
    train_workers(args, &train_config, device)?;
    Ok(())
}

/// Run the worker group with `train_config`, returning the root's progress
/// table.
fn train_workers(
    args: &TrainArgs,
    train_config: &TrainConfig,
    device: &Device,
) -> Result<ProgressTable> {
    if !args.continuous_actions {
        bail!("{ALGO_NAME} only supports continuous action spaces");
    }
    train_config.check(args.noise_param)?;

    let globals = EnvGlobals {
        action_repeat: args.action_repeat,
    };
    let env_config = args.env_config(&globals, false, args.shape_reward);
    env_config.check()?;

    create_dir_all(&args.log_dir)?;
    write_json(args, args.log_dir.join("args.json"))?;
    write_json(&globals, args.log_dir.join("env_globals.json"))?;
    write_config(&env_config, args.log_dir.join("config_environment.ron"))?;
    write_config(train_config, args.log_dir.join("config_training.ron"))?;
    warn!("Logging to {}", args.log_dir.display());

    let comms = Communicator::group(args.num_workers);
    let nb_workers = comms.len();
    let (sender, receiver) = mpsc::channel();
    for comm in comms {
        let sender = sender.clone();
        let (args, env_config, train_config, device) =
            (args.clone(), env_config.clone(), train_config.clone(), device.clone());
        thread::Builder::new()
            .name(format!("worker-{}", comm.rank()))
            .spawn(move || {
                let result = run_worker(&args, &env_config, &train_config, &comm, &device);
                if result.is_err() {
                    comm.abort();
                }
                // the receiver is gone once another worker failed
                let _ = sender.send((comm.rank(), result));
            })?;
    }
    drop(sender);

    let mut root_table = None;
    for _ in 0..nb_workers {
        let (rank, result) = receiver
            .recv()
            .map_err(|_| anyhow!("A worker stopped without reporting back"))?;
        let table = result.map_err(|e| e.context(format!("Worker {rank} failed")))?;
        if rank == 0 {
            root_table = Some(table);
        }
    }
    warn!("Training finished");
    root_table.ok_or_else(|| anyhow!("The root worker did not report back"))
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            configs::SrlModel,
            envs::ObservationMode,
        },
        clap::Parser,
        std::env::temp_dir,
    };

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: TrainArgs,
    }

    fn args(extra: &[&str]) -> TrainArgs {
        let mut argv = vec!["train"];
        argv.extend_from_slice(extra);
        Cli::parse_from(argv).args
    }

    #[test]
    #[cfg(not(feature = "gym"))]
    fn unknown_environments_are_rejected() {
        let err = make_env("NoSuchEnv-v9", ArmEnvConfig::default(), 1, true)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("NoSuchEnv-v9"), "{err}");
    }

    #[test]
    fn discrete_actions_are_rejected_before_anything_is_written() {
        let log_dir = temp_dir().join(format!("arm_ddpg_discrete_{}", std::process::id()));
        let log_dir = log_dir.to_string_lossy().into_owned();
        let err = run_training(&args(&["--discrete", "--log-dir", &log_dir]), &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("continuous"), "{err}");
        assert!(!std::path::Path::new(&log_dir).exists());
    }

    #[test]
    fn worker_groups_train_together_and_the_root_writes_the_run() -> Result<()> {
        let log_dir = temp_dir().join(format!("arm_ddpg_ddpg_group_{}", std::process::id()));
        let log_dir_arg = log_dir.to_string_lossy().into_owned();
        let args = args(&[
            "--num-workers", "2",
            "--srl-model", "joints-position",
            "--shape-reward",
            "--evaluate",
            "--noise-param",
            "--memory-limit", "500",
            "--log-dir", &log_dir_arg,
        ]);

        let table = train_workers(&args, &TrainConfig::new(2, 2, 20, 5, 10, 2), &Device::Cpu)?;
        assert_eq!(table.rows(), 2);
        assert_eq!(table.column("total/epochs").unwrap(), &[1.0, 2.0]);
        assert_eq!(table.column("total/steps").unwrap(), &[40.0, 80.0]);
        // only the root evaluates
        assert!(table.column("eval/Q").is_some());
        for file in [
            "args.json",
            "env_globals.json",
            "config_algorithm.ron",
            "progress.parquet",
            "ddpg_model.ron",
            "running_average.ron",
            "eval_env_state.ron",
        ] {
            assert!(log_dir.join(file).try_exists()?, "{file} was not written");
        }

        std::fs::remove_dir_all(log_dir)?;
        Ok(())
    }

    #[test]
    #[cfg(not(feature = "gym"))]
    fn worker_errors_end_the_run() {
        let log_dir = temp_dir().join(format!("arm_ddpg_failing_group_{}", std::process::id()));
        let log_dir_arg = log_dir.to_string_lossy().into_owned();
        let args = args(&[
            "--num-workers", "3",
            "--srl-model", "joints-position",
            "--env", "NoSuchEnv-v9",
            "--log-dir", &log_dir_arg,
        ]);
        let err = train_workers(&args, &TrainConfig::new(1, 1, 5, 1, 1, 1), &Device::Cpu)
            .err()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();
        assert!(err.contains("NoSuchEnv-v9"), "{err}");
        let _ = std::fs::remove_dir_all(log_dir);
    }

    #[test]
    fn feature_runs_get_a_normalized_mlp_setup() -> Result<()> {
        let args = args(&["--srl-model", "joints-position", "--num-stack", "2", "--noise-param"]);
        let env_config = args.env_config(&EnvGlobals { action_repeat: 1 }, false, false);
        assert_eq!(env_config.observation, ObservationMode::JointsPosition);

        let env = make_train_env(&args, &env_config)?;
        assert_eq!(env.observation_space(), vec![8]);
        let config = agent_config(&args, env.as_ref());
        assert_eq!(config.observation_shape, vec![8]);
        assert_eq!(config.batch_size, 64);
        assert!(config.param_noise.is_some());
        assert!(config.action_noise.is_some());
        Ok(())
    }

    #[test]
    fn pixel_runs_get_a_cnn_setup() -> Result<()> {
        let args = args(&["--noise-action", "none"]);
        assert_eq!(args.srl_model, SrlModel::Raw);
        let env_config = args.env_config(&EnvGlobals { action_repeat: 1 }, false, false);

        let env = make_train_env(&args, &env_config)?;
        assert_eq!(env.observation_space(), vec![1, 64, 64]);
        let config = agent_config(&args, env.as_ref());
        assert!(config.normalize_observations);
        assert!(config.action_noise.is_none());
        assert!(config.param_noise.is_none());
        Ok(())
    }
}
