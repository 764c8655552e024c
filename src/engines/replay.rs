use {
    super::{
        checkpoint_path,
        experiment::make_env,
        ALGO_NAME,
    },
    crate::{
        agents::{
            Algorithm,
            RunMode,
            DDPG,
        },
        configs::{
            EnvGlobals,
            ReplayArgs,
            TrainArgs,
        },
        envs::{
            Environment,
            VecNormalize,
        },
        util::read_json,
    },
    anyhow::{
        anyhow,
        ensure,
        Result,
    },
    candle_core::Device,
    rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    tracing::{
        info,
        warn,
    },
};


/// The algorithms a log directory can be replayed with.
pub const SUPPORTED_ALGOS: [&str; 1] = [ALGO_NAME];

/// Run `agent` on `env` for `num_timesteps` steps without exploration.
///
/// Returns the returns of the episodes that finished.
pub fn run_policy<Alg: Algorithm>(
    env: &mut dyn Environment,
    agent: &mut Alg,
    num_timesteps: usize,
    seed: u64,
) -> Result<Vec<f64>> {
    let max_action = env.action_high();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut returns = Vec::new();
    let mut episode_reward = 0.0;

    agent.reset()?;
    let mut obs = env.reset(rng.gen())?;
    for _ in 0..num_timesteps {
        let (action, q) = agent.act(&obs, RunMode::Test)?;
        ensure!(
            action.len() == max_action.len(),
            "Agent produced {} actions for action bounds {max_action:?}",
            action.len(),
        );
        let scaled: Vec<f64> = max_action.iter().zip(&action).map(|(m, a)| m * a).collect();
        let step = env.step(&scaled)?;
        info!("action {action:?} with Q {q}, reward {}", step.reward);
        episode_reward += step.reward;
        obs = step.observation.clone();

        if step.done() {
            warn!("Episode {} return: {episode_reward}", returns.len());
            returns.push(episode_reward);
            episode_reward = 0.0;
            agent.reset()?;
            obs = env.reset(rng.gen())?;
        }
    }
    Ok(returns)
}

/// Replay the agent saved in `args.log_dir`.
///
/// The environment is rebuilt from the `args.json` and `env_globals.json` of
/// the training run, with rendering and reward shaping taken from `args`.
pub fn replay(
    args: &ReplayArgs,
    device: &Device,
) -> Result<Vec<f64>> {
    let log_dir = args.log_dir.to_string_lossy();
    let algo = SUPPORTED_ALGOS
        .into_iter()
        .find(|algo| log_dir.contains(*algo))
        .ok_or_else(|| anyhow!("RL algo not supported for replay: {log_dir}"))?;
    if args.num_cpu > 1 {
        warn!("{algo} does not support multiprocessing, setting num-cpu=1");
    }

    let globals: EnvGlobals = read_json(args.log_dir.join("env_globals.json"))?;
    let train_args: TrainArgs = read_json(args.log_dir.join("args.json"))?;
    warn!("Replaying {algo} on {} from {log_dir}", train_args.env);

    let env_config = train_args.env_config(&globals, args.render, args.shape_reward);
    let raw = train_args.srl_model.is_raw();
    let mut env = make_env(&train_args.env, env_config, train_args.num_stack, raw)?;
    if !raw {
        let mut normalized = VecNormalize::new(env, false);
        if normalized.load_running_average(&args.log_dir)? {
            warn!("Loaded the saved running average");
        } else {
            warn!("Running average not found, normalizing in training mode");
            normalized.set_training(true);
        }
        env = Box::new(normalized);
    }

    let mut agent = DDPG::load(&checkpoint_path(&args.log_dir), device)?;
    let returns = run_policy(env.as_mut(), &mut agent, args.num_timesteps, args.seed)?;
    warn!("Replay finished {} episodes", returns.len());
    Ok(returns)
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            agents::SaveableAlgorithm,
            configs::DDPG_Config,
            engines::ARM_ENV_ID,
            envs::{
                ArmEnvConfig,
                ObservationMode,
            },
            util::write_json,
        },
        clap::Parser,
        std::{
            env::temp_dir,
            fs,
            path::PathBuf,
        },
    };

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: TrainArgs,
    }

    fn replay_args(log_dir: PathBuf) -> ReplayArgs {
        ReplayArgs {
            log_dir,
            seed: 3,
            num_cpu: 4,
            num_timesteps: 40,
            render: false,
            shape_reward: true,
        }
    }

    /// A log directory as a feature observation training run leaves it.
    fn trained_run(name: &str) -> Result<PathBuf> {
        let log_dir = temp_dir().join(format!("arm_ddpg_{name}_{}", std::process::id()));
        fs::create_dir_all(&log_dir)?;
        let train_args = Cli::parse_from([
            "train",
            "--srl-model", "joints-position",
            "--num-stack", "2",
        ])
        .args;
        write_json(&train_args, log_dir.join("args.json"))?;
        write_json(&EnvGlobals { action_repeat: 2 }, log_dir.join("env_globals.json"))?;

        let agent = DDPG::new(&Device::Cpu, DDPG_Config::mlp(&[8], &[2]), true, 100)?;
        agent.save(&checkpoint_path(&log_dir))?;
        Ok(log_dir)
    }

    #[test]
    fn log_dirs_must_name_the_algorithm() {
        let args = replay_args(temp_dir().join("ppo_run_that_does_not_exist"));
        let err = replay(&args, &Device::Cpu).unwrap_err().to_string();
        assert!(err.contains("RL algo not supported for replay"), "{err}");
    }

    #[test]
    fn replays_a_saved_run() -> Result<()> {
        let log_dir = trained_run("ddpg_replay")?;
        let returns = replay(&replay_args(log_dir.clone()), &Device::Cpu)?;
        assert!(returns.iter().all(|r| r.is_finite()));
        fs::remove_dir_all(log_dir)?;
        Ok(())
    }

    #[test]
    fn replay_is_deterministic() -> Result<()> {
        let log_dir = trained_run("ddpg_deterministic")?;
        let mut agent = DDPG::load(&checkpoint_path(&log_dir), &Device::Cpu)?;
        let run = |agent: &mut DDPG| -> Result<Vec<f64>> {
            let config = ArmEnvConfig {
                observation: ObservationMode::JointsPosition,
                shape_reward: true,
                max_steps: 5,
                ..Default::default()
            };
            let mut env = make_env(ARM_ENV_ID, config, 2, false)?;
            run_policy(env.as_mut(), agent, 20, 11)
        };
        let first = run(&mut agent)?;
        // episodes last at most 5 steps
        assert!(first.len() >= 4);
        assert_eq!(first, run(&mut agent)?);
        fs::remove_dir_all(log_dir)?;
        Ok(())
    }
}
