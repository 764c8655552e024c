use {
    super::{
        comm::Communicator,
        stats::{
            History,
            ProgressTable,
        },
        checkpoint_path,
    },
    crate::{
        agents::{
            OffPolicyAlgorithm,
            RunMode,
            SaveableAlgorithm,
        },
        components::Transition,
        configs::TrainConfig,
        envs::Environment,
        util::mean_std,
    },
    anyhow::{
        ensure,
        Result,
    },
    rand::{
        rngs::StdRng,
        Rng,
        SeedableRng,
    },
    std::{
        collections::BTreeMap,
        path::Path,
        time::Instant,
    },
    tracing::{
        info,
        warn,
    },
};


const HISTORY_LEN: usize = 100;

/// Scale an action in `[-1, 1]` to the environment's bounds.
fn scale_action(
    max_action: &[f64],
    action: &[f64],
) -> Result<Vec<f64>> {
    ensure!(
        max_action.len() == action.len(),
        "Action {action:?} does not match the action bounds {max_action:?}",
    );
    Ok(max_action.iter().zip(action).map(|(m, a)| m * a).collect())
}

fn mean(values: &[f64]) -> f64 {
    mean_std(values).0
}

/// Train an off-policy agent for `config.nb_epochs()` epochs.
///
/// Every worker of the group runs this loop on its own environment and agent.
/// After each epoch the statistics are averaged over the group; the root
/// worker then logs them, appends them to the progress table and (with a
/// `log_dir`) writes the table, the agent and the environment states.
///
/// Returns the table of combined statistics, one row per epoch.
pub fn training_loop_off_policy<Alg>(
    env: &mut dyn Environment,
    mut eval_env: Option<&mut dyn Environment>,
    agent: &mut Alg,
    config: &TrainConfig,
    comm: &Communicator,
    log_dir: Option<&Path>,
    seed: u64,
) -> Result<ProgressTable>
where
    Alg: OffPolicyAlgorithm + SaveableAlgorithm,
{
    let action_space = env.action_space();
    let nb_actions = action_space.iter().product::<usize>();
    let max_action = env.action_high();
    ensure!(
        max_action.len() == nb_actions,
        "Action bounds {max_action:?} do not match the action space {action_space:?}",
    );
    warn!("action space: {action_space:?}");
    warn!("observation space: {:?}", env.observation_space());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = ProgressTable::new();
    let mut episode_rewards_history = History::new(HISTORY_LEN);
    let mut eval_episode_rewards_history = History::new(HISTORY_LEN);

    agent.reset()?;
    let mut obs = env.reset(rng.gen())?;
    let mut eval_obs = match eval_env.as_deref_mut() {
        Some(eval_env) => Some(eval_env.reset(rng.gen())?),
        None => None,
    };

    let mut episode_reward = 0.0;
    let mut episode_step = 0;
    let mut episodes = 0;
    let mut t = 0;
    let start_time = Instant::now();

    for epoch in 0..config.nb_epochs() {
        let mut epoch_episode_rewards = Vec::new();
        let mut epoch_episode_steps = Vec::new();
        let mut epoch_actions = Vec::new();
        let mut epoch_qs = Vec::new();
        let mut epoch_actor_losses = Vec::new();
        let mut epoch_critic_losses = Vec::new();
        let mut epoch_adaptive_distances = Vec::new();
        let mut eval_episode_rewards = Vec::new();
        let mut eval_qs = Vec::new();
        let mut epoch_episodes = 0;

        for cycle in 0..config.nb_epoch_cycles() {
            // rollout
            for _ in 0..config.nb_rollout_steps() {
                let (action, q) = agent.act(&obs, RunMode::Train)?;
                ensure!(
                    action.len() == nb_actions,
                    "Agent produced {} actions for the action space {action_space:?}",
                    action.len(),
                );

                let step = env.step(&scale_action(&max_action, &action)?)?;
                t += 1;
                episode_reward += step.reward;
                episode_step += 1;

                epoch_actions.extend_from_slice(&action);
                epoch_qs.push(q);
                let done = step.done();
                agent.store(Transition {
                    observation: std::mem::take(&mut obs),
                    action,
                    reward: step.reward,
                    next_observation: step.observation.clone(),
                    done: step.terminated,
                });
                obs = step.observation;

                if done {
                    info!("Episode {episodes} finished after {episode_step} steps with return {episode_reward}");
                    epoch_episode_rewards.push(episode_reward);
                    episode_rewards_history.push(episode_reward);
                    epoch_episode_steps.push(episode_step as f64);
                    episode_reward = 0.0;
                    episode_step = 0;
                    epoch_episodes += 1;
                    episodes += 1;

                    agent.reset()?;
                    obs = env.reset(rng.gen())?;
                }
            }

            // train
            let interval = config.param_noise_adaption_interval();
            for t_train in 0..config.nb_train_steps() {
                // measured on a sampled batch, so nothing to adapt on an underfilled memory
                if interval > 0 && t_train % interval == 0 {
                    if let Some(distance) = agent.adapt_param_noise()? {
                        epoch_adaptive_distances.push(distance);
                    }
                }
                if let Some((critic_loss, actor_loss)) = agent.train()? {
                    epoch_critic_losses.push(critic_loss);
                    epoch_actor_losses.push(actor_loss);
                }
                agent.update_target_net()?;
            }

            // evaluate
            if let (Some(eval_env), Some(eval_obs)) = (eval_env.as_deref_mut(), eval_obs.as_mut()) {
                let mut eval_episode_reward = 0.0;
                for _ in 0..config.nb_eval_steps() {
                    let (eval_action, eval_q) = agent.act(eval_obs, RunMode::Test)?;
                    let eval_step = eval_env.step(&scale_action(&max_action, &eval_action)?)?;
                    eval_episode_reward += eval_step.reward;
                    eval_qs.push(eval_q);
                    let eval_done = eval_step.done();
                    *eval_obs = eval_step.observation;

                    if eval_done {
                        *eval_obs = eval_env.reset(rng.gen())?;
                        eval_episode_rewards.push(eval_episode_reward);
                        eval_episode_rewards_history.push(eval_episode_reward);
                        eval_episode_reward = 0.0;
                    }
                }
            }
            info!("Finished cycle {cycle} of epoch {epoch}");
        }

        let duration = start_time.elapsed().as_secs_f64();
        let (actions_mean, actions_std) = mean_std(&epoch_actions);
        let mut stats = agent.stats()?;
        stats.extend(
            [
                ("rollout/return", mean(&epoch_episode_rewards)),
                ("rollout/return_history", episode_rewards_history.mean()),
                ("rollout/episode_steps", mean(&epoch_episode_steps)),
                ("rollout/actions_mean", actions_mean),
                ("rollout/actions_std", actions_std),
                ("rollout/Q_mean", mean(&epoch_qs)),
                ("rollout/episodes", epoch_episodes as f64),
                ("train/loss_actor", mean(&epoch_actor_losses)),
                ("train/loss_critic", mean(&epoch_critic_losses)),
                ("train/param_noise_distance", mean(&epoch_adaptive_distances)),
                ("total/duration", duration),
                ("total/steps_per_second", t as f64 / duration),
                ("total/episodes", episodes as f64),
            ]
            .map(|(key, value)| (key.to_owned(), value)),
        );
        if eval_env.is_some() {
            stats.extend(
                [
                    ("eval/return", mean(&eval_episode_rewards)),
                    ("eval/return_history", eval_episode_rewards_history.mean()),
                    ("eval/Q", mean(&eval_qs)),
                    ("eval/episodes", eval_episode_rewards.len() as f64),
                ]
                .map(|(key, value)| (key.to_owned(), value)),
            );
        }

        let mut combined = comm.all_reduce_mean(&stats)?;
        combined.insert("total/epochs".to_owned(), (epoch + 1) as f64);
        combined.insert("total/steps".to_owned(), t as f64);
        table.push(&combined);

        if comm.is_root() {
            log_stats(&combined);
            if let Some(log_dir) = log_dir {
                table.write(&log_dir.join("progress.parquet"))?;
                agent.save(&checkpoint_path(log_dir))?;
                env.write_state(&log_dir.join("env_state.ron"))?;
                env.write_running_average(log_dir)?;
                if let Some(eval_env) = eval_env.as_deref() {
                    eval_env.write_state(&log_dir.join("eval_env_state.ron"))?;
                }
            }
        }
    }
    Ok(table)
}

fn log_stats(combined: &BTreeMap<String, f64>) {
    let width = combined.keys().map(String::len).max().unwrap_or_default();
    for (key, value) in combined {
        warn!("| {key:<width$} | {value:>12.5} |");
    }
}
