use {
    super::{
        kinds_for,
        Algorithm,
        ActorKind,
        ActorNetwork,
        CriticKind,
        CriticNetwork,
        NetworkMeta,
        OffPolicyAlgorithm,
        RunMode,
    },
    crate::{
        components::{
            ActionNoise,
            AdaptiveParamNoise,
            Memory,
            RunningMeanStd,
            Transition,
        },
        configs::DDPG_Config,
        util::mean_std,
    },
    anyhow::{
        anyhow,
        bail,
    },
    candle_core::{
        backprop::GradStore,
        DType,
        Device,
        Error,
        Module,
        Result,
        Tensor,
        Var,
    },
    candle_nn::{
        AdamW,
        Optimizer,
        ParamsAdamW,
        VarBuilder,
        VarMap,
    },
    std::{
        collections::{
            BTreeMap,
            HashMap,
        },
        sync::MutexGuard,
    },
    tracing::info,
};

fn lock(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("VarMap lock is poisoned".to_owned()))
}

fn vars_with_prefix(
    varmap: &VarMap,
    prefix: &str,
) -> Result<Vec<(String, Var)>> {
    Ok(lock(varmap)?
        .iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect())
}

/// `target = tau * network + (1 - tau) * target` for every variable of the network.
fn track(
    varmap: &VarMap,
    target_prefix: &str,
    network_prefix: &str,
    tau: f64,
) -> Result<()> {
    let data = lock(varmap)?;
    for (name, var) in data.iter() {
        let Some(rest) = name.strip_prefix(network_prefix) else {
            continue;
        };
        if let Some(target) = data.get(&format!("{target_prefix}{rest}")) {
            target.set(&((tau * var.as_tensor())? + ((1.0 - tau) * target.as_tensor())?)?)?;
        }
    }
    Ok(())
}

/// Copy the network into the target with gaussian noise on every weight.
///
/// Layer norm parameters are copied as they are.
fn perturb(
    varmap: &VarMap,
    target_prefix: &str,
    network_prefix: &str,
    stddev: f64,
) -> Result<()> {
    let data = lock(varmap)?;
    for (name, var) in data.iter() {
        let Some(rest) = name.strip_prefix(network_prefix) else {
            continue;
        };
        let Some(target) = data.get(&format!("{target_prefix}{rest}")) else {
            continue;
        };
        if rest.starts_with("ln-") {
            target.set(var.as_tensor())?;
        } else {
            let noise = var.as_tensor().randn_like(0.0, stddev)?;
            target.set(&(var.as_tensor() + noise)?)?;
        }
    }
    Ok(())
}

/// Rescale gradients so that their global norm is at most `max_norm`.
fn clip_grad_norm(
    grads: &mut GradStore,
    vars: &[Var],
    max_norm: f64,
) -> Result<f64> {
    let mut total = 0.0;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad.sqr()?.sum_all()?.to_scalar::<f64>()?;
        }
    }
    let norm = total.sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * scale)?);
            }
        }
    }
    Ok(norm)
}

fn tensor_mean_std(xs: &Tensor) -> Result<(f64, f64)> {
    Ok(mean_std(&xs.flatten_all()?.to_vec1::<f64>()?))
}


struct Actor {
    varmap: VarMap,
    vars: Vec<Var>,
    network: ActorNetwork,
    target_network: ActorNetwork,
    // only present with parameter noise
    perturbed_network: Option<ActorNetwork>,
    adaptive_network: Option<ActorNetwork>,
}

impl Actor {
    fn new(
        device: &Device,
        kind: ActorKind,
        observation_shape: &[usize],
        nb_actions: usize,
        layer_norm: bool,
        param_noise: bool,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, device);

        let make_network = |prefix: &str| {
            ActorNetwork::new(kind, observation_shape, nb_actions, layer_norm, vb.pp(prefix))
        };

        let network = make_network("actor")?;
        let target_network = make_network("target-actor")?;
        let (perturbed_network, adaptive_network) = if param_noise {
            (
                Some(make_network("perturbed-actor")?),
                Some(make_network("adaptive-actor")?),
            )
        } else {
            (None, None)
        };

        // this sets the two networks to be equal to each other using tau = 1.0
        track(&varmap, "target-actor.", "actor.", 1.0)?;

        let vars = vars_with_prefix(&varmap, "actor.")?
            .into_iter()
            .map(|(_, var)| var)
            .collect();

        Ok(Self {
            varmap,
            vars,
            network,
            target_network,
            perturbed_network,
            adaptive_network,
        })
    }

    fn track(
        &self,
        tau: f64,
    ) -> Result<()> {
        track(&self.varmap, "target-actor.", "actor.", tau)
    }

    fn perturb(
        &self,
        stddev: f64,
    ) -> Result<()> {
        perturb(&self.varmap, "perturbed-actor.", "actor.", stddev)
    }

    fn perturb_adaptive(
        &self,
        stddev: f64,
    ) -> Result<()> {
        perturb(&self.varmap, "adaptive-actor.", "actor.", stddev)
    }
}


struct Critic {
    varmap: VarMap,
    vars: Vec<Var>,
    // hidden dense weights, the ones that get L2 regularized
    regularized: Vec<Var>,
    network: CriticNetwork,
    target_network: CriticNetwork,
}

impl Critic {
    fn new(
        device: &Device,
        kind: CriticKind,
        observation_shape: &[usize],
        nb_actions: usize,
        layer_norm: bool,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, device);

        let make_network = |prefix: &str| {
            CriticNetwork::new(kind, observation_shape, nb_actions, layer_norm, vb.pp(prefix))
        };

        let network = make_network("critic")?;
        let target_network = make_network("target-critic")?;

        // this sets the two networks to be equal to each other using tau = 1.0
        track(&varmap, "target-critic.", "critic.", 1.0)?;

        let named = vars_with_prefix(&varmap, "critic.")?;
        let regularized = named
            .iter()
            .filter(|(name, _)| {
                name.strip_prefix("critic.")
                    .is_some_and(|rest| rest.starts_with("fc") && rest.ends_with(".weight"))
            })
            .map(|(_, var)| var.clone())
            .collect();
        let vars = named.into_iter().map(|(_, var)| var).collect();

        Ok(Self {
            varmap,
            vars,
            regularized,
            network,
            target_network,
        })
    }

    fn track(
        &self,
        tau: f64,
    ) -> Result<()> {
        track(&self.varmap, "target-critic.", "critic.", tau)
    }
}


/// Deep Deterministic Policy Gradient.
///
/// The agent owns its actor and critic (each with a target copy), their
/// optimizers, the replay memory, the exploration noise and the running
/// statistics used for normalization.
#[allow(clippy::upper_case_acronyms)]
pub struct DDPG {
    config: DDPG_Config,
    meta: NetworkMeta,
    device: Device,
    actor: Actor,
    actor_optim: AdamW,
    critic: Critic,
    critic_optim: AdamW,
    memory: Memory,
    action_noise: Option<ActionNoise>,
    param_noise: Option<AdaptiveParamNoise>,
    obs_rms: Option<RunningMeanStd>,
    ret_rms: Option<RunningMeanStd>,
    // fixed observations for the reference statistics, sampled once
    stats_sample: Option<Tensor>,
}

impl DDPG {
    /// A fresh agent with networks chosen by the rank of the observation shape.
    pub fn new(
        device: &Device,
        config: DDPG_Config,
        layer_norm: bool,
        memory_limit: usize,
    ) -> anyhow::Result<Self> {
        let (actor, critic) = kinds_for(&config.observation_shape);
        let meta = NetworkMeta::new(actor, critic, config.nb_actions(), layer_norm);
        let memory = Memory::new(memory_limit, &config.action_shape, &config.observation_shape);
        Self::from_meta(device, config, meta, memory)
    }

    /// Build an agent with the networks named in `meta`.
    pub fn from_meta(
        device: &Device,
        config: DDPG_Config,
        meta: NetworkMeta,
        memory: Memory,
    ) -> anyhow::Result<Self> {
        let (actor_kind, critic_kind) = meta.resolve()?;
        if meta.nb_actions != config.nb_actions() {
            bail!(
                "Networks are built for {} actions but the action shape is {:?}",
                meta.nb_actions,
                config.action_shape,
            );
        }

        let actor = Actor::new(
            device,
            actor_kind,
            &config.observation_shape,
            meta.nb_actions,
            meta.layer_norm,
            config.param_noise.is_some(),
        )?;
        let actor_optim = AdamW::new(
            actor.vars.clone(),
            ParamsAdamW {
                lr: config.actor_lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let critic = Critic::new(
            device,
            critic_kind,
            &config.observation_shape,
            meta.nb_actions,
            meta.layer_norm,
        )?;
        let critic_optim = AdamW::new(
            critic.vars.clone(),
            ParamsAdamW {
                lr: config.critic_lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut agent = Self {
            meta,
            device: device.clone(),
            actor,
            actor_optim,
            critic,
            critic_optim,
            memory,
            action_noise: None,
            param_noise: None,
            obs_rms: None,
            ret_rms: None,
            stats_sample: None,
            config: config.clone(),
        };
        agent.adopt_config(config)?;
        Ok(agent)
    }

    /// Take over the hyperparameters, resetting the noise processes and
    /// (if the normalization flags changed) the running statistics.
    pub(super) fn adopt_config(
        &mut self,
        config: DDPG_Config,
    ) -> anyhow::Result<()> {
        if config.observation_shape != self.config.observation_shape
            || config.action_shape != self.config.action_shape
        {
            bail!(
                "Config shapes {:?} / {:?} do not match the agent's {:?} / {:?}",
                config.observation_shape,
                config.action_shape,
                self.config.observation_shape,
                self.config.action_shape,
            );
        }
        if config.param_noise.is_some() != self.actor.perturbed_network.is_some() {
            bail!("Parameter noise can not be switched on or off for an existing agent");
        }

        self.action_noise = config
            .action_noise
            .as_ref()
            .map(|spec| spec.build(config.nb_actions(), &self.device))
            .transpose()?;
        self.param_noise = config.param_noise.clone();
        if config.normalize_observations != self.obs_rms.is_some() {
            let dim = config.observation_shape.iter().product();
            self.obs_rms = config.normalize_observations.then(|| RunningMeanStd::new(dim));
        }
        if config.normalize_returns != self.ret_rms.is_some() {
            self.ret_rms = config.normalize_returns.then(|| RunningMeanStd::new(1));
        }
        self.actor_optim.set_learning_rate(config.actor_lr);
        self.critic_optim.set_learning_rate(config.critic_lr);
        self.stats_sample = None;
        self.config = config;

        if let Some(param_noise) = &self.param_noise {
            self.actor.perturb(param_noise.current_stddev)?;
        }
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn meta(&self) -> &NetworkMeta {
        &self.meta
    }

    pub fn param_noise(&self) -> Option<&AdaptiveParamNoise> {
        self.param_noise.as_ref()
    }

    /// Every network variable and running statistic, by name.
    pub(super) fn named_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let mut tensors = HashMap::new();
        for varmap in [&self.actor.varmap, &self.critic.varmap] {
            for (name, var) in lock(varmap)?.iter() {
                tensors.insert(name.clone(), var.as_tensor().clone());
            }
        }
        for (prefix, rms) in [("obs_rms", &self.obs_rms), ("ret_rms", &self.ret_rms)] {
            if let Some(rms) = rms {
                tensors.insert(format!("{prefix}.mean"), Tensor::new(rms.mean(), &self.device)?);
                tensors.insert(format!("{prefix}.var"), Tensor::new(rms.var(), &self.device)?);
                tensors.insert(format!("{prefix}.count"), Tensor::new(&[rms.count()], &self.device)?);
            }
        }
        Ok(tensors)
    }

    /// The inverse of [`DDPG::named_tensors`]. Every name the agent uses must be present.
    pub(super) fn load_named_tensors(
        &mut self,
        tensors: &HashMap<String, Tensor>,
    ) -> anyhow::Result<()> {
        let get = |name: &str| {
            tensors
                .get(name)
                .ok_or_else(|| anyhow!("Checkpoint is missing the tensor {name}"))
        };

        for varmap in [&self.actor.varmap, &self.critic.varmap] {
            for (name, var) in lock(varmap)?.iter() {
                var.set(&get(name)?.to_dtype(DType::F64)?)?;
            }
        }
        for (prefix, rms) in [("obs_rms", &mut self.obs_rms), ("ret_rms", &mut self.ret_rms)] {
            if let Some(rms) = rms {
                let count = get(&format!("{prefix}.count"))?.to_vec1::<f64>()?;
                *rms = RunningMeanStd::from_parts(
                    get(&format!("{prefix}.mean"))?.to_vec1::<f64>()?,
                    get(&format!("{prefix}.var"))?.to_vec1::<f64>()?,
                    count.first().copied().ok_or_else(|| anyhow!("Empty {prefix}.count"))?,
                );
            }
        }
        if let Some(param_noise) = &self.param_noise {
            self.actor.perturb(param_noise.current_stddev)?;
        }
        Ok(())
    }

    fn batch_of_one(
        &self,
        observation: &[f64],
    ) -> Result<Tensor> {
        let mut dims = vec![1];
        dims.extend(&self.config.observation_shape);
        Tensor::from_vec(observation.to_vec(), dims, &self.device)
    }

    fn normalize_observations(
        &self,
        observations: &Tensor,
    ) -> Result<Tensor> {
        let (lo, hi) = self.config.observation_range;
        match &self.obs_rms {
            Some(rms) => rms.normalize_tensor(observations, &self.config.observation_shape, (lo, hi)),
            None => observations.clamp(lo, hi),
        }
    }

    /// From the critic's output to an actual value.
    fn denormalize_q(
        &self,
        q: &Tensor,
    ) -> Result<Tensor> {
        let q = match self.config.return_range {
            Some((lo, hi)) => q.clamp(lo, hi)?,
            None => q.clone(),
        };
        match &self.ret_rms {
            Some(rms) => rms.denormalize_tensor(&q, &[1]),
            None => Ok(q),
        }
    }

    /// From an actual value to the critic's output scale.
    fn normalize_returns(
        &self,
        returns: &Tensor,
    ) -> Result<Tensor> {
        let (lo, hi) = self.config.return_range.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        match &self.ret_rms {
            Some(rms) => rms.normalize_tensor(returns, &[1], (lo, hi)),
            None => returns.clamp(lo, hi),
        }
    }
}

impl Algorithm for DDPG {
    type Config = DDPG_Config;

    fn config(&self) -> &DDPG_Config {
        &self.config
    }

    fn act(
        &mut self,
        observation: &[f64],
        mode: RunMode,
    ) -> Result<(Vec<f64>, f64)> {
        let explore = mode == RunMode::Train;
        let obs = self.normalize_observations(&self.batch_of_one(observation)?)?;

        let actions = self.actor.network.forward(&obs)?;
        let q = self
            .denormalize_q(&self.critic.network.forward(&obs, &actions)?)?
            .reshape(())?
            .to_scalar::<f64>()?;

        let mut actions = match (&self.actor.perturbed_network, explore) {
            (Some(perturbed), true) => perturbed.forward(&obs)?,
            _ => actions,
        }
        .squeeze(0)?;
        if explore {
            if let Some(noise) = &mut self.action_noise {
                actions = (actions + noise.sample()?)?;
            }
        }
        let (lo, hi) = self.config.action_range;
        Ok((actions.clamp(lo, hi)?.to_vec1::<f64>()?, q))
    }

    fn train(&mut self) -> Result<Option<(f64, f64)>> {
        let batch = match self.memory.sample(self.config.batch_size, &self.device)? {
            Some(batch) => batch,
            None => return Ok(None),
        };
        let obs0 = self.normalize_observations(&batch.observations)?;
        let obs1 = self.normalize_observations(&batch.next_observations)?;

        let q_obs1 = self
            .critic
            .target_network
            .forward(&obs1, &self.actor.target_network.forward(&obs1)?)?;
        let q_obs1 = match &self.ret_rms {
            Some(rms) => rms.denormalize_tensor(&q_obs1, &[1])?,
            None => q_obs1,
        };
        let not_done = batch.terminals.affine(-1.0, 1.0)?;
        let target_q = (&batch.rewards + (self.config.gamma * (not_done * q_obs1)?)?)?.detach();

        if let Some(rms) = &mut self.ret_rms {
            let returns = target_q.flatten_all()?.to_vec1::<f64>()?;
            rms.update_batch(&returns.iter().map(|r| [*r]).collect::<Vec<_>>());
        }

        let normalized_q = self.critic.network.forward(&obs0, &batch.actions)?;
        let mut critic_loss = (normalized_q - self.normalize_returns(&target_q)?)?
            .sqr()?
            .mean_all()?;
        if self.config.critic_l2_reg > 0.0 {
            let mut l2 = Tensor::zeros((), DType::F64, &self.device)?;
            for var in &self.critic.regularized {
                l2 = (l2 + var.as_tensor().sqr()?.sum_all()?)?;
            }
            critic_loss = (critic_loss + (0.5 * self.config.critic_l2_reg * l2)?)?;
        }

        let actor_q = self
            .critic
            .network
            .forward(&obs0, &self.actor.network.forward(&obs0)?)?;
        let actor_loss = self.denormalize_q(&actor_q)?.mean_all()?.neg()?;

        // both gradients are taken at the current parameters before either step
        let mut actor_grads = actor_loss.backward()?;
        if let Some(clip_norm) = self.config.clip_norm {
            clip_grad_norm(&mut actor_grads, &self.actor.vars, clip_norm)?;
        }
        let critic_grads = critic_loss.backward()?;
        self.actor_optim.step(&actor_grads)?;
        self.critic_optim.step(&critic_grads)?;

        Ok(Some((
            critic_loss.to_scalar::<f64>()?,
            actor_loss.to_scalar::<f64>()?,
        )))
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(noise) = &mut self.action_noise {
            noise.reset()?;
        }
        if let Some(param_noise) = &self.param_noise {
            self.actor.perturb(param_noise.current_stddev)?;
        }
        Ok(())
    }

    fn stats(&mut self) -> Result<BTreeMap<String, f64>> {
        if self.stats_sample.is_none() {
            self.stats_sample = self
                .memory
                .sample(self.config.batch_size, &self.device)?
                .map(|batch| batch.observations);
        }

        let mut stats = BTreeMap::new();
        if let Some(rms) = &self.obs_rms {
            stats.insert("obs_rms_mean".to_owned(), mean_std(rms.mean()).0);
            stats.insert("obs_rms_std".to_owned(), mean_std(&rms.std()).0);
        }
        if let Some(rms) = &self.ret_rms {
            stats.insert("ret_rms_mean".to_owned(), mean_std(rms.mean()).0);
            stats.insert("ret_rms_std".to_owned(), mean_std(&rms.std()).0);
        }
        if let Some(sample) = &self.stats_sample {
            let obs = self.normalize_observations(sample)?;
            let actions = self.actor.network.forward(&obs)?;
            let q = self.denormalize_q(&self.critic.network.forward(&obs, &actions)?)?;

            let (q_mean, q_std) = tensor_mean_std(&q)?;
            stats.insert("reference_Q_mean".to_owned(), q_mean);
            stats.insert("reference_Q_std".to_owned(), q_std);
            let (action_mean, action_std) = tensor_mean_std(&actions)?;
            stats.insert("reference_action_mean".to_owned(), action_mean);
            stats.insert("reference_action_std".to_owned(), action_std);

            if let Some(perturbed) = &self.actor.perturbed_network {
                let (mean, std) = tensor_mean_std(&perturbed.forward(&obs)?)?;
                stats.insert("reference_perturbed_action_mean".to_owned(), mean);
                stats.insert("reference_perturbed_action_std".to_owned(), std);
            }
        }
        if let Some(param_noise) = &self.param_noise {
            stats.insert("param_noise_stddev".to_owned(), param_noise.current_stddev);
        }
        Ok(stats)
    }
}

impl OffPolicyAlgorithm for DDPG {
    fn store(
        &mut self,
        mut transition: Transition,
    ) {
        transition.reward *= self.config.reward_scale;
        info!(
            concat!(
                "\nPushing to replay memory:",
                "\nA: {action:?}",
                "\nR: {reward:?}",
                "\nD: {done:?}",
            ),
            action = transition.action,
            reward = transition.reward,
            done = transition.done,
        );
        if let Some(rms) = &mut self.obs_rms {
            rms.update(&transition.observation);
        }
        self.memory.append(transition);
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn adapt_param_noise(&mut self) -> Result<Option<f64>> {
        let stddev = match &self.param_noise {
            Some(param_noise) => param_noise.current_stddev,
            None => return Ok(None),
        };
        let Some(adaptive) = &self.actor.adaptive_network else {
            return Ok(None);
        };
        let batch = match self.memory.sample(self.config.batch_size, &self.device)? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        self.actor.perturb_adaptive(stddev)?;
        let obs = self.normalize_observations(&batch.observations)?;
        let distance = (self.actor.network.forward(&obs)? - adaptive.forward(&obs)?)?
            .sqr()?
            .mean_all()?
            .sqrt()?
            .to_scalar::<f64>()?;

        if let Some(param_noise) = &mut self.param_noise {
            param_noise.adapt(distance);
        }
        // checkpoints carry the adapted scale
        self.config.param_noise = self.param_noise.clone();
        Ok(Some(distance))
    }

    fn update_target_net(&mut self) -> Result<()> {
        self.actor.track(self.config.tau)?;
        self.critic.track(self.config.tau)
    }
}
