use {
    anyhow::anyhow,
    candle_core::{
        Error,
        Module,
        Result,
        Tensor,
        D,
    },
    candle_nn::{
        conv2d,
        func,
        linear,
        sequential::seq,
        Activation,
        Conv2dConfig,
        Init,
        Linear,
        Sequential,
        VarBuilder,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    std::str::FromStr,
    strum::{
        Display,
        EnumIter,
        EnumString,
        IntoEnumIterator,
    },
};

const MLP_HIDDEN: (usize, usize) = (400, 300);
const CNN_HIDDEN: usize = 256;
// (out_channels, kernel, stride)
const CNN_CONVS: [(usize, usize, usize); 3] = [(32, 8, 4), (64, 4, 2), (64, 3, 1)];
const FINAL_INIT: f64 = 3e-3;
const LAYER_NORM_EPS: f64 = 1e-5;


/// The actor topologies that can be recorded in a checkpoint.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum ActorKind {
    ActorMLP,
    ActorCNN,
}

/// The critic topologies that can be recorded in a checkpoint.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum CriticKind {
    CriticMLP,
    CriticCNN,
}

/// Channel-first image observations get convolutional networks, everything
/// else gets fully-connected ones.
pub fn kinds_for(observation_shape: &[usize]) -> (ActorKind, CriticKind) {
    if observation_shape.len() == 3 {
        (ActorKind::ActorCNN, CriticKind::CriticCNN)
    } else {
        (ActorKind::ActorMLP, CriticKind::CriticMLP)
    }
}


/// The network half of a checkpoint.
///
/// Network types are stored by name and resolved through [`ActorKind`] and
/// [`CriticKind`] when the checkpoint is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMeta {
    pub actor_name: String,
    pub critic_name: String,
    pub nb_actions: usize,
    pub layer_norm: bool,
}
impl NetworkMeta {
    pub fn new(
        actor: ActorKind,
        critic: CriticKind,
        nb_actions: usize,
        layer_norm: bool,
    ) -> Self {
        Self {
            actor_name: actor.to_string(),
            critic_name: critic.to_string(),
            nb_actions,
            layer_norm,
        }
    }

    pub fn resolve(&self) -> anyhow::Result<(ActorKind, CriticKind)> {
        let actor = ActorKind::from_str(&self.actor_name).map_err(|_| {
            anyhow!(
                "Unsupported actor network: {}, expected one of {}",
                self.actor_name,
                known_names::<ActorKind>(),
            )
        })?;
        let critic = CriticKind::from_str(&self.critic_name).map_err(|_| {
            anyhow!(
                "Unsupported critic network: {}, expected one of {}",
                self.critic_name,
                known_names::<CriticKind>(),
            )
        })?;
        Ok((actor, critic))
    }
}

fn known_names<K: IntoEnumIterator + ToString>() -> String {
    K::iter().map(|kind| kind.to_string()).collect::<Vec<_>>().join(", ")
}


/// Layer normalization over the last dimension.
///
/// Built from plain tensor ops so it works in `f64` and stays differentiable.
#[derive(Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
}
impl LayerNorm {
    pub fn new(
        size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
        })
    }
}
impl Module for LayerNorm {
    fn forward(
        &self,
        xs: &Tensor,
    ) -> Result<Tensor> {
        let centered = xs.broadcast_sub(&xs.mean_keepdim(D::Minus1)?)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        centered
            .broadcast_div(&(var + LAYER_NORM_EPS)?.sqrt()?)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Dense layer, optional layer norm, relu.
fn dense(
    seq: Sequential,
    in_dim: usize,
    out_dim: usize,
    layer_norm_on: bool,
    index: usize,
    vb: &VarBuilder,
) -> Result<Sequential> {
    let mut seq = seq.add(linear(in_dim, out_dim, vb.pp(format!("fc{index}")))?);
    if layer_norm_on {
        seq = seq.add(LayerNorm::new(out_dim, vb.pp(format!("ln-fc{index}")))?);
    }
    Ok(seq.add(Activation::Relu))
}

/// Output layer with weights and biases drawn from `[-3e-3, 3e-3]`.
fn output(
    in_dim: usize,
    out_dim: usize,
    vb: VarBuilder,
) -> Result<Linear> {
    let init = Init::Uniform {
        lo: -FINAL_INIT,
        up: FINAL_INIT,
    };
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bs = vb.get_with_hints(out_dim, "bias", init)?;
    Ok(Linear::new(ws, Some(bs)))
}

/// The three convolutions followed by a flatten.
///
/// Returns the trunk and the size of its flattened output.
fn conv_trunk(
    observation_shape: &[usize],
    layer_norm_on: bool,
    vb: &VarBuilder,
) -> Result<(Sequential, usize)> {
    let (mut channels, mut height, mut width) = match observation_shape {
        [c, h, w] => (*c, *h, *w),
        _ => return Err(Error::Msg(format!(
            "Convolutional networks need (C, H, W) observations, got {observation_shape:?}"
        ))),
    };

    let mut trunk = seq();
    for (i, &(out_channels, kernel, stride)) in CNN_CONVS.iter().enumerate() {
        if height < kernel || width < kernel {
            return Err(Error::Msg(format!(
                "Observation {observation_shape:?} is too small for the convolutions"
            )));
        }
        height = (height - kernel) / stride + 1;
        width = (width - kernel) / stride + 1;

        trunk = trunk.add(conv2d(
            channels,
            out_channels,
            kernel,
            Conv2dConfig {
                stride,
                ..Default::default()
            },
            vb.pp(format!("conv{i}")),
        )?);
        channels = out_channels;
        if layer_norm_on {
            // normalize each sample over all of (C, H, W)
            let norm = LayerNorm::new(channels * height * width, vb.pp(format!("ln-conv{i}")))?;
            trunk = trunk.add(func(move |xs| {
                let dims = xs.dims().to_vec();
                norm.forward(&xs.flatten_from(1)?)?.reshape(dims)
            }));
        }
        trunk = trunk.add(Activation::Relu);
    }
    let trunk = trunk.add(func(|xs| xs.flatten_from(1)));
    Ok((trunk, channels * height * width))
}


/// The deterministic policy, mapping observations to actions in `[-1, 1]`.
pub struct ActorNetwork {
    network: Sequential,
}
impl ActorNetwork {
    pub fn new(
        kind: ActorKind,
        observation_shape: &[usize],
        nb_actions: usize,
        layer_norm_on: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let network = match kind {
            ActorKind::ActorMLP => {
                let size_state = observation_shape.iter().product();
                let net = seq().add(func(|xs| xs.flatten_from(1)));
                let net = dense(net, size_state, MLP_HIDDEN.0, layer_norm_on, 0, &vb)?;
                let net = dense(net, MLP_HIDDEN.0, MLP_HIDDEN.1, layer_norm_on, 1, &vb)?;
                net.add(output(MLP_HIDDEN.1, nb_actions, vb.pp("out"))?)
            }
            ActorKind::ActorCNN => {
                let (net, flat) = conv_trunk(observation_shape, layer_norm_on, &vb)?;
                let net = dense(net, flat, CNN_HIDDEN, layer_norm_on, 0, &vb)?;
                let net = dense(net, CNN_HIDDEN, CNN_HIDDEN, layer_norm_on, 1, &vb)?;
                net.add(output(CNN_HIDDEN, nb_actions, vb.pp("out"))?)
            }
        };
        Ok(Self {
            network: network.add(func(|xs| xs.tanh())),
        })
    }
}
impl Module for ActorNetwork {
    fn forward(
        &self,
        xs: &Tensor,
    ) -> Result<Tensor> {
        self.network.forward(xs)
    }
}


/// The action-value function. The action joins after the first hidden stage.
pub struct CriticNetwork {
    body: Sequential,
    head: Sequential,
}
impl CriticNetwork {
    pub fn new(
        kind: CriticKind,
        observation_shape: &[usize],
        nb_actions: usize,
        layer_norm_on: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (body, hidden) = match kind {
            CriticKind::CriticMLP => {
                let size_state = observation_shape.iter().product();
                let body = seq().add(func(|xs| xs.flatten_from(1)));
                let body = dense(body, size_state, MLP_HIDDEN.0, layer_norm_on, 0, &vb)?;
                (body, (MLP_HIDDEN.0, MLP_HIDDEN.1))
            }
            CriticKind::CriticCNN => {
                let (body, flat) = conv_trunk(observation_shape, layer_norm_on, &vb)?;
                let body = dense(body, flat, CNN_HIDDEN, layer_norm_on, 0, &vb)?;
                (body, (CNN_HIDDEN, CNN_HIDDEN))
            }
        };
        let head = dense(seq(), hidden.0 + nb_actions, hidden.1, layer_norm_on, 1, &vb)?
            .add(output(hidden.1, 1, vb.pp("out"))?);
        Ok(Self {
            body,
            head,
        })
    }

    pub fn forward(
        &self,
        observation: &Tensor,
        action: &Tensor,
    ) -> Result<Tensor> {
        let xs = self.body.forward(observation)?;
        let xs = Tensor::cat(&[&xs, &action.flatten_from(1)?], 1)?;
        self.head.forward(&xs)
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        candle_core::{
            DType,
            Device,
        },
        candle_nn::VarMap,
    };

    #[test]
    fn recorded_names_resolve_through_the_registry() {
        let meta = NetworkMeta::new(ActorKind::ActorCNN, CriticKind::CriticMLP, 2, true);
        assert_eq!(meta.actor_name, "ActorCNN");
        assert_eq!(meta.resolve().unwrap(), (ActorKind::ActorCNN, CriticKind::CriticMLP));

        let unknown = NetworkMeta {
            actor_name: "ActorRNN".to_owned(),
            ..meta.clone()
        };
        let err = unknown.resolve().unwrap_err().to_string();
        assert!(err.contains("Unsupported actor network"), "{err}");
        assert!(err.contains("ActorMLP, ActorCNN"), "{err}");

        let unknown = NetworkMeta {
            critic_name: "Critic".to_owned(),
            ..meta
        };
        assert!(unknown.resolve().is_err());
    }

    #[test]
    fn mlp_networks_have_the_right_output_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let actor = ActorNetwork::new(ActorKind::ActorMLP, &[6], 2, true, vb.pp("actor"))?;
        let critic = CriticNetwork::new(CriticKind::CriticMLP, &[6], 2, true, vb.pp("critic"))?;

        let obs = Tensor::randn(0.0, 1.0, (5, 6), &Device::Cpu)?;
        let actions = actor.forward(&obs)?;
        assert_eq!(actions.dims(), &[5, 2]);
        let max = actions.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(max <= 1.0);
        assert_eq!(critic.forward(&obs, &actions)?.dims(), &[5, 1]);
        Ok(())
    }

    #[test]
    fn layer_norm_normalizes_f64_rows() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let norm = LayerNorm::new(4, vb.pp("ln"))?;
        let xs = Tensor::new(&[[1.0f64, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 50.0]], &Device::Cpu)?;
        let ys = norm.forward(&xs)?;
        for row in ys.to_vec2::<f64>()? {
            let mean = row.iter().sum::<f64>() / 4.0;
            let var = row.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-3);
        }
        Ok(())
    }

    #[test]
    fn cnn_networks_accept_channel_first_images() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let shape = [2, 64, 64];
        let actor = ActorNetwork::new(ActorKind::ActorCNN, &shape, 3, true, vb.pp("actor"))?;
        let critic = CriticNetwork::new(CriticKind::CriticCNN, &shape, 3, true, vb.pp("critic"))?;

        let obs = Tensor::rand(0.0, 1.0, (2, 2, 64, 64), &Device::Cpu)?;
        let actions = actor.forward(&obs)?;
        assert_eq!(actions.dims(), &[2, 3]);
        assert_eq!(critic.forward(&obs, &actions)?.dims(), &[2, 1]);
        Ok(())
    }

    #[test]
    fn tiny_images_are_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        assert!(ActorNetwork::new(ActorKind::ActorCNN, &[1, 6, 6], 2, false, vb).is_err());
        assert_eq!(kinds_for(&[1, 64, 64]).0, ActorKind::ActorCNN);
        assert_eq!(kinds_for(&[4]).1, CriticKind::CriticMLP);
    }
}
