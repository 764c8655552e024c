use {
    candle_core::{
        Device,
        Result,
        Tensor,
    },
    serde::{
        Deserialize,
        Serialize,
    },
    strum::{
        Display,
        EnumString,
    },
};


/// Which kind of action noise to use for exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ActionNoiseKind {
    None,
    Normal,
    Ou,
}

/// The parameters of an action noise process, as persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionNoiseSpec {
    Normal {
        mu: f64,
        sigma: f64,
    },
    OrnsteinUhlenbeck {
        mu: f64,
        theta: f64,
        sigma: f64,
    },
}
impl ActionNoiseSpec {
    /// The noise chosen on the command line, centered on zero.
    pub fn from_kind(
        kind: ActionNoiseKind,
        sigma: f64,
    ) -> Option<Self> {
        match kind {
            ActionNoiseKind::None => None,
            ActionNoiseKind::Normal => Some(Self::Normal { mu: 0.0, sigma }),
            ActionNoiseKind::Ou => Some(Self::OrnsteinUhlenbeck {
                mu: 0.0,
                theta: 0.15,
                sigma,
            }),
        }
    }

    pub fn build(
        &self,
        size_action: usize,
        device: &Device,
    ) -> Result<ActionNoise> {
        Ok(match *self {
            Self::Normal { mu, sigma } => {
                ActionNoise::Normal(NormalNoise::new(mu, sigma, size_action, device))
            }
            Self::OrnsteinUhlenbeck { mu, theta, sigma } => {
                ActionNoise::OrnsteinUhlenbeck(OuNoise::new(mu, theta, sigma, size_action, device)?)
            }
        })
    }
}


/// Uncorrelated gaussian noise, a fresh draw on every call.
pub struct NormalNoise {
    mu: f64,
    sigma: f64,
    size_action: usize,
    device: Device,
}
impl NormalNoise {
    pub fn new(
        mu: f64,
        sigma: f64,
        size_action: usize,
        device: &Device,
    ) -> Self {
        Self {
            mu,
            sigma,
            size_action,
            device: device.clone(),
        }
    }

    pub fn sample(&mut self) -> Result<Tensor> {
        Tensor::randn(self.mu, self.sigma, self.size_action, &self.device)
    }
}


/// Ornstein-Uhlenbeck process.
///
/// `x[t] = x[t-1] + theta * (mu - x[t-1]) + sigma * N(0, 1)`
///
/// The state starts at `mu` and is put back there by [`OuNoise::reset`].
pub struct OuNoise {
    mu: f64,
    theta: f64,
    sigma: f64,
    state: Tensor,
}
impl OuNoise {
    pub fn new(
        mu: f64,
        theta: f64,
        sigma: f64,
        size_action: usize,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            mu,
            theta,
            sigma,
            state: Tensor::full(mu, size_action, device)?,
        })
    }

    pub fn sample(&mut self) -> Result<Tensor> {
        let rand = Tensor::randn_like(&self.state, 0.0, 1.0)?;
        let dx = ((self.theta * (self.mu - &self.state)?)? + (self.sigma * rand)?)?;
        self.state = (&self.state + dx)?;
        Ok(self.state.clone())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.state = Tensor::full(self.mu, self.state.dims(), self.state.device())?;
        Ok(())
    }
}


/// Action noise added to the actor output while exploring.
pub enum ActionNoise {
    Normal(NormalNoise),
    OrnsteinUhlenbeck(OuNoise),
}
impl ActionNoise {
    pub fn sample(&mut self) -> Result<Tensor> {
        match self {
            Self::Normal(noise) => noise.sample(),
            Self::OrnsteinUhlenbeck(noise) => noise.sample(),
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        match self {
            Self::Normal(_) => Ok(()),
            Self::OrnsteinUhlenbeck(noise) => noise.reset(),
        }
    }
}


/// Adaptive parameter noise.
///
/// Keeps a current perturbation scale for the actor weights and nudges it so
/// that the perturbed policy's actions stay about `desired_action_stddev` away
/// from the unperturbed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParamNoise {
    pub initial_stddev: f64,
    pub desired_action_stddev: f64,
    pub adoption_coefficient: f64,
    pub current_stddev: f64,
}
impl AdaptiveParamNoise {
    pub fn new(
        initial_stddev: f64,
        desired_action_stddev: f64,
    ) -> Self {
        Self {
            initial_stddev,
            desired_action_stddev,
            adoption_coefficient: 1.01,
            current_stddev: initial_stddev,
        }
    }

    /// Shrink the scale when the measured distance is too large, grow it otherwise.
    pub fn adapt(
        &mut self,
        distance: f64,
    ) {
        if distance > self.desired_action_stddev {
            self.current_stddev /= self.adoption_coefficient;
        } else {
            self.current_stddev *= self.adoption_coefficient;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_ou_noise_is_its_mean() -> Result<()> {
        let mut noise = OuNoise::new(0.3, 0.0, 0.0, 4, &Device::Cpu)?;
        for _ in 0..50 {
            let sample = noise.sample()?.to_vec1::<f64>()?;
            assert_eq!(sample, vec![0.3; 4]);
        }
        noise.reset()?;
        assert_eq!(noise.sample()?.to_vec1::<f64>()?, vec![0.3; 4]);
        Ok(())
    }

    #[test]
    fn ou_noise_is_pulled_back_to_mean_after_reset() -> Result<()> {
        let mut noise = OuNoise::new(-0.5, 0.15, 0.2, 2, &Device::Cpu)?;
        for _ in 0..20 {
            noise.sample()?;
        }
        noise.reset()?;
        assert_eq!(noise.state.to_vec1::<f64>()?, vec![-0.5; 2]);
        Ok(())
    }

    #[test]
    fn normal_noise_has_action_shape() -> Result<()> {
        let mut noise = NormalNoise::new(0.0, 0.2, 3, &Device::Cpu);
        assert_eq!(noise.sample()?.dims(), &[3]);
        Ok(())
    }

    #[test]
    fn action_noise_kind_parses_cli_names() {
        assert_eq!("ou".parse::<ActionNoiseKind>().unwrap(), ActionNoiseKind::Ou);
        assert_eq!("none".parse::<ActionNoiseKind>().unwrap(), ActionNoiseKind::None);
        assert!(ActionNoiseSpec::from_kind(ActionNoiseKind::None, 0.2).is_none());
    }

    #[test]
    fn param_noise_scale_moves_by_fixed_factor() {
        let mut noise = AdaptiveParamNoise::new(0.2, 0.2);
        noise.adapt(0.5);
        assert!((noise.current_stddev - 0.2 / 1.01).abs() < 1e-12);
        noise.adapt(0.0);
        noise.adapt(0.0);
        assert!((noise.current_stddev - 0.2 * 1.01).abs() < 1e-12);
    }
}
