//! A wrapper around the Python API of Gymnasium, for running the agent on
//! environments that only exist on the Python side.
use {
    super::{
        Environment,
        Step,
    },
    anyhow::{
        anyhow,
        Error,
        Result,
    },
    pyo3::{
        types::{
            PyDict,
            PyTuple,
        },
        PyErr,
        PyObject,
        Python,
    },
    tracing::info,
};

fn w(res: PyErr) -> Error {
    anyhow!(res)
}

/// Any environment registered with `gymnasium.make` that has a continuous
/// (`Box`) action space and flat or channel-last image observations.
pub struct GymEnv {
    env: PyObject,
    action_space: Vec<usize>,
    action_high: Vec<f64>,
    observation_space: Vec<usize>,
}
impl GymEnv {
    pub fn new(name: &str) -> Result<Box<Self>> {
        let (env, action_space, action_high, observation_space) = Python::with_gil(|py| {
            let sys = py.import("sys")?;
            let version: String = sys.getattr("version")?.extract()?;
            info!("Python version: {version}");

            let gym = py.import("gymnasium")?;
            let env = gym.getattr("make")?.call1((name,))?;

            let action_space = env.getattr("action_space")?;
            let high: Vec<f64> = action_space
                .getattr("high")?
                .call_method0("flatten")?
                .call_method0("tolist")?
                .extract()?;
            let action_space: Vec<usize> = action_space.getattr("shape")?.extract()?;
            let observation_space: Vec<usize> = env
                .getattr("observation_space")?
                .getattr("shape")?
                .extract()?;
            Ok::<_, PyErr>((PyObject::from(env), action_space, high, observation_space))
        })
        .map_err(w)?;

        Ok(Box::new(Self {
            env,
            action_space,
            action_high,
            observation_space: channel_first(observation_space),
        }))
    }

    fn flatten(
        &self,
        observation: &pyo3::PyAny,
    ) -> pyo3::PyResult<Vec<f64>> {
        let flat: Vec<f64> = observation
            .call_method0("flatten")?
            .call_method0("tolist")?
            .extract()?;
        Ok(match self.observation_space.as_slice() {
            [c, h, w] => hwc_to_chw(&flat, *h, *w, *c),
            _ => flat,
        })
    }
}

fn channel_first(space: Vec<usize>) -> Vec<usize> {
    match space.as_slice() {
        [h, w, c] => vec![*c, *h, *w],
        _ => space,
    }
}

fn hwc_to_chw(
    flat: &[f64],
    height: usize,
    width: usize,
    channels: usize,
) -> Vec<f64> {
    let mut out = vec![0.0; flat.len()];
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                out[(c * height + y) * width + x] = flat[(y * width + x) * channels + c];
            }
        }
    }
    out
}

impl Environment for GymEnv {
    fn reset(&mut self, seed: u64) -> Result<Vec<f64>> {
        Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            kwargs.set_item("seed", seed)?;
            let reset = self.env.call_method(py, "reset", (), Some(kwargs))?;
            self.flatten(reset.as_ref(py).get_item(0)?)
        })
        .map_err(w)
    }

    fn step(&mut self, action: &[f64]) -> Result<Step> {
        Python::with_gil(|py| {
            let numpy = py.import("numpy")?;
            let action = numpy.getattr("array")?.call1((PyTuple::new(py, action.iter()),))?;
            let step = self.env.call_method(py, "step", (action,), None)?;
            let step = step.as_ref(py);
            Ok(Step {
                observation: self.flatten(step.get_item(0)?)?,
                reward: step.get_item(1)?.extract()?,
                terminated: step.get_item(2)?.extract()?,
                truncated: step.get_item(3)?.extract()?,
            })
        })
        .map_err(w)
    }

    fn action_space(&self) -> Vec<usize> {
        self.action_space.clone()
    }

    fn action_high(&self) -> Vec<f64> {
        self.action_high.clone()
    }

    fn observation_space(&self) -> Vec<usize> {
        self.observation_space.clone()
    }
}
