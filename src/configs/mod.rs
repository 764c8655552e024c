//! Configuration structs for the agent, the training loop and the runs.
mod args;
mod ddpg;
mod train;

pub use args::{
    EnvGlobals,
    ReplayArgs,
    SrlModel,
    TrainArgs,
};
pub use ddpg::DDPG_Config;
pub use train::TrainConfig;
