mod arm_env;
mod config;
mod kinematics;
mod render;

pub use arm_env::ArmEnv;
pub use config::{
    ArmEnvConfig,
    ObservationMode,
};
