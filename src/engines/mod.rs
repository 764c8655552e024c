mod comm;
mod experiment;
mod replay;
mod stats;
mod train;

pub use comm::Communicator;
pub use experiment::{
    make_env,
    run_training,
    ARM_ENV_ID,
};
pub use replay::{
    replay,
    run_policy,
    SUPPORTED_ALGOS,
};
pub use stats::{
    Average,
    History,
    ProgressTable,
};
pub use train::training_loop_off_policy;

use std::path::{
    Path,
    PathBuf,
};


/// The algorithm trained by this crate, as it appears in log directories.
pub const ALGO_NAME: &str = "ddpg";

/// Where a run in `log_dir` keeps its agent.
pub fn checkpoint_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!("{ALGO_NAME}_model.ron"))
}
