use {
    crate::{
        configs::{
            ReplayArgs,
            TrainArgs,
        },
        engines::{
            replay,
            run_training,
        },
        logging::setup_logging,
    },
    anyhow::Result,
    candle_core::Device,
    clap::{
        Parser,
        Subcommand,
        ValueEnum,
    },
    tracing::Level,
};


#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loglevel {
    Error, // put these only during active debugging and then downgrade later
    Warn,  // main events in the program
    Info,  // all the little details
    None,  // don't log anything
}
impl Loglevel {
    pub fn level(&self) -> Option<Level> {
        match self {
            Loglevel::Error => Some(Level::ERROR),
            Loglevel::Warn => Some(Level::WARN),
            Loglevel::Info => Some(Level::INFO),
            Loglevel::None => None,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train a DDPG agent.
    Train(TrainArgs),
    /// Replay a trained agent from its log directory.
    Replay(ReplayArgs),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Setup logging
    #[arg(long, value_enum, default_value_t = Loglevel::Warn)]
    pub log: Loglevel,

    /// File to write the log to.
    #[arg(long, default_value = "debug.log")]
    pub log_file: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Set up logging and run the chosen command on the CPU.
pub fn run(args: Args) -> Result<()> {
    setup_logging(
        &args.log_file,
        args.log.level(),
        args.log.level(),
    )?;
    let device = Device::Cpu;
    match &args.command {
        Command::Train(train_args) => run_training(train_args, &device),
        Command::Replay(replay_args) => replay(replay_args, &device).map(|_| ()),
    }
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        std::path::PathBuf,
    };

    #[test]
    fn subcommands_parse() {
        let args = Args::parse_from(["arm_ddpg", "--log", "info", "train", "--num-workers", "2"]);
        assert_eq!(args.log.level(), Some(Level::INFO));
        match args.command {
            Command::Train(train) => assert_eq!(train.num_workers, 2),
            other => panic!("expected train, got {other:?}"),
        }

        let args = Args::parse_from(["arm_ddpg", "replay", "--log-dir", "logs/ddpg_run", "--render"]);
        assert_eq!(args.log, Loglevel::Warn);
        match args.command {
            Command::Replay(replay) => {
                assert_eq!(replay.log_dir, PathBuf::from("logs/ddpg_run"));
                assert!(replay.render);
                assert_eq!(replay.num_timesteps, 10_000);
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn replay_needs_a_log_dir() {
        assert!(Args::try_parse_from(["arm_ddpg", "replay"]).is_err());
        assert_eq!(Loglevel::None.level(), None);
    }
}
