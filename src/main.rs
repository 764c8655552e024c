use {
    anyhow::Result,
    arm_ddpg::cli::{
        run,
        Args,
    },
    clap::Parser,
};

fn main() -> Result<()> {
    run(Args::parse())
}
