//! # Components
//!
//! This module contains the components that the [`crate::agents::DDPG`] agent
//! is built from.
//!
//! ## Noise
//!
//! Action noise ([`NormalNoise`], [`OuNoise`]) is added to the actor output
//! while exploring. [`AdaptiveParamNoise`] instead perturbs the actor weights
//! and keeps the size of that perturbation in check.
//!
//! ## Replay Memory
//!
//! The [`Memory`] struct implements a ring buffer of [`Transition`]s that
//! training batches are sampled from.
//!
//! ## Running statistics
//!
//! [`RunningMeanStd`] tracks per-dimension mean and variance, used for
//! observation and return normalization.

mod noise;
mod replay_buffer;
mod running_stat;

pub use noise::{
    ActionNoise,
    ActionNoiseKind,
    ActionNoiseSpec,
    AdaptiveParamNoise,
    NormalNoise,
    OuNoise,
};
pub use replay_buffer::{
    Batch,
    Memory,
    Transition,
};
pub use running_stat::RunningMeanStd;
