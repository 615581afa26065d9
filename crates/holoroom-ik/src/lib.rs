#![forbid(unsafe_code)]

//! Inverse kinematics for avatar limbs.
//!
//! The solver never touches a rendering scene directly. It works on node
//! handles through [`TransformGraph`], which [`Skeleton`] implements as a
//! plain transform arena.

pub mod chain;
pub mod config;
pub mod euler;
pub mod skeleton;
pub mod solver;

pub use chain::{AxisLimits, IkChain, Joint};
pub use config::{ChainConfig, IkConfig, JointConfig};
pub use euler::EulerOrder;
pub use skeleton::{NodeId, Skeleton, TransformGraph, WorldTransform};
pub use solver::{solve, CONVERGENCE_EPSILON};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IkError {
    #[error("invalid rotation limits on {axis} axis: min {min} > max {max}")]
    InvalidLimits { axis: char, min: f32, max: f32 },
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("effector {effector} is not a descendant of joint {joint}")]
    EffectorNotDescendant { effector: String, joint: String },
    #[error("chain has no joints")]
    EmptyChain,
}

pub type IkResult<T> = Result<T, IkError>;
