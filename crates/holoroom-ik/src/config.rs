//! Name-based chain descriptions.
//!
//! Rigs are described by bone name so the same configuration can be applied
//! to any skeleton that uses the same naming.

use std::f32::consts::PI;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::chain::{AxisLimits, IkChain, Joint};
use crate::euler::EulerOrder;
use crate::skeleton::Skeleton;
use crate::{IkError, IkResult};

pub const DEFAULT_ITERATIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    pub bone: String,
    pub order: EulerOrder,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Root-to-tip.
    pub joints: Vec<JointConfig>,
    pub effector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IkConfig {
    pub iterations: u32,
    pub chains: Vec<ChainConfig>,
}

impl ChainConfig {
    /// Resolves bone names against `skeleton` and builds the chain around
    /// the given goal node.
    pub fn build(&self, skeleton: &Skeleton, goal: crate::NodeId) -> IkResult<IkChain> {
        let lookup = |name: &str| {
            skeleton
                .find(name)
                .ok_or_else(|| IkError::UnknownNode(name.to_string()))
        };

        let joints = self
            .joints
            .iter()
            .map(|joint| {
                let limits = AxisLimits::new(joint.rotation_min, joint.rotation_max)?;
                Ok(Joint::new(lookup(&joint.bone)?, joint.order, limits))
            })
            .collect::<IkResult<Vec<_>>>()?;

        IkChain::new(skeleton, joints, lookup(&self.effector)?, goal)
    }

    /// Shoulder, upper arm and lower arm driving the hand of one side.
    ///
    /// `side` is the bone-name prefix, `"left"` or `"right"`. The rig faces
    /// +z with its left arm along +x; limits are mirrored on the y and z
    /// axes for the right side.
    pub fn humanoid_arm(side: &str) -> Self {
        let mirror = if side == "right" { -1.0 } else { 1.0 };
        let mirrored = |min: Vec3, max: Vec3| {
            if mirror > 0.0 {
                (min, max)
            } else {
                (
                    Vec3::new(min.x, -max.y, -max.z),
                    Vec3::new(max.x, -min.y, -min.z),
                )
            }
        };

        let (shoulder_min, shoulder_max) =
            mirrored(Vec3::new(0.0, -PI / 8.0, -PI / 8.0), Vec3::new(0.0, PI / 8.0, PI / 8.0));
        let (upper_min, upper_max) =
            mirrored(Vec3::new(-PI / 2.0, -PI, -PI / 2.0), Vec3::new(PI / 2.0, PI, PI / 2.0));
        // elbow hinges about y only, folding the forearm toward +z
        let (lower_min, lower_max) = mirrored(Vec3::new(0.0, -PI, 0.0), Vec3::new(0.0, 0.0, 0.0));

        Self {
            joints: vec![
                JointConfig {
                    bone: format!("{side}_shoulder"),
                    order: EulerOrder::Zyx,
                    rotation_min: shoulder_min,
                    rotation_max: shoulder_max,
                },
                JointConfig {
                    bone: format!("{side}_upper_arm"),
                    order: EulerOrder::Zyx,
                    rotation_min: upper_min,
                    rotation_max: upper_max,
                },
                JointConfig {
                    bone: format!("{side}_lower_arm"),
                    order: EulerOrder::Yzx,
                    rotation_min: lower_min,
                    rotation_max: lower_max,
                },
            ],
            effector: format!("{side}_hand"),
        }
    }
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            chains: vec![
                ChainConfig::humanoid_arm("left"),
                ChainConfig::humanoid_arm("right"),
            ],
        }
    }
}
