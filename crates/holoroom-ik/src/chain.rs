use std::f32::consts::PI;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::euler::EulerOrder;
use crate::skeleton::{NodeId, TransformGraph};
use crate::{IkError, IkResult};

/// Per-axis rotation interval in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub min: Vec3,
    pub max: Vec3,
}

impl AxisLimits {
    pub const UNRESTRICTED: Self = Self {
        min: Vec3::splat(-PI),
        max: Vec3::splat(PI),
    };

    pub fn new(min: Vec3, max: Vec3) -> IkResult<Self> {
        let limits = Self { min, max };
        limits.validate()?;
        Ok(limits)
    }

    /// Fails when any axis has `min > max` (or a NaN bound).
    pub fn validate(&self) -> IkResult<()> {
        for (axis, min, max) in [
            ('x', self.min.x, self.max.x),
            ('y', self.min.y, self.max.y),
            ('z', self.min.z, self.max.z),
        ] {
            if min.is_nan() || max.is_nan() || min > max {
                return Err(IkError::InvalidLimits { axis, min, max });
            }
        }
        Ok(())
    }

    pub fn clamp(&self, angles: Vec3) -> Vec3 {
        angles.max(self.min).min(self.max)
    }

    pub fn contains(&self, angles: Vec3, tolerance: f32) -> bool {
        angles.cmpge(self.min - Vec3::splat(tolerance)).all()
            && angles.cmple(self.max + Vec3::splat(tolerance)).all()
    }
}

impl Default for AxisLimits {
    fn default() -> Self {
        Self::UNRESTRICTED
    }
}

/// One rotatable node in a chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub node: NodeId,
    pub order: EulerOrder,
    pub limits: AxisLimits,
}

impl Joint {
    pub fn new(node: NodeId, order: EulerOrder, limits: AxisLimits) -> Self {
        Self {
            node,
            order,
            limits,
        }
    }

    pub fn unrestricted(node: NodeId) -> Self {
        Self::new(node, EulerOrder::Xyz, AxisLimits::UNRESTRICTED)
    }

    /// Clamps an orientation through this joint's Euler order.
    ///
    /// Lossy near the middle-axis singularity, so unrestricted joints pass
    /// the orientation through untouched.
    pub fn enforce_limits(&self, orientation: Quat) -> Quat {
        if self.limits == AxisLimits::UNRESTRICTED {
            return orientation;
        }
        let angles = self.order.decompose(orientation);
        self.order.compose(self.limits.clamp(angles))
    }
}

/// Joints between a root and an effector, solved toward a goal node.
///
/// Joints are stored root-to-tip; the solver walks them tip-to-root.
#[derive(Debug, Clone, PartialEq)]
pub struct IkChain {
    joints: Vec<Joint>,
    effector: NodeId,
    goal: NodeId,
}

impl IkChain {
    pub fn new<G: TransformGraph>(
        graph: &G,
        joints: Vec<Joint>,
        effector: NodeId,
        goal: NodeId,
    ) -> IkResult<Self> {
        if joints.is_empty() {
            return Err(IkError::EmptyChain);
        }
        for node in [effector, goal] {
            if !graph.contains(node) {
                return Err(IkError::UnknownNode(node.to_string()));
            }
        }
        for joint in &joints {
            if !graph.contains(joint.node) {
                return Err(IkError::UnknownNode(joint.node.to_string()));
            }
            joint.limits.validate()?;
            if !graph.is_ancestor(joint.node, effector) {
                return Err(IkError::EffectorNotDescendant {
                    effector: effector.to_string(),
                    joint: joint.node.to_string(),
                });
            }
        }
        Ok(Self {
            joints,
            effector,
            goal,
        })
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn effector(&self) -> NodeId {
        self.effector
    }

    pub fn goal(&self) -> NodeId {
        self.goal
    }

    pub(crate) fn tip_to_root(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter().rev()
    }
}
