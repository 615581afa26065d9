//! Cyclic coordinate descent.

use glam::{Quat, Vec3};

use crate::chain::IkChain;
use crate::skeleton::TransformGraph;

/// Angular step (radians) below which a joint counts as converged.
pub const CONVERGENCE_EPSILON: f32 = 1e-5;

/// Squared length under which a joint-relative direction is degenerate.
const MIN_DIRECTION_LENGTH_SQUARED: f32 = 1e-12;

/// Rotates the chain's joints so its effector approaches the goal.
///
/// Runs up to `max_iterations` tip-to-root passes and stops early once a
/// full pass rotates nothing. Unreachable goals simply leave residual error.
pub fn solve<G: TransformGraph>(graph: &mut G, chain: &IkChain, max_iterations: u32) {
    let goal_position = graph.world_transform(chain.goal()).position;

    for _ in 0..max_iterations {
        let mut rotated = false;

        for joint in chain.tip_to_root() {
            let joint_world = graph.world_transform(joint.node);
            let effector_position = graph.world_transform(chain.effector()).position;

            let Some(to_effector) = local_direction(joint_world.inverse_transform_point(effector_position))
            else {
                continue;
            };
            let Some(to_goal) = local_direction(joint_world.inverse_transform_point(goal_position))
            else {
                continue;
            };

            let cross = to_effector.cross(to_goal);
            let angle = cross.length().atan2(to_effector.dot(to_goal));
            if angle < CONVERGENCE_EPSILON {
                continue;
            }

            let axis = if cross.length_squared() < MIN_DIRECTION_LENGTH_SQUARED {
                // anti-parallel: any perpendicular axis works
                to_effector.any_orthonormal_vector()
            } else {
                cross.normalize()
            };
            let delta = Quat::from_axis_angle(axis, angle);
            let rotated_local = graph.local_orientation(joint.node) * delta;

            graph.set_local_orientation(joint.node, joint.enforce_limits(rotated_local));
            graph.propagate(joint.node);
            rotated = true;
        }

        if !rotated {
            break;
        }
    }
}

fn local_direction(v: Vec3) -> Option<Vec3> {
    if v.length_squared() < MIN_DIRECTION_LENGTH_SQUARED || !v.is_finite() {
        return None;
    }
    Some(v.normalize())
}
