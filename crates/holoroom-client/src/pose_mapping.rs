//! Tracked poses to avatar goals.
//!
//! The head drives the root: yaw turns the whole body, while pitch and roll
//! stay on the head joint. Hands become goals expressed in the root's frame.
//! Devices face -z and the rig faces +z, hence the half turn about y.

use std::f32::consts::PI;

use glam::{Quat, Vec3};
use holoroom_common::protocol::{HandSample, PoseSnapshot};
use holoroom_ik::EulerOrder;

use crate::avatar::{AvatarRig, Side};
use crate::input::{DevicePose, TrackedInput};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadGoalUpdate {
    pub root_position: Vec3,
    pub root_rotation: Quat,
    pub head_rotation: Quat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandGoalUpdate {
    pub side: Side,
    /// Relative to the avatar root.
    pub local_position: Vec3,
    pub local_orientation: Quat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GoalUpdate {
    Head(HeadGoalUpdate),
    Hand(HandGoalUpdate),
}

/// World-space device poses for one avatar. Absent groups leave the
/// matching part of the avatar untouched. Headset position and orientation
/// are separate groups.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackedPose {
    pub head_position: Option<Vec3>,
    pub head_orientation: Option<Quat>,
    pub left: Option<DevicePose>,
    pub right: Option<DevicePose>,
}

impl TrackedPose {
    /// Local devices placed in the shared world. Tracking-space positions
    /// are shifted by the negated ground offset.
    pub fn from_input(input: &TrackedInput, ground_offset: Vec3) -> Self {
        let shift = |pose: DevicePose| {
            usable(pose.position, pose.orientation)
                .map(|(p, q)| DevicePose::new(p - ground_offset, q))
        };
        let head = input.headset.and_then(shift);
        Self {
            head_position: head.map(|h| h.position),
            head_orientation: head.map(|h| h.orientation),
            left: input.left_controller.and_then(shift),
            right: input.right_controller.and_then(shift),
        }
    }

    /// Remote devices from a snapshot. A group is dropped when any of its
    /// values is missing or non-finite.
    pub fn from_snapshot(snapshot: &PoseSnapshot) -> Self {
        let offset = snapshot
            .ground_offset
            .map(Vec3::from_array)
            .filter(|v| v.is_finite())
            .unwrap_or(Vec3::ZERO);

        let hand = |sample: Option<HandSample>| {
            let sample = sample?;
            usable(
                Vec3::from_array(sample.position),
                Quat::from_array(sample.orientation),
            )
            .map(|(p, q)| DevicePose::new(p - offset, q))
        };

        Self {
            head_position: snapshot
                .headset_position
                .map(Vec3::from_array)
                .filter(|p| p.is_finite())
                .map(|p| p - offset),
            head_orientation: snapshot
                .headset_orientation
                .map(Quat::from_array)
                .and_then(normalized),
            left: hand(snapshot.left_hand),
            right: hand(snapshot.right_hand),
        }
    }

    /// The headset when both of its groups are present.
    pub fn head(&self) -> Option<DevicePose> {
        Some(DevicePose::new(self.head_position?, self.head_orientation?))
    }

    pub fn hand(&self, side: Side) -> Option<DevicePose> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

fn normalized(orientation: Quat) -> Option<Quat> {
    if !orientation.is_finite() {
        return None;
    }
    let length = orientation.length();
    if length < 1e-6 {
        return None;
    }
    Some(orientation / length)
}

/// Finite position with a normalisable orientation.
fn usable(position: Vec3, orientation: Quat) -> Option<(Vec3, Quat)> {
    if !position.is_finite() {
        return None;
    }
    Some((position, normalized(orientation)?))
}

/// Splits the headset orientation into root yaw and head pitch/roll, and
/// places the root so the rig's head sits at the headset.
pub fn map_head(headset: &DevicePose, head_offset: Vec3) -> HeadGoalUpdate {
    let (root_rotation, head_rotation) = split_orientation(headset.orientation);
    HeadGoalUpdate {
        root_position: headset.position - root_rotation * head_offset,
        root_rotation,
        head_rotation,
    }
}

/// Root yaw and head pitch/roll for a headset orientation.
fn split_orientation(orientation: Quat) -> (Quat, Quat) {
    let facing = orientation * Quat::from_rotation_y(PI);
    let angles = EulerOrder::Yxz.decompose(facing);
    (
        Quat::from_rotation_y(angles.y),
        EulerOrder::Yxz.compose(Vec3::new(angles.x, 0.0, angles.z)),
    )
}

/// Head update from whichever headset groups are present. A missing
/// position keeps the root where it is; a missing orientation keeps the
/// current yaw and head tilt.
fn head_update(rig: &AvatarRig, pose: &TrackedPose) -> Option<HeadGoalUpdate> {
    match (pose.head_position, pose.head_orientation) {
        (Some(position), Some(orientation)) => Some(map_head(
            &DevicePose::new(position, orientation),
            rig.head_offset(),
        )),
        (None, Some(orientation)) => {
            let (root_rotation, head_rotation) = split_orientation(orientation);
            Some(HeadGoalUpdate {
                root_position: rig.root_position(),
                root_rotation,
                head_rotation,
            })
        }
        (Some(position), None) => {
            let root_rotation = rig.root_rotation();
            Some(HeadGoalUpdate {
                root_position: position - root_rotation * rig.head_offset(),
                root_rotation,
                head_rotation: rig.head_rotation(),
            })
        }
        (None, None) => None,
    }
}

pub fn map_hand(
    side: Side,
    device: &DevicePose,
    root_position: Vec3,
    root_rotation: Quat,
) -> HandGoalUpdate {
    let to_root = root_rotation.inverse();
    HandGoalUpdate {
        side,
        local_position: to_root * (device.position - root_position),
        local_orientation: (to_root * device.orientation).normalize(),
    }
}

/// Goal updates for `pose`, head first. Hands are expressed against the new
/// root when any headset group is present, otherwise against the rig's
/// current root.
pub fn goal_updates(rig: &AvatarRig, pose: &TrackedPose) -> Vec<GoalUpdate> {
    let mut updates = Vec::with_capacity(3);
    let (root_position, root_rotation) = match head_update(rig, pose) {
        Some(head) => {
            updates.push(GoalUpdate::Head(head));
            (head.root_position, head.root_rotation)
        }
        None => (rig.root_position(), rig.root_rotation()),
    };

    for side in [Side::Left, Side::Right] {
        if let Some(device) = pose.hand(side) {
            updates.push(GoalUpdate::Hand(map_hand(
                side,
                &device,
                root_position,
                root_rotation,
            )));
        }
    }
    updates
}

/// Applies `pose` to the rig and solves its chains.
pub fn drive_avatar(rig: &mut AvatarRig, pose: &TrackedPose) {
    for update in goal_updates(rig, pose) {
        rig.apply(&update);
    }
    rig.solve();
}
