//! Per-frame orchestration of the local avatar.
//!
//! Each tick runs locomotion, maps the tracked devices onto the rig, solves
//! it, and then emits a snapshot if the emit interval has passed. Snapshot
//! cadence is measured in simulated time so it does not depend on frame rate.

use std::time::Duration;

use glam::{Quat, Vec3};
use holoroom_common::protocol::{ClientMessage, HandSample, PoseSnapshot, SessionId};
use holoroom_ik::{IkConfig, IkResult};
use tracing::trace;

use crate::avatar::AvatarRig;
use crate::context::SessionContext;
use crate::input::{DevicePose, TrackedInput};
use crate::locomotion::{Locomotion, DEFAULT_WALK_SPEED};
use crate::pose_mapping::{drive_avatar, TrackedPose};

pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub emit_interval: Duration,
    pub ik_iterations: u32,
    pub walk_speed: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            emit_interval: DEFAULT_EMIT_INTERVAL,
            ik_iterations: holoroom_ik::config::DEFAULT_ITERATIONS,
            walk_speed: DEFAULT_WALK_SPEED,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSync {
    rig: AvatarRig,
    locomotion: Locomotion,
    emit_interval: f64,
    elapsed: f64,
    last_emit: Option<f64>,
}

impl LocalSync {
    pub fn new(config: &SyncConfig, ik: &IkConfig) -> IkResult<Self> {
        let mut rig = AvatarRig::humanoid(ik)?;
        rig.set_iterations(config.ik_iterations);
        Ok(Self {
            rig,
            locomotion: Locomotion::new(config.walk_speed),
            emit_interval: config.emit_interval.as_secs_f64(),
            elapsed: 0.0,
            last_emit: None,
        })
    }

    pub fn rig(&self) -> &AvatarRig {
        &self.rig
    }

    pub fn ground_offset(&self) -> Vec3 {
        self.locomotion.ground_offset()
    }

    /// Simulated seconds since the first tick.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Advances one frame of `dt` seconds. Returns the snapshot when one was
    /// emitted to the relay this frame.
    ///
    /// Nothing is emitted until the relay has assigned an id.
    pub fn tick(
        &mut self,
        dt: f64,
        input: &TrackedInput,
        ctx: &SessionContext,
    ) -> Option<PoseSnapshot> {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.elapsed += dt;

        let heading = input
            .headset
            .map(|h| h.orientation)
            .unwrap_or(Quat::IDENTITY);
        self.locomotion.update(input.left_stick, heading, dt as f32);

        let pose = TrackedPose::from_input(input, self.locomotion.ground_offset());
        drive_avatar(&mut self.rig, &pose);

        let local_id = ctx.local_id()?;
        if let Some(last) = self.last_emit {
            if self.elapsed - last < self.emit_interval {
                return None;
            }
        }
        self.last_emit = Some(self.elapsed);

        let snapshot = build_snapshot(
            local_id,
            ctx.display_name(),
            input,
            self.locomotion.ground_offset(),
        );
        trace!(elapsed = self.elapsed, "emitting pose snapshot");
        ctx.emit(ClientMessage::PlayerData(snapshot.clone()));
        Some(snapshot)
    }
}

/// Snapshot of the raw tracking-space devices plus the ground offset.
pub fn build_snapshot(
    session_id: SessionId,
    display_name: &str,
    input: &TrackedInput,
    ground_offset: Vec3,
) -> PoseSnapshot {
    let hand = |pose: DevicePose| HandSample {
        position: pose.position.to_array(),
        orientation: pose.orientation.to_array(),
    };

    let mut snapshot = PoseSnapshot::new(session_id, display_name);
    snapshot.ground_offset = Some(ground_offset.to_array());
    if let Some(headset) = input.headset {
        snapshot.headset_position = Some(headset.position.to_array());
        snapshot.headset_orientation = Some(headset.orientation.to_array());
    }
    snapshot.left_hand = input.left_controller.map(hand);
    snapshot.right_hand = input.right_controller.map(hand);
    snapshot
}
