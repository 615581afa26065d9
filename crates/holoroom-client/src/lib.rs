#![forbid(unsafe_code)]

//! Holoroom client core.
//!
//! Everything here is driven from a single task: the frame tick feeds the
//! local sync loop, relay frames and audio backend events feed the peer
//! registry, and nothing is mutated from anywhere else.

pub mod audio;
pub mod avatar;
#[cfg(feature = "microphone")]
pub mod capture;
pub mod config;
pub mod context;
pub mod input;
pub mod locomotion;
pub mod peer;
pub mod pose_mapping;
pub mod runtime;
pub mod signaling;
pub mod sync_loop;
pub mod transport;
pub mod volume;
pub mod webrtc_audio;

pub use audio::{AudioChannel, AudioChannelFactory, AudioCommand, ChannelEvent, PeerEvent};
pub use avatar::{AvatarRig, HumanBone, Side};
pub use config::ClientConfig;
pub use context::SessionContext;
pub use input::{DevicePose, InputSource, ScriptedInput, TrackedInput};
pub use locomotion::Locomotion;
pub use peer::{PeerConfig, PeerRegistry, PeerSession};
pub use pose_mapping::{GoalUpdate, HandGoalUpdate, HeadGoalUpdate, TrackedPose};
pub use signaling::{LinkCommand, SignalingLink, SignalingState};
pub use sync_loop::{LocalSync, SyncConfig};
pub use volume::{SharedLevel, VolumeMeter};
