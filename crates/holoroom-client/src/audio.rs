//! Seam between signaling and the media stack.
//!
//! A channel receives [`AudioCommand`]s from its peer's signaling link and
//! reports progress back as [`PeerEvent`]s, which the runtime feeds into
//! the peer registry from the same loop as everything else.

use holoroom_common::protocol::{IceCandidate, SessionDescription, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCommand {
    /// Create a local offer and report it as [`ChannelEvent::LocalOffer`].
    CreateOffer,
    /// Apply a remote offer, then answer it with [`ChannelEvent::LocalAnswer`].
    AcceptOffer(SessionDescription),
    /// Apply the remote answer to a previously created offer.
    ApplyAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    LocalOffer(SessionDescription),
    LocalAnswer(SessionDescription),
    LocalCandidate(IceCandidate),
    /// Media path is up.
    Established,
    /// Negotiation or transport failed; the channel is unusable.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub peer: SessionId,
    pub event: ChannelEvent,
}

/// One peer's audio connection.
pub trait AudioChannel {
    /// Queues a command. Results come back asynchronously as events.
    fn execute(&mut self, command: AudioCommand);

    /// Smoothed inbound volume in `[0, 1]`.
    fn volume_level(&self) -> f32;

    /// Tears the connection down. Further commands are ignored.
    fn close(&mut self);
}

pub trait AudioChannelFactory {
    type Channel: AudioChannel;

    fn open(&mut self, peer: SessionId) -> Self::Channel;

    /// Smoothed microphone volume in `[0, 1]`; zero without a microphone.
    fn local_volume_level(&self) -> f32;
}
