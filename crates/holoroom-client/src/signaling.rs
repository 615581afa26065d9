//! Per-peer offer/answer state machine.
//!
//! [`SignalingLink`] performs no I/O. Each inbound event returns the
//! commands the caller must carry out, in order: relay frames to send,
//! media operations for the audio channel, or a close.
//!
//! ```text
//! initiator: Idle -> OfferCreated -> OfferSent -> AnswerReceived -> Connected
//! responder: Idle -> OfferReceived -> AnswerCreated -> AnswerSent -> Connected
//! any state -> Closed
//! ```

use std::collections::VecDeque;

use holoroom_common::protocol::{ClientMessage, IceCandidate, SessionDescription, SessionId};
use tracing::debug;

use crate::audio::AudioCommand;

/// Remote candidates held while no remote description is set.
pub const MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Idle,
    OfferCreated,
    OfferSent,
    AnswerReceived,
    OfferReceived,
    AnswerCreated,
    AnswerSent,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    Audio(AudioCommand),
    Send(ClientMessage),
    Close,
}

#[derive(Debug, Clone)]
pub struct SignalingLink {
    peer: SessionId,
    state: SignalingState,
    has_remote_description: bool,
    pending_candidates: VecDeque<IceCandidate>,
}

impl SignalingLink {
    pub fn new(peer: SessionId) -> Self {
        Self {
            peer,
            state: SignalingState::Idle,
            has_remote_description: false,
            pending_candidates: VecDeque::new(),
        }
    }

    pub fn peer(&self) -> SessionId {
        self.peer
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SignalingState::Closed
    }

    /// The peer was seen for the first time.
    ///
    /// Only the side with the smaller session id makes the offer, so two
    /// peers discovering each other at once never both offer.
    pub fn on_discovered(&mut self, local: SessionId) -> Vec<LinkCommand> {
        if self.state != SignalingState::Idle || local >= self.peer {
            return Vec::new();
        }
        self.state = SignalingState::OfferCreated;
        vec![LinkCommand::Audio(AudioCommand::CreateOffer)]
    }

    pub fn on_local_offer(&mut self, description: SessionDescription) -> Vec<LinkCommand> {
        if self.state != SignalingState::OfferCreated {
            debug!(peer = %self.peer, state = ?self.state, "ignoring stale local offer");
            return Vec::new();
        }
        self.state = SignalingState::OfferSent;
        vec![LinkCommand::Send(ClientMessage::Offer {
            target: self.peer,
            description,
        })]
    }

    pub fn on_remote_offer(&mut self, description: SessionDescription) -> Vec<LinkCommand> {
        if self.state != SignalingState::Idle {
            debug!(peer = %self.peer, state = ?self.state, "ignoring offer outside Idle");
            return Vec::new();
        }
        self.state = SignalingState::OfferReceived;
        self.has_remote_description = true;

        let mut commands = vec![LinkCommand::Audio(AudioCommand::AcceptOffer(description))];
        commands.extend(self.flush_candidates());
        commands
    }

    pub fn on_local_answer(&mut self, description: SessionDescription) -> Vec<LinkCommand> {
        if self.state != SignalingState::OfferReceived {
            debug!(peer = %self.peer, state = ?self.state, "ignoring stale local answer");
            return Vec::new();
        }
        self.state = SignalingState::AnswerCreated;
        let send = LinkCommand::Send(ClientMessage::Answer {
            target: self.peer,
            description,
        });
        self.state = SignalingState::AnswerSent;
        vec![send]
    }

    /// Applies an answer unless a remote description is already in place,
    /// which makes late or duplicated answers harmless.
    pub fn on_remote_answer(&mut self, description: SessionDescription) -> Vec<LinkCommand> {
        if self.has_remote_description || self.state != SignalingState::OfferSent {
            debug!(peer = %self.peer, state = ?self.state, "ignoring answer");
            return Vec::new();
        }
        self.has_remote_description = true;
        self.state = SignalingState::AnswerReceived;

        let mut commands = vec![LinkCommand::Audio(AudioCommand::ApplyAnswer(description))];
        commands.extend(self.flush_candidates());
        commands
    }

    /// The media path came up.
    pub fn on_established(&mut self) -> Vec<LinkCommand> {
        if matches!(
            self.state,
            SignalingState::AnswerReceived | SignalingState::AnswerSent
        ) {
            self.state = SignalingState::Connected;
        }
        Vec::new()
    }

    pub fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Vec<LinkCommand> {
        if self.is_closed() {
            return Vec::new();
        }
        if self.has_remote_description {
            return vec![LinkCommand::Audio(AudioCommand::AddCandidate(candidate))];
        }
        if self.pending_candidates.len() == MAX_PENDING_CANDIDATES {
            debug!(peer = %self.peer, "candidate buffer full, dropping oldest");
            self.pending_candidates.pop_front();
        }
        self.pending_candidates.push_back(candidate);
        Vec::new()
    }

    pub fn on_local_candidate(&mut self, candidate: IceCandidate) -> Vec<LinkCommand> {
        if self.is_closed() {
            return Vec::new();
        }
        vec![LinkCommand::Send(ClientMessage::Candidate {
            target: self.peer,
            candidate,
        })]
    }

    pub fn on_negotiation_failed(&mut self) -> Vec<LinkCommand> {
        self.close()
    }

    /// Moves to `Closed`. Only the first call yields a close command.
    pub fn close(&mut self) -> Vec<LinkCommand> {
        if self.is_closed() {
            return Vec::new();
        }
        self.state = SignalingState::Closed;
        self.pending_candidates.clear();
        vec![LinkCommand::Close]
    }

    fn flush_candidates(&mut self) -> impl Iterator<Item = LinkCommand> + '_ {
        self.pending_candidates
            .drain(..)
            .map(|c| LinkCommand::Audio(AudioCommand::AddCandidate(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, SessionId) {
        let a = SessionId::new_random();
        let b = SessionId::new_random();
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.1 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    fn initiator_at_offer_sent() -> (SignalingLink, SessionId) {
        let (low, high) = ids();
        let mut link = SignalingLink::new(high);
        assert_eq!(
            link.on_discovered(low),
            vec![LinkCommand::Audio(AudioCommand::CreateOffer)]
        );
        assert_eq!(link.state(), SignalingState::OfferCreated);
        let sent = link.on_local_offer(SessionDescription::offer("o"));
        assert_eq!(
            sent,
            vec![LinkCommand::Send(ClientMessage::Offer {
                target: high,
                description: SessionDescription::offer("o"),
            })]
        );
        (link, high)
    }

    #[test]
    fn test_initiator_path() {
        let (mut link, _) = initiator_at_offer_sent();
        assert_eq!(link.state(), SignalingState::OfferSent);

        let cmds = link.on_remote_answer(SessionDescription::answer("a"));
        assert_eq!(
            cmds,
            vec![LinkCommand::Audio(AudioCommand::ApplyAnswer(
                SessionDescription::answer("a")
            ))]
        );
        assert_eq!(link.state(), SignalingState::AnswerReceived);

        link.on_established();
        assert_eq!(link.state(), SignalingState::Connected);
    }

    #[test]
    fn test_larger_id_waits_for_offer() {
        let (low, high) = ids();
        let mut link = SignalingLink::new(low);
        assert!(link.on_discovered(high).is_empty());
        assert_eq!(link.state(), SignalingState::Idle);
    }

    #[test]
    fn test_responder_path() {
        let (low, high) = ids();
        let mut link = SignalingLink::new(low);

        let cmds = link.on_remote_offer(SessionDescription::offer("o"));
        assert_eq!(
            cmds,
            vec![LinkCommand::Audio(AudioCommand::AcceptOffer(
                SessionDescription::offer("o")
            ))]
        );
        assert_eq!(link.state(), SignalingState::OfferReceived);

        let cmds = link.on_local_answer(SessionDescription::answer("a"));
        assert_eq!(
            cmds,
            vec![LinkCommand::Send(ClientMessage::Answer {
                target: low,
                description: SessionDescription::answer("a"),
            })]
        );
        assert_eq!(link.state(), SignalingState::AnswerSent);

        link.on_established();
        assert_eq!(link.state(), SignalingState::Connected);
        assert!(link.on_discovered(high).is_empty());
    }

    #[test]
    fn test_duplicate_answer_is_ignored() {
        let (mut once, _) = initiator_at_offer_sent();
        once.on_remote_answer(SessionDescription::answer("a"));
        once.on_established();

        let (mut twice, _) = initiator_at_offer_sent();
        twice.on_remote_answer(SessionDescription::answer("a"));
        assert!(twice
            .on_remote_answer(SessionDescription::answer("a"))
            .is_empty());
        twice.on_established();
        assert!(twice
            .on_remote_answer(SessionDescription::answer("a"))
            .is_empty());

        assert_eq!(once.state(), SignalingState::Connected);
        assert_eq!(twice.state(), once.state());
        assert!(twice.has_remote_description());
    }

    #[test]
    fn test_offer_outside_idle_is_ignored() {
        let (mut link, _) = initiator_at_offer_sent();
        assert!(link
            .on_remote_offer(SessionDescription::offer("glare"))
            .is_empty());
        assert_eq!(link.state(), SignalingState::OfferSent);
    }

    #[test]
    fn test_early_candidates_are_buffered_then_flushed() {
        let (mut link, _) = initiator_at_offer_sent();
        assert!(link.on_remote_candidate(candidate(1)).is_empty());
        assert!(link.on_remote_candidate(candidate(2)).is_empty());
        assert_eq!(link.pending_candidates(), 2);

        let cmds = link.on_remote_answer(SessionDescription::answer("a"));
        assert_eq!(cmds.len(), 3);
        assert!(matches!(
            cmds[0],
            LinkCommand::Audio(AudioCommand::ApplyAnswer(_))
        ));
        assert_eq!(
            cmds[1],
            LinkCommand::Audio(AudioCommand::AddCandidate(candidate(1)))
        );
        assert_eq!(link.pending_candidates(), 0);

        assert_eq!(
            link.on_remote_candidate(candidate(3)),
            vec![LinkCommand::Audio(AudioCommand::AddCandidate(candidate(3)))]
        );
    }

    #[test]
    fn test_candidate_buffer_is_bounded() {
        let (_, high) = ids();
        let mut link = SignalingLink::new(high);
        for n in 0..(MAX_PENDING_CANDIDATES as u32 + 10) {
            link.on_remote_candidate(candidate(n));
        }
        assert_eq!(link.pending_candidates(), MAX_PENDING_CANDIDATES);

        let cmds = link.on_remote_offer(SessionDescription::offer("o"));
        assert_eq!(
            cmds[1],
            LinkCommand::Audio(AudioCommand::AddCandidate(candidate(10)))
        );
    }

    #[test]
    fn test_close_is_emitted_once() {
        let (mut link, _) = initiator_at_offer_sent();
        assert_eq!(link.close(), vec![LinkCommand::Close]);
        assert!(link.close().is_empty());
        assert!(link.on_negotiation_failed().is_empty());
        assert!(link.on_local_candidate(candidate(1)).is_empty());
        assert!(link.on_remote_candidate(candidate(1)).is_empty());
        assert_eq!(link.state(), SignalingState::Closed);
    }

    #[test]
    fn test_local_candidates_are_addressed_to_peer() {
        let (mut link, high) = initiator_at_offer_sent();
        assert_eq!(
            link.on_local_candidate(candidate(7)),
            vec![LinkCommand::Send(ClientMessage::Candidate {
                target: high,
                candidate: candidate(7),
            })]
        );
    }
}
