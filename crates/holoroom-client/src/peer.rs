//! Remote peer lifecycle.
//!
//! One [`PeerSession`] per remote user, created on the first snapshot or
//! offer from an unseen id and destroyed on an explicit disconnect, on
//! inactivity, or when the client shuts down. Destroying a session closes
//! its audio channel exactly once.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use holoroom_common::protocol::{
    IceCandidate, PoseSnapshot, ServerMessage, SessionDescription, SessionId,
};
use tracing::{debug, info, warn};

use crate::audio::{AudioChannel, AudioChannelFactory, ChannelEvent, PeerEvent};
use crate::avatar::AvatarRig;
use crate::context::SessionContext;
use crate::pose_mapping::{drive_avatar, TrackedPose};
use crate::signaling::{LinkCommand, SignalingLink, SignalingState};

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// A peer with no snapshot for this long is dropped.
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A remote user's avatar, driven only by received snapshots.
#[derive(Debug, Clone)]
pub struct RemoteAvatar {
    rig: AvatarRig,
}

impl RemoteAvatar {
    pub fn new(rig: AvatarRig) -> Self {
        Self { rig }
    }

    pub fn apply_snapshot(&mut self, snapshot: &PoseSnapshot) {
        drive_avatar(&mut self.rig, &TrackedPose::from_snapshot(snapshot));
    }

    pub fn rig(&self) -> &AvatarRig {
        &self.rig
    }
}

pub struct PeerSession<C> {
    id: SessionId,
    display_name: String,
    link: SignalingLink,
    last_seen: Instant,
    avatar: RemoteAvatar,
    audio: C,
}

impl<C: AudioChannel> PeerSession<C> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> SignalingState {
        self.link.state()
    }

    pub fn link(&self) -> &SignalingLink {
        &self.link
    }

    /// Time of the last snapshot from this peer.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn avatar(&self) -> &RemoteAvatar {
        &self.avatar
    }

    pub fn audio(&self) -> &C {
        &self.audio
    }

    pub fn volume_level(&self) -> f32 {
        self.audio.volume_level()
    }

    fn run(&mut self, commands: Vec<LinkCommand>, ctx: &SessionContext) {
        for command in commands {
            match command {
                LinkCommand::Send(message) => {
                    ctx.emit(message);
                }
                LinkCommand::Audio(command) => self.audio.execute(command),
                LinkCommand::Close => self.audio.close(),
            }
        }
    }

    /// Starts over with a fresh link and audio channel after a failed
    /// negotiation. The avatar is kept.
    fn reset(&mut self, audio: C) {
        self.link = SignalingLink::new(self.id);
        self.audio = audio;
    }

    fn dispose(mut self, ctx: &SessionContext) {
        let commands = self.link.close();
        self.run(commands, ctx);
    }
}

/// Every live remote peer, keyed by session id.
pub struct PeerRegistry<F: AudioChannelFactory> {
    config: PeerConfig,
    template: AvatarRig,
    factory: F,
    sessions: BTreeMap<SessionId, PeerSession<F::Channel>>,
}

impl<F: AudioChannelFactory> PeerRegistry<F> {
    /// `template` is cloned for every new remote avatar.
    pub fn new(config: PeerConfig, template: AvatarRig, factory: F) -> Self {
        Self {
            config,
            template,
            factory,
            sessions: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<&PeerSession<F::Channel>> {
        self.sessions.get(&id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession<F::Channel>> {
        self.sessions.values()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Dispatches one relay frame.
    pub fn handle(&mut self, message: ServerMessage, now: Instant, ctx: &mut SessionContext) {
        match message {
            ServerMessage::Welcome { session_id } => {
                info!(%session_id, "joined relay");
                ctx.set_local_id(session_id);
            }
            ServerMessage::PlayerData(snapshot) => self.on_player_data(&snapshot, now, ctx),
            ServerMessage::PlayerDisconnected { session_id } => self.on_disconnect(session_id, ctx),
            ServerMessage::Offer {
                sender,
                description,
            } => self.on_offer(sender, description, now, ctx),
            ServerMessage::Answer {
                sender,
                description,
            } => self.on_answer(sender, description, ctx),
            ServerMessage::Candidate { sender, candidate } => {
                self.on_candidate(sender, candidate, ctx)
            }
        }
    }

    pub fn on_player_data(&mut self, snapshot: &PoseSnapshot, now: Instant, ctx: &SessionContext) {
        let id = snapshot.session_id;
        if ctx.local_id() == Some(id) {
            return;
        }

        let created = !self.sessions.contains_key(&id);
        let reopened = self.reopen_if_closed(id);
        let session = self.session_entry(id, &snapshot.display_name, now);
        session.last_seen = now;
        if session.display_name != snapshot.display_name {
            session.display_name.clone_from(&snapshot.display_name);
        }
        session.avatar.apply_snapshot(snapshot);

        if created || reopened {
            if let Some(local) = ctx.local_id() {
                let commands = session.link.on_discovered(local);
                session.run(commands, ctx);
            }
        }
    }

    pub fn on_offer(
        &mut self,
        sender: SessionId,
        description: SessionDescription,
        now: Instant,
        ctx: &SessionContext,
    ) {
        if ctx.local_id() == Some(sender) {
            return;
        }
        self.reopen_if_closed(sender);
        let session = self.session_entry(sender, "", now);
        let commands = session.link.on_remote_offer(description);
        session.run(commands, ctx);
    }

    pub fn on_answer(
        &mut self,
        sender: SessionId,
        description: SessionDescription,
        ctx: &SessionContext,
    ) {
        let Some(session) = self.sessions.get_mut(&sender) else {
            debug!(%sender, "answer from unknown peer dropped");
            return;
        };
        let commands = session.link.on_remote_answer(description);
        session.run(commands, ctx);
    }

    pub fn on_candidate(&mut self, sender: SessionId, candidate: IceCandidate, ctx: &SessionContext) {
        let Some(session) = self.sessions.get_mut(&sender) else {
            debug!(%sender, "candidate from unknown peer dropped");
            return;
        };
        let commands = session.link.on_remote_candidate(candidate);
        session.run(commands, ctx);
    }

    pub fn on_disconnect(&mut self, id: SessionId, ctx: &SessionContext) {
        if let Some(session) = self.sessions.remove(&id) {
            info!(peer = %id, name = %session.display_name, "peer left");
            session.dispose(ctx);
        }
    }

    /// Feeds back a result from the audio backend.
    pub fn on_channel_event(&mut self, event: PeerEvent, ctx: &SessionContext) {
        let PeerEvent { peer, event } = event;
        let Some(session) = self.sessions.get_mut(&peer) else {
            debug!(%peer, "audio event for departed peer dropped");
            return;
        };

        let commands = match event {
            ChannelEvent::LocalOffer(description) => session.link.on_local_offer(description),
            ChannelEvent::LocalAnswer(description) => session.link.on_local_answer(description),
            ChannelEvent::LocalCandidate(candidate) => session.link.on_local_candidate(candidate),
            ChannelEvent::Established => {
                info!(%peer, "audio connected");
                session.link.on_established()
            }
            ChannelEvent::Failed(reason) => {
                warn!(%peer, "audio negotiation failed: {}", reason);
                session.link.on_negotiation_failed()
            }
        };
        session.run(commands, ctx);
    }

    /// Drops every peer whose last snapshot is at least the inactivity
    /// timeout old. Returns the evicted ids.
    pub fn sweep(&mut self, now: Instant, ctx: &SessionContext) -> Vec<SessionId> {
        let timeout = self.config.inactivity_timeout;
        let stale: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_seen) >= timeout)
            .map(|s| s.id)
            .collect();

        for id in &stale {
            if let Some(session) = self.sessions.remove(id) {
                info!(peer = %id, name = %session.display_name, "peer timed out");
                session.dispose(ctx);
            }
        }
        stale
    }

    /// Current volume per peer, plus the local microphone level.
    pub fn speaking_levels(&self) -> (f32, Vec<(SessionId, f32)>) {
        let remote = self
            .sessions
            .values()
            .map(|s| (s.id, s.volume_level()))
            .collect();
        (self.factory.local_volume_level(), remote)
    }

    pub fn close_all(&mut self, ctx: &SessionContext) {
        let sessions = std::mem::take(&mut self.sessions);
        for (_, session) in sessions {
            session.dispose(ctx);
        }
    }

    /// Gives a live peer whose negotiation failed a fresh link, so voice can
    /// be negotiated again. Returns whether it did.
    fn reopen_if_closed(&mut self, id: SessionId) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if !session.link.is_closed() {
            return false;
        }
        debug!(peer = %id, "renegotiating audio");
        session.reset(self.factory.open(id));
        true
    }

    fn session_entry(
        &mut self,
        id: SessionId,
        display_name: &str,
        now: Instant,
    ) -> &mut PeerSession<F::Channel> {
        let Self {
            sessions,
            factory,
            template,
            ..
        } = self;
        sessions.entry(id).or_insert_with(|| {
            info!(peer = %id, name = %display_name, "peer joined");
            PeerSession {
                id,
                display_name: display_name.to_string(),
                link: SignalingLink::new(id),
                last_seen: now,
                avatar: RemoteAvatar::new(template.clone()),
                audio: factory.open(id),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioCommand;
    use crate::avatar::HumanBone;
    use glam::Vec3;
    use holoroom_common::protocol::ClientMessage;
    use holoroom_ik::IkConfig;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tokio::sync::mpsc;

    #[derive(Default, Clone)]
    struct Recorder {
        commands: Rc<RefCell<Vec<(SessionId, AudioCommand)>>>,
        closes: Rc<RefCell<HashMap<SessionId, usize>>>,
    }

    impl Recorder {
        fn commands_for(&self, peer: SessionId) -> Vec<AudioCommand> {
            self.commands
                .borrow()
                .iter()
                .filter(|(p, _)| *p == peer)
                .map(|(_, c)| c.clone())
                .collect()
        }

        fn closes(&self, peer: SessionId) -> usize {
            self.closes.borrow().get(&peer).copied().unwrap_or(0)
        }
    }

    struct MockChannel {
        peer: SessionId,
        recorder: Recorder,
    }

    impl AudioChannel for MockChannel {
        fn execute(&mut self, command: AudioCommand) {
            self.recorder.commands.borrow_mut().push((self.peer, command));
        }

        fn volume_level(&self) -> f32 {
            0.25
        }

        fn close(&mut self) {
            *self.recorder.closes.borrow_mut().entry(self.peer).or_default() += 1;
        }
    }

    struct MockFactory {
        recorder: Recorder,
    }

    impl AudioChannelFactory for MockFactory {
        type Channel = MockChannel;

        fn open(&mut self, peer: SessionId) -> MockChannel {
            MockChannel {
                peer,
                recorder: self.recorder.clone(),
            }
        }

        fn local_volume_level(&self) -> f32 {
            0.0
        }
    }

    struct Fixture {
        registry: PeerRegistry<MockFactory>,
        recorder: Recorder,
        ctx: SessionContext,
        outbound: mpsc::Receiver<ClientMessage>,
        local: SessionId,
        t0: Instant,
    }

    /// Local id on the requested side of the remote id.
    fn fixture(local_is_smaller: bool) -> (Fixture, SessionId) {
        let a = SessionId::new_random();
        let b = SessionId::new_random();
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (local, remote) = if local_is_smaller {
            (low, high)
        } else {
            (high, low)
        };

        let recorder = Recorder::default();
        let rig = AvatarRig::humanoid(&IkConfig::default()).unwrap();
        let registry = PeerRegistry::new(
            PeerConfig::default(),
            rig,
            MockFactory {
                recorder: recorder.clone(),
            },
        );
        let (mut ctx, outbound) = SessionContext::channel("local", 64);
        ctx.set_local_id(local);
        let fixture = Fixture {
            registry,
            recorder,
            ctx,
            outbound,
            local,
            t0: Instant::now(),
        };
        (fixture, remote)
    }

    fn snapshot(id: SessionId) -> PoseSnapshot {
        let mut snapshot = PoseSnapshot::new(id, "remote");
        snapshot.headset_position = Some([0.0, 1.6, 0.0]);
        snapshot.headset_orientation = Some([0.0, 0.0, 0.0, 1.0]);
        snapshot
    }

    fn drain(rx: &mut mpsc::Receiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_smaller_id_offers_on_discovery() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.recorder.commands_for(remote), vec![AudioCommand::CreateOffer]);
        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::OfferCreated
        );

        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::LocalOffer(SessionDescription::offer("o")),
            },
            &f.ctx,
        );
        assert_eq!(
            drain(&mut f.outbound),
            vec![ClientMessage::Offer {
                target: remote,
                description: SessionDescription::offer("o"),
            }]
        );

        // later snapshots do not offer again
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        assert_eq!(f.recorder.commands_for(remote).len(), 1);
    }

    #[test]
    fn test_larger_id_waits_and_answers() {
        let (mut f, remote) = fixture(false);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        assert!(f.recorder.commands_for(remote).is_empty());

        f.registry.on_offer(remote, SessionDescription::offer("o"), f.t0, &f.ctx);
        assert_eq!(
            f.recorder.commands_for(remote),
            vec![AudioCommand::AcceptOffer(SessionDescription::offer("o"))]
        );

        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::LocalAnswer(SessionDescription::answer("a")),
            },
            &f.ctx,
        );
        assert_eq!(
            drain(&mut f.outbound),
            vec![ClientMessage::Answer {
                target: remote,
                description: SessionDescription::answer("a"),
            }]
        );
        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::AnswerSent
        );
    }

    #[test]
    fn test_offer_from_unseen_peer_creates_session() {
        let (mut f, remote) = fixture(false);
        f.registry.on_offer(remote, SessionDescription::offer("o"), f.t0, &f.ctx);
        assert_eq!(f.registry.len(), 1);
        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::OfferReceived
        );
    }

    #[test]
    fn test_duplicate_answer_is_harmless() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::LocalOffer(SessionDescription::offer("o")),
            },
            &f.ctx,
        );

        let mut ctx = f.ctx;
        let answer = ServerMessage::Answer {
            sender: remote,
            description: SessionDescription::answer("a"),
        };
        f.registry.handle(answer.clone(), f.t0, &mut ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::Established,
            },
            &ctx,
        );
        f.registry.handle(answer, f.t0, &mut ctx);

        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::Connected
        );
        let applied = f
            .recorder
            .commands_for(remote)
            .into_iter()
            .filter(|c| matches!(c, AudioCommand::ApplyAnswer(_)))
            .count();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_own_snapshot_is_ignored() {
        let (mut f, _) = fixture(true);
        f.registry.on_player_data(&snapshot(f.local), f.t0, &f.ctx);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_stale_peer_evicted_on_sweep() {
        let (mut f, remote) = fixture(true);
        let period = f.registry.config().sweep_interval;
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);

        let mut evicted_at = None;
        for tick in 1..=8u32 {
            let now = f.t0 + period * tick;
            if !f.registry.sweep(now, &f.ctx).is_empty() {
                evicted_at = Some(now - f.t0);
                break;
            }
            assert_eq!(f.recorder.closes(remote), 0);
        }

        assert_eq!(evicted_at, Some(Duration::from_secs(60)));
        assert!(f.registry.is_empty());
        assert_eq!(f.recorder.closes(remote), 1);

        f.registry.close_all(&f.ctx);
        f.registry.on_disconnect(remote, &f.ctx);
        assert_eq!(f.recorder.closes(remote), 1);
    }

    #[test]
    fn test_snapshots_keep_peer_alive() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        f.registry
            .on_player_data(&snapshot(remote), f.t0 + Duration::from_secs(30), &f.ctx);

        assert!(f
            .registry
            .sweep(f.t0 + Duration::from_secs(60), &f.ctx)
            .is_empty());
        assert_eq!(
            f.registry.sweep(f.t0 + Duration::from_secs(90), &f.ctx),
            vec![remote]
        );
    }

    #[test]
    fn test_disconnect_closes_audio_once() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);

        let mut ctx = f.ctx;
        f.registry.handle(
            ServerMessage::PlayerDisconnected { session_id: remote },
            f.t0,
            &mut ctx,
        );
        f.registry.on_disconnect(remote, &ctx);
        assert!(f.registry.is_empty());
        assert_eq!(f.recorder.closes(remote), 1);

        // late signaling for the departed peer is dropped quietly
        f.registry
            .on_answer(remote, SessionDescription::answer("late"), &ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::Established,
            },
            &ctx,
        );
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_failed_negotiation_closes_audio_once() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::Failed("ice".into()),
            },
            &f.ctx,
        );
        assert_eq!(f.recorder.closes(remote), 1);
        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::Closed
        );

        f.registry.on_disconnect(remote, &f.ctx);
        assert_eq!(f.recorder.closes(remote), 1);
    }

    #[test]
    fn test_failed_negotiation_is_retried_on_next_snapshot() {
        let (mut f, remote) = fixture(true);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::Failed("ice".into()),
            },
            &f.ctx,
        );
        let offers_before = f
            .recorder
            .commands_for(remote)
            .iter()
            .filter(|c| matches!(c, AudioCommand::CreateOffer))
            .count();

        f.registry
            .on_player_data(&snapshot(remote), f.t0 + Duration::from_millis(100), &f.ctx);
        let session = f.registry.get(remote).unwrap();
        assert_eq!(session.state(), SignalingState::OfferCreated);
        let offers_after = f
            .recorder
            .commands_for(remote)
            .iter()
            .filter(|c| matches!(c, AudioCommand::CreateOffer))
            .count();
        assert_eq!(offers_after, offers_before + 1);
        assert_eq!(f.recorder.closes(remote), 1);
    }

    #[test]
    fn test_failed_responder_accepts_new_offer() {
        let (mut f, remote) = fixture(false);
        f.registry.on_player_data(&snapshot(remote), f.t0, &f.ctx);
        f.registry
            .on_offer(remote, SessionDescription::offer("v=0 first"), f.t0, &f.ctx);
        f.registry.on_channel_event(
            PeerEvent {
                peer: remote,
                event: ChannelEvent::Failed("ice".into()),
            },
            &f.ctx,
        );
        assert_eq!(f.registry.get(remote).unwrap().state(), SignalingState::Closed);

        f.registry
            .on_offer(remote, SessionDescription::offer("v=0 second"), f.t0, &f.ctx);
        assert_eq!(
            f.registry.get(remote).unwrap().state(),
            SignalingState::OfferReceived
        );
        assert!(f
            .recorder
            .commands_for(remote)
            .contains(&AudioCommand::AcceptOffer(SessionDescription::offer("v=0 second"))));
    }

    #[test]
    fn test_snapshot_drives_remote_avatar() {
        let (mut f, remote) = fixture(true);
        let mut snap = snapshot(remote);
        snap.ground_offset = Some([0.0, 0.0, 2.0]);
        f.registry.on_player_data(&snap, f.t0, &f.ctx);

        let rig = f.registry.get(remote).unwrap().avatar().rig();
        let head = rig.world_position(HumanBone::Head).unwrap();
        assert!((head - Vec3::new(0.0, 1.6, -2.0)).length() < 1e-4);

        let (local, remote_levels) = f.registry.speaking_levels();
        assert_eq!(local, 0.0);
        assert_eq!(remote_levels, vec![(remote, 0.25)]);
    }

    #[test]
    fn test_welcome_sets_local_id() {
        let (mut f, _) = fixture(true);
        let (mut ctx, _rx) = SessionContext::channel("fresh", 4);
        let id = SessionId::new_random();
        f.registry
            .handle(ServerMessage::Welcome { session_id: id }, f.t0, &mut ctx);
        assert_eq!(ctx.local_id(), Some(id));
    }
}
