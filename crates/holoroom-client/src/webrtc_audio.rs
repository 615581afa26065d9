//! WebRTC peer audio.
//!
//! Each channel owns one peer connection, driven by a worker task that
//! applies commands strictly in order. Results and connection state come
//! back to the frame loop as [`PeerEvent`]s over an unbounded channel.

use std::sync::Arc;

use holoroom_common::protocol::{IceCandidate, SessionDescription, SessionId};
use holoroom_common::{Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::audio::{AudioChannel, AudioChannelFactory, AudioCommand, ChannelEvent, PeerEvent};
use crate::volume::SharedLevel;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Local Opus track shared by every peer connection.
pub fn opus_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            ..Default::default()
        },
        "audio".to_string(),
        "holoroom".to_string(),
    ))
}

pub struct WebRtcAudioFactory {
    api: Arc<API>,
    ice_servers: Vec<String>,
    local_track: Option<Arc<TrackLocalStaticSample>>,
    local_level: SharedLevel,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl WebRtcAudioFactory {
    /// Receive-only until [`with_microphone`](Self::with_microphone) is used.
    pub fn new(ice_servers: Vec<String>, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Self> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| Error::media(format!("failed to register codecs: {e}")))?;
        let api = APIBuilder::new().with_media_engine(media).build();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
            local_track: None,
            local_level: SharedLevel::default(),
            events,
        })
    }

    /// Sends `track` to every peer and reports `level` as the local volume.
    pub fn with_microphone(mut self, track: Arc<TrackLocalStaticSample>, level: SharedLevel) -> Self {
        self.local_track = Some(track);
        self.local_level = level;
        self
    }

    pub fn has_microphone(&self) -> bool {
        self.local_track.is_some()
    }
}

impl AudioChannelFactory for WebRtcAudioFactory {
    type Channel = WebRtcAudioChannel;

    fn open(&mut self, peer: SessionId) -> WebRtcAudioChannel {
        let (commands, rx) = mpsc::unbounded_channel();
        let level = SharedLevel::default();
        let setup = Setup {
            peer,
            api: Arc::clone(&self.api),
            ice_servers: self.ice_servers.clone(),
            local_track: self.local_track.clone(),
            level: level.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(run_worker(setup, rx));

        WebRtcAudioChannel {
            peer,
            commands: Some(commands),
            level,
        }
    }

    fn local_volume_level(&self) -> f32 {
        self.local_level.load()
    }
}

pub struct WebRtcAudioChannel {
    peer: SessionId,
    commands: Option<mpsc::UnboundedSender<AudioCommand>>,
    level: SharedLevel,
}

impl AudioChannel for WebRtcAudioChannel {
    fn execute(&mut self, command: AudioCommand) {
        let Some(commands) = &self.commands else {
            debug!(peer = %self.peer, "command for closed audio channel dropped");
            return;
        };
        if commands.send(command).is_err() {
            debug!(peer = %self.peer, "audio worker already stopped");
        }
    }

    fn volume_level(&self) -> f32 {
        self.level.load()
    }

    fn close(&mut self) {
        // dropping the sender stops the worker, which closes the connection
        if self.commands.take().is_some() {
            debug!(peer = %self.peer, "closing audio channel");
        }
        self.level.store(0.0);
    }
}

struct Setup {
    peer: SessionId,
    api: Arc<API>,
    ice_servers: Vec<String>,
    local_track: Option<Arc<TrackLocalStaticSample>>,
    level: SharedLevel,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl Setup {
    fn report(&self, event: ChannelEvent) {
        let _ = self.events.send(PeerEvent {
            peer: self.peer,
            event,
        });
    }
}

async fn run_worker(setup: Setup, mut commands: mpsc::UnboundedReceiver<AudioCommand>) {
    let pc = match build_peer_connection(&setup).await {
        Ok(pc) => pc,
        Err(e) => {
            warn!(peer = %setup.peer, "failed to create peer connection: {}", e);
            setup.report(ChannelEvent::Failed(e.to_string()));
            return;
        }
    };

    while let Some(command) = commands.recv().await {
        if let Err(e) = apply(&pc, &setup, command).await {
            warn!(peer = %setup.peer, "audio negotiation step failed: {}", e);
            setup.report(ChannelEvent::Failed(e.to_string()));
            break;
        }
    }

    if let Err(e) = pc.close().await {
        debug!(peer = %setup.peer, "peer connection close failed: {}", e);
    }
    setup.level.store(0.0);
}

async fn build_peer_connection(setup: &Setup) -> webrtc::error::Result<Arc<RTCPeerConnection>> {
    let ice_servers = if setup.ice_servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: setup.ice_servers.clone(),
            ..Default::default()
        }]
    };
    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };
    let pc = Arc::new(setup.api.new_peer_connection(config).await?);

    match &setup.local_track {
        Some(track) => {
            let track = Arc::clone(track);
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
        }
        None => {
            pc.add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: Vec::new(),
                }),
            )
            .await?;
        }
    }

    let peer = setup.peer;
    let events = setup.events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(PeerEvent {
                        peer,
                        event: ChannelEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                    });
                }
                Err(e) => warn!(%peer, "failed to serialize ICE candidate: {}", e),
            }
        })
    }));

    let events = setup.events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = events.clone();
        Box::pin(async move {
            debug!(%peer, "peer connection state: {}", state);
            let event = match state {
                RTCPeerConnectionState::Connected => ChannelEvent::Established,
                RTCPeerConnectionState::Failed => {
                    ChannelEvent::Failed("peer connection failed".to_string())
                }
                _ => return,
            };
            let _ = events.send(PeerEvent { peer, event });
        })
    }));

    let level = setup.level.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let level = level.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                info!(%peer, "remote audio track");
                tokio::spawn(meter_remote_track(peer, track, level));
            })
        },
    ));

    Ok(pc)
}

async fn apply(pc: &RTCPeerConnection, setup: &Setup, command: AudioCommand) -> webrtc::error::Result<()> {
    match command {
        AudioCommand::CreateOffer => {
            let offer = pc.create_offer(None).await?;
            pc.set_local_description(offer.clone()).await?;
            setup.report(ChannelEvent::LocalOffer(SessionDescription::offer(offer.sdp)));
        }
        AudioCommand::AcceptOffer(description) => {
            pc.set_remote_description(RTCSessionDescription::offer(description.sdp)?)
                .await?;
            let answer = pc.create_answer(None).await?;
            pc.set_local_description(answer.clone()).await?;
            setup.report(ChannelEvent::LocalAnswer(SessionDescription::answer(
                answer.sdp,
            )));
        }
        AudioCommand::ApplyAnswer(description) => {
            pc.set_remote_description(RTCSessionDescription::answer(description.sdp)?)
                .await?;
        }
        AudioCommand::AddCandidate(candidate) => {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            };
            // a bad candidate only costs that path
            if let Err(e) = pc.add_ice_candidate(init).await {
                debug!(peer = %setup.peer, "ignoring ICE candidate: {}", e);
            }
        }
    }
    Ok(())
}

#[cfg(feature = "opus-support")]
async fn meter_remote_track(peer: SessionId, track: Arc<TrackRemote>, level: SharedLevel) {
    use crate::volume::VolumeMeter;

    const SAMPLE_RATE: u32 = 48_000;
    // 120 ms at 48 kHz, the longest Opus frame
    const MAX_FRAME_SAMPLES: usize = 5_760;

    let mut decoder = match opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono) {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!(%peer, "Opus decoder init failed: {}", e);
            return;
        }
    };
    let mut meter = VolumeMeter::new();
    let mut pcm = vec![0f32; MAX_FRAME_SAMPLES];

    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!(%peer, "remote audio track ended: {}", e);
                break;
            }
        };
        match decoder.decode_float(&packet.payload, &mut pcm, false) {
            Ok(samples) => {
                meter.push_samples(&pcm[..samples]);
                level.store(meter.level());
            }
            Err(e) => debug!(%peer, "Opus decode failed: {}", e),
        }
    }
    level.store(0.0);
}

#[cfg(not(feature = "opus-support"))]
async fn meter_remote_track(peer: SessionId, track: Arc<TrackRemote>, level: SharedLevel) {
    // no decoder: drain packets so the track keeps flowing, level stays at zero
    loop {
        if let Err(e) = track.read_rtp().await {
            debug!(%peer, "remote audio track ended: {}", e);
            break;
        }
    }
    level.store(0.0);
}
