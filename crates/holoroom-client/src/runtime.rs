//! Headless client session.
//!
//! All client state lives in one task. Frame ticks, relay frames, audio
//! backend events and the stale-peer sweep are handled one at a time from a
//! single `select!` loop, so nothing needs a lock.

use std::time::{Duration, Instant};

use anyhow::Result;
use holoroom_ik::IkConfig;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::avatar::AvatarRig;
use crate::config::ClientConfig;
use crate::context::SessionContext;
use crate::input::{InputSource, ScriptedInput};
use crate::peer::PeerRegistry;
use crate::sync_loop::LocalSync;
use crate::transport;
use crate::webrtc_audio::WebRtcAudioFactory;

const OUTBOUND_QUEUE: usize = 256;
const LEVEL_REPORT_INTERVAL: Duration = Duration::from_secs(2);
/// Level above which a peer is reported as speaking.
const SPEAKING_THRESHOLD: f32 = 0.2;

pub async fn run(config: ClientConfig) -> Result<()> {
    let ik = IkConfig {
        iterations: config.ik_iterations,
        ..IkConfig::default()
    };
    let mut local = LocalSync::new(&config.sync_config(), &ik)?;
    let template = AvatarRig::humanoid(&ik)?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let factory = WebRtcAudioFactory::new(config.stun_servers.clone(), events_tx)?;
    let (factory, _microphone) = attach_microphone(factory, &config);
    let peer_config = config.peer_config();
    let sweep_period = peer_config.sweep_interval;
    let mut peers = PeerRegistry::new(peer_config, template, factory);

    let (mut ctx, outbound_rx) = SessionContext::channel(config.name.clone(), OUTBOUND_QUEUE);
    let mut relay = transport::connect(&config.relay_url, outbound_rx).await?;

    let mut input = ScriptedInput::new();
    let mut frames = interval(config.frame_interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sweep = interval(sweep_period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut levels = interval(LEVEL_REPORT_INTERVAL);
    let mut last_frame = Instant::now();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(name = %config.name, "session started");
    loop {
        tokio::select! {
            _ = frames.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f64();
                last_frame = now;
                let sample = input.sample(local.elapsed());
                local.tick(dt, &sample, &ctx);
            }
            message = relay.next_message() => {
                let Some(message) = message else {
                    warn!("relay connection closed");
                    break;
                };
                peers.handle(message, Instant::now(), &mut ctx);
            }
            Some(event) = events_rx.recv() => {
                peers.on_channel_event(event, &ctx);
            }
            _ = sweep.tick() => {
                let evicted = peers.sweep(Instant::now(), &ctx);
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), remaining = peers.len(), "stale peers evicted");
                }
            }
            _ = levels.tick() => report_levels(&peers),
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("failed to listen for shutdown signal: {}", e);
                }
                info!("shutting down");
                break;
            }
        }
    }

    peers.close_all(&ctx);
    Ok(())
}

fn report_levels(peers: &PeerRegistry<WebRtcAudioFactory>) {
    let (local, remote) = peers.speaking_levels();
    debug!(local, peers = remote.len(), "volume levels");
    for (id, level) in remote {
        if level >= SPEAKING_THRESHOLD {
            let name = peers.get(id).map(|p| p.display_name()).unwrap_or_default();
            info!(peer = %id, %name, level, "speaking");
        }
    }
}

#[cfg(feature = "microphone")]
type Microphone = crate::capture::MicrophoneCapture;

#[cfg(not(feature = "microphone"))]
type Microphone = ();

#[cfg(feature = "microphone")]
fn attach_microphone(
    factory: WebRtcAudioFactory,
    config: &ClientConfig,
) -> (WebRtcAudioFactory, Option<Microphone>) {
    use crate::volume::SharedLevel;
    use crate::webrtc_audio::opus_track;

    if config.no_microphone {
        info!("microphone disabled, joining receive-only");
        return (factory, None);
    }

    let track = opus_track();
    let level = SharedLevel::default();
    match crate::capture::start(track.clone(), level.clone()) {
        Ok(capture) => (factory.with_microphone(track, level), Some(capture)),
        Err(e) => {
            warn!("microphone unavailable, continuing receive-only: {:#}", e);
            (factory, None)
        }
    }
}

#[cfg(not(feature = "microphone"))]
fn attach_microphone(
    factory: WebRtcAudioFactory,
    config: &ClientConfig,
) -> (WebRtcAudioFactory, Option<Microphone>) {
    if !config.no_microphone {
        warn!("built without microphone support, continuing receive-only");
    }
    (factory, None)
}
