use std::time::Duration;

use clap::Parser;

use crate::locomotion::DEFAULT_WALK_SPEED;
use crate::peer::PeerConfig;
use crate::sync_loop::SyncConfig;
use crate::webrtc_audio::DEFAULT_STUN_SERVER;

#[derive(Parser, Debug, Clone)]
#[command(name = "holoroom-client")]
#[command(about = "Holoroom headless client - scripted avatar with peer voice")]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    #[arg(long, env = "HOLOROOM_RELAY_URL", default_value = "ws://127.0.0.1:3000/ws")]
    pub relay_url: String,

    /// Display name sent with every snapshot
    #[arg(long, env = "HOLOROOM_NAME", default_value = "guest")]
    pub name: String,

    /// Minimum time between outbound snapshots
    #[arg(long, default_value_t = 100)]
    pub emit_interval_ms: u64,

    /// Simulation frames per second
    #[arg(long, default_value_t = 72)]
    pub frame_rate: u32,

    /// CCD passes per chain per frame
    #[arg(long, default_value_t = holoroom_ik::config::DEFAULT_ITERATIONS)]
    pub ik_iterations: u32,

    /// Seconds without a snapshot before a peer is dropped
    #[arg(long, default_value_t = 60)]
    pub inactivity_timeout_secs: u64,

    /// Seconds between stale-peer sweeps
    #[arg(long, default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// STUN server URL; repeat for several
    #[arg(long = "stun-server", env = "HOLOROOM_STUN_SERVERS", value_delimiter = ',', default_value = DEFAULT_STUN_SERVER)]
    pub stun_servers: Vec<String>,

    /// Join without capturing the microphone
    #[arg(long)]
    pub no_microphone: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ClientConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            emit_interval: Duration::from_millis(self.emit_interval_ms),
            ik_iterations: self.ik_iterations,
            walk_speed: DEFAULT_WALK_SPEED,
        }
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}
