//! Microphone capture into the local Opus track.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use opus::{Application, Channels, Encoder as OpusEncoder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::volume::{SharedLevel, VolumeMeter};

const SAMPLE_RATE: u32 = 48_000;
/// 20 ms at 48 kHz.
const FRAME_SAMPLES: usize = 960;
const FRAME_DURATION: Duration = Duration::from_millis(20);
const MAX_PACKET_BYTES: usize = 4_000;
const PACKET_QUEUE: usize = 50;

/// Running capture. Dropping it stops the device stream.
pub struct MicrophoneCapture {
    _stream: Stream,
    writer: JoinHandle<()>,
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

struct CaptureState {
    encoder: OpusEncoder,
    meter: VolumeMeter,
    level: SharedLevel,
    pcm: Vec<f32>,
    packets: mpsc::Sender<Bytes>,
}

impl CaptureState {
    fn ingest(&mut self, mono: impl Iterator<Item = f32>) {
        let start = self.pcm.len();
        self.pcm.extend(mono);
        self.meter.push_samples(&self.pcm[start..]);
        self.level.store(self.meter.level());

        while self.pcm.len() >= FRAME_SAMPLES {
            let frame: Vec<f32> = self.pcm.drain(..FRAME_SAMPLES).collect();
            match self.encoder.encode_vec_float(&frame, MAX_PACKET_BYTES) {
                Ok(packet) => {
                    if self.packets.try_send(Bytes::from(packet)).is_err() {
                        debug!("microphone packet queue full, dropping frame");
                    }
                }
                Err(e) => {
                    warn!("Opus encode error: {}", e);
                    break;
                }
            }
        }
    }
}

/// Opens the default input device and starts feeding `track`.
///
/// `level` receives the smoothed microphone volume.
pub fn start(track: Arc<TrackLocalStaticSample>, level: SharedLevel) -> Result<MicrophoneCapture> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no microphone/input audio device available"))?;
    let (config, sample_format) = select_input_config(&device)?;
    let channels = config.channels as usize;
    if channels == 0 {
        return Err(anyhow!("invalid microphone channel count"));
    }

    let mut encoder = OpusEncoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
        .map_err(|e| anyhow!("Opus encoder init failed: {}", e))?;
    encoder.set_inband_fec(true).ok();

    let (packets, mut rx) = mpsc::channel::<Bytes>(PACKET_QUEUE);
    let state = Arc::new(Mutex::new(CaptureState {
        encoder,
        meter: VolumeMeter::new(),
        level,
        pcm: Vec::with_capacity(FRAME_SAMPLES * 2),
        packets,
    }));

    let err_fn = |err: cpal::StreamError| warn!("microphone capture stream error: {}", err);
    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            {
                let state = Arc::clone(&state);
                move |data: &[f32], _: &_| ingest(&state, data, channels, |s| s)
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            {
                let state = Arc::clone(&state);
                move |data: &[i16], _: &_| {
                    ingest(&state, data, channels, |s| s as f32 / i16::MAX as f32)
                }
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            {
                let state = Arc::clone(&state);
                move |data: &[u16], _: &_| {
                    ingest(&state, data, channels, |s| {
                        (s as f32 / u16::MAX as f32) * 2.0 - 1.0
                    })
                }
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow!("unsupported microphone sample format {:?}", other)),
    };
    stream.play()?;

    let writer = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let sample = Sample {
                data,
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("failed to write microphone sample: {}", e);
            }
        }
    });

    info!(channels, "microphone capture started");
    Ok(MicrophoneCapture {
        _stream: stream,
        writer,
    })
}

/// Downmixes interleaved frames to mono and hands them to the encoder.
fn ingest<T: Copy>(
    state: &Arc<Mutex<CaptureState>>,
    data: &[T],
    channels: usize,
    to_f32: impl Fn(T) -> f32,
) {
    let mono = data
        .chunks(channels)
        .map(|frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / frame.len() as f32);

    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.ingest(mono);
}

fn select_input_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat)> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| anyhow!("audio input config query failed: {}", e))?;

    let mut fallback = None;
    for cfg in configs {
        if cfg.channels() == 0 {
            continue;
        }
        if cfg.min_sample_rate().0 > SAMPLE_RATE || cfg.max_sample_rate().0 < SAMPLE_RATE {
            continue;
        }
        let format = cfg.sample_format();
        let buffer_size = cfg.buffer_size().clone();
        let mut config = cfg.with_sample_rate(SampleRate(SAMPLE_RATE)).config();
        if let SupportedBufferSize::Range { min, max } = buffer_size {
            config.buffer_size = BufferSize::Fixed((FRAME_SAMPLES as u32).clamp(min, max));
        }
        if config.channels == 1 {
            return Ok((config, format));
        }
        fallback.get_or_insert((config, format));
    }

    fallback.ok_or_else(|| anyhow!("microphone does not support {} Hz capture", SAMPLE_RATE))
}
