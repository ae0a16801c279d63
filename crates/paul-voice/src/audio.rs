//! Microphone capture using CPAL
//!
//! The microphone is a hardware singleton: the activation listener and the capture session
//! take turns holding the one [`AudioTap`]. Dropping a tap releases the device.
//!
//! Neither opening nor dropping a tap waits for the device. The stream is opened and torn
//! down on the tap's own thread; a new tap's thread waits there for the previous one to
//! let go of the device.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Mono audio frame from the capture thread
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples (f32, normalized to -1.0 to 1.0), channels already mixed down
    pub samples: Vec<f32>,

    /// Device sample rate in Hz
    pub sample_rate: u32,

    /// Timestamp when captured
    pub timestamp: Instant,
}

/// A live microphone tap. Frames flow until the tap is dropped.
pub trait AudioTap: Send {
    /// False once the underlying engine stopped on its own (device error, sleep/wake).
    fn is_running(&self) -> bool;
}

/// Source of audio taps. At most one tap may be open at a time.
///
/// `open_tap` returns without waiting for the device. A device that fails to open closes
/// `frames` and leaves the tap not running.
pub trait Microphone: Send + Sync {
    fn open_tap(&self, frames: mpsc::UnboundedSender<AudioChunk>) -> VoiceResult<Box<dyn AudioTap>>;
}

/// Microphone permission check, awaited before the listener opens a tap.
#[async_trait]
pub trait MicrophoneAccess: Send + Sync {
    async fn authorize(&self) -> bool;
}

/// Grants access when the host exposes a default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAccess;

#[async_trait]
impl MicrophoneAccess for CpalAccess {
    async fn authorize(&self) -> bool {
        tokio::task::spawn_blocking(|| cpal::default_host().default_input_device().is_some())
            .await
            .unwrap_or(false)
    }
}

/// Default input device via CPAL. The stream lives on a dedicated thread (cpal `Stream`
/// is !Send on some platforms).
/// Held by a tap thread for as long as its stream is live.
type DeviceLock = Arc<Mutex<()>>;

#[derive(Debug, Default)]
pub struct CpalMicrophone {
    busy: Arc<AtomicBool>,
    device: DeviceLock,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

impl Microphone for CpalMicrophone {
    fn open_tap(&self, frames: mpsc::UnboundedSender<AudioChunk>) -> VoiceResult<Box<dyn AudioTap>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::AudioEngine(
                "microphone already tapped".to_string(),
            ));
        }
        let tap = ThreadTap::spawn(
            Arc::clone(&self.device),
            Arc::clone(&self.busy),
            move |running| open_default_stream(frames, running),
        )?;
        Ok(Box::new(tap))
    }
}

/// A tap whose stream lives on a dedicated thread (cpal `Stream` is !Send on some
/// platforms).
struct ThreadTap {
    running: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    stop: Option<std::sync::mpsc::Sender<()>>,
}

impl ThreadTap {
    /// `open` runs on the new thread once the device is free; whatever it returns is kept
    /// alive until the tap is dropped.
    fn spawn<S, F>(device: DeviceLock, busy: Arc<AtomicBool>, open: F) -> VoiceResult<Self>
    where
        F: FnOnce(Arc<AtomicBool>) -> VoiceResult<S> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let thread_running = Arc::clone(&running);

        let spawned = thread::Builder::new()
            .name("paul-mic".to_string())
            .spawn(move || {
                let _device = device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(TryRecvError::Disconnected) = stop_rx.try_recv() {
                    debug!("Microphone tap dropped before the device opened");
                } else {
                    match open(Arc::clone(&thread_running)) {
                        Ok(stream) => {
                            // Blocks until the tap is dropped.
                            let _ = stop_rx.recv();
                            drop(stream);
                        }
                        Err(e) => warn!("Microphone could not be opened: {}", e),
                    }
                }
                thread_running.store(false, Ordering::SeqCst);
                debug!("Microphone tap released");
            });

        match spawned {
            Ok(_) => Ok(Self {
                running,
                busy,
                stop: Some(stop_tx),
            }),
            Err(e) => {
                busy.store(false, Ordering::SeqCst);
                Err(VoiceError::AudioEngine(format!("spawn capture thread: {}", e)))
            }
        }
    }
}

impl AudioTap for ThreadTap {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadTap {
    fn drop(&mut self) {
        // Closing the channel wakes the capture thread.
        self.stop.take();
        self.busy.store(false, Ordering::SeqCst);
    }
}

fn open_default_stream(
    frames: mpsc::UnboundedSender<AudioChunk>,
    running: Arc<AtomicBool>,
) -> VoiceResult<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::AudioEngine("No input device available".to_string()))?;

    info!(
        "🎤 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let config: StreamConfig = supported.config();
    debug!("Input config: {:?}", config);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, frames, running)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, frames, running)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, frames, running)?,
        other => {
            return Err(VoiceError::AudioEngine(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };
    stream.play()?;
    info!("✅ Audio capture started ({}Hz, {} ch)", config.sample_rate.0, config.channels);
    Ok(stream)
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    frames: mpsc::UnboundedSender<AudioChunk>,
    running: Arc<AtomicBool>,
) -> VoiceResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let sample_rate = config.sample_rate.0;
    let data_running = Arc::clone(&running);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples = downmix(data, channels);
            let chunk = AudioChunk {
                samples,
                sample_rate,
                timestamp: Instant::now(),
            };
            if frames.send(chunk).is_err() {
                // Receiver gone; nothing left to feed.
                data_running.store(false, Ordering::SeqCst);
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
            running.store(false, Ordering::SeqCst);
        },
        None,
    )?;
    Ok(stream)
}

/// Average interleaved frames into mono f32.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
            sum / frame.len() as f32
        })
        .collect()
}
