//! **VoiceOutput** — speaker playback for greetings and replies.
//!
//! `rodio::OutputStream` is not Send, so the sink lives on a dedicated player thread driven
//! by a command channel. Every buffer is followed by a callback source so the scheduler
//! learns when that buffer finished playing.

use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::Mutex;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sample rate of streamed PCM (16-bit little-endian mono).
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Invoked once when a queued buffer finished playing.
pub type PlaybackDone = Box<dyn FnOnce() + Send + 'static>;

/// Speaker seam. Implementations must invoke `done` exactly once per accepted buffer,
/// unless `stop()` discards it first.
pub trait AudioOutput: Send + Sync {
    /// Queue an encoded payload (mp3/wav). An undecodable payload completes immediately.
    fn play_encoded(&self, bytes: Vec<u8>, done: PlaybackDone) -> VoiceResult<()>;

    /// Queue a raw PCM chunk at [`PCM_SAMPLE_RATE`].
    fn enqueue_pcm(&self, pcm: Vec<u8>, done: PlaybackDone) -> VoiceResult<()>;

    /// Drop everything queued and fall silent.
    fn stop(&self);
}

enum PlayerCommand {
    Encoded(Vec<u8>, PlaybackDone),
    Pcm(Vec<u8>, PlaybackDone),
    Stop,
}

/// Default output device through rodio.
pub struct RodioOutput {
    commands: mpsc::UnboundedSender<PlayerCommand>,
}

impl RodioOutput {
    /// Open the default output device on a player thread.
    pub fn new() -> VoiceResult<Self> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<VoiceResult<()>>(1);

        thread::Builder::new()
            .name("paul-player".to_string())
            .spawn(move || player_loop(rx, ready_tx))
            .map_err(|e| VoiceError::Playback(format!("spawn player thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("player thread exited".to_string()))??;
        info!("🔊 VoiceOutput: sink ready");
        Ok(Self { commands })
    }

    fn send(&self, command: PlayerCommand) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| VoiceError::Playback("player thread stopped".to_string()))
    }
}

impl AudioOutput for RodioOutput {
    fn play_encoded(&self, bytes: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
        self.send(PlayerCommand::Encoded(bytes, done))
    }

    fn enqueue_pcm(&self, pcm: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
        self.send(PlayerCommand::Pcm(pcm, done))
    }

    fn stop(&self) {
        if self.send(PlayerCommand::Stop).is_err() {
            debug!("VoiceOutput: stop after player exit");
        }
    }
}

fn player_loop(
    mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
    ready: std::sync::mpsc::SyncSender<VoiceResult<()>>,
) {
    let opened = OutputStream::try_default()
        .map_err(|e| VoiceError::Playback(e.to_string()))
        .and_then(|(stream, handle)| {
            Sink::try_new(&handle)
                .map(|sink| (stream, handle, sink))
                .map_err(|e| VoiceError::Playback(e.to_string()))
        });
    let (_stream, handle, mut sink) = match opened {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Some(command) = commands.blocking_recv() {
        match command {
            PlayerCommand::Encoded(bytes, done) => {
                match rodio::Decoder::new(Cursor::new(bytes)) {
                    Ok(source) => {
                        sink.append(source.convert_samples::<f32>());
                        sink.append(completion_marker(done));
                    }
                    Err(e) => {
                        warn!("VoiceOutput: decode failed: {}", e);
                        done();
                    }
                }
            }
            PlayerCommand::Pcm(pcm, done) => {
                sink.append(SamplesBuffer::new(1, PCM_SAMPLE_RATE, pcm_to_samples(&pcm)));
                sink.append(completion_marker(done));
            }
            PlayerCommand::Stop => {
                sink.stop();
                // A stopped sink drops later appends; start over with a fresh one.
                match Sink::try_new(&handle) {
                    Ok(fresh) => sink = fresh,
                    Err(e) => {
                        warn!("VoiceOutput: sink reopen failed: {}", e);
                        break;
                    }
                }
                info!("⏹️ VoiceOutput: stopped");
            }
        }
    }
    debug!("VoiceOutput: player thread exiting");
}

/// Zero-length source that runs `done` when the sink reaches it.
fn completion_marker(done: PlaybackDone) -> EmptyCallback<f32> {
    let slot = Mutex::new(Some(done));
    EmptyCallback::<f32>::new(Box::new(move || {
        let taken = slot.lock().ok().and_then(|mut guard| guard.take());
        if let Some(done) = taken {
            done();
        }
    }))
}

/// 16-bit little-endian PCM bytes to samples. A trailing odd byte is ignored.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_bytes_decode_little_endian() {
        let bytes = [0x01, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x42];
        assert_eq!(pcm_to_samples(&bytes), vec![1, i16::MAX, i16::MIN]);
    }

    #[test]
    #[ignore] // Requires an output device
    fn rodio_output_plays_undecodable_payload_as_done() {
        let output = RodioOutput::new().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        output
            .play_encoded(vec![0, 1, 2], Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
    }
}
