//! **PlaybackScheduler** — completion tracking for one turn's audio.
//!
//! Whole payloads count as one scheduled buffer in an already finished stream. Streams
//! schedule chunks until `finish_stream()`. Playback is complete the first time the stream
//! is finished and every scheduled buffer has reported back; that check runs both on
//! chunk completion and on `finish_stream()` since either can happen last.

use crate::event::ControlEvent;
use crate::generation::{Generation, GenerationCounter};
use crate::voice_output::{AudioOutput, PlaybackDone};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug)]
struct ActivePlayback {
    tag: Generation,
    scheduled: usize,
    completed: usize,
    stream_finished: bool,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    events: mpsc::UnboundedSender<ControlEvent>,
    generations: GenerationCounter,
    active: Option<ActivePlayback>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            output,
            events,
            generations: GenerationCounter::new(),
            active: None,
        }
    }

    /// Play one encoded payload. Completion arrives as `ChunkPlayed` for the returned tag.
    pub fn play_whole(&mut self, bytes: Vec<u8>) -> Generation {
        let tag = self.begin();
        if let Some(active) = self.active.as_mut() {
            active.scheduled = 1;
            active.stream_finished = true;
        }
        if let Err(e) = self.output.play_encoded(bytes, self.done_callback(tag)) {
            warn!("Playback rejected payload: {}", e);
            (self.done_callback(tag))();
        }
        tag
    }

    /// Begin a streamed playback; feed it with `schedule_chunk`.
    pub fn start(&mut self) -> Generation {
        self.begin()
    }

    /// Queue one PCM chunk of the current stream. False when no stream is open.
    pub fn schedule_chunk(&mut self, pcm: Vec<u8>) -> bool {
        let tag = match self.active.as_mut() {
            Some(active) if !active.stream_finished => {
                active.scheduled += 1;
                active.tag
            }
            _ => {
                debug!("Chunk without an open stream dropped");
                return false;
            }
        };
        if let Err(e) = self.output.enqueue_pcm(pcm, self.done_callback(tag)) {
            warn!("Playback rejected chunk: {}", e);
            (self.done_callback(tag))();
        }
        true
    }

    /// Mark the stream complete. Returns true if this completed playback.
    pub fn finish_stream(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) => active.stream_finished = true,
            None => return false,
        }
        self.check_complete()
    }

    /// A buffer reported back. Returns true exactly once per playback, when it completes.
    pub fn on_chunk_played(&mut self, tag: Generation) -> bool {
        match self.active.as_mut() {
            Some(active) if active.tag == tag => active.completed += 1,
            _ => {
                debug!(playback = %tag, "Stale chunk completion ignored");
                return false;
            }
        }
        self.check_complete()
    }

    /// Silence the output and forget the current playback.
    pub fn stop(&mut self) {
        if self.active.take().is_some() {
            debug!("Playback stopped mid-turn");
        }
        self.generations.advance();
        self.output.stop();
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn scheduled_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.scheduled)
    }

    pub fn completed_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.completed)
    }

    fn begin(&mut self) -> Generation {
        if self.active.is_some() {
            warn!("New playback replaces an unfinished one");
            self.output.stop();
        }
        let tag = self.generations.advance();
        self.active = Some(ActivePlayback {
            tag,
            scheduled: 0,
            completed: 0,
            stream_finished: false,
        });
        tag
    }

    fn check_complete(&mut self) -> bool {
        let done = self
            .active
            .as_ref()
            .map_or(false, |a| a.stream_finished && a.completed >= a.scheduled);
        if done {
            self.active = None;
        }
        done
    }

    fn done_callback(&self, tag: Generation) -> PlaybackDone {
        let events = self.events.clone();
        Box::new(move || {
            let _ = events.send(ControlEvent::ChunkPlayed { playback: tag });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VoiceError, VoiceResult};
    use std::sync::Mutex;

    /// Holds done callbacks so tests decide when each buffer "finishes".
    #[derive(Default)]
    struct ManualOutput {
        pending: Mutex<Vec<PlaybackDone>>,
        stops: Mutex<usize>,
        reject: bool,
    }

    impl ManualOutput {
        fn complete_next(&self) {
            let done = self.pending.lock().unwrap().remove(0);
            done();
        }
    }

    impl AudioOutput for ManualOutput {
        fn play_encoded(&self, _bytes: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
            if self.reject {
                return Err(VoiceError::Playback("closed".to_string()));
            }
            self.pending.lock().unwrap().push(done);
            Ok(())
        }

        fn enqueue_pcm(&self, _pcm: Vec<u8>, done: PlaybackDone) -> VoiceResult<()> {
            self.play_encoded(Vec::new(), done)
        }

        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
            self.pending.lock().unwrap().clear();
        }
    }

    fn scheduler(
        output: Arc<ManualOutput>,
    ) -> (PlaybackScheduler, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PlaybackScheduler::new(output, tx), rx)
    }

    /// Feed every queued completion back; count how often playback completed.
    fn drain(s: &mut PlaybackScheduler, rx: &mut mpsc::UnboundedReceiver<ControlEvent>) -> usize {
        let mut fired = 0;
        while let Ok(ev) = rx.try_recv() {
            if let ControlEvent::ChunkPlayed { playback } = ev {
                if s.on_chunk_played(playback) {
                    fired += 1;
                }
            }
        }
        fired
    }

    #[test]
    fn whole_payload_completes_once() {
        let out = Arc::new(ManualOutput::default());
        let (mut s, mut rx) = scheduler(out.clone());
        s.play_whole(vec![1, 2, 3]);
        assert_eq!(drain(&mut s, &mut rx), 0);
        out.complete_next();
        assert_eq!(drain(&mut s, &mut rx), 1);
        assert!(!s.is_active());
    }

    #[test]
    fn stream_never_completes_before_finish() {
        let out = Arc::new(ManualOutput::default());
        let (mut s, mut rx) = scheduler(out.clone());
        s.start();
        s.schedule_chunk(vec![0; 4]);
        s.schedule_chunk(vec![0; 4]);
        out.complete_next();
        out.complete_next();
        assert_eq!(drain(&mut s, &mut rx), 0);
        assert_eq!(s.completed_count(), 2);
        // Last chunk already done: finishing the stream completes immediately.
        assert!(s.finish_stream());
        assert!(!s.finish_stream());
    }

    #[test]
    fn finish_before_last_chunk_completes_on_that_chunk() {
        let out = Arc::new(ManualOutput::default());
        let (mut s, mut rx) = scheduler(out.clone());
        s.start();
        for _ in 0..3 {
            s.schedule_chunk(vec![0; 4]);
        }
        out.complete_next();
        assert_eq!(drain(&mut s, &mut rx), 0);
        assert!(!s.finish_stream());
        out.complete_next();
        assert_eq!(drain(&mut s, &mut rx), 0);
        out.complete_next();
        assert_eq!(drain(&mut s, &mut rx), 1);
    }

    #[test]
    fn interleavings_fire_exactly_once() {
        // Every position of finish_stream among three chunk completions.
        for finish_at in 0..=3 {
            let out = Arc::new(ManualOutput::default());
            let (mut s, mut rx) = scheduler(out.clone());
            s.start();
            for _ in 0..3 {
                s.schedule_chunk(vec![0; 2]);
            }
            let mut fired = 0;
            for step in 0..=3 {
                if step == finish_at && s.finish_stream() {
                    fired += 1;
                }
                if step < 3 {
                    out.complete_next();
                    fired += drain(&mut s, &mut rx);
                }
            }
            assert_eq!(fired, 1, "finish at position {}", finish_at);
        }
    }

    #[test]
    fn empty_stream_completes_on_finish() {
        let out = Arc::new(ManualOutput::default());
        let (mut s, _rx) = scheduler(out);
        s.start();
        assert!(s.finish_stream());
    }

    #[test]
    fn stop_discards_late_completions() {
        let out = Arc::new(ManualOutput::default());
        let (mut s, mut rx) = scheduler(out.clone());
        let tag = s.start();
        s.schedule_chunk(vec![0; 2]);
        s.stop();
        assert_eq!(*out.stops.lock().unwrap(), 1);
        assert!(!s.on_chunk_played(tag));
        assert!(!s.finish_stream());
        assert_eq!(drain(&mut s, &mut rx), 0);
    }

    #[test]
    fn rejected_buffers_count_as_played() {
        let out = Arc::new(ManualOutput {
            reject: true,
            ..ManualOutput::default()
        });
        let (mut s, mut rx) = scheduler(out);
        s.play_whole(vec![9]);
        assert_eq!(drain(&mut s, &mut rx), 1);
    }
}
