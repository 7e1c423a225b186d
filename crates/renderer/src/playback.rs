//! Audio device output for synthesized tracks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rodio::{OutputStream, Sink, Source};

/// Feeds producer blocks to the output device and counts what it consumed.
///
/// When the producer falls behind the device gets whole frames of silence,
/// which do not count as played.
pub(crate) struct BlockSource {
    blocks: Receiver<Vec<f32>>,
    current: Vec<f32>,
    index: usize,
    silence: u16,
    channels: u16,
    sample_rate: u32,
    played_samples: Arc<AtomicU64>,
}

impl BlockSource {
    pub(crate) fn new(
        blocks: Receiver<Vec<f32>>,
        channels: u16,
        sample_rate: u32,
        played_samples: Arc<AtomicU64>,
    ) -> Self {
        Self {
            blocks,
            current: Vec::new(),
            index: 0,
            silence: 0,
            channels: channels.max(1),
            sample_rate,
            played_samples,
        }
    }
}

impl Iterator for BlockSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.silence > 0 {
            self.silence -= 1;
            return Some(0.0);
        }
        loop {
            if let Some(&sample) = self.current.get(self.index) {
                self.index += 1;
                self.played_samples.fetch_add(1, Ordering::Release);
                return Some(sample);
            }
            match self.blocks.try_recv() {
                Ok(block) => {
                    self.current = block;
                    self.index = 0;
                }
                Err(TryRecvError::Empty) => {
                    self.silence = self.channels - 1;
                    return Some(0.0);
                }
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl Source for BlockSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Default output device playing one [`BlockSource`].
///
/// The rodio stream lives on its own thread; dropping this stops playback.
pub(crate) struct AudioOutput {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    pub(crate) fn play(source: BlockSource) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let opened = OutputStream::try_default()
                    .context("failed to open the default audio device")
                    .and_then(|(stream, handle)| {
                        let sink = Sink::try_new(&handle).context("failed to create audio sink")?;
                        Ok((stream, sink))
                    });
                let (_stream, sink) = match opened {
                    Ok(parts) => parts,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                sink.append(source);
                let _ = ready_tx.send(Ok(()));
                // Returns once the owning clock hangs up.
                let _ = stop_rx.recv();
                sink.stop();
            })
            .context("failed to spawn audio output thread")?;

        let mut output = Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!("audio playback started");
                Ok(output)
            }
            Ok(Err(err)) => {
                output.stop();
                Err(err)
            }
            Err(_) => {
                output.stop();
                Err(anyhow!("audio output thread exited during startup"))
            }
        }
    }

    fn stop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
