//! Playback sink
//!
//! The sink accepts whole sample buffers and reports each one back through
//! a completion callback once it has been played out. Completions run on a
//! dedicated worker thread, never inside the device callback and never with
//! the sink's queue lock held, so a completion may schedule the next buffer
//! straight away.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SizedSample, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_output_device, stream_format};
use crate::audio::format::{f32_to_i16, SampleKind, StreamFormat};
use crate::error::AudioError;

/// Invoked exactly once when a scheduled buffer finishes playing
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Destination for decoded audio
pub trait PlaybackSink: Send + Sync {
    /// Layout the sink expects; buffers are interleaved f32 at this rate
    fn format(&self) -> StreamFormat;

    /// Append a buffer behind everything already scheduled
    fn schedule_buffer(&self, samples: Vec<f32>, on_complete: CompletionCallback);

    fn is_playing(&self) -> bool;

    fn play(&self) -> Result<(), AudioError>;

    /// Stop output. Buffers still queued are discarded without completion.
    fn stop(&self);
}

/// How long `play` waits for the device thread to report the stream state
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(2);

struct Scheduled {
    samples: Vec<f32>,
    position: usize,
    on_complete: CompletionCallback,
}

/// State shared with the device callback
struct Shared {
    queue: Mutex<VecDeque<Scheduled>>,
    running: AtomicBool,
    /// Output samples rendered as silence because nothing was queued
    silent_samples: AtomicU64,
}

impl Shared {
    /// Fill `out` from the queue, padding with silence.
    ///
    /// Finished buffers have their completion forwarded to the worker.
    fn render<T: Copy>(&self, out: &mut [T], silence: T, convert: impl Fn(f32) -> T, done: &Sender<CompletionCallback>) {
        let mut written = 0;
        let mut finished = Vec::new();

        {
            let mut queue = self.queue.lock();
            while written < out.len() {
                let Some(front) = queue.front_mut() else { break };
                let available = &front.samples[front.position..];
                let n = available.len().min(out.len() - written);
                for (dst, &src) in out[written..written + n].iter_mut().zip(available) {
                    *dst = convert(src);
                }
                written += n;
                front.position += n;

                if front.position >= front.samples.len() {
                    if let Some(buffer) = queue.pop_front() {
                        finished.push(buffer.on_complete);
                    }
                }
            }
        }

        if written < out.len() {
            out[written..].fill(silence);
            self.silent_samples.fetch_add((out.len() - written) as u64, Ordering::Relaxed);
        }

        for on_complete in finished {
            let _ = done.send(on_complete);
        }
    }
}

/// cpal output stream driven from its own thread
pub struct CpalPlayback {
    device_name: Option<String>,
    format: StreamFormat,
    config: StreamConfig,
    shared: Arc<Shared>,
    completions: Sender<CompletionCallback>,
    stream_thread: Mutex<Option<JoinHandle<()>>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Resolve the output device and its native format. The stream itself is
    /// only opened by [`PlaybackSink::play`].
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let supported = device.default_config()?;
        let format = stream_format(&supported)?;

        tracing::info!(
            device = %device.name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            kind = ?format.kind,
            "Playback device opened"
        );

        let (tx, rx) = unbounded::<CompletionCallback>();
        let worker = spawn_completion_worker(rx)?;

        Ok(Self {
            device_name: device_name.map(str::to_string),
            format: StreamFormat { kind: SampleKind::F32, ..format },
            config: supported.config(),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                silent_samples: AtomicU64::new(0),
            }),
            completions: tx,
            stream_thread: Mutex::new(None),
            worker: Some(worker),
        })
    }

    fn spawn_stream(&self, native: SampleKind) -> Result<JoinHandle<()>, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let shared = self.shared.clone();
        let done = self.completions.clone();
        let config = self.config.clone();
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let device = match find_output_device(device_name.as_deref()) {
                    Ok(device) => device.into_inner(),
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = match native {
                    SampleKind::F32 => build_stream::<f32>(&device, &config, shared.clone(), done, 0.0, |s| s),
                    SampleKind::I16 => build_stream::<i16>(&device, &config, shared.clone(), done, 0, f32_to_i16),
                };

                let stream = match stream.and_then(|s| {
                    s.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok(s)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while shared.running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamError("Playback stream did not start".to_string())),
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn schedule_buffer(&self, samples: Vec<f32>, on_complete: CompletionCallback) {
        self.shared.queue.lock().push_back(Scheduled {
            samples,
            position: 0,
            on_complete,
        });
    }

    fn is_playing(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn play(&self) -> Result<(), AudioError> {
        let mut thread = self.stream_thread.lock();
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let native = self.device_kind()?;
        match self.spawn_stream(native) {
            Ok(handle) => {
                *thread = Some(handle);
                tracing::debug!("Playback started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.lock().take() {
            let _ = handle.join();
        }

        let discarded = {
            let mut queue = self.shared.queue.lock();
            std::mem::take(&mut *queue)
        };
        tracing::debug!(
            discarded = discarded.len(),
            silent_samples = self.shared.silent_samples.load(Ordering::Relaxed),
            "Playback stopped"
        );
    }
}

impl CpalPlayback {
    fn device_kind(&self) -> Result<SampleKind, AudioError> {
        let device = find_output_device(self.device_name.as_deref())?;
        Ok(stream_format(&device.default_config()?)?.kind)
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
        // The worker exits once every completion sender is gone
        let (tx, _) = unbounded();
        drop(std::mem::replace(&mut self.completions, tx));
        if let Some(worker) = self.worker.take() {
            // A completion can hold the last reference to the sink
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn spawn_completion_worker(rx: Receiver<CompletionCallback>) -> Result<JoinHandle<()>, AudioError> {
    thread::Builder::new()
        .name("playback-completions".to_string())
        .spawn(move || {
            for on_complete in rx {
                on_complete();
            }
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<Shared>,
    done: Sender<CompletionCallback>,
    silence: T,
    convert: fn(f32) -> T,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                shared.render(data, silence, convert, &done);
            },
            |err| tracing::error!("Playback stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
