//! Microphone capture
//!
//! The cpal stream lives on its own thread for the lifetime of the capture,
//! kept alive by a running flag. Captured buffers are handed to a callback
//! in the device's native format; the engine converts them.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_input_device, stream_format};
use crate::audio::format::{SampleKind, Samples, StreamFormat};
use crate::error::AudioError;

/// Receives every captured buffer, on the device thread
pub type CaptureCallback = Box<dyn FnMut(Samples) + Send + 'static>;

/// Source of raw microphone buffers
pub trait CaptureSource: Send {
    /// Native format of delivered buffers
    fn format(&self) -> StreamFormat;

    /// Begin delivering buffers. Fails if the device cannot be started.
    fn start(&mut self, callback: CaptureCallback) -> Result<(), AudioError>;

    fn stop(&mut self);
}

const STREAM_START_TIMEOUT: Duration = Duration::from_secs(2);

/// cpal input stream for one device
pub struct CpalCapture {
    device_name: Option<String>,
    format: StreamFormat,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    samples_captured: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_input_device(device_name)?;
        let supported = device.default_config()?;
        let format = stream_format(&supported)?;

        tracing::info!(
            device = %device.name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            kind = ?format.kind,
            "Capture device opened"
        );

        Ok(Self {
            device_name: device_name.map(str::to_string),
            format,
            config: supported.config(),
            running: Arc::new(AtomicBool::new(false)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }
}

impl CaptureSource for CpalCapture {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self, mut callback: CaptureCallback) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let samples_captured = self.samples_captured.clone();
        let device_name = self.device_name.clone();
        let config = self.config.clone();
        let kind = self.format.kind;

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let device = match find_input_device(device_name.as_deref()) {
                    Ok(device) => device.into_inner(),
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let err_fn = |err: cpal::StreamError| tracing::error!("Capture stream error: {}", err);
                let active = running.clone();
                let counter = samples_captured.clone();

                let stream = match kind {
                    SampleKind::F32 => device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if active.load(Ordering::Relaxed) {
                                counter.fetch_add(data.len() as u64, Ordering::Relaxed);
                                callback(Samples::F32(data.to_vec()));
                            }
                        },
                        err_fn,
                        None,
                    ),
                    SampleKind::I16 => device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            if active.load(Ordering::Relaxed) {
                                counter.fetch_add(data.len() as u64, Ordering::Relaxed);
                                callback(Samples::I16(data.to_vec()));
                            }
                        },
                        err_fn,
                        None,
                    ),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::StreamError(e.to_string())
            })?;

        let started = match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(AudioError::StreamError("Capture stream did not start".to_string())),
        };

        match started {
            Ok(()) => {
                self.thread_handle = Some(handle);
                tracing::debug!("Capture started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(samples = self.samples_captured(), "Capture stopped");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_open_reports_format() {
        // May fail on CI/systems without audio devices
        if let Ok(capture) = CpalCapture::open(None) {
            let format = capture.format();
            assert!(format.sample_rate > 0);
            assert!(format.channels > 0);
            assert!(!capture.is_running());
        }
    }
}
