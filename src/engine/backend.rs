//! Platform audio I/O behind a seam the engine can be tested through

use std::sync::Arc;

use crate::audio::{CaptureSource, CpalCapture, CpalPlayback, PlaybackSink};
use crate::config::DeviceConfig;
use crate::error::AudioError;

/// Opens the microphone and speaker for a session
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self) -> Result<Box<dyn CaptureSource>, AudioError>;

    fn open_playback(&self) -> Result<Arc<dyn PlaybackSink>, AudioError>;
}

/// cpal devices selected by name, or the host defaults
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    devices: DeviceConfig,
}

impl CpalBackend {
    pub fn new(devices: DeviceConfig) -> Self {
        Self { devices }
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self) -> Result<Box<dyn CaptureSource>, AudioError> {
        Ok(Box::new(CpalCapture::open(self.devices.input_device.as_deref())?))
    }

    fn open_playback(&self) -> Result<Arc<dyn PlaybackSink>, AudioError> {
        Ok(Arc::new(CpalPlayback::open(self.devices.output_device.as_deref())?))
    }
}
