//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod format;
pub mod gain;
pub mod playback;
pub mod resample;

pub use buffer::FrameAccumulator;
pub use capture::{CaptureCallback, CaptureSource, CpalCapture};
pub use device::{find_input_device, find_output_device, list_devices, AudioDeviceInfo};
pub use format::{convert, FormatConverter, SampleKind, Samples, StreamFormat, NETWORK_FORMAT, PROCESSING_FORMAT};
pub use gain::{apply_gain, peak_level, LevelMeter};
pub use playback::{CompletionCallback, CpalPlayback, PlaybackSink};
pub use resample::StreamResampler;
