//! CPAL device discovery.
//!
//! ```no_run
//! use retempo::CpalDevice;
//!
//! for device in CpalDevice::list_outputs() {
//!     println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
//! }
//! ```

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::Result;
use crate::output::CpalOutput;
use crate::realtime::StretchProcessor;

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] for the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all of them.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// The system's default output device, if there is one.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        Self::from_device(device)
    }

    /// All output devices. Empty if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device sample rate in Hz.
    ///
    /// Sources are rendered at their own rate; load them at this rate, or
    /// compensate with [`Controller::set_rate`](crate::Controller::set_rate).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Start a stream on this device driven by `processor`.
    ///
    /// Playback lasts as long as the returned [`CpalOutput`] is alive.
    pub fn open(&self, processor: StretchProcessor, block_size: usize) -> Result<CpalOutput> {
        CpalOutput::new(&self.device, &self.config, processor, block_size)
    }
}
