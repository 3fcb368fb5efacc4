use crate::{AcquisitionConfig, DeviceError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use std::fmt;

/// Hardware capture buffer length of the board, in samples.
pub const HW_BUFFER_SIZE: usize = 16384;

/// Trigger sources understood by the acquisition core.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    #[serde(rename = "DISABLED")]
    Disabled,
    #[serde(rename = "NOW")]
    Now,
    #[serde(rename = "CHA_PE")]
    ChAPositiveEdge,
    #[serde(rename = "CHA_NE")]
    ChANegativeEdge,
    #[serde(rename = "CHB_PE")]
    ChBPositiveEdge,
    #[serde(rename = "CHB_NE")]
    ChBNegativeEdge,
    #[serde(rename = "EXT_PE")]
    ExtPositiveEdge,
    #[serde(rename = "EXT_NE")]
    ExtNegativeEdge,
    #[serde(rename = "AWG_PE")]
    AwgPositiveEdge,
    #[serde(rename = "AWG_NE")]
    AwgNegativeEdge,
    #[serde(rename = "CHC_PE")]
    ChCPositiveEdge,
    #[serde(rename = "CHC_NE")]
    ChCNegativeEdge,
    #[serde(rename = "CHD_PE")]
    ChDPositiveEdge,
    #[serde(rename = "CHD_NE")]
    ChDNegativeEdge,
}

impl TriggerSource {
    /// Input channel whose level the trigger compares against, if any.
    pub fn level_channel(&self) -> Option<u8> {
        match self {
            TriggerSource::ChAPositiveEdge | TriggerSource::ChANegativeEdge => Some(1),
            TriggerSource::ChBPositiveEdge | TriggerSource::ChBNegativeEdge => Some(2),
            TriggerSource::ChCPositiveEdge | TriggerSource::ChCNegativeEdge => Some(3),
            TriggerSource::ChDPositiveEdge | TriggerSource::ChDNegativeEdge => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerSource::Disabled => "DISABLED",
            TriggerSource::Now => "NOW",
            TriggerSource::ChAPositiveEdge => "CHA_PE",
            TriggerSource::ChANegativeEdge => "CHA_NE",
            TriggerSource::ChBPositiveEdge => "CHB_PE",
            TriggerSource::ChBNegativeEdge => "CHB_NE",
            TriggerSource::ExtPositiveEdge => "EXT_PE",
            TriggerSource::ExtNegativeEdge => "EXT_NE",
            TriggerSource::AwgPositiveEdge => "AWG_PE",
            TriggerSource::AwgNegativeEdge => "AWG_NE",
            TriggerSource::ChCPositiveEdge => "CHC_PE",
            TriggerSource::ChCNegativeEdge => "CHC_NE",
            TriggerSource::ChDPositiveEdge => "CHD_PE",
            TriggerSource::ChDNegativeEdge => "CHD_NE",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    Waiting,
    Triggered,
}

/// Acquisition capability of a triggered multi-channel digitizer.
///
/// Channels are numbered from 1. A read returns the oldest-first contents of
/// the circular capture buffer, with the trigger point at its midpoint.
pub trait Digitizer {
    /// Program decimation, trigger level and trigger delay before the first arm.
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn release(&mut self) -> Result<(), DeviceError>;
    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError>;
    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError>;
    fn read_channel_buffer(&mut self, channel: u8, size: usize) -> Result<Vec<f32>, DeviceError>;
    /// Length of the hardware capture buffer in samples.
    fn buffer_size(&self) -> usize;
}

impl<D: Digitizer + ?Sized> Digitizer for Box<D> {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceError> {
        (**self).configure(config)
    }
    fn start(&mut self) -> Result<(), DeviceError> {
        (**self).start()
    }
    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }
    fn release(&mut self) -> Result<(), DeviceError> {
        (**self).release()
    }
    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError> {
        (**self).set_trigger_source(source)
    }
    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError> {
        (**self).trigger_state()
    }
    fn read_channel_buffer(&mut self, channel: u8, size: usize) -> Result<Vec<f32>, DeviceError> {
        (**self).read_channel_buffer(channel, size)
    }
    fn buffer_size(&self) -> usize {
        (**self).buffer_size()
    }
}

/// Buffer contents produced by [`SimulatedDigitizer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SimWaveform {
    /// Sample `i` of channel `c` reads `c * 100_000 + i`.
    Ramp,
    /// Baseline noise with a decaying pulse starting at the buffer midpoint.
    Pulse { amplitude: f32, noise: f32 },
}

/// Software stand-in for the board, used for dry runs and tests.
#[derive(Debug)]
pub struct SimulatedDigitizer {
    buffer_size: usize,
    waveform: SimWaveform,
    polls_per_trigger: u32,
    rng: StdRng,
    source: Option<TriggerSource>,
    running: bool,
    captured: bool,
    polls: u32,
    pub captures: u64,
    pub released: bool,
}

impl SimulatedDigitizer {
    pub fn new(seed: u64) -> Self {
        Self {
            buffer_size: HW_BUFFER_SIZE,
            waveform: SimWaveform::Pulse {
                amplitude: 0.3,
                noise: 0.002,
            },
            polls_per_trigger: 3,
            rng: StdRng::seed_from_u64(seed),
            source: None,
            running: false,
            captured: false,
            polls: 0,
            captures: 0,
            released: false,
        }
    }

    pub fn with_waveform(mut self, waveform: SimWaveform) -> Self {
        self.waveform = waveform;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Number of `Waiting` polls reported before each trigger fires.
    pub fn with_polls_per_trigger(mut self, polls: u32) -> Self {
        self.polls_per_trigger = polls;
        self
    }

    fn check_open(&self, operation: &'static str) -> Result<(), DeviceError> {
        if self.released {
            return Err(DeviceError::new(operation, "device already released"));
        }
        Ok(())
    }

    fn sample(&mut self, channel: u8, index: usize) -> f32 {
        match self.waveform {
            SimWaveform::Ramp => channel as f32 * 100_000.0 + index as f32,
            SimWaveform::Pulse { amplitude, noise } => {
                let baseline = self.rng.random_range(-noise..=noise);
                let midpoint = self.buffer_size / 2;
                if index < midpoint {
                    return baseline;
                }
                let t = (index - midpoint) as f32;
                let scale = 1.0 - 0.15 * (channel as f32 - 1.0);
                baseline - amplitude * scale * (-t / 12.0).exp()
            }
        }
    }
}

impl Digitizer for SimulatedDigitizer {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceError> {
        self.check_open("configure")?;
        if config.buffer_size > self.buffer_size {
            return Err(DeviceError::new(
                "configure",
                format!(
                    "requested buffer of {} samples, device holds {}",
                    config.buffer_size, self.buffer_size
                ),
            ));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.check_open("start")?;
        self.running = true;
        self.captured = false;
        self.polls = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.check_open("stop")?;
        self.running = false;
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.running = false;
        self.released = true;
        Ok(())
    }

    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError> {
        self.check_open("set_trigger_source")?;
        self.source = Some(source);
        Ok(())
    }

    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError> {
        self.check_open("trigger_state")?;
        if !self.running {
            return Err(DeviceError::new("trigger_state", "acquisition not started"));
        }
        let fired = match self.source {
            None | Some(TriggerSource::Disabled) => false,
            Some(TriggerSource::Now) => true,
            Some(_) => {
                self.polls += 1;
                self.polls > self.polls_per_trigger
            }
        };
        if fired && !self.captured {
            self.captured = true;
            self.captures += 1;
        }
        Ok(if self.captured {
            TriggerState::Triggered
        } else {
            TriggerState::Waiting
        })
    }

    fn read_channel_buffer(&mut self, channel: u8, size: usize) -> Result<Vec<f32>, DeviceError> {
        self.check_open("read_channel_buffer")?;
        if !self.captured {
            return Err(DeviceError::new("read_channel_buffer", "no capture to read"));
        }
        let len = size.min(self.buffer_size);
        Ok((0..len).map(|i| self.sample(channel, i)).collect())
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_after_configured_polls() {
        let mut dig = SimulatedDigitizer::new(1).with_polls_per_trigger(2);
        dig.start().unwrap();
        dig.set_trigger_source(TriggerSource::ChBNegativeEdge).unwrap();
        assert_eq!(dig.trigger_state().unwrap(), TriggerState::Waiting);
        assert_eq!(dig.trigger_state().unwrap(), TriggerState::Waiting);
        assert_eq!(dig.trigger_state().unwrap(), TriggerState::Triggered);
        assert_eq!(dig.captures, 1);
    }

    #[test]
    fn disabled_source_never_fires() {
        let mut dig = SimulatedDigitizer::new(1).with_polls_per_trigger(0);
        dig.start().unwrap();
        dig.set_trigger_source(TriggerSource::Disabled).unwrap();
        for _ in 0..10 {
            assert_eq!(dig.trigger_state().unwrap(), TriggerState::Waiting);
        }
    }

    #[test]
    fn ramp_buffer_is_indexed() {
        let mut dig = SimulatedDigitizer::new(1).with_waveform(SimWaveform::Ramp);
        dig.start().unwrap();
        dig.set_trigger_source(TriggerSource::Now).unwrap();
        dig.trigger_state().unwrap();
        let buf = dig.read_channel_buffer(2, HW_BUFFER_SIZE).unwrap();
        assert_eq!(buf.len(), HW_BUFFER_SIZE);
        assert_eq!(buf[0], 200_000.0);
        assert_eq!(buf[8192], 208_192.0);
    }

    #[test]
    fn released_device_refuses_work() {
        let mut dig = SimulatedDigitizer::new(1);
        dig.release().unwrap();
        assert!(dig.start().is_err());
    }

    #[test]
    fn trigger_source_names() {
        assert_eq!(TriggerSource::ChBNegativeEdge.to_string(), "CHB_NE");
        assert_eq!(TriggerSource::ChBNegativeEdge.level_channel(), Some(2));
        assert_eq!(TriggerSource::ExtPositiveEdge.level_channel(), None);
    }
}
