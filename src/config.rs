use crate::{DaqError, DaqResult, TriggerSource, HW_BUFFER_SIZE};
use confique::Config;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Inputs the board exposes, numbered as on the front panel.
pub const CHANNEL_UNIVERSE: [u8; 4] = [1, 2, 3, 4];
/// ADC base clock of the board in Hz.
pub const BASE_CLOCK_HZ: f64 = 125e6;
/// Largest decimation factor the acquisition core accepts.
pub const MAX_DECIMATION: u32 = 65536;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub acq_settings: AcqSettings,
    #[config(nested)]
    pub time_settings: TimeSettings,
}

impl Conf {
    pub fn load(path: &std::path::Path) -> DaqResult<Self> {
        Ok(Conf::builder().env().file(path).load()?)
    }
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = ".", env = "PITAYA_OUTPUT_DIR")]
    pub output_dir: PathBuf,
    /// Filesystem whose free space bounds the run.
    #[config(default = "/")]
    pub storage_path: PathBuf,
    #[config(default = 10)]
    pub requested_events: u64,
    #[config(default = 20971)]
    pub file_threshold_bytes: u64,
    /// Reject runs asking for more events than the disk can hold instead of clamping.
    #[config(default = false)]
    pub strict_budget: bool,
}

#[derive(Config, Debug, Clone)]
pub struct AcqSettings {
    #[config(default = 1)]
    pub decimation: u32,
    #[config(default = "CHB_NE")]
    pub trigger_source: TriggerSource,
    /// Volts.
    #[config(default = 0.01)]
    pub trigger_level: f64,
    #[config(default = 0)]
    pub trigger_delay: i32,
    #[config(default = 32)]
    pub samples: usize,
    #[config(default = 8)]
    pub samples_delay: usize,
    #[config(default = [1, 2, 3, 4])]
    pub channels: ChannelConfig,
    #[config(default = 16384)]
    pub buffer_size: usize,
    #[config(default = 1)]
    pub poll_interval_ms: u64,
    pub trigger_timeout_ms: Option<u64>,
}

#[derive(Config, Debug, Clone)]
pub struct TimeSettings {
    #[config(default = "system")]
    pub source: TimeSource,
    /// `DD/MM/YYYY HH:MM`, only read when `source = "manual"`.
    pub manual_time: Option<String>,
    #[config(default = 0)]
    pub utc_offset_hours: i8,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChannelConfig {
    All(bool),
    List(Vec<u8>),
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeSource {
    System,
    Manual,
}

/// Validated acquisition parameters, fixed for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    pub decimation: u32,
    pub trigger_source: TriggerSource,
    pub trigger_level: f64,
    pub trigger_delay: i32,
    pub samples: usize,
    pub samples_delay: usize,
    pub channels: Vec<u8>,
    pub buffer_size: usize,
    pub poll_interval: Duration,
    pub trigger_timeout: Option<Duration>,
}

impl AcquisitionConfig {
    pub fn from_settings(settings: &AcqSettings) -> DaqResult<Self> {
        let channels = resolve_channels(&settings.channels)?;
        let config = Self {
            decimation: settings.decimation,
            trigger_source: settings.trigger_source,
            trigger_level: settings.trigger_level,
            trigger_delay: settings.trigger_delay,
            samples: settings.samples,
            samples_delay: settings.samples_delay,
            channels,
            buffer_size: settings.buffer_size,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            trigger_timeout: settings.trigger_timeout_ms.map(Duration::from_millis),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DaqResult<()> {
        let invalid = |msg: String| Err(DaqError::InvalidConfiguration(msg));

        if self.channels.is_empty() {
            return invalid("no channels selected".into());
        }
        if self.samples == 0 {
            return invalid("samples per event must be positive".into());
        }
        if self.decimation == 0
            || !self.decimation.is_power_of_two()
            || self.decimation > MAX_DECIMATION
        {
            return invalid(format!(
                "decimation {} is not a power of two in 1..={}",
                self.decimation, MAX_DECIMATION
            ));
        }
        if !self.trigger_level.is_finite() {
            return invalid("trigger level must be a finite voltage".into());
        }
        if self.buffer_size == 0 || self.buffer_size % 2 != 0 {
            return invalid(format!("buffer size {} must be even", self.buffer_size));
        }
        if self.buffer_size > HW_BUFFER_SIZE {
            return invalid(format!(
                "buffer size {} exceeds the {}-sample capture buffer",
                self.buffer_size, HW_BUFFER_SIZE
            ));
        }
        let midpoint = self.buffer_size / 2;
        if self.samples_delay > midpoint {
            return invalid(format!(
                "samples delay {} reaches before the start of the {}-sample buffer",
                self.samples_delay, self.buffer_size
            ));
        }
        if midpoint - self.samples_delay + self.samples > self.buffer_size {
            return invalid(format!(
                "window of {} samples with delay {} runs past the end of the buffer",
                self.samples, self.samples_delay
            ));
        }
        if self.poll_interval.is_zero() {
            return invalid("trigger poll interval must be positive".into());
        }
        Ok(())
    }

    pub fn sampling_rate(&self) -> f64 {
        BASE_CLOCK_HZ / self.decimation as f64
    }

    /// Index of the first sample kept from the circular buffer.
    pub fn window_start(&self) -> usize {
        self.buffer_size / 2 - self.samples_delay
    }

    pub fn event_size_bytes(&self) -> u64 {
        (self.samples * self.channels.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Time the capture buffer needs to fill past the trigger point.
    pub fn settle_time(&self) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / self.sampling_rate())
    }
}

fn resolve_channels(selection: &ChannelConfig) -> DaqResult<Vec<u8>> {
    match selection {
        ChannelConfig::All(true) => Ok(CHANNEL_UNIVERSE.to_vec()),
        ChannelConfig::All(false) => Ok(Vec::new()),
        ChannelConfig::List(list) => {
            let mut channels = list.clone();
            if let Some(bad) = channels.iter().find(|c| !CHANNEL_UNIVERSE.contains(c)) {
                return Err(DaqError::InvalidConfiguration(format!(
                    "channel {} is not one of {:?}",
                    bad, CHANNEL_UNIVERSE
                )));
            }
            channels.sort_unstable();
            let before = channels.len();
            channels.dedup();
            if channels.len() != before {
                return Err(DaqError::InvalidConfiguration(
                    "channel list contains duplicates".into(),
                ));
            }
            Ok(channels)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn acq_settings() -> AcqSettings {
        AcqSettings {
            decimation: 1,
            trigger_source: TriggerSource::ChBNegativeEdge,
            trigger_level: 0.01,
            trigger_delay: 0,
            samples: 32,
            samples_delay: 8,
            channels: ChannelConfig::List(vec![1, 2, 3, 4]),
            buffer_size: 16384,
            poll_interval_ms: 1,
            trigger_timeout_ms: None,
        }
    }

    pub(crate) fn conf(output_dir: PathBuf) -> Conf {
        Conf {
            run_settings: RunSettings {
                output_dir,
                storage_path: PathBuf::from("/"),
                requested_events: 10,
                file_threshold_bytes: 20971,
                strict_budget: false,
            },
            acq_settings: acq_settings(),
            time_settings: TimeSettings {
                source: TimeSource::System,
                manual_time: None,
                utc_offset_hours: 0,
            },
        }
    }

    #[test]
    fn defaults_validate() {
        let config = AcquisitionConfig::from_settings(&acq_settings()).unwrap();
        assert_eq!(config.window_start(), 8192 - 8);
        assert_eq!(config.event_size_bytes(), 512);
        assert_eq!(config.sampling_rate(), 125e6);
    }

    #[test]
    fn channel_list_is_sorted() {
        let mut settings = acq_settings();
        settings.channels = ChannelConfig::List(vec![3, 1]);
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        assert_eq!(config.channels, vec![1, 3]);
    }

    #[test]
    fn rejects_empty_channel_selection() {
        let mut settings = acq_settings();
        settings.channels = ChannelConfig::List(vec![]);
        assert!(matches!(
            AcquisitionConfig::from_settings(&settings),
            Err(DaqError::InvalidConfiguration(_))
        ));
        settings.channels = ChannelConfig::All(false);
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn rejects_unknown_and_duplicate_channels() {
        let mut settings = acq_settings();
        settings.channels = ChannelConfig::List(vec![1, 5]);
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
        settings.channels = ChannelConfig::List(vec![2, 2]);
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn rejects_zero_samples() {
        let mut settings = acq_settings();
        settings.samples = 0;
        assert!(matches!(
            AcquisitionConfig::from_settings(&settings),
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn rejects_window_outside_buffer() {
        let mut settings = acq_settings();
        settings.samples_delay = 8193;
        assert!(AcquisitionConfig::from_settings(&settings).is_err());

        let mut settings = acq_settings();
        settings.samples_delay = 0;
        settings.samples = 8193;
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
        settings.samples = 8192;
        assert!(AcquisitionConfig::from_settings(&settings).is_ok());
    }

    #[test]
    fn rejects_bad_decimation() {
        let mut settings = acq_settings();
        settings.decimation = 3;
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
        settings.decimation = 8;
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        assert_eq!(config.sampling_rate(), 15.625e6);
    }

    #[test]
    fn rejects_buffer_larger_than_hardware() {
        let mut settings = acq_settings();
        settings.buffer_size = usize::MAX - 1;
        settings.samples = usize::MAX / 2;
        settings.samples_delay = 0;
        assert!(matches!(
            AcquisitionConfig::from_settings(&settings),
            Err(DaqError::InvalidConfiguration(_))
        ));
        settings.buffer_size = HW_BUFFER_SIZE * 2;
        settings.samples = 32;
        assert!(AcquisitionConfig::from_settings(&settings).is_err());
    }
}
