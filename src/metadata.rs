use crate::{AcquisitionConfig, DaqError, DaqResult, TimeSettings, TimeSource};
use hdf5::Location;
use ndarray::arr1;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Run-wide attributes carried by every output file.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    /// Logical acquisition start (system or operator supplied), ns since epoch.
    pub set_time_ns: i64,
    /// Wall-clock start, ns since epoch.
    pub sys_time_ns: i64,
    pub decimation: u32,
    pub trigger_level: f64,
    pub trigger_delay: i32,
    pub samples_per_event: u64,
    pub samples_delay: u64,
    pub channels: Vec<i32>,
    /// Events planned for the whole run, across all files.
    pub num_events: u64,
    pub sampling_rate: f64,
}

impl SessionMetadata {
    pub fn new(config: &AcquisitionConfig, clock: &SessionClock, num_events: u64) -> Self {
        Self {
            set_time_ns: clock.set_time_ns(),
            sys_time_ns: clock.sys_time_ns(),
            decimation: config.decimation,
            trigger_level: config.trigger_level,
            trigger_delay: config.trigger_delay,
            samples_per_event: config.samples as u64,
            samples_delay: config.samples_delay as u64,
            channels: config.channels.iter().map(|&c| c as i32).collect(),
            num_events,
            sampling_rate: config.sampling_rate(),
        }
    }

    pub fn event_size_bytes(&self) -> u64 {
        self.samples_per_event * self.channels.len() as u64 * 4
    }

    pub fn write_to(&self, loc: &Location) -> hdf5::Result<()> {
        loc.new_attr::<i64>()
            .create("set_time")?
            .write_scalar(&self.set_time_ns)?;
        loc.new_attr::<i64>()
            .create("sys_time")?
            .write_scalar(&self.sys_time_ns)?;
        loc.new_attr::<u32>()
            .create("decimation")?
            .write_scalar(&self.decimation)?;
        loc.new_attr::<f64>()
            .create("trigger_level")?
            .write_scalar(&self.trigger_level)?;
        loc.new_attr::<i32>()
            .create("trigger_delay")?
            .write_scalar(&self.trigger_delay)?;
        loc.new_attr::<u64>()
            .create("samples_per_event")?
            .write_scalar(&self.samples_per_event)?;
        loc.new_attr::<u64>()
            .create("samples_delay")?
            .write_scalar(&self.samples_delay)?;
        let channels = arr1(&self.channels);
        loc.new_attr_builder()
            .with_data(&channels)
            .create("channels")?;
        loc.new_attr::<u64>()
            .create("num_events")?
            .write_scalar(&self.num_events)?;
        loc.new_attr::<f64>()
            .create("sampling_rate")?
            .write_scalar(&self.sampling_rate)?;
        Ok(())
    }

    pub fn read_from(loc: &Location) -> hdf5::Result<Self> {
        Ok(Self {
            set_time_ns: loc.attr("set_time")?.read_scalar()?,
            sys_time_ns: loc.attr("sys_time")?.read_scalar()?,
            decimation: loc.attr("decimation")?.read_scalar()?,
            trigger_level: loc.attr("trigger_level")?.read_scalar()?,
            trigger_delay: loc.attr("trigger_delay")?.read_scalar()?,
            samples_per_event: loc.attr("samples_per_event")?.read_scalar()?,
            samples_delay: loc.attr("samples_delay")?.read_scalar()?,
            channels: loc.attr("channels")?.read_raw()?,
            num_events: loc.attr("num_events")?.read_scalar()?,
            sampling_rate: loc.attr("sampling_rate")?.read_scalar()?,
        })
    }
}

/// Start times of a run, resolved once before acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionClock {
    pub set_time: OffsetDateTime,
    pub sys_time: OffsetDateTime,
}

impl SessionClock {
    pub fn resolve(settings: &TimeSettings) -> DaqResult<Self> {
        let offset = UtcOffset::from_hms(settings.utc_offset_hours, 0, 0)
            .map_err(|e| DaqError::Clock(e.to_string()))?;
        let sys_time = OffsetDateTime::now_utc().to_offset(offset);
        let set_time = match settings.source {
            TimeSource::System => sys_time,
            TimeSource::Manual => {
                let text = settings.manual_time.as_deref().ok_or_else(|| {
                    DaqError::Clock("manual time source selected without manual_time".into())
                })?;
                parse_manual_time(text)?.assume_offset(offset)
            }
        };
        unix_nanos(set_time)?;
        unix_nanos(sys_time)?;
        Ok(Self { set_time, sys_time })
    }

    /// Both times are range checked by [`SessionClock::resolve`].
    pub fn set_time_ns(&self) -> i64 {
        unix_nanos(self.set_time).unwrap_or(i64::MAX)
    }

    pub fn sys_time_ns(&self) -> i64 {
        unix_nanos(self.sys_time).unwrap_or(i64::MAX)
    }

    /// `ddmmyyyy_HHMM` of the logical start, shared by every file name of the run.
    pub fn stamp(&self) -> String {
        format_stamp(self.set_time)
    }
}

/// Nanoseconds since the epoch, for times representable as `i64` (1677..2262).
fn unix_nanos(t: OffsetDateTime) -> DaqResult<i64> {
    i64::try_from(t.unix_timestamp_nanos())
        .map_err(|_| DaqError::Clock(format!("{} is outside the nanosecond timestamp range", t)))
}

pub fn format_stamp(t: OffsetDateTime) -> String {
    format!(
        "{:02}{:02}{:04}_{:02}{:02}",
        t.day(),
        u8::from(t.month()),
        t.year(),
        t.hour(),
        t.minute()
    )
}

/// Parse an operator supplied `DD/MM/YYYY HH:MM`.
pub fn parse_manual_time(text: &str) -> DaqResult<PrimitiveDateTime> {
    let format = format_description!("[day]/[month]/[year] [hour]:[minute]");
    PrimitiveDateTime::parse(text.trim(), format)
        .map_err(|e| DaqError::Clock(format!("cannot parse '{}': {}", text, e)))
}
