//! Red Pitaya backend over the board's C acquisition library (`librp`).

use crate::{
    AcquisitionConfig, DeviceError, Digitizer, TriggerSource, TriggerState, HW_BUFFER_SIZE,
};
use libc::{c_float, c_int};

mod ffi {
    use super::*;

    pub const RP_TRIG_STATE_TRIGGERED: c_int = 0;
    pub const RP_T_CH_EXT: c_int = 4;

    #[link(name = "rp")]
    extern "C" {
        pub fn rp_Init() -> c_int;
        pub fn rp_Release() -> c_int;
        pub fn rp_AcqReset() -> c_int;
        pub fn rp_AcqSetDecimation(decimation: c_int) -> c_int;
        pub fn rp_AcqSetTriggerLevel(channel: c_int, voltage: c_float) -> c_int;
        pub fn rp_AcqSetTriggerDelay(decimated_data_num: i32) -> c_int;
        pub fn rp_AcqSetTriggerSrc(source: c_int) -> c_int;
        pub fn rp_AcqGetTriggerState(state: *mut c_int) -> c_int;
        pub fn rp_AcqStart() -> c_int;
        pub fn rp_AcqStop() -> c_int;
        pub fn rp_AcqGetOldestDataV(channel: c_int, size: *mut u32, buffer: *mut c_float)
            -> c_int;
    }
}

#[repr(i32)]
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub enum RpReturn {
    Ok = 0,
    EepromOpen = 1,
    MemoryDevOpen = 2,
    MemoryDevClose = 3,
    MemoryMap = 4,
    MemoryUnmap = 5,
    OutOfRange = 6,
    LedInput = 7,
    ReadOnly = 8,
    WriteInput = 9,
    InvalidPin = 10,
    Uninitialized = 11,
    FpgaComp = 12,
    ReadCalibration = 13,
    BufferTooSmall = 14,
    Unknown = -1,
}

impl From<i32> for RpReturn {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::EepromOpen,
            2 => Self::MemoryDevOpen,
            3 => Self::MemoryDevClose,
            4 => Self::MemoryMap,
            5 => Self::MemoryUnmap,
            6 => Self::OutOfRange,
            7 => Self::LedInput,
            8 => Self::ReadOnly,
            9 => Self::WriteInput,
            10 => Self::InvalidPin,
            11 => Self::Uninitialized,
            12 => Self::FpgaComp,
            13 => Self::ReadCalibration,
            14 => Self::BufferTooSmall,
            _ => Self::Unknown,
        }
    }
}

fn check(operation: &'static str, code: c_int) -> Result<(), DeviceError> {
    match RpReturn::from(code) {
        RpReturn::Ok => Ok(()),
        other => Err(DeviceError::new(operation, format!("{:?} (code {})", other, code))),
    }
}

fn source_code(source: TriggerSource) -> c_int {
    match source {
        TriggerSource::Disabled => 0,
        TriggerSource::Now => 1,
        TriggerSource::ChAPositiveEdge => 2,
        TriggerSource::ChANegativeEdge => 3,
        TriggerSource::ChBPositiveEdge => 4,
        TriggerSource::ChBNegativeEdge => 5,
        TriggerSource::ExtPositiveEdge => 6,
        TriggerSource::ExtNegativeEdge => 7,
        TriggerSource::AwgPositiveEdge => 8,
        TriggerSource::AwgNegativeEdge => 9,
        TriggerSource::ChCPositiveEdge => 10,
        TriggerSource::ChCNegativeEdge => 11,
        TriggerSource::ChDPositiveEdge => 12,
        TriggerSource::ChDNegativeEdge => 13,
    }
}

/// Handle on the board's acquisition core. Only one may exist per process.
pub struct RedPitaya {
    is_open: bool,
}

impl RedPitaya {
    pub fn open() -> Result<Self, DeviceError> {
        check("rp_Init", unsafe { ffi::rp_Init() })?;
        check("rp_AcqReset", unsafe { ffi::rp_AcqReset() })?;
        Ok(Self { is_open: true })
    }
}

impl Digitizer for RedPitaya {
    fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceError> {
        // decimation enum values equal the factor
        check("rp_AcqSetDecimation", unsafe {
            ffi::rp_AcqSetDecimation(config.decimation as c_int)
        })?;
        let level_channel = config
            .trigger_source
            .level_channel()
            .map(|ch| ch as c_int - 1)
            .unwrap_or(ffi::RP_T_CH_EXT);
        check("rp_AcqSetTriggerLevel", unsafe {
            ffi::rp_AcqSetTriggerLevel(level_channel, config.trigger_level as c_float)
        })?;
        check("rp_AcqSetTriggerDelay", unsafe {
            ffi::rp_AcqSetTriggerDelay(config.trigger_delay)
        })
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        check("rp_AcqStart", unsafe { ffi::rp_AcqStart() })
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        check("rp_AcqStop", unsafe { ffi::rp_AcqStop() })
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        check("rp_Release", unsafe { ffi::rp_Release() })
    }

    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError> {
        check("rp_AcqSetTriggerSrc", unsafe {
            ffi::rp_AcqSetTriggerSrc(source_code(source))
        })
    }

    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError> {
        let mut state: c_int = 0;
        check("rp_AcqGetTriggerState", unsafe {
            ffi::rp_AcqGetTriggerState(&mut state)
        })?;
        Ok(if state == ffi::RP_TRIG_STATE_TRIGGERED {
            TriggerState::Triggered
        } else {
            TriggerState::Waiting
        })
    }

    fn read_channel_buffer(&mut self, channel: u8, size: usize) -> Result<Vec<f32>, DeviceError> {
        if !(1..=4).contains(&channel) {
            return Err(DeviceError::new(
                "rp_AcqGetOldestDataV",
                format!("no input channel {}", channel),
            ));
        }
        let mut buffer = vec![0.0f32; size];
        let mut len = size as u32;
        check("rp_AcqGetOldestDataV", unsafe {
            ffi::rp_AcqGetOldestDataV(channel as c_int - 1, &mut len, buffer.as_mut_ptr())
        })?;
        buffer.truncate(len as usize);
        Ok(buffer)
    }

    fn buffer_size(&self) -> usize {
        HW_BUFFER_SIZE
    }
}

impl Drop for RedPitaya {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Releasing the board failed: {}", e);
        }
    }
}
