//! Triggered multi-channel waveform capture for the Red Pitaya board.
//!
//! A run checks the disk budget, arms the digitizer once per event, keeps a
//! fixed window of samples around each trigger and streams the events into
//! size-bounded HDF5 files that all carry the same session metadata.

mod budget;
mod config;
mod digitizer;
mod digitizer_params;
mod error;
mod event;
mod metadata;
mod orchestrator;
#[cfg(feature = "redpitaya")]
mod rp;
mod session;
mod utils;
mod writer;

pub use budget::{
    estimate, estimate_file_size_kb, free_space_mb, overhead_params, StorageBudget,
    SAFETY_MARGIN_MB,
};
pub use config::{
    AcqSettings, AcquisitionConfig, ChannelConfig, Conf, RunSettings, TimeSettings, TimeSource,
    BASE_CLOCK_HZ, CHANNEL_UNIVERSE, MAX_DECIMATION,
};
pub use digitizer::{
    Digitizer, SimWaveform, SimulatedDigitizer, TriggerSource, TriggerState, HW_BUFFER_SIZE,
};
pub use error::{DaqError, DaqResult, DeviceError};
pub use event::{channel_dataset_name, CapturedEvent};
pub use metadata::{format_stamp, parse_manual_time, SessionClock, SessionMetadata};
pub use orchestrator::{cancel_on_termination, CaptureOrchestrator, RunSummary};
#[cfg(feature = "redpitaya")]
pub use rp::{RedPitaya, RpReturn};
pub use session::{now_ns, AcquisitionSession};
pub use utils::TriggerCounter;
pub use writer::{file_name, EventStore, OutputFile};
