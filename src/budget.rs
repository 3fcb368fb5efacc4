use crate::{DaqError, DaqResult};
use std::{ffi::CString, io, os::unix::ffi::OsStrExt, path::Path};

/// Disk space that acquisition data never consumes.
pub const SAFETY_MARGIN_MB: f64 = 200.0;

// File-header (F) and per-event bookkeeping (P) cost in KB, measured at
// 32 samples for one and four channels.
const CAL_ONE_CHANNEL: (f64, f64) = (2.68, 1.59);
const CAL_FOUR_CHANNELS: (f64, f64) = (5.10, 2.30);

#[derive(Debug, Clone, PartialEq)]
pub struct StorageBudget {
    pub free_space_mb: f64,
    pub safety_margin_mb: f64,
    pub available_mb: f64,
    pub requested_events: u64,
    pub max_events: u64,
    pub effective_events: u64,
    pub per_event_kb: f64,
    /// Size of the run as requested, before clamping.
    pub requested_total_kb: f64,
    /// Size of the run that will actually be captured.
    pub estimated_total_kb: f64,
}

impl StorageBudget {
    pub fn is_clamped(&self) -> bool {
        self.effective_events < self.requested_events
    }
}

/// Fixed (F) and per-event (P) overhead in KB for a channel count.
pub fn overhead_params(channels: usize) -> (f64, f64) {
    let (f1, p1) = CAL_ONE_CHANNEL;
    let (f4, p4) = CAL_FOUR_CHANNELS;
    if channels <= 1 {
        (f1, p1)
    } else if channels >= 4 {
        (f4, p4)
    } else {
        let t = (channels - 1) as f64 / 3.0;
        (f1 + (f4 - f1) * t, p1 + (p4 - p1) * t)
    }
}

/// Estimated size in KB of one file holding `events` events.
pub fn estimate_file_size_kb(channels: usize, samples: usize, events: u64) -> f64 {
    let payload_kb = channels as f64 * samples as f64 * 4.0 / 1024.0;
    let (f, p) = overhead_params(channels);
    f + events.saturating_sub(1) as f64 * (payload_kb + p)
}

/// Bound the requested event count by what fits above the safety margin.
pub fn estimate(
    channels: usize,
    samples: usize,
    requested_events: u64,
    free_space_mb: f64,
) -> DaqResult<StorageBudget> {
    let available_mb = free_space_mb - SAFETY_MARGIN_MB;
    if available_mb.is_nan() || available_mb <= 0.0 {
        return Err(DaqError::InsufficientStorage {
            free_space_mb,
            safety_margin_mb: SAFETY_MARGIN_MB,
        });
    }

    let per_event_kb = estimate_file_size_kb(channels, samples, 1);
    let max_events = (available_mb * 1024.0 / per_event_kb).floor() as u64;
    let effective_events = requested_events.min(max_events);

    Ok(StorageBudget {
        free_space_mb,
        safety_margin_mb: SAFETY_MARGIN_MB,
        available_mb,
        requested_events,
        max_events,
        effective_events,
        per_event_kb,
        requested_total_kb: estimate_file_size_kb(channels, samples, requested_events),
        estimated_total_kb: estimate_file_size_kb(channels, samples, effective_events),
    })
}

/// Space available to unprivileged writers on the filesystem holding `path`, in MB.
pub fn free_space_mb(path: &Path) -> io::Result<f64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let res = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if res != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_bavail as f64 * stat.f_frsize as f64 / (1024.0 * 1024.0))
}
