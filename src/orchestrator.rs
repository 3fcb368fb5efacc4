use crate::{
    digitizer_params, estimate, AcquisitionConfig, AcquisitionSession, Conf, DaqError, DaqResult,
    DeviceError, Digitizer, EventStore, SessionClock, SessionMetadata, StorageBudget,
    TriggerCounter,
};
use crossbeam_channel::{bounded, Receiver};
use crossterm::style::Stylize;
use log::{debug, error, info, warn};
use std::{path::PathBuf, sync::Arc};

const PROGRESS_EVERY: u64 = 100;

/// Outcome of a finished (or interrupted) run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub events_captured: u64,
    pub first_timestamp_ns: Option<u64>,
    pub last_timestamp_ns: Option<u64>,
    /// Waveform payload written, in bytes.
    pub bytes_written: u64,
    pub files: Vec<PathBuf>,
    pub budget: StorageBudget,
    /// The run was cancelled before all planned events were captured.
    pub interrupted: bool,
}

impl RunSummary {
    /// Seconds between the first and last trigger, `None` if nothing triggered.
    pub fn elapsed_secs(&self) -> Option<f64> {
        if self.events_captured == 0 {
            return None;
        }
        let first = self.first_timestamp_ns?;
        let last = self.last_timestamp_ns?;
        Some(last.saturating_sub(first) as f64 / 1e9)
    }

    pub fn trigger_rate(&self) -> Option<f64> {
        let elapsed = self.elapsed_secs()?;
        (self.events_captured > 1 && elapsed > 0.0)
            .then(|| (self.events_captured - 1) as f64 / elapsed)
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Events captured: {} of {}",
            self.events_captured, self.budget.effective_events
        )];
        lines.push(format!(
            "Payload written: {:.2} KB",
            self.bytes_written as f64 / 1024.0
        ));
        for file in &self.files {
            lines.push(format!("File: {}", file.display()));
        }
        match self.elapsed_secs() {
            Some(elapsed) => {
                lines.push(format!(
                    "Time between first and last trigger: {:.6} s",
                    elapsed
                ));
                if let Some(rate) = self.trigger_rate() {
                    lines.push(format!("Mean trigger rate: {:.3} Hz", rate));
                }
            }
            None => lines.push("No triggers detected.".to_string()),
        }
        lines
    }

    /// Print the operator summary to stdout.
    pub fn report(&self) {
        let headline = if self.interrupted {
            "Acquisition interrupted.".bold().yellow()
        } else {
            "Acquisition complete.".bold().green()
        };
        println!("\n{}", headline);
        for line in self.summary_lines() {
            println!("  {}", line);
        }
    }
}

/// Route SIGINT, SIGTERM and SIGHUP to a cancellation channel.
///
/// A run holding the receiver stops at its next trigger wait, releases the
/// device and flushes the open file instead of dying with it unflushed.
/// The handler can be installed once per process.
pub fn cancel_on_termination() -> DaqResult<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        warn!("Received termination signal, stopping after the current event");
        // a repeated signal finds the slot full
        let _ = tx.try_send(());
    })?;
    Ok(rx)
}

/// Runs a whole capture: budget, device setup, trigger loop, teardown.
pub struct CaptureOrchestrator {
    conf: Conf,
    cancel: Receiver<()>,
}

impl CaptureOrchestrator {
    pub fn new(conf: Conf, cancel: Receiver<()>) -> Self {
        Self { conf, cancel }
    }

    /// Capture the budgeted number of events.
    ///
    /// `open_digitizer` is only called once the configuration and the storage
    /// budget have been accepted. The device is released and the open file
    /// closed on every path out of this function.
    pub fn run<D, F>(&self, free_space_mb: f64, open_digitizer: F) -> DaqResult<RunSummary>
    where
        D: Digitizer,
        F: FnOnce() -> Result<D, DeviceError>,
    {
        let run = &self.conf.run_settings;
        let acq = AcquisitionConfig::from_settings(&self.conf.acq_settings)?;
        if run.file_threshold_bytes == 0 {
            return Err(DaqError::InvalidConfiguration(
                "file rotation threshold must be positive".into(),
            ));
        }

        let budget = estimate(
            acq.channels.len(),
            acq.samples,
            run.requested_events,
            free_space_mb,
        )?;
        if budget.is_clamped() {
            if run.strict_budget {
                return Err(DaqError::InvalidConfiguration(format!(
                    "{} events requested but only {} fit on disk",
                    budget.requested_events, budget.max_events
                )));
            }
            warn!(
                "Requested {} events, only {} fit above the safety margin",
                budget.requested_events, budget.max_events
            );
        }

        let clock = SessionClock::resolve(&self.conf.time_settings)?;
        let stamp = clock.stamp();
        let metadata = Arc::new(SessionMetadata::new(&acq, &clock, budget.effective_events));
        digitizer_params::log_all(&acq, &budget, &stamp);

        info!("Initializing digitizer");
        let digitizer = open_digitizer()?;
        let mut session = match AcquisitionSession::new(digitizer, acq, self.cancel.clone()) {
            Ok(session) => session,
            Err((mut digitizer, e)) => {
                if let Err(release_err) = digitizer.release() {
                    error!("Releasing digitizer failed: {}", release_err);
                }
                return Err(e);
            }
        };

        let mut store = match EventStore::create(
            &run.output_dir,
            stamp,
            metadata,
            run.file_threshold_bytes,
        ) {
            Ok(store) => store,
            Err(e) => {
                if let Err(release_err) = session.release() {
                    error!("Releasing digitizer failed: {}", release_err);
                }
                return Err(e);
            }
        };
        if let Some(first) = store.files().first() {
            info!("Output file created: {}", first.display());
        }

        info!("Starting acquisition of {} events", budget.effective_events);
        let mut counter = TriggerCounter::new();
        let outcome = capture_loop(
            &mut session,
            &mut store,
            &mut counter,
            budget.effective_events,
        );

        let released = session.release();
        let closed = store.close();

        let interrupted = match outcome {
            Ok(()) => false,
            Err(DaqError::Cancelled) => {
                warn!(
                    "Acquisition cancelled after {} of {} events",
                    counter.n_events, budget.effective_events
                );
                true
            }
            Err(e) => {
                if let Err(release_err) = released {
                    error!("Releasing digitizer failed: {}", release_err);
                }
                if let Err(close_err) = closed {
                    error!("Closing output file failed: {}", close_err);
                }
                return Err(e);
            }
        };
        released?;
        closed?;

        let summary = RunSummary {
            events_captured: counter.n_events,
            first_timestamp_ns: counter.first_timestamp_ns,
            last_timestamp_ns: counter.last_timestamp_ns,
            bytes_written: counter.total_size,
            files: store.files().to_vec(),
            budget,
            interrupted,
        };
        match summary.elapsed_secs() {
            Some(elapsed) => info!(
                "Captured {} events, {:.6} s between first and last trigger",
                summary.events_captured, elapsed
            ),
            None => warn!("No triggers detected"),
        }
        Ok(summary)
    }
}

fn capture_loop<D: Digitizer>(
    session: &mut AcquisitionSession<D>,
    store: &mut EventStore,
    counter: &mut TriggerCounter,
    num_events: u64,
) -> DaqResult<()> {
    for cycle in 1..=num_events {
        debug!("Cycle {}/{}", cycle, num_events);
        let event = session.await_event()?;
        store.append(&event)?;
        counter.increment(event.size_bytes(), event.timestamp_ns);
        debug!("Trigger {} at {} ns", event.sequence, event.timestamp_ns);
        if cycle % PROGRESS_EVERY == 0 {
            info!(
                "{}/{} events, {:.1} triggers/s",
                cycle,
                num_events,
                counter.recent_rate()
            );
        }
    }
    Ok(())
}
