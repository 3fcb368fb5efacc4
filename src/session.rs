use crate::{
    AcquisitionConfig, CapturedEvent, DaqError, DaqResult, DeviceError, Digitizer, TriggerState,
};
use crossbeam_channel::{after, never, select, tick, Receiver};
use log::{debug, trace};
use std::{
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Drives one digitizer through arm, trigger wait and readout cycles.
pub struct AcquisitionSession<D: Digitizer> {
    digitizer: D,
    config: AcquisitionConfig,
    cancel: Receiver<()>,
    next_sequence: u64,
}

impl<D: Digitizer> AcquisitionSession<D> {
    /// Check the device against the configuration and program it.
    ///
    /// On failure the device is handed back so the caller can still release it.
    pub fn new(
        mut digitizer: D,
        config: AcquisitionConfig,
        cancel: Receiver<()>,
    ) -> Result<Self, (D, DaqError)> {
        let device_buffer = digitizer.buffer_size();
        if device_buffer != config.buffer_size {
            let err = DeviceError::new(
                "buffer_size",
                format!(
                    "device buffer holds {} samples, configuration expects {}",
                    device_buffer, config.buffer_size
                ),
            );
            return Err((digitizer, err.into()));
        }
        if let Err(e) = digitizer.configure(&config) {
            return Err((digitizer, e.into()));
        }
        debug!(
            "Digitizer configured: decimation {}, trigger {} at {} V",
            config.decimation, config.trigger_source, config.trigger_level
        );
        Ok(Self {
            digitizer,
            config,
            cancel,
            next_sequence: 1,
        })
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Sequence number the next captured event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Block until the next trigger and return its windowed samples.
    ///
    /// Without a configured trigger timeout this waits until a trigger
    /// arrives or the cancellation channel fires.
    pub fn await_event(&mut self) -> DaqResult<CapturedEvent> {
        // a source that fires at once would otherwise never see the request
        if self.cancel.try_recv().is_ok() {
            return Err(DaqError::Cancelled);
        }
        self.digitizer.start()?;
        self.digitizer
            .set_trigger_source(self.config.trigger_source)?;

        let timestamp_ns = self.wait_for_trigger()?;
        trace!("Trigger at {} ns", timestamp_ns);

        thread::sleep(self.config.settle_time());

        let mut event = CapturedEvent::new(
            self.next_sequence,
            timestamp_ns,
            self.config.channels.clone(),
            self.config.samples,
        );
        let start = self.config.window_start();
        for (row, &channel) in self.config.channels.iter().enumerate() {
            let buffer = self
                .digitizer
                .read_channel_buffer(channel, self.config.buffer_size)?;
            if buffer.len() != self.config.buffer_size {
                return Err(DeviceError::new(
                    "read_channel_buffer",
                    format!(
                        "channel {} returned {} samples, expected {}",
                        channel,
                        buffer.len(),
                        self.config.buffer_size
                    ),
                )
                .into());
            }
            event
                .waveforms
                .row_mut(row)
                .iter_mut()
                .zip(&buffer[start..start + self.config.samples])
                .for_each(|(dst, &src)| *dst = src);
        }

        self.digitizer.stop()?;
        self.next_sequence += 1;
        Ok(event)
    }

    fn wait_for_trigger(&mut self) -> DaqResult<u64> {
        let ticker = tick(self.config.poll_interval);
        let deadline = match self.config.trigger_timeout {
            Some(timeout) => after(timeout),
            None => never(),
        };
        loop {
            if self.digitizer.trigger_state()? == TriggerState::Triggered {
                return Ok(now_ns());
            }
            let mut cancel_closed = false;
            select! {
                recv(self.cancel) -> msg => match msg {
                    Ok(()) => return Err(DaqError::Cancelled),
                    Err(_) => cancel_closed = true,
                },
                recv(deadline) -> _ => {
                    let waited = self.config.trigger_timeout.unwrap_or_default();
                    return Err(DaqError::TriggerTimeout(waited));
                }
                recv(ticker) -> _ => {}
            }
            // nobody can cancel any more
            if cancel_closed {
                self.cancel = never();
            }
        }
    }

    /// Stop acquisition and release the device.
    pub fn release(mut self) -> Result<D, DeviceError> {
        // stopping an idle board is harmless; a failure here must not skip the release
        if let Err(e) = self.digitizer.stop() {
            debug!("Stop before release failed: {}", e);
        }
        self.digitizer.release()?;
        Ok(self.digitizer)
    }
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::acq_settings;
    use crate::{SimWaveform, SimulatedDigitizer, TriggerSource};
    use crossbeam_channel::bounded;
    use std::time::Instant;

    pub(crate) fn ramp_session(
        channels: Vec<u8>,
        samples: usize,
        samples_delay: usize,
    ) -> AcquisitionSession<SimulatedDigitizer> {
        let mut settings = acq_settings();
        settings.channels = crate::ChannelConfig::List(channels);
        settings.samples = samples;
        settings.samples_delay = samples_delay;
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        let dig = SimulatedDigitizer::new(3)
            .with_waveform(SimWaveform::Ramp)
            .with_polls_per_trigger(2);
        let (_tx, rx) = bounded(1);
        AcquisitionSession::new(dig, config, rx)
            .map_err(|(_, e)| e)
            .unwrap()
    }

    #[test]
    fn window_starts_before_midpoint() {
        let mut session = ramp_session(vec![1, 3], 32, 8);
        let event = session.await_event().unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.channels, vec![1, 3]);
        assert_eq!(event.n_samples(), 32);
        let ch3 = event.channel(3).unwrap();
        assert_eq!(ch3[0], 300_000.0 + 8184.0);
        assert_eq!(ch3[31], 300_000.0 + 8215.0);
        assert_eq!(event.channel(1).unwrap()[8], 100_000.0 + 8192.0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut session = ramp_session(vec![2], 4, 0);
        let first = session.await_event().unwrap();
        let second = session.await_event().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert!(second.timestamp_ns >= first.timestamp_ns);
        assert_eq!(session.next_sequence(), 3);
    }

    #[test]
    fn times_out_without_trigger() {
        let mut settings = acq_settings();
        settings.trigger_source = TriggerSource::Disabled;
        settings.trigger_timeout_ms = Some(20);
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        let (_tx, rx) = bounded(1);
        let mut session = AcquisitionSession::new(SimulatedDigitizer::new(0), config, rx)
            .map_err(|(_, e)| e)
            .unwrap();
        let started = Instant::now();
        assert!(matches!(
            session.await_event(),
            Err(DaqError::TriggerTimeout(d)) if d == Duration::from_millis(20)
        ));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancellation_interrupts_wait() {
        let mut settings = acq_settings();
        settings.trigger_source = TriggerSource::Disabled;
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        let (tx, rx) = bounded(1);
        let mut session = AcquisitionSession::new(SimulatedDigitizer::new(0), config, rx)
            .map_err(|(_, e)| e)
            .unwrap();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(()).unwrap();
        });
        assert!(matches!(session.await_event(), Err(DaqError::Cancelled)));
        canceller.join().unwrap();
        let dig = session.release().unwrap();
        assert!(dig.released);
    }

    #[test]
    fn dropped_canceller_does_not_cancel() {
        let mut settings = acq_settings();
        settings.trigger_source = TriggerSource::Disabled;
        settings.trigger_timeout_ms = Some(15);
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        let (tx, rx) = bounded::<()>(1);
        drop(tx);
        let mut session = AcquisitionSession::new(SimulatedDigitizer::new(0), config, rx)
            .map_err(|(_, e)| e)
            .unwrap();
        assert!(matches!(
            session.await_event(),
            Err(DaqError::TriggerTimeout(_))
        ));
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let config = AcquisitionConfig::from_settings(&acq_settings()).unwrap();
        let dig = SimulatedDigitizer::new(0).with_buffer_size(8192);
        let (_tx, rx) = bounded(1);
        let Err((dig, err)) = AcquisitionSession::new(dig, config, rx) else {
            panic!("mismatched buffer accepted");
        };
        assert!(matches!(err, DaqError::Device(_)));
        assert!(!dig.released);
    }

    #[test]
    fn pending_cancel_wins_over_immediate_trigger() {
        let mut settings = acq_settings();
        settings.trigger_source = TriggerSource::Now;
        let config = AcquisitionConfig::from_settings(&settings).unwrap();
        let (tx, rx) = bounded(1);
        let mut session = AcquisitionSession::new(SimulatedDigitizer::new(0), config, rx)
            .map_err(|(_, e)| e)
            .unwrap();
        assert!(session.await_event().is_ok());
        tx.send(()).unwrap();
        assert!(matches!(session.await_event(), Err(DaqError::Cancelled)));
        assert_eq!(session.next_sequence(), 2);
    }
}
