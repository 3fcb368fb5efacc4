use crate::{channel_dataset_name, CapturedEvent, DaqError, DaqResult, SessionMetadata};
use hdf5::{File, Group};
use log::{info, warn};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Name of the `index`-th file of a run started at `stamp`.
pub fn file_name(index: u32, stamp: &str) -> String {
    format!("{:04}_Data_{}.h5", index, stamp)
}

/// One rotation segment on disk.
pub struct OutputFile {
    pub index: u32,
    pub path: PathBuf,
    /// Payload bytes written so far.
    pub size_bytes: u64,
    pub events: u64,
    file: File,
}

impl OutputFile {
    fn create(dir: &Path, stamp: &str, index: u32, metadata: &SessionMetadata) -> DaqResult<Self> {
        let path = dir.join(file_name(index, stamp));
        let file = File::create(&path)?;
        metadata.write_to(&file)?;
        Ok(Self {
            index,
            path,
            size_bytes: 0,
            events: 0,
            file,
        })
    }

    fn close(self) -> DaqResult<()> {
        self.file.flush()?;
        self.file.close()?;
        Ok(())
    }
}

/// Writes events into size-bounded HDF5 files, rotating before a file
/// would exceed `threshold_bytes`.
///
/// Each file carries the run's [`SessionMetadata`] as root attributes and one
/// `event_NNNNNN` group per event.
pub struct EventStore {
    output_dir: PathBuf,
    stamp: String,
    metadata: Arc<SessionMetadata>,
    threshold_bytes: u64,
    current: Option<OutputFile>,
    next_index: u32,
    last_sequence: u64,
    events_written: u64,
    files: Vec<PathBuf>,
}

impl EventStore {
    /// Open the first file of the run in `output_dir`.
    pub fn create(
        output_dir: impl Into<PathBuf>,
        stamp: impl Into<String>,
        metadata: Arc<SessionMetadata>,
        threshold_bytes: u64,
    ) -> DaqResult<Self> {
        if threshold_bytes == 0 {
            return Err(DaqError::InvalidConfiguration(
                "file rotation threshold must be positive".into(),
            ));
        }
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        let mut store = Self {
            output_dir,
            stamp: stamp.into(),
            metadata,
            threshold_bytes,
            current: None,
            next_index: 1,
            last_sequence: 0,
            events_written: 0,
            files: Vec::new(),
        };
        store.open_next()?;
        Ok(store)
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Every file opened so far, in order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn current_index(&self) -> Option<u32> {
        self.current.as_ref().map(|f| f.index)
    }

    pub fn current_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |f| f.size_bytes)
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Append one event, rotating first if it would push the current file
    /// past the threshold.
    pub fn append(&mut self, event: &CapturedEvent) -> DaqResult<()> {
        self.check_event(event)?;
        let event_size = self.metadata.event_size_bytes();

        let (size, events) = match &self.current {
            Some(f) => (f.size_bytes, f.events),
            None => {
                return Err(DaqError::Storage(hdf5::Error::from(
                    "event store already closed",
                )))
            }
        };
        if size + event_size > self.threshold_bytes {
            if events > 0 {
                self.rotate()?;
            } else {
                warn!(
                    "Event of {} bytes exceeds the {} byte file threshold",
                    event_size, self.threshold_bytes
                );
            }
        }

        let Some(current) = self.current.as_mut() else {
            return Err(DaqError::Storage(hdf5::Error::from("no open output file")));
        };
        write_event(&current.file, event)?;
        current.size_bytes += event_size;
        current.events += 1;
        self.last_sequence = event.sequence;
        self.events_written += 1;
        Ok(())
    }

    /// Flush and close the open file. Further appends fail.
    pub fn close(&mut self) -> DaqResult<()> {
        match self.current.take() {
            Some(file) => {
                info!(
                    "Closing {} ({} events)",
                    file.path.display(),
                    file.events
                );
                file.close()
            }
            None => Ok(()),
        }
    }

    fn rotate(&mut self) -> DaqResult<()> {
        self.close()?;
        self.open_next()?;
        if let Some(f) = &self.current {
            info!("New file created: {}", f.path.display());
        }
        Ok(())
    }

    fn open_next(&mut self) -> DaqResult<()> {
        let file = OutputFile::create(
            &self.output_dir,
            &self.stamp,
            self.next_index,
            &self.metadata,
        )?;
        self.next_index += 1;
        self.files.push(file.path.clone());
        self.current = Some(file);
        Ok(())
    }

    fn check_event(&self, event: &CapturedEvent) -> DaqResult<()> {
        if event.sequence <= self.last_sequence {
            return Err(DaqError::OutOfOrder {
                last: self.last_sequence,
                got: event.sequence,
            });
        }
        let channels_match = event.channels.len() == self.metadata.channels.len()
            && event
                .channels
                .iter()
                .zip(&self.metadata.channels)
                .all(|(&a, &b)| a as i32 == b);
        if !channels_match || event.n_samples() as u64 != self.metadata.samples_per_event {
            return Err(DaqError::InvalidConfiguration(format!(
                "event {} has channels {:?} x {} samples, run expects {:?} x {}",
                event.sequence,
                event.channels,
                event.n_samples(),
                self.metadata.channels,
                self.metadata.samples_per_event
            )));
        }
        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close output file: {}", e);
        }
    }
}

/// Group, then timestamp, then one dataset per channel. A group left
/// incomplete by a failure is unlinked again.
fn write_event(file: &File, event: &CapturedEvent) -> hdf5::Result<()> {
    let name = event.group_name();
    let group = file.create_group(&name)?;
    let result = write_event_contents(&group, event);
    if result.is_err() {
        drop(group);
        if let Err(e) = file.unlink(&name) {
            warn!("Could not remove incomplete group {}: {}", name, e);
        }
    }
    result
}

fn write_event_contents(group: &Group, event: &CapturedEvent) -> hdf5::Result<()> {
    group
        .new_attr::<u64>()
        .create("timestamp")?
        .write_scalar(&event.timestamp_ns)?;
    for (row, &channel) in event.channels.iter().enumerate() {
        group
            .new_dataset_builder()
            .with_data(event.waveforms.row(row))
            .create(channel_dataset_name(channel).as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata(channels: Vec<i32>, samples: u64) -> Arc<SessionMetadata> {
        Arc::new(SessionMetadata {
            set_time_ns: 1_700_000_000_000_000_000,
            sys_time_ns: 1_700_000_000_500_000_000,
            decimation: 1,
            trigger_level: 0.01,
            trigger_delay: 0,
            samples_per_event: samples,
            samples_delay: 8,
            channels,
            num_events: 5,
            sampling_rate: 125e6,
        })
    }

    fn event(sequence: u64, channels: &[u8], samples: usize) -> CapturedEvent {
        let mut event = CapturedEvent::new(
            sequence,
            1_700_000_001_000_000_000 + sequence,
            channels.to_vec(),
            samples,
        );
        for (row, &ch) in channels.iter().enumerate() {
            event
                .waveforms
                .row_mut(row)
                .iter_mut()
                .enumerate()
                .for_each(|(i, v)| *v = ch as f32 + i as f32 * 0.5);
        }
        event
    }

    fn store(dir: &TempDir, meta: Arc<SessionMetadata>, threshold: u64) -> EventStore {
        EventStore::create(dir.path(), "07032025_0905", meta, threshold).unwrap()
    }

    #[test]
    fn file_names_share_the_stamp() {
        assert_eq!(file_name(1, "07032025_0905"), "0001_Data_07032025_0905.h5");
        assert_eq!(file_name(12, "07032025_0905"), "0012_Data_07032025_0905.h5");
    }

    #[test]
    fn event_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1, 2], 32), 20971);
        let ev = event(1, &[1, 2], 32);
        store.append(&ev).unwrap();
        store.close().unwrap();

        let file = File::open(dir.path().join("0001_Data_07032025_0905.h5")).unwrap();
        let group = file.group("event_000001").unwrap();
        assert_eq!(
            group.attr("timestamp").unwrap().read_scalar::<u64>().unwrap(),
            ev.timestamp_ns
        );
        let mut names = group.member_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["channel_1", "channel_2"]);
        for ch in [1u8, 2] {
            let data = group
                .dataset(&channel_dataset_name(ch))
                .unwrap()
                .read_1d::<f32>()
                .unwrap();
            assert_eq!(data.len(), 32);
            assert_eq!(data, ev.channel(ch).unwrap());
        }
    }

    #[test]
    fn rotates_before_crossing_threshold() {
        let dir = tempfile::tempdir().unwrap();
        // 15 samples x 1 channel x 4 bytes = 60 bytes per event
        let mut store = store(&dir, metadata(vec![1], 15), 100);
        store.append(&event(1, &[1], 15)).unwrap();
        assert_eq!(store.current_size(), 60);
        store.append(&event(2, &[1], 15)).unwrap();
        assert_eq!(store.files().len(), 2);
        assert_eq!(store.current_index(), Some(2));
        assert_eq!(store.current_size(), 60);
    }

    #[test]
    fn stays_in_one_file_under_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1], 15), 200);
        for seq in 1..=3 {
            store.append(&event(seq, &[1], 15)).unwrap();
        }
        assert_eq!(store.files().len(), 1);
        assert_eq!(store.current_size(), 180);
    }

    #[test]
    fn sequence_survives_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata(vec![1], 15);
        let mut store = store(&dir, meta.clone(), 120);
        for seq in 1..=5 {
            store.append(&event(seq, &[1], 15)).unwrap();
        }
        store.close().unwrap();
        assert_eq!(store.events_written(), 5);

        let mut groups = Vec::new();
        for path in store.files() {
            let file = File::open(path).unwrap();
            assert_eq!(SessionMetadata::read_from(&file).unwrap(), *meta);
            let mut names = file.member_names().unwrap();
            names.sort();
            groups.extend(names);
        }
        assert_eq!(store.files().len(), 3);
        let expected: Vec<String> = (1..=5).map(|i| format!("event_{:06}", i)).collect();
        assert_eq!(groups, expected);
    }

    #[test]
    fn rejects_out_of_order_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1], 4), 1000);
        store.append(&event(2, &[1], 4)).unwrap();
        assert!(matches!(
            store.append(&event(2, &[1], 4)),
            Err(DaqError::OutOfOrder { last: 2, got: 2 })
        ));
        assert_eq!(store.events_written(), 1);
    }

    #[test]
    fn rejects_mismatched_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1, 2], 4), 1000);
        assert!(store.append(&event(1, &[1], 4)).is_err());
        assert!(store.append(&event(1, &[1, 2], 5)).is_err());
        assert!(store.append(&event(1, &[1, 2], 4)).is_ok());
    }

    #[test]
    fn oversized_event_does_not_leave_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1], 64), 100);
        store.append(&event(1, &[1], 64)).unwrap();
        store.append(&event(2, &[1], 64)).unwrap();
        assert_eq!(store.files().len(), 2);
        for path in store.files().to_vec() {
            store.close().unwrap();
            let file = File::open(path).unwrap();
            assert_eq!(file.member_names().unwrap().len(), 1);
        }
    }

    #[test]
    fn append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store(&dir, metadata(vec![1], 4), 1000);
        store.close().unwrap();
        assert!(matches!(
            store.append(&event(1, &[1], 4)),
            Err(DaqError::Storage(_))
        ));
    }

    #[test]
    fn drop_closes_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut store = store(&dir, metadata(vec![3], 4), 1000);
            store.append(&event(1, &[3], 4)).unwrap();
            store.files()[0].clone()
        };
        let file = File::open(path).unwrap();
        assert!(file.group("event_000001").is_ok());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EventStore::create(dir.path(), "x", metadata(vec![1], 4), 0).is_err());
    }

    #[test]
    fn failed_event_leaves_no_partial_group() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("partial.h5")).unwrap();
        // the second channel_1 dataset collides with the first
        let ev = event(4, &[1, 1], 8);

        assert!(write_event(&file, &ev).is_err());
        assert!(file.group(&ev.group_name()).is_err());
        assert!(file.member_names().unwrap().is_empty());

        write_event(&file, &event(5, &[1], 8)).unwrap();
        assert_eq!(file.member_names().unwrap(), vec!["event_000005"]);
    }
}
