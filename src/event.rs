use ndarray::{Array2, ArrayView1};

/// One triggered capture.
///
/// `waveforms` has one row per entry of `channels`, in the same order, and
/// one column per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    /// 1-based position of the event in the run.
    pub sequence: u64,
    /// Wall-clock trigger time, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub channels: Vec<u8>,
    pub waveforms: Array2<f32>,
}

impl CapturedEvent {
    pub fn new(sequence: u64, timestamp_ns: u64, channels: Vec<u8>, samples: usize) -> Self {
        let waveforms = Array2::<f32>::zeros((channels.len(), samples));
        Self {
            sequence,
            timestamp_ns,
            channels,
            waveforms,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.waveforms.ncols()
    }

    pub fn channel(&self, id: u8) -> Option<ArrayView1<'_, f32>> {
        let row = self.channels.iter().position(|&c| c == id)?;
        Some(self.waveforms.row(row))
    }

    pub fn size_bytes(&self) -> u64 {
        (self.waveforms.len() * std::mem::size_of::<f32>()) as u64
    }

    pub fn group_name(&self) -> String {
        format!("event_{:06}", self.sequence)
    }
}

pub fn channel_dataset_name(id: u8) -> String {
    format!("channel_{}", id)
}
