use crate::types::{RecordedBatch, ReplayMode};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::warn;

/// Releases recorded batches on the recording's own clock, scaled by the
/// replay mode.
pub struct Replayer {
    batches: Vec<RecordedBatch>,
    current_index: usize,
    start_time: Option<Instant>,
    first_ts: Option<DateTime<Utc>>,
    mode: ReplayMode,
}

impl Replayer {
    pub fn open(path: &Path, mode: ReplayMode) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open recording {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut batches = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordedBatch>(&line) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!("Skipping malformed recording line {}: {}", line_no + 1, e),
            }
        }

        Ok(Self::from_batches(batches, mode))
    }

    pub fn from_batches(batches: Vec<RecordedBatch>, mode: ReplayMode) -> Self {
        Self {
            batches,
            current_index: 0,
            start_time: None,
            first_ts: None,
            mode,
        }
    }

    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        self.first_ts = self.batches.first().map(|b| b.ts);
    }

    /// Next batch if it is due, `None` if it is not due yet or the recording
    /// is exhausted.
    pub fn next_batch(&mut self) -> Option<RecordedBatch> {
        let next = self.batches.get(self.current_index)?;

        if let (Some(start), Some(first_ts)) = (self.start_time, self.first_ts) {
            let offset = (next.ts - first_ts).to_std().unwrap_or_default();
            let due = match self.mode {
                ReplayMode::Realtime => offset,
                ReplayMode::Speed(speed) => scaled_offset(offset, speed),
                ReplayMode::AsFast => Duration::ZERO,
            };
            if start.elapsed() < due {
                return None;
            }
        }

        self.current_index += 1;
        Some(next.clone())
    }

    pub fn is_done(&self) -> bool {
        self.current_index >= self.batches.len()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn progress(&self) -> f64 {
        if self.batches.is_empty() {
            return 1.0;
        }
        self.current_index as f64 / self.batches.len() as f64
    }
}

/// `offset / speed`, saturating to `Duration::MAX` when it overflows and to
/// zero when it is negative or NaN.
fn scaled_offset(offset: Duration, speed: f64) -> Duration {
    let secs = offset.as_secs_f64() / speed;
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 { Duration::MAX } else { Duration::ZERO })
}
