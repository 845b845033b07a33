use crate::types::{ChangeBatch, RecordedBatch};
use anyhow::Context;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends pushed change batches to an NDJSON file.
pub struct Recorder {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    batches: u64,
}

impl Recorder {
    pub fn new(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open recording {}", path.display()))?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path,
            batches: 0,
        })
    }

    pub fn record_batch(&mut self, collection: &str, batch: &ChangeBatch) -> anyhow::Result<()> {
        if let Some(writer) = &mut self.writer {
            let line = RecordedBatch {
                ts: Utc::now(),
                collection: collection.to_string(),
                batch: batch.clone(),
            };
            serde_json::to_writer(&mut *writer, &line)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            self.batches += 1;
        }
        Ok(())
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        self.writer = None;
        Ok(())
    }

    pub fn batches_written(&self) -> u64 {
        self.batches
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
