//! Balanced output shards
//!
//! The final-order stream is cut into `W` contiguous slices. Every shard
//! but the last holds exactly `⌈N/W⌉` records; the last takes the rest.

use crate::error::{ShuffleContext, ShuffleError, ShuffleResult};
use crate::record_io::{create_record_file, Compression, RecordFileSink, RecordWriter};
use log::{debug, info, warn};
use std::path::PathBuf;

/// Consumer of the final-order record stream
pub trait RecordSink {
    fn accept(&mut self, record: &[u8]) -> ShuffleResult<()>;
}

impl RecordSink for Vec<Vec<u8>> {
    fn accept(&mut self, record: &[u8]) -> ShuffleResult<()> {
        self.push(record.to_vec());
        Ok(())
    }
}

/// `{prefix}-{shard:05}-of-{num_shards:05}.{extension}`
pub fn shard_path(prefix: &str, shard: usize, num_shards: usize, extension: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}-{shard:05}-of-{num_shards:05}.{extension}"))
}

/// Records per shard for all but the last shard
pub fn shard_quota(total_records: u64, num_shards: usize) -> u64 {
    total_records.div_ceil(num_shards as u64)
}

/// One finished output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub path: PathBuf,
    pub records: u64,
}

struct OpenShard {
    writer: RecordWriter<RecordFileSink>,
    records: u64,
}

/// Writes the final-order stream into `W` shard files
///
/// Shard files are opened lazily. Dropping the writer before
/// [`finish`](ShardWriter::finish) deletes every file it created, so a
/// failed run does not leave partial shards behind.
pub struct ShardWriter {
    prefix: String,
    num_shards: usize,
    compression: Compression,
    total_records: u64,
    quota: u64,
    current: Option<OpenShard>,
    shards: Vec<ShardInfo>,
    written: u64,
    progress_every: u64,
    finished: bool,
}

impl ShardWriter {
    pub fn new(
        prefix: &str,
        num_shards: usize,
        total_records: u64,
        compression: Compression,
    ) -> ShuffleResult<Self> {
        if num_shards == 0 {
            return Err(ShuffleError::config("number of shards must be at least 1"));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            num_shards,
            compression,
            total_records,
            quota: shard_quota(total_records, num_shards),
            current: None,
            shards: Vec::with_capacity(num_shards),
            written: 0,
            progress_every: (total_records / 20).max(1),
            finished: false,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }

    fn next_path(&self) -> PathBuf {
        shard_path(
            &self.prefix,
            self.shards.len(),
            self.num_shards,
            self.compression.extension(),
        )
    }

    fn open_next(&mut self) -> ShuffleResult<()> {
        if self.shards.len() >= self.num_shards {
            return Err(ShuffleError::internal("all shards are already full"));
        }
        let path = self.next_path();
        let writer = create_record_file(&path, self.compression)?;
        debug!("Opened shard {}", path.display());
        self.shards.push(ShardInfo { path, records: 0 });
        self.current = Some(OpenShard { writer, records: 0 });
        Ok(())
    }

    fn close_current(&mut self) -> ShuffleResult<()> {
        if let Some(open) = self.current.take() {
            let info = self
                .shards
                .last_mut()
                .ok_or_else(|| ShuffleError::internal("open shard without a path"))?;
            info.records = open.records;
            open.writer
                .into_inner()
                .finish()
                .with_file_context(&info.path.display().to_string())?;
            debug!("Closed shard {} ({} records)", info.path.display(), info.records);
        }
        Ok(())
    }

    /// Close the open shard and create any shards that received no records
    pub fn finish(mut self) -> ShuffleResult<Vec<ShardInfo>> {
        if self.written != self.total_records {
            return Err(ShuffleError::internal(&format!(
                "wrote {} records, expected {}",
                self.written, self.total_records
            )));
        }
        self.close_current()?;
        while self.shards.len() < self.num_shards {
            self.open_next()?;
            self.close_current()?;
        }
        self.finished = true;
        info!(
            "Wrote {} records to {} shards",
            self.written,
            self.shards.len()
        );
        Ok(std::mem::take(&mut self.shards))
    }
}

impl RecordSink for ShardWriter {
    fn accept(&mut self, record: &[u8]) -> ShuffleResult<()> {
        if self.written >= self.total_records {
            return Err(ShuffleError::internal(&format!(
                "more than the expected {} records reached the shard writer",
                self.total_records
            )));
        }
        if self.current.is_none() {
            self.open_next()?;
        }
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| ShuffleError::internal("no open shard"))?;
        if let Err(e) = open.writer.write_record(record) {
            let name = self
                .shards
                .last()
                .map(|s| s.path.display().to_string())
                .unwrap_or_default();
            return Err(e).with_file_context(&name);
        }
        open.records += 1;
        let full = open.records >= self.quota;
        self.written += 1;

        if self.written % self.progress_every == 0 {
            info!(
                "Written {} / {} records to final location",
                self.written, self.total_records
            );
        }
        if full {
            self.close_current()?;
        }
        Ok(())
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.current = None;
        for shard in &self.shards {
            if let Err(e) = std::fs::remove_file(&shard.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial shard {}: {}", shard.path.display(), e);
                }
            }
        }
    }
}
