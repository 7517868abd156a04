//! Memory-bounded bucketize and replay
//!
//! When the records do not fit in memory, a second pass over the input
//! spills them into `⌈N/step⌉` bucket files. Bucket `k` owns the final
//! positions `[k·step, (k+1)·step)`. Each window of up to `step` records is
//! sorted by final position before it is appended, and every bucket keeps
//! the byte length and position of each record it receives. Replay then
//! maps one bucket at a time, restores position order with a bounded
//! in-memory sort, and streams the records onward.
//!
//! Spill files are raw concatenations of packed records. They are not
//! self-delimiting; the in-memory length lists are the only index.

use crate::error::{ShuffleContext, ShuffleError, ShuffleResult};
use crate::permutation::Permutation;
use crate::record_io::{pack_record, unpack_record};
use crate::shard::RecordSink;
use itertools::Itertools;
use log::{debug, info};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One bucket's spill file and its out-of-band index
struct SpillBucket {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    lengths: Vec<usize>,
    positions: Vec<u64>,
    max_position: Option<u64>,
    /// Every append so far had a larger position than the one before
    monotonic: bool,
}

impl SpillBucket {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            lengths: Vec::new(),
            positions: Vec::new(),
            max_position: None,
            monotonic: true,
        }
    }

    fn append(&mut self, position: u64, packed: &[u8]) -> ShuffleResult<()> {
        if self.writer.is_none() {
            let file = File::create(&self.path).with_file_context(&self.path.display().to_string())?;
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write_all(packed)
                .with_file_context(&self.path.display().to_string())?;
        }

        if self.max_position.is_some_and(|max| position <= max) {
            self.monotonic = false;
        }
        self.max_position = Some(self.max_position.map_or(position, |max| max.max(position)));
        self.lengths.push(packed.len());
        self.positions.push(position);
        Ok(())
    }

    fn close(&mut self) -> ShuffleResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_file_context(&self.path.display().to_string())?;
        }
        Ok(())
    }
}

/// Spill phase: routes each record to the bucket of its final position
pub struct Bucketizer<'p> {
    permutation: &'p Permutation,
    step: usize,
    temp_dir: TempDir,
    buckets: Vec<SpillBucket>,
}

impl<'p> Bucketizer<'p> {
    /// Prepare `⌈N/step⌉` buckets inside a fresh temporary directory under `parent`
    pub fn new(permutation: &'p Permutation, step: usize, parent: &Path) -> ShuffleResult<Self> {
        if step == 0 {
            return Err(ShuffleError::config("memory step must be positive"));
        }
        let temp_dir = tempfile::Builder::new()
            .prefix(".shuffle-spill-")
            .tempdir_in(parent)
            .with_file_context(&parent.display().to_string())?;

        let num_buckets = permutation.len().div_ceil(step);
        let buckets = (0..num_buckets)
            .map(|k| SpillBucket::new(temp_dir.path().join(format!("bucket_{k:06}.spill"))))
            .collect();
        debug!(
            "Spilling {} records into {} buckets under {}",
            permutation.len(),
            num_buckets,
            temp_dir.path().display()
        );

        Ok(Self {
            permutation,
            step,
            temp_dir,
            buckets,
        })
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Consume one full pass over the input and write every bucket
    pub fn spill<I>(mut self, records: I) -> ShuffleResult<SpilledBuckets>
    where
        I: IntoIterator<Item = ShuffleResult<(u64, Vec<u8>)>>,
    {
        let total = self.permutation.len() as u64;
        let progress_every = (total / 20).max(1);
        let mut seen = 0u64;

        let windows = records.into_iter().chunks(self.step);
        for window in &windows {
            let mut window: Vec<(u64, Vec<u8>)> = window
                .map(|record| -> ShuffleResult<(u64, Vec<u8>)> {
                    let (index, bytes) = record?;
                    let position = self.permutation.position_of(index)?;
                    Ok((position, pack_record(&bytes)))
                })
                .collect::<ShuffleResult<_>>()?;
            window.sort_unstable_by_key(|(position, _)| *position);

            for (position, packed) in &window {
                let bucket = (*position / self.step as u64) as usize;
                self.buckets
                    .get_mut(bucket)
                    .ok_or_else(|| ShuffleError::internal(&format!("no bucket for position {position}")))?
                    .append(*position, packed)?;

                seen += 1;
                if seen % progress_every == 0 {
                    info!("Written {} / {} records to tmp location (1/2)", seen, total);
                }
            }
        }

        if seen != total {
            return Err(ShuffleError::input_changed(total, seen));
        }
        for bucket in &mut self.buckets {
            bucket.close()?;
        }

        Ok(SpilledBuckets {
            step: self.step as u64,
            total,
            buckets: self.buckets,
            temp_dir: self.temp_dir,
        })
    }
}

/// Replay phase: the closed spill files plus their in-memory index
///
/// Dropping this value removes the temporary directory and any bucket files
/// still in it.
pub struct SpilledBuckets {
    step: u64,
    total: u64,
    buckets: Vec<SpillBucket>,
    temp_dir: TempDir,
}

impl SpilledBuckets {
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Records spilled to bucket `k`, in the order they were appended
    pub fn bucket_len(&self, k: usize) -> usize {
        self.buckets.get(k).map_or(0, |b| b.positions.len())
    }

    /// Read bucket `k` back and return `(position, record)` in ascending position order
    pub fn read_bucket(&self, k: usize) -> ShuffleResult<Vec<(u64, Vec<u8>)>> {
        let bucket = self
            .buckets
            .get(k)
            .ok_or_else(|| ShuffleError::internal(&format!("no bucket {k}")))?;
        let name = bucket.path.display().to_string();

        let expected_start = k as u64 * self.step;
        let expected_len = self.step.min(self.total - expected_start);
        if bucket.positions.len() as u64 != expected_len {
            return Err(ShuffleError::internal(&format!(
                "bucket {k} holds {} records, expected {expected_len}",
                bucket.positions.len()
            )));
        }
        if bucket.positions.is_empty() {
            return Ok(Vec::new());
        }

        let file = File::open(&bucket.path).with_file_context(&name)?;
        let mmap = unsafe { Mmap::map(&file).with_file_context(&name)? };
        let spilled: usize = bucket.lengths.iter().sum();
        if spilled != mmap.len() {
            return Err(ShuffleError::internal(&format!(
                "{name}: spill file holds {} bytes, index expects {spilled}",
                mmap.len()
            )));
        }

        let mut offsets = Vec::with_capacity(bucket.lengths.len());
        let mut offset = 0usize;
        for &len in &bucket.lengths {
            offsets.push((offset, len));
            offset += len;
        }

        let mut order: Vec<usize> = (0..bucket.positions.len()).collect();
        if !bucket.monotonic {
            order.sort_unstable_by_key(|&i| bucket.positions[i]);
        }

        let mut records = Vec::with_capacity(order.len());
        for (rank, &i) in order.iter().enumerate() {
            let position = bucket.positions[i];
            if position != expected_start + rank as u64 {
                return Err(ShuffleError::internal(&format!(
                    "bucket {k} is missing position {}",
                    expected_start + rank as u64
                )));
            }
            let (start, len) = offsets[i];
            records.push((position, unpack_record(&mmap[start..start + len])?));
        }
        Ok(records)
    }

    /// Stream every bucket, in bucket order, into `sink`
    ///
    /// Each bucket file is deleted once it has been replayed.
    pub fn replay<S: RecordSink + ?Sized>(mut self, sink: &mut S) -> ShuffleResult<u64> {
        let mut emitted = 0u64;
        for k in 0..self.buckets.len() {
            debug!("Replaying bucket {} ({} records)", k, self.bucket_len(k));
            for (_, record) in self.read_bucket(k)? {
                sink.accept(&record)?;
                emitted += 1;
            }

            let bucket = &mut self.buckets[k];
            if !bucket.positions.is_empty() {
                std::fs::remove_file(&bucket.path)
                    .with_file_context(&bucket.path.display().to_string())?;
            }
            bucket.lengths = Vec::new();
            bucket.positions = Vec::new();
        }
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::permutation::PermutationEntry;

    /// Permutation where record `i` lands at `targets[i]`
    fn permutation(targets: &[u64]) -> Permutation {
        let entries = targets
            .iter()
            .enumerate()
            .map(|(i, &t)| PermutationEntry::new(Fingerprint::from_u64(t), i as u64, 0))
            .collect();
        Permutation::resolve(entries).expect("valid permutation")
    }

    fn input(n: usize) -> Vec<ShuffleResult<(u64, Vec<u8>)>> {
        (0..n).map(|i| Ok((i as u64, format!("record-{i}").into_bytes()))).collect()
    }

    #[test]
    fn test_buckets_hold_their_position_ranges() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        let targets = [7, 2, 9, 0, 4, 1, 8, 3, 6, 5];
        let perm = permutation(&targets);

        let bucketizer = Bucketizer::new(&perm, 3, temp_dir.path())?;
        assert_eq!(bucketizer.num_buckets(), 4);
        let spilled = bucketizer.spill(input(10))?;

        for k in 0..spilled.num_buckets() {
            let bucket = spilled.read_bucket(k)?;
            let positions: Vec<u64> = bucket.iter().map(|(p, _)| *p).collect();
            let expected: Vec<u64> = (k as u64 * 3..((k as u64 + 1) * 3).min(10)).collect();
            assert_eq!(positions, expected);
            assert_eq!(spilled.bucket_len(k), expected.len());

            for (position, record) in bucket {
                let original = targets.iter().position(|&t| t == position).expect("target");
                assert_eq!(record, format!("record-{original}").into_bytes());
            }
        }
        Ok(())
    }

    #[test]
    fn test_replay_streams_in_final_order() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        let targets = [4, 0, 3, 1, 2];
        let perm = permutation(&targets);

        let spilled = Bucketizer::new(&perm, 2, temp_dir.path())?.spill(input(5))?;
        let mut out: Vec<Vec<u8>> = Vec::new();
        assert_eq!(spilled.replay(&mut out)?, 5);

        let expected: Vec<Vec<u8>> = ["record-1", "record-3", "record-4", "record-2", "record-0"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(out, expected);
        Ok(())
    }

    #[test]
    fn test_cross_window_appends_are_reordered() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        // Window 0 sends position 1 to bucket 0, window 1 later sends position 0.
        let perm = permutation(&[1, 3, 0, 2]);
        let spilled = Bucketizer::new(&perm, 2, temp_dir.path())?.spill(input(4))?;

        assert!(!spilled.buckets[0].monotonic);
        assert_eq!(spilled.bucket_len(0), 2);
        assert_eq!(spilled.bucket_len(2), 0);
        let bucket = spilled.read_bucket(0)?;
        assert_eq!(bucket[0], (0, b"record-2".to_vec()));
        assert_eq!(bucket[1], (1, b"record-0".to_vec()));
        Ok(())
    }

    #[test]
    fn test_spill_files_removed_after_replay() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        let perm = permutation(&[2, 1, 0]);
        let spilled = Bucketizer::new(&perm, 1, temp_dir.path())?.spill(input(3))?;
        let spill_dir = spilled.temp_dir().to_path_buf();
        assert_eq!(std::fs::read_dir(&spill_dir)?.count(), 3);

        let mut out: Vec<Vec<u8>> = Vec::new();
        spilled.replay(&mut out)?;
        assert!(!spill_dir.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_dropping_spill_cleans_up() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        let perm = permutation(&[0, 1, 2, 3]);
        let spilled = Bucketizer::new(&perm, 2, temp_dir.path())?.spill(input(4))?;
        drop(spilled);
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_record_count_change_is_detected() -> ShuffleResult<()> {
        let temp_dir = TempDir::new()?;
        let perm = permutation(&[0, 1, 2]);

        let err = Bucketizer::new(&perm, 2, temp_dir.path())?
            .spill(input(2))
            .err()
            .expect("short input must fail");
        assert!(matches!(err, ShuffleError::InputChanged { expected: 3, actual: 2 }));

        let err = Bucketizer::new(&perm, 2, temp_dir.path())?
            .spill(input(4))
            .err()
            .expect("long input must fail");
        assert!(matches!(err, ShuffleError::InputChanged { .. }));
        Ok(())
    }
}
