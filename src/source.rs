//! Input enumeration
//!
//! Expands the input globs into a sorted file list and streams every record
//! with its original index. Sorting the file names makes the index
//! assignment reproducible across runs over the same files.

use crate::error::{ShuffleContext, ShuffleError, ShuffleResult};
use crate::record_io::{open_record_file, RecordReader};
use glob::glob;
use log::{info, warn};
use std::io::Read;
use std::path::PathBuf;

/// The sorted set of input files for a run
#[derive(Debug, Clone)]
pub struct RecordSource {
    files: Vec<PathBuf>,
}

impl RecordSource {
    /// Expand `patterns`, failing with `NoInputFound` when nothing matches
    pub fn from_patterns(patterns: &[String]) -> ShuffleResult<Self> {
        let mut files = Vec::new();

        for pattern in patterns {
            let entries = glob(pattern).map_err(|e| {
                ShuffleError::config(&format!("invalid glob pattern {pattern}: {e}"))
            })?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => warn!("Skipping unreadable glob entry: {}", e),
                }
            }
        }

        if files.is_empty() {
            return Err(ShuffleError::no_input_found(patterns));
        }

        Ok(Self::from_files(files))
    }

    /// Build a source from an explicit file list
    pub fn from_files(mut files: Vec<PathBuf>) -> Self {
        files.sort();
        files.dedup();
        Self { files }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Open a fresh pass over every record, in file order then record order
    pub fn records(&self) -> RecordStream<'_> {
        RecordStream {
            files: &self.files,
            next_file: 0,
            current: None,
            next_index: 0,
            announce: false,
        }
    }

    /// Like [`records`](Self::records), but logs each file as it is opened
    pub fn records_verbose(&self) -> RecordStream<'_> {
        RecordStream {
            announce: true,
            ..self.records()
        }
    }
}

/// A single, non-restartable pass over the input records
pub struct RecordStream<'a> {
    files: &'a [PathBuf],
    next_file: usize,
    current: Option<(RecordReader<Box<dyn Read>>, String)>,
    next_index: u64,
    announce: bool,
}

impl RecordStream<'_> {
    /// Number of records yielded so far
    pub fn records_read(&self) -> u64 {
        self.next_index
    }

    fn advance(&mut self) -> ShuffleResult<Option<(u64, Vec<u8>)>> {
        loop {
            if let Some((reader, name)) = self.current.as_mut() {
                if let Some(record) = reader.read_record().with_file_context(name)? {
                    let index = self.next_index;
                    self.next_index += 1;
                    return Ok(Some((index, record)));
                }
                self.current = None;
            }

            let Some(path) = self.files.get(self.next_file) else {
                return Ok(None);
            };
            self.next_file += 1;

            let name = path.display().to_string();
            if self.announce {
                info!("Processing {}", name);
            }
            self.current = Some((open_record_file(path)?, name));
        }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = ShuffleResult<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.advance().transpose();
        if matches!(item, Some(Err(_))) {
            // Fuse after the first failure.
            self.next_file = self.files.len();
            self.current = None;
        }
        item
    }
}
