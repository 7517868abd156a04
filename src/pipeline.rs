//! The shuffle run as an explicit sequence of phases
//!
//! ```text
//! Init -> ReadingAndHashing -> Resolving -> Writing -> Finalizing -> Done
//! Init -> ReadingAndHashing -> Resolving -> Bucketizing -> Replaying -> Finalizing -> Done
//! ```
//!
//! Each phase consumes the artifact of the previous one: the record stream,
//! the entry list, the permutation table, the spilled buckets. The second
//! sequence runs when the memory step is smaller than the record count; its
//! replay phase is the one that writes the shards.
//! Any error aborts the run; temporary buckets and partial shards are
//! removed on the way out.

use crate::bucket::Bucketizer;
use crate::config::{MemoryStep, ShuffleConfig};
use crate::error::{ShuffleError, ShuffleResult};
use crate::fingerprint::{assign_fingerprints, Fingerprinter, Sha1Fingerprinter};
use crate::label::{ExampleLabel, LabelExtractor};
use crate::manifest::{LabelCounts, Manifest};
use crate::permutation::Permutation;
use crate::record_io::{pack_record, unpack_record};
use crate::shard::{RecordSink, ShardInfo, ShardWriter};
use crate::source::RecordSource;
use log::info;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ReadingAndHashing,
    Resolving,
    Bucketizing,
    Replaying,
    Writing,
    Finalizing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::ReadingAndHashing => "reading and hashing input",
            Phase::Resolving => "resolving permutation",
            Phase::Bucketizing => "bucketizing to temporary storage",
            Phase::Replaying => "replaying buckets into shards",
            Phase::Writing => "writing shuffled records",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct ShuffleSummary {
    pub num_records: u64,
    pub labels: LabelCounts,
    pub shards: Vec<ShardInfo>,
    pub manifest: Option<Manifest>,
    /// Phases in the order they were entered
    pub phases: Vec<Phase>,
}

/// Drives one shuffle run with injectable fingerprint and label strategies
pub struct Shuffler<'c, F = Sha1Fingerprinter, L = ExampleLabel> {
    config: &'c ShuffleConfig,
    fingerprinter: F,
    extractor: L,
    phases: Vec<Phase>,
}

impl<'c> Shuffler<'c> {
    /// SHA-1 fingerprints and Example labels read from `config.label_feature`
    pub fn new(config: &'c ShuffleConfig) -> Self {
        let extractor = ExampleLabel::new(config.label_feature.clone());
        Self::with_strategies(config, Sha1Fingerprinter, extractor)
    }
}

impl<'c, F: Fingerprinter, L: LabelExtractor> Shuffler<'c, F, L> {
    pub fn with_strategies(config: &'c ShuffleConfig, fingerprinter: F, extractor: L) -> Self {
        Self {
            config,
            fingerprinter,
            extractor,
            phases: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!("-> {}", phase);
        self.phases.push(phase);
    }

    pub fn run(mut self) -> ShuffleResult<ShuffleSummary> {
        let config = self.config;
        self.enter(Phase::Init);
        config.validate()?;
        let source = RecordSource::from_patterns(&config.input_patterns)?;
        info!("Found {} input files", source.files().len());

        self.enter(Phase::ReadingAndHashing);
        let keep_resident = config.memory_step == MemoryStep::All;
        let assignment = assign_fingerprints(
            source.records_verbose(),
            &self.fingerprinter,
            &self.extractor,
            keep_resident,
        )?;
        let labels = assignment.labels;
        let resident = assignment.resident;

        self.enter(Phase::Resolving);
        let permutation = Permutation::resolve(assignment.entries)?;
        let num_records = permutation.len() as u64;

        let mut writer = ShardWriter::new(
            &config.output_prefix,
            config.num_shards,
            num_records,
            config.compression,
        )?;

        match (config.memory_step, resident) {
            (MemoryStep::All, Some(resident)) => {
                self.enter(Phase::Writing);
                emit_resident(resident, &permutation, &mut writer)?;
            }
            (MemoryStep::Window(step), _) if step >= permutation.len() => {
                self.enter(Phase::Writing);
                info!("All {} records fit in one window of {}", num_records, step);
                emit_single_window(source.records(), &permutation, &mut writer)?;
            }
            (MemoryStep::Window(step), _) => {
                self.enter(Phase::Bucketizing);
                let spilled = Bucketizer::new(&permutation, step, &config.effective_temp_dir())?
                    .spill(source.records())?;
                info!("Spilled {} records into {} buckets", num_records, spilled.num_buckets());

                self.enter(Phase::Replaying);
                spilled.replay(&mut writer)?;
            }
            (MemoryStep::All, None) => {
                return Err(ShuffleError::internal("resident records were not kept"));
            }
        }
        drop(permutation);
        let shards = writer.finish()?;

        self.enter(Phase::Finalizing);
        let manifest = match (&config.manifest_path, &config.dataset_name) {
            (Some(path), Some(name)) => {
                let cwd = std::env::current_dir()?;
                let manifest = Manifest::new(
                    name,
                    &config.output_prefix,
                    config.compression.extension(),
                    &config.input_patterns,
                    labels.clone(),
                    &cwd,
                );
                manifest.write_to(std::path::Path::new(path))?;
                info!("Wrote manifest {}", path);
                Some(manifest)
            }
            _ => None,
        };

        self.enter(Phase::Done);
        Ok(ShuffleSummary {
            num_records,
            labels,
            shards,
            manifest,
            phases: self.phases,
        })
    }
}

/// All-in-memory mode: records were packed during the hashing pass
pub fn emit_resident<S: RecordSink + ?Sized>(
    mut resident: Vec<Vec<u8>>,
    permutation: &Permutation,
    sink: &mut S,
) -> ShuffleResult<()> {
    if resident.len() != permutation.len() {
        return Err(ShuffleError::internal(&format!(
            "{} resident records for a permutation of {}",
            resident.len(),
            permutation.len()
        )));
    }
    for index in permutation.order() {
        let packed = std::mem::take(&mut resident[index as usize]);
        sink.accept(&unpack_record(&packed)?)?;
    }
    Ok(())
}

/// Single-window mode: reread everything and sort once by final position
pub fn emit_single_window<I, S>(records: I, permutation: &Permutation, sink: &mut S) -> ShuffleResult<()>
where
    I: IntoIterator<Item = ShuffleResult<(u64, Vec<u8>)>>,
    S: RecordSink + ?Sized,
{
    let total = permutation.len() as u64;
    let progress_every = (total / 20).max(1);

    let mut window = Vec::with_capacity(permutation.len());
    for record in records {
        let (index, bytes) = record?;
        window.push((permutation.position_of(index)?, pack_record(&bytes)));
        if window.len() as u64 % progress_every == 0 {
            info!("Loaded {} / {} records in memory (1/2)", window.len(), total);
        }
    }
    if window.len() as u64 != total {
        return Err(ShuffleError::input_changed(total, window.len() as u64));
    }

    window.sort_unstable_by_key(|(position, _)| *position);
    for (_, packed) in window {
        sink.accept(&unpack_record(&packed)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShuffleConfigBuilder;
    use crate::fingerprint::Fingerprint;
    use crate::label::Label;
    use crate::record_io::{open_record_file, Compression};
    use crate::source::tests::write_records;
    use tempfile::TempDir;

    fn first_byte(r: &[u8]) -> ShuffleResult<Label> {
        Ok(i64::from(r[0]))
    }

    /// Orders records by their second byte
    fn second_byte(r: &[u8]) -> Fingerprint {
        Fingerprint::from_u64(u64::from(r[1]))
    }

    fn config(dir: &TempDir, step: MemoryStep, shards: usize) -> ShuffleConfig {
        ShuffleConfigBuilder::new()
            .input_pattern_list(&format!("{}/in-*.tfrecord", dir.path().display()))
            .output_prefix(&dir.path().join("out/shuffled").display().to_string())
            .num_shards(shards)
            .memory_step(step)
            .compression(Compression::None)
            .temp_dir(&dir.path().display().to_string())
            .build()
            .expect("valid config")
    }

    fn read_output(summary: &ShuffleSummary) -> ShuffleResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for shard in &summary.shards {
            for record in open_record_file(&shard.path)? {
                out.push(record?);
            }
        }
        Ok(out)
    }

    fn setup() -> ShuffleResult<TempDir> {
        let dir = TempDir::new()?;
        std::fs::create_dir(dir.path().join("out"))?;
        // (label, key) pairs; keys give the final order 3,1,4,0,5,2
        write_records(&dir.path().join("in-a.tfrecord"), &[b"\x00\x40", b"\x01\x20", b"\x00\x60"])?;
        write_records(&dir.path().join("in-b.tfrecord"), &[b"\x01\x10", b"\x00\x30", b"\x01\x50"])?;
        Ok(dir)
    }

    fn expected_order() -> Vec<Vec<u8>> {
        [b"\x01\x10", b"\x01\x20", b"\x00\x30", b"\x00\x40", b"\x01\x50", b"\x00\x60"]
            .iter()
            .map(|r| r.to_vec())
            .collect()
    }

    #[test]
    fn test_every_memory_mode_writes_the_same_order() -> ShuffleResult<()> {
        let steps = [
            MemoryStep::All,
            MemoryStep::Window(6),
            MemoryStep::Window(100),
            MemoryStep::Window(4),
            MemoryStep::Window(1),
        ];
        for step in steps {
            let dir = setup()?;
            let config = config(&dir, step, 2);
            let summary = Shuffler::with_strategies(&config, second_byte, first_byte).run()?;

            assert_eq!(summary.num_records, 6);
            assert_eq!(read_output(&summary)?, expected_order(), "memory step {step}");
            let sizes: Vec<u64> = summary.shards.iter().map(|s| s.records).collect();
            assert_eq!(sizes, vec![3, 3]);
        }
        Ok(())
    }

    #[test]
    fn test_phase_sequences() -> ShuffleResult<()> {
        let dir = setup()?;
        let in_memory = config(&dir, MemoryStep::All, 1);
        let summary = Shuffler::with_strategies(&in_memory, second_byte, first_byte).run()?;
        assert_eq!(
            summary.phases,
            vec![
                Phase::Init,
                Phase::ReadingAndHashing,
                Phase::Resolving,
                Phase::Writing,
                Phase::Finalizing,
                Phase::Done
            ]
        );

        let bounded = config(&dir, MemoryStep::Window(2), 1);
        let summary = Shuffler::with_strategies(&bounded, second_byte, first_byte).run()?;
        assert_eq!(
            summary.phases,
            vec![
                Phase::Init,
                Phase::ReadingAndHashing,
                Phase::Resolving,
                Phase::Bucketizing,
                Phase::Replaying,
                Phase::Finalizing,
                Phase::Done
            ]
        );
        Ok(())
    }

    #[test]
    fn test_bucketized_run_leaves_no_spill_files() -> ShuffleResult<()> {
        let dir = setup()?;
        let config = config(&dir, MemoryStep::Window(2), 3);
        Shuffler::with_strategies(&config, second_byte, first_byte).run()?;

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".shuffle-spill-"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn test_manifest_written_with_label_counts() -> ShuffleResult<()> {
        let dir = setup()?;
        let manifest_path = dir.path().join("out/dataset.pbtxt");
        let config = config(&dir, MemoryStep::All, 2)
            .with_manifest(manifest_path.display().to_string(), "unit");
        let summary = Shuffler::with_strategies(&config, second_byte, first_byte).run()?;

        let manifest = summary.manifest.expect("manifest requested");
        assert_eq!(manifest.num_examples(), 6);
        let text = std::fs::read_to_string(&manifest_path)?;
        assert!(text.contains("name: \"unit\"\n"));
        assert!(text.contains("num_examples: 6\n"));
        assert!(text.contains("# class0: 3\n# class1: 3\n"));
        assert!(text.contains(&format!(
            "tfrecord_path: \"{}/out/shuffled-?????-of-?????.tfrecord\"",
            dir.path().display()
        )));
        Ok(())
    }

    #[test]
    fn test_label_failure_leaves_no_output() -> ShuffleResult<()> {
        let dir = setup()?;
        let config = config(&dir, MemoryStep::Window(2), 2);
        let reject_one = |r: &[u8]| -> ShuffleResult<Label> {
            if r[1] == 0x50 {
                Err(ShuffleError::malformed("unlabelled"))
            } else {
                Ok(0)
            }
        };
        let err = Shuffler::with_strategies(&config, second_byte, reject_one)
            .run()
            .unwrap_err();
        assert!(matches!(err, ShuffleError::MalformedRecord { .. }));
        assert_eq!(std::fs::read_dir(dir.path().join("out"))?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_emit_helpers_agree() -> ShuffleResult<()> {
        let records: Vec<Vec<u8>> = vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()];
        let entries = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                crate::permutation::PermutationEntry::new(
                    Fingerprint::from_u64(u64::from(r[0])),
                    i as u64,
                    0,
                )
            })
            .collect();
        let permutation = Permutation::resolve(entries)?;

        let mut from_memory: Vec<Vec<u8>> = Vec::new();
        emit_resident(
            records.iter().map(|r| pack_record(r)).collect(),
            &permutation,
            &mut from_memory,
        )?;

        let mut from_window: Vec<Vec<u8>> = Vec::new();
        let stream = records.iter().enumerate().map(|(i, r)| Ok((i as u64, r.clone())));
        emit_single_window(stream, &permutation, &mut from_window)?;

        assert_eq!(from_memory, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(from_memory, from_window);
        Ok(())
    }
}
