//! Label accounting and the dataset manifest

use crate::error::{ShuffleContext, ShuffleResult};
use crate::label::Label;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Name written into the manifest header
pub const TOOL_NAME: &str = "shuffle-records";

/// Total and per-label record counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCounts {
    counts: BTreeMap<Label, u64>,
    total: u64,
}

impl LabelCounts {
    pub fn add(&mut self, label: Label) {
        *self.counts.entry(label).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, label: Label) -> u64 {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Counts in ascending label order
    pub fn per_label(&self) -> &BTreeMap<Label, u64> {
        &self.counts
    }
}

/// Summary of a shuffled dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub dataset_name: String,
    /// Absolute output prefix
    pub output_prefix: String,
    /// Shard file extension, without the leading dot
    pub extension: String,
    /// Absolute, comma-separated input pattern list
    pub input_patterns: String,
    pub labels: LabelCounts,
}

impl Manifest {
    /// Build a manifest, resolving relative paths against `cwd`
    pub fn new(
        dataset_name: &str,
        output_prefix: &str,
        extension: &str,
        input_patterns: &[String],
        labels: LabelCounts,
        cwd: &Path,
    ) -> Self {
        let input_patterns = input_patterns
            .iter()
            .map(|p| absolutize(p, cwd))
            .collect::<Vec<_>>()
            .join(",");

        Self {
            dataset_name: dataset_name.to_string(),
            output_prefix: absolutize(output_prefix, cwd),
            extension: extension.to_string(),
            input_patterns,
            labels,
        }
    }

    pub fn num_examples(&self) -> u64 {
        self.labels.total()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "# Generated by {TOOL_NAME}");
        let _ = writeln!(out);
        let _ = writeln!(out, "name: \"{}\"", self.dataset_name);
        let _ = writeln!(
            out,
            "tfrecord_path: \"{}-?????-of-?????.{}\"",
            self.output_prefix, self.extension
        );
        let _ = writeln!(out, "num_examples: {}", self.num_examples());
        let _ = writeln!(out, "#");
        let _ = writeln!(out, "# --input_pattern_list={}", self.input_patterns);
        let _ = writeln!(out, "# --output_pattern_prefix={}", self.output_prefix);
        let _ = writeln!(out, "#");
        for (label, count) in self.labels.per_label() {
            let _ = writeln!(out, "# class{label}: {count}");
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> ShuffleResult<()> {
        std::fs::write(path, self.render()).with_file_context(&path.display().to_string())
    }
}

fn absolutize(path: &str, cwd: &Path) -> String {
    if Path::new(path).is_absolute() {
        path.to_string()
    } else {
        cwd.join(path).display().to_string()
    }
}
