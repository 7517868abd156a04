//! Configuration management for shuffle runs

use crate::error::{ShuffleError, ShuffleResult};
use crate::record_io::Compression;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default feature name holding the class label of an Example record
pub const DEFAULT_LABEL_FEATURE: &str = "label";

/// How many records may be resident at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryStep {
    /// Hold every record in memory (`-1` on the command line)
    #[default]
    All,
    /// Bound each working window and bucket to this many records
    Window(usize),
}

impl MemoryStep {
    /// Interpret the command line integer form
    pub fn from_step(step: i64) -> ShuffleResult<Self> {
        match step {
            -1 => Ok(MemoryStep::All),
            s if s > 0 => usize::try_from(s)
                .map(MemoryStep::Window)
                .map_err(|_| ShuffleError::config(&format!("memory step too large: {s}"))),
            s => Err(ShuffleError::config(&format!(
                "memory step must be -1 or a positive integer, got {s}"
            ))),
        }
    }
}

impl FromStr for MemoryStep {
    type Err = ShuffleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let step = s
            .trim()
            .parse::<i64>()
            .map_err(|_| ShuffleError::config(&format!("invalid memory step: {s}")))?;
        Self::from_step(step)
    }
}

impl std::fmt::Display for MemoryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryStep::All => write!(f, "-1"),
            MemoryStep::Window(step) => write!(f, "{step}"),
        }
    }
}

/// Main configuration structure for a shuffle run
#[derive(Debug, Clone)]
pub struct ShuffleConfig {
    /// Glob patterns naming the input record files
    pub input_patterns: Vec<String>,
    /// Output path prefix; shards are written as `{prefix}-NNNNN-of-WWWWW.{ext}`
    pub output_prefix: String,
    /// Where to write the dataset manifest, if anywhere
    pub manifest_path: Option<String>,
    /// Dataset name recorded in the manifest
    pub dataset_name: Option<String>,
    /// Number of output shards
    pub num_shards: usize,
    /// Memory budget in records
    pub memory_step: MemoryStep,
    /// Directory for bucket spill files
    pub temp_dir: Option<String>,
    /// Compression applied to output shard files
    pub compression: Compression,
    /// Example feature holding the class label
    pub label_feature: String,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            input_patterns: Vec::new(),
            output_prefix: String::new(),
            manifest_path: None,
            dataset_name: None,
            num_shards: 1,
            memory_step: MemoryStep::All,
            temp_dir: None,
            compression: Compression::Zstd,
            label_feature: DEFAULT_LABEL_FEATURE.to_string(),
        }
    }
}

impl ShuffleConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set input patterns
    pub fn with_input_patterns(mut self, patterns: Vec<String>) -> Self {
        self.input_patterns = patterns;
        self
    }

    /// Set output prefix
    pub fn with_output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = prefix.into();
        self
    }

    /// Set manifest path and dataset name together
    pub fn with_manifest(mut self, path: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        self.manifest_path = Some(path.into());
        self.dataset_name = Some(dataset_name.into());
        self
    }

    /// Set number of shards
    pub fn with_num_shards(mut self, num_shards: usize) -> Self {
        self.num_shards = num_shards;
        self
    }

    /// Set memory step
    pub fn with_memory_step(mut self, step: MemoryStep) -> Self {
        self.memory_step = step;
        self
    }

    /// Set spill directory
    pub fn with_temp_dir(mut self, temp_dir: Option<String>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Set output compression
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Split a comma-separated pattern list, dropping empty entries
    pub fn parse_pattern_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> ShuffleResult<()> {
        if self.input_patterns.is_empty() {
            return Err(ShuffleError::config("at least one input pattern is required"));
        }

        if self.output_prefix.is_empty() {
            return Err(ShuffleError::config("output prefix must not be empty"));
        }

        if self.num_shards == 0 {
            return Err(ShuffleError::config("number of shards must be at least 1"));
        }
        // Shard names carry a five-digit index and count
        if self.num_shards > 99_999 {
            return Err(ShuffleError::config("too many shards (maximum 99999)"));
        }

        if let MemoryStep::Window(0) = self.memory_step {
            return Err(ShuffleError::config("memory step must be positive"));
        }

        if self.manifest_path.is_some()
            && self.dataset_name.as_deref().map_or(true, str::is_empty)
        {
            return Err(ShuffleError::config(
                "a dataset name is required when a manifest is requested",
            ));
        }

        if self.label_feature.is_empty() {
            return Err(ShuffleError::config("label feature name must not be empty"));
        }

        Ok(())
    }

    /// Directory that receives the bucket spill files
    pub fn effective_temp_dir(&self) -> PathBuf {
        if let Some(dir) = &self.temp_dir {
            return PathBuf::from(dir);
        }
        match Path::new(&self.output_prefix).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Builder pattern for creating configurations
pub struct ShuffleConfigBuilder {
    config: ShuffleConfig,
}

impl ShuffleConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: ShuffleConfig::default(),
        }
    }

    /// Set input patterns from a comma-separated list
    pub fn input_pattern_list(mut self, list: &str) -> Self {
        self.config.input_patterns = ShuffleConfig::parse_pattern_list(list);
        self
    }

    /// Set output prefix
    pub fn output_prefix(mut self, prefix: &str) -> Self {
        self.config.output_prefix = prefix.to_string();
        self
    }

    /// Set manifest path
    pub fn manifest_path(mut self, path: &str) -> Self {
        self.config.manifest_path = Some(path.to_string());
        self
    }

    /// Set dataset name
    pub fn dataset_name(mut self, name: &str) -> Self {
        self.config.dataset_name = Some(name.to_string());
        self
    }

    /// Set number of shards
    pub fn num_shards(mut self, num_shards: usize) -> Self {
        self.config.num_shards = num_shards;
        self
    }

    /// Set memory step
    pub fn memory_step(mut self, step: MemoryStep) -> Self {
        self.config.memory_step = step;
        self
    }

    /// Set spill directory
    pub fn temp_dir(mut self, dir: &str) -> Self {
        self.config.temp_dir = Some(dir.to_string());
        self
    }

    /// Set output compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set label feature name
    pub fn label_feature(mut self, feature: &str) -> Self {
        self.config.label_feature = feature.to_string();
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ShuffleResult<ShuffleConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ShuffleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
