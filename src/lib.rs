//! Deterministic, memory-bounded record shuffling
//!
//! Reorders every record of a set of length-delimited record files into a
//! pseudorandom but reproducible order derived from the records' own
//! content, then writes the result as a fixed number of balanced shards.
//! When the dataset does not fit in memory, records are spilled to
//! temporary buckets keyed by final position and replayed one bucket at a
//! time.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod error;
pub mod config;

// Shuffle engine
pub mod record_io;
pub mod source;
pub mod label;
pub mod fingerprint;
pub mod permutation;
pub mod bucket;
pub mod shard;
pub mod manifest;
pub mod pipeline;

// Re-export commonly used types
pub use error::{ShuffleError, ShuffleResult};
pub use config::{MemoryStep, ShuffleConfig, ShuffleConfigBuilder};
pub use pipeline::{Phase, ShuffleSummary, Shuffler};

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const SHUFFLE_FAILURE: i32 = 2;

/// Run a shuffle with the default SHA-1 fingerprints and Example labels
pub fn shuffle(config: &ShuffleConfig) -> ShuffleResult<ShuffleSummary> {
    Shuffler::new(config).run()
}
