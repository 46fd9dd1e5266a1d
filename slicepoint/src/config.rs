//! Profiler configuration
//!
//! [`ProfilerConfig`] is built once (from CLI flags, optionally layered over a
//! JSON file) and shared read-only with every component through an `Arc`.
//! Nothing in the engine reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ConfigError;
use crate::profiles::ProfileSet;
use crate::slicing::EmissionPolicy;

/// Default slice length in instructions
pub const DEFAULT_SLICE_SIZE: u64 = 100_000_000;

/// Default number of instrumentation thread ids the engine accepts
pub const DEFAULT_MAX_THREADS: usize = 2048;

/// Immutable engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProfilerConfig {
    /// Emit basic-block (frequency) vectors
    pub frequency: bool,

    /// Emit memory-locality vectors
    pub locality: bool,

    /// Prefix of every per-thread vector file
    pub output_prefix: PathBuf,

    /// Fixed slice length, used once the length file is exhausted
    pub slice_size: u64,

    /// Leave module names out of the module table
    pub no_symbolic: bool,

    /// Emit vectors from inside the engine; when false an external
    /// component triggers emission
    pub emit_vectors: bool,

    /// Defer emission to the entry of the next block
    pub delay_vector_emission: bool,

    /// Write a start marker for each thread's first slice
    pub emit_first_slice: bool,

    /// Emit a vector for the partial slice at thread end
    pub emit_last_slice: bool,

    /// Track and emit block-to-block transition counts
    pub emit_prev_block_counts: bool,

    /// Put the process id into vector file names
    pub pid_in_filenames: bool,

    /// Newline-separated slice lengths; the first one is the initial size
    pub length_file: Option<PathBuf>,

    /// Capacity of every per-thread container
    pub max_threads: usize,

    /// Write PinPoints-style legacy records
    pub legacy_format: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            frequency: true,
            locality: false,
            output_prefix: PathBuf::from("out"),
            slice_size: DEFAULT_SLICE_SIZE,
            no_symbolic: false,
            emit_vectors: true,
            delay_vector_emission: true,
            emit_first_slice: false,
            emit_last_slice: false,
            emit_prev_block_counts: false,
            pid_in_filenames: false,
            length_file: None,
            max_threads: DEFAULT_MAX_THREADS,
            legacy_format: false,
        }
    }
}

impl ProfilerConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check the invariants the engine relies on
    ///
    /// # Errors
    /// Returns the first violated invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_size == 0 {
            return Err(ConfigError::ZeroSliceSize);
        }
        if i64::try_from(self.slice_size).is_err() {
            return Err(ConfigError::SliceSizeTooLarge(self.slice_size));
        }
        if self.max_threads == 0 {
            return Err(ConfigError::ZeroThreadCapacity);
        }
        Ok(())
    }

    /// Profiles selected for this run
    #[must_use]
    pub fn profiles(&self) -> ProfileSet {
        ProfileSet::from_flags(self.frequency, self.locality)
    }

    /// How a detected boundary turns into an emitted vector
    #[must_use]
    pub fn emission_policy(&self) -> EmissionPolicy {
        if !self.emit_vectors {
            EmissionPolicy::External
        } else if self.delay_vector_emission {
            EmissionPolicy::Deferred
        } else {
            EmissionPolicy::Immediate
        }
    }

    /// Read the variable slice length file, if one is configured
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or holds a malformed record
    pub fn slice_lengths(&self) -> Result<Option<SliceLengths>, ConfigError> {
        self.length_file.as_deref().map(SliceLengths::from_file).transpose()
    }

    /// The fixed slice size as a timer value; `validate` keeps it in range
    pub(crate) fn fixed_slice_size(&self) -> i64 {
        i64::try_from(self.slice_size).unwrap_or(i64::MAX)
    }
}

/// Externally supplied slice lengths
///
/// `initial` is the length of the first slice; `queue` holds the following
/// ones in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceLengths {
    pub initial: Option<u64>,
    pub queue: VecDeque<u64>,
}

impl SliceLengths {
    /// Read a length file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a record is malformed
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            ConfigError::LengthFileUnreadable { path: path.to_path_buf(), source }
        })?;
        Self::parse(path, &content)
    }

    /// Parse length file contents
    ///
    /// Zero-length lines are skipped, `#` lines are comments. A line that is
    /// not empty but holds no value (only whitespace) is an error.
    ///
    /// # Errors
    /// Returns an error on an empty, non-numeric or out-of-range record
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut lengths = Self::default();

        for (idx, record) in content.lines().enumerate() {
            let line = idx + 1;
            if record.is_empty() || record.starts_with('#') {
                continue;
            }

            let field = record.trim();
            if field.is_empty() {
                return Err(ConfigError::EmptyLengthRecord { path: path.to_path_buf(), line });
            }
            let value: u64 = field.parse().map_err(|_| ConfigError::InvalidLength {
                path: path.to_path_buf(),
                line,
                value: field.to_string(),
            })?;
            if i64::try_from(value).is_err() {
                return Err(ConfigError::LengthTooLarge { path: path.to_path_buf(), line, value });
            }

            if lengths.initial.is_none() {
                lengths.initial = Some(value);
            } else {
                lengths.queue.push_back(value);
            }
        }

        Ok(lengths)
    }
}
