//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::ProfilerConfig;
use crate::domain::{ConfigError, ThreadId};
use crate::trace::DEFAULT_CHANNEL_CAPACITY;

#[derive(Parser, Debug)]
#[command(
    name = "slicepoint",
    about = "Emit per-slice basic-block and locality vectors from a region-event trace",
    after_help = "\
EXAMPLES:
    slicepoint --trace app.trace                        Frequency vectors, 100M-instruction slices
    slicepoint --trace app.trace --locality -o out/app  Frequency and locality vectors
    slicepoint --trace app.trace --length-file regions  Variable slice lengths
    slicepoint --trace app.trace --threads 0,2          Only profile threads 0 and 2"
)]
pub struct Args {
    /// Region-event trace to replay
    #[arg(long, value_name = "FILE")]
    pub trace: PathBuf,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Prefix of the per-thread vector files
    #[arg(short, long, value_name = "PREFIX")]
    pub output_prefix: Option<PathBuf>,

    /// Slice length in instructions
    #[arg(long, value_name = "N")]
    pub slice_size: Option<u64>,

    /// Slice lengths file (first line is the initial size)
    #[arg(long, value_name = "FILE")]
    pub length_file: Option<PathBuf>,

    /// Emit memory-locality vectors
    #[arg(long)]
    pub locality: bool,

    /// Do not emit basic-block vectors
    #[arg(long)]
    pub no_frequency: bool,

    /// Leave module names out of the module table
    #[arg(long)]
    pub no_symbolic: bool,

    /// Emit at the boundary block instead of the next block's entry
    #[arg(long, conflicts_with = "external_emission")]
    pub immediate: bool,

    /// Only flag boundaries; vectors are emitted by the external trigger
    #[arg(long)]
    pub external_emission: bool,

    /// Write a start marker for each thread's first slice
    #[arg(long)]
    pub emit_first_slice: bool,

    /// Emit a vector for the partial slice at thread end
    #[arg(long)]
    pub emit_last_slice: bool,

    /// Emit block-to-block transition counts
    #[arg(long)]
    pub emit_prev_block_counts: bool,

    /// Put the process id into vector file names
    #[arg(long)]
    pub pid_in_filenames: bool,

    /// Write PinPoints-style legacy records
    #[arg(long)]
    pub legacy_format: bool,

    /// Highest accepted thread id plus one
    #[arg(long, value_name = "N")]
    pub max_threads: Option<usize>,

    /// Only profile these thread ids (comma separated)
    #[arg(long, value_delimiter = ',', value_name = "TIDS")]
    pub threads: Option<Vec<u32>>,

    /// Write a JSON run summary
    #[arg(long, value_name = "FILE")]
    pub summary: Option<PathBuf>,

    /// Events buffered per thread during replay
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Build the engine configuration: the JSON file (or defaults) with the
    /// flags applied on top
    ///
    /// # Errors
    /// Returns an error if the configuration file cannot be read or parsed
    pub fn profiler_config(&self) -> Result<ProfilerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ProfilerConfig::from_json_file(path)?,
            None => ProfilerConfig::default(),
        };

        if let Some(prefix) = &self.output_prefix {
            config.output_prefix.clone_from(prefix);
        }
        if let Some(size) = self.slice_size {
            config.slice_size = size;
        }
        if let Some(path) = &self.length_file {
            config.length_file = Some(path.clone());
        }
        if let Some(max) = self.max_threads {
            config.max_threads = max;
        }

        config.locality |= self.locality;
        config.frequency &= !self.no_frequency;
        config.no_symbolic |= self.no_symbolic;
        config.delay_vector_emission &= !self.immediate;
        config.emit_vectors &= !self.external_emission;
        config.emit_first_slice |= self.emit_first_slice;
        config.emit_last_slice |= self.emit_last_slice;
        config.emit_prev_block_counts |= self.emit_prev_block_counts;
        config.pid_in_filenames |= self.pid_in_filenames;
        config.legacy_format |= self.legacy_format;

        Ok(config)
    }

    /// Thread ids selected with `--threads`, if any
    #[must_use]
    pub fn thread_filter(&self) -> Option<Vec<ThreadId>> {
        self.threads.as_ref().map(|tids| tids.iter().copied().map(ThreadId).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::try_parse_from([
            "slicepoint",
            "--trace",
            "app.trace",
            "--locality",
            "--immediate",
            "--slice-size",
            "500",
            "-o",
            "/tmp/run",
        ])
        .unwrap();
        let config = args.profiler_config().unwrap();
        assert!(config.frequency);
        assert!(config.locality);
        assert!(!config.delay_vector_emission);
        assert_eq!(config.slice_size, 500);
        assert_eq!(config.output_prefix, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"slice-size": 42, "locality": true, "max-threads": 8}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::try_parse_from([
            "slicepoint",
            "--trace",
            "t",
            "--config",
            &path,
            "--max-threads",
            "16",
        ])
        .unwrap();
        let config = args.profiler_config().unwrap();
        assert_eq!(config.slice_size, 42);
        assert!(config.locality);
        assert_eq!(config.max_threads, 16);
    }

    #[test]
    fn test_thread_list() {
        let args =
            Args::try_parse_from(["slicepoint", "--trace", "t", "--threads", "0,2,5"]).unwrap();
        assert_eq!(args.thread_filter(), Some(vec![ThreadId(0), ThreadId(2), ThreadId(5)]));
    }

    #[test]
    fn test_conflicting_emission_modes() {
        let err = Args::try_parse_from([
            "slicepoint",
            "--trace",
            "t",
            "--immediate",
            "--external-emission",
        ]);
        assert!(err.is_err());
    }
}
