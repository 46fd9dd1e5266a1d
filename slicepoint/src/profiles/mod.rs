//! Vector profiles
//!
//! Each enabled profile gets one [`ThreadProfile`] per profiled thread. The
//! thread profiler iterates them at every slice end without knowing which
//! concrete profiles are active.
//!
//! - [`frequency`]: basic-block vectors from the block registry counters
//! - [`locality`]: reuse-distance histograms from data accesses
//! - [`reuse`]: the reuse-distance structure behind locality vectors
//! - [`output`]: file naming and record writing

pub mod frequency;
pub mod locality;
pub mod output;
pub mod reuse;

use std::path::Path;

use slicepoint_common::Record;
pub use slicepoint_common::ProfileKind;

pub use frequency::FrequencyProfile;
pub use locality::LocalityProfile;
pub use output::{vector_file_name, VectorWriter};

use crate::domain::{Address, ModuleId, Pid, ProfilerError, ThreadId};
use crate::registry::{BlockRegistry, ModuleRegistry, SliceStarts};

/// The set of profiles selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileSet {
    frequency: bool,
    locality: bool,
}

impl ProfileSet {
    #[must_use]
    pub fn from_flags(frequency: bool, locality: bool) -> Self {
        Self { frequency, locality }
    }

    /// No profile selected: the engine does nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.frequency && !self.locality
    }

    #[must_use]
    pub fn contains(&self, kind: ProfileKind) -> bool {
        match kind {
            ProfileKind::Frequency => self.frequency,
            ProfileKind::Locality => self.locality,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ProfileKind> + '_ {
        [ProfileKind::Frequency, ProfileKind::Locality]
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

/// Everything a profile needs to write one slice
pub struct SliceEnd<'a> {
    pub tid: ThreadId,
    pub marker: Address,
    pub module: ModuleId,
    /// Execution instance of the marker address that bounds the slice
    pub marker_count: u64,
    pub cumulative: u64,
    pub rep_iterations: u64,
    pub blocks: &'a BlockRegistry,
}

impl SliceEnd<'_> {
    fn marker_record(&self) -> Record {
        Record::Marker {
            address: self.marker.0,
            module: self.module.0,
            count: self.marker_count,
            cumulative: self.cumulative,
            rep_iterations: self.rep_iterations,
        }
    }
}

/// Everything a profile needs to close a thread's file
pub struct ThreadEnd<'a> {
    pub tid: ThreadId,
    pub cumulative: u64,
    pub slices: u64,
    pub blocks: &'a BlockRegistry,
    pub modules: &'a ModuleRegistry,
    pub slice_starts: &'a SliceStarts,
}

/// Options fixed when a thread's profile files are opened
#[derive(Debug, Clone, Copy)]
pub struct StartOptions<'a> {
    pub prefix: &'a Path,
    pub pid: Option<Pid>,
    pub legacy: bool,
    pub no_symbolic: bool,
    pub track_transitions: bool,
}

/// One profile's per-thread state
pub enum ThreadProfile {
    Frequency(FrequencyProfile),
    Locality(LocalityProfile),
}

impl ThreadProfile {
    /// Open the vector file for `kind` and write its header
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn start(
        kind: ProfileKind,
        tid: ThreadId,
        options: &StartOptions<'_>,
    ) -> Result<Self, ProfilerError> {
        let path = vector_file_name(options.prefix, tid, options.pid, kind);
        let writer = VectorWriter::create(path, options.legacy)?;
        log::debug!("Opened {} for {}", writer.path().display(), tid);
        Ok(match kind {
            ProfileKind::Frequency => Self::Frequency(FrequencyProfile::start(
                writer,
                options.track_transitions,
                options.no_symbolic,
            )?),
            ProfileKind::Locality => Self::Locality(LocalityProfile::start(writer)?),
        })
    }

    #[must_use]
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::Frequency(_) => ProfileKind::Frequency,
            Self::Locality(_) => ProfileKind::Locality,
        }
    }

    /// The vector file this profile writes
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Frequency(profile) => profile.path(),
            Self::Locality(profile) => profile.path(),
        }
    }

    /// Feed a data access to the locality profile; other profiles ignore it
    pub fn access(&mut self, addr: Address) -> bool {
        match self {
            Self::Frequency(_) => false,
            Self::Locality(profile) => {
                profile.access(addr);
                true
            }
        }
    }

    /// Write the thread's slice-start marker
    ///
    /// # Errors
    /// Returns an error if the write fails
    pub fn write_slice_start(&mut self, record: &Record) -> Result<(), ProfilerError> {
        match self {
            Self::Frequency(profile) => profile.write(record),
            Self::Locality(profile) => profile.write(record),
        }
    }

    /// Emit the vector for the slice that just ended
    ///
    /// # Errors
    /// Returns an error if the write fails
    pub fn emit_slice_end(&mut self, end: &SliceEnd<'_>) -> Result<(), ProfilerError> {
        match self {
            Self::Frequency(profile) => profile.emit_slice_end(end),
            Self::Locality(profile) => profile.emit_slice_end(end),
        }
    }

    /// Write trailing records and flush
    ///
    /// # Errors
    /// Returns an error if the write fails
    pub fn finish(&mut self, end: &ThreadEnd<'_>) -> Result<(), ProfilerError> {
        match self {
            Self::Frequency(profile) => profile.finish(end),
            Self::Locality(profile) => profile.finish(end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_set_iteration() {
        let both = ProfileSet::from_flags(true, true);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![ProfileKind::Frequency, ProfileKind::Locality]);

        let locality = ProfileSet::from_flags(false, true);
        assert_eq!(locality.iter().collect::<Vec<_>>(), vec![ProfileKind::Locality]);
        assert!(!locality.contains(ProfileKind::Frequency));

        assert!(ProfileSet::from_flags(false, false).is_empty());
        assert_eq!(ProfileSet::default().iter().count(), 0);
    }
}
