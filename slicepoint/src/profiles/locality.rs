//! Memory-locality vectors

use slicepoint_common::{ProfileKind, Record, VectorEntry, FORMAT_VERSION, LINE_MASK};

use super::reuse::ReuseHistogram;
use super::{SliceEnd, ThreadEnd, VectorWriter};
use crate::domain::{Address, ProfilerError};

pub struct LocalityProfile {
    out: VectorWriter,
    histogram: ReuseHistogram,
}

impl LocalityProfile {
    /// Wrap an opened vector file and write the header
    ///
    /// # Errors
    /// Returns an error if the header cannot be written
    pub fn start(mut out: VectorWriter) -> Result<Self, ProfilerError> {
        out.record(&Record::Header {
            kind: ProfileKind::Locality,
            version: FORMAT_VERSION,
            rep_iterations: false,
        })?;
        Ok(Self { out, histogram: ReuseHistogram::new() })
    }

    pub(super) fn path(&self) -> &std::path::Path {
        self.out.path()
    }

    pub(super) fn write(&mut self, record: &Record) -> Result<(), ProfilerError> {
        Ok(self.out.record(record)?)
    }

    pub(super) fn flush(&mut self) -> Result<(), ProfilerError> {
        Ok(self.out.flush()?)
    }

    /// Feed one data access, tracked at cache-line granularity
    pub fn access(&mut self, addr: Address) {
        self.histogram.access(addr.masked(LINE_MASK).0);
    }

    /// Write marker and histogram for the slice, then clear the histogram
    ///
    /// # Errors
    /// Returns an error if a write fails
    pub fn emit_slice_end(&mut self, end: &SliceEnd<'_>) -> Result<(), ProfilerError> {
        self.out.record(&end.marker_record())?;
        let entries = self
            .histogram
            .take_counts()
            .into_iter()
            .zip(0u32..)
            .filter(|(count, _)| *count > 0)
            .map(|(count, index)| VectorEntry { index, count })
            .collect();
        Ok(self.out.record(&Record::Vector(entries))?)
    }

    /// Write the end record and flush
    ///
    /// # Errors
    /// Returns an error if a write fails
    pub fn finish(&mut self, end: &ThreadEnd<'_>) -> Result<(), ProfilerError> {
        self.out.record(&Record::End { cumulative: end.cumulative, slices: end.slices })?;
        self.flush()
    }
}
