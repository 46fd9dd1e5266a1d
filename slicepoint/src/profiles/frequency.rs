//! Basic-block (frequency) vectors
//!
//! At each slice end the profile walks the registry, writes one entry per
//! block the thread executed during the slice, and folds the slice counts
//! into the blocks' cumulative counts. At thread end it writes the module and
//! block tables.

use std::collections::BTreeSet;

use slicepoint_common::{EdgeEntry, ProfileKind, Record, VectorEntry, FORMAT_VERSION};

use super::{SliceEnd, ThreadEnd, VectorWriter};
use crate::domain::{ModuleId, ProfilerError};

pub struct FrequencyProfile {
    out: VectorWriter,
    track_transitions: bool,
    no_symbolic: bool,
}

impl FrequencyProfile {
    /// Wrap an opened vector file and write the header
    ///
    /// # Errors
    /// Returns an error if the header cannot be written
    pub fn start(
        mut out: VectorWriter,
        track_transitions: bool,
        no_symbolic: bool,
    ) -> Result<Self, ProfilerError> {
        out.record(&Record::Header {
            kind: ProfileKind::Frequency,
            version: FORMAT_VERSION,
            rep_iterations: true,
        })?;
        Ok(Self { out, track_transitions, no_symbolic })
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

    /// Write marker, vector and (optionally) transitions for the slice
    ///
    /// # Errors
    /// Returns an error if a write fails
    pub fn emit_slice_end(&mut self, end: &SliceEnd<'_>) -> Result<(), ProfilerError> {
        self.out.record(&end.marker_record())?;

        let mut entries = Vec::new();
        let mut edges = Vec::new();
        for block in end.blocks.blocks() {
            let count = block.take_slice_count(end.tid);
            if count > 0 {
                entries.push(VectorEntry { index: block.id().0, count });
            }
            if self.track_transitions {
                let to = block.id().0;
                edges.extend(
                    block
                        .take_transitions(end.tid)
                        .into_iter()
                        .map(|(from, count)| EdgeEntry { from, to, count }),
                );
            }
        }
        entries.sort_unstable_by_key(|entry| entry.index);

        self.out.record(&Record::Vector(entries))?;
        if self.track_transitions {
            edges.sort_unstable_by_key(|edge| (edge.to, edge.from));
            self.out.record(&Record::Edges(edges))?;
        }
        Ok(())
    }

    /// Write the module table, block table and end record, then flush
    ///
    /// # Errors
    /// Returns an error if a write fails
    pub fn finish(&mut self, end: &ThreadEnd<'_>) -> Result<(), ProfilerError> {
        let executed: Vec<_> = end
            .blocks
            .blocks()
            .into_iter()
            .filter(|block| block.cumulative_count(end.tid) > 0)
            .collect();
        let used_modules: BTreeSet<ModuleId> = executed.iter().map(|block| block.module()).collect();

        for module in end.modules.all() {
            if !used_modules.contains(&module.id) {
                log::debug!("{} has no slice data for {}, skipping", module.id, end.tid);
                continue;
            }
            self.out.record(&Record::Module {
                id: module.id.0,
                base: module.base.0,
                name: (!self.no_symbolic).then_some(module.name),
            })?;
        }

        for block in &executed {
            let key = block.key();
            self.out.record(&Record::Block {
                id: block.id().0,
                start: key.start().0,
                end: key.end().0,
                size: key.size(),
                instructions: block.static_instructions(),
                module: block.module().0,
                count: block.cumulative_count(end.tid),
                slice_start: end.slice_starts.contains(key.start()),
            })?;
        }

        self.out.record(&Record::End { cumulative: end.cumulative, slices: end.slices })?;
        self.flush()
    }
}
