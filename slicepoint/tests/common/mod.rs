//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use slicepoint::config::ProfilerConfig;
use slicepoint::domain::{Address, ModuleId};
use slicepoint::profiling::{AllThreads, CountingInstrumentation, Profiler, ThreadOracle};
use slicepoint::registry::Block;
use slicepoint_common::{Record, VectorEntry};

/// Frequency-only configuration writing under `dir`
pub fn config(dir: &Path, slice_size: u64) -> ProfilerConfig {
    ProfilerConfig {
        output_prefix: dir.join("run"),
        slice_size,
        max_threads: 8,
        ..ProfilerConfig::default()
    }
}

pub fn activate(config: ProfilerConfig) -> Arc<Profiler> {
    activate_with(config, Arc::new(AllThreads))
}

pub fn activate_with(config: ProfilerConfig, oracle: Arc<dyn ThreadOracle>) -> Arc<Profiler> {
    Profiler::activate(config, Arc::new(CountingInstrumentation::new()), oracle)
        .expect("activation failed")
        .expect("profiler should be active")
}

/// The 10/20/5-instruction region cycle used by the slicing scenarios
pub fn three_blocks(profiler: &Profiler) -> [Arc<Block>; 3] {
    profiler.module_loaded(ModuleId(1), "app", Address(0x1000));
    [
        profiler.register_block(Address(0x1000), Address(0x1024), 0x28, 10, ModuleId(1)).unwrap(),
        profiler.register_block(Address(0x2000), Address(0x2040), 0x44, 20, ModuleId(1)).unwrap(),
        profiler.register_block(Address(0x3000), Address(0x3010), 0x14, 5, ModuleId(1)).unwrap(),
    ]
}

pub fn read_records(path: &Path) -> Vec<Record> {
    let content = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
    content
        .lines()
        .map(|line| Record::parse(line).unwrap_or_else(|e| panic!("bad record `{line}`: {e}")))
        .collect()
}

pub fn vector_path(dir: &Path, tid: u32, ext: &str) -> PathBuf {
    dir.join(format!("run.T.{tid}.{ext}"))
}

/// `(address, count, cumulative)` of every slice-end marker
pub fn markers(records: &[Record]) -> Vec<(u64, u64, u64)> {
    records
        .iter()
        .filter_map(|record| match record {
            Record::Marker { address, count, cumulative, .. } => {
                Some((*address, *count, *cumulative))
            }
            _ => None,
        })
        .collect()
}

pub fn vectors(records: &[Record]) -> Vec<Vec<VectorEntry>> {
    records
        .iter()
        .filter_map(|record| match record {
            Record::Vector(entries) => Some(entries.clone()),
            _ => None,
        })
        .collect()
}

pub fn entries(pairs: &[(u32, u64)]) -> Vec<VectorEntry> {
    pairs.iter().map(|&(index, count)| VectorEntry { index, count }).collect()
}
