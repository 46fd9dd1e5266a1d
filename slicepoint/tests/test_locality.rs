mod common;

use common::{activate, config, entries, markers, read_records, vector_path, vectors};
use slicepoint::config::ProfilerConfig;
use slicepoint::domain::{Address, ModuleId, ThreadId};
use slicepoint_common::{ProfileKind, Record, FORMAT_VERSION};

fn locality_config(dir: &std::path::Path) -> ProfilerConfig {
    ProfilerConfig {
        frequency: false,
        locality: true,
        delay_vector_emission: false,
        emit_last_slice: true,
        ..config(dir, 10)
    }
}

#[test]
fn test_reuse_histogram_per_slice() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(locality_config(dir.path()));
    assert!(profiler.counting_memory());
    let big = profiler.register_block(Address(0x100), Address(0x124), 40, 10, ModuleId(0)).unwrap();
    let small = profiler.register_block(Address(0x200), Address(0x200), 2, 1, ModuleId(0)).unwrap();

    let mut thread = profiler.thread_start(ThreadId(0)).unwrap();
    thread.memory_access(Address(0x1000), false).unwrap(); // first touch
    thread.memory_access(Address(0x1008), false).unwrap(); // same line, distance 0
    thread.memory_access(Address(0x1040), false).unwrap(); // first touch
    thread.memory_access(Address(0x1000), false).unwrap(); // distance 1
    thread.memory_access(Address(0x9000), true).unwrap(); // agen, ignored
    thread.execute_block(&big).unwrap();
    thread.execute_block(&small).unwrap();

    // The reuse stack outlives the slice
    thread.memory_access(Address(0x1040), false).unwrap(); // distance 1
    thread.execute_block(&small).unwrap();
    let summary = thread.finish().unwrap().unwrap();

    let records = read_records(&vector_path(dir.path(), 0, "ldv"));
    assert_eq!(
        records[0],
        Record::Header { kind: ProfileKind::Locality, version: FORMAT_VERSION, rep_iterations: false }
    );
    assert_eq!(
        vectors(&records),
        vec![entries(&[(0, 2), (1, 1), (2, 1)]), entries(&[(2, 1)])]
    );
    assert_eq!(markers(&records), vec![(0x200, 1, 11), (0x200, 2, 12)]);
    assert_eq!(records.last(), Some(&Record::End { cumulative: 12, slices: 2 }));
    // No block table in locality files
    assert!(!records.iter().any(|record| matches!(record, Record::Block { .. })));

    assert!(!vector_path(dir.path(), 0, "bb").exists());
    assert_eq!(summary.files, vec![vector_path(dir.path(), 0, "ldv")]);
}

#[test]
fn test_both_profiles_share_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(ProfilerConfig { frequency: true, ..locality_config(dir.path()) });
    let block = profiler.register_block(Address(0x100), Address(0x108), 12, 4, ModuleId(0)).unwrap();

    let mut thread = profiler.thread_start(ThreadId(1)).unwrap();
    for i in 0..25u64 {
        thread.memory_access(Address(0x4000 + (i % 5) * 64), false).unwrap();
        thread.execute_block(&block).unwrap();
    }
    thread.finish().unwrap();

    let bbv = read_records(&vector_path(dir.path(), 1, "bb"));
    let ldv = read_records(&vector_path(dir.path(), 1, "ldv"));
    assert!(!markers(&bbv).is_empty());
    assert_eq!(markers(&bbv), markers(&ldv));

    let touches: u64 = vectors(&ldv).iter().flatten().map(|entry| entry.count).sum();
    assert_eq!(touches, 25);
}
