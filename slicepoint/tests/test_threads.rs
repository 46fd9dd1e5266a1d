mod common;

use std::sync::Arc;

use common::{activate, activate_with, config, markers, read_records, vector_path, vectors};
use slicepoint::config::ProfilerConfig;
use slicepoint::domain::{Address, ModuleId, ProfilerError, ThreadId};
use slicepoint::profiling::ThreadFilter;
use slicepoint::trace::{parse_trace, replay, BlockEvent, ThreadEvent, TraceEvent};
use slicepoint_common::Record;

#[test]
fn test_concurrent_threads_do_not_mix() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(ProfilerConfig {
        delay_vector_emission: false,
        emit_last_slice: true,
        ..config(dir.path(), 1000)
    });
    let x = profiler.register_block(Address(0x1000), Address(0x100c), 16, 4, ModuleId(0)).unwrap();
    let y = profiler.register_block(Address(0x8000), Address(0x8018), 28, 7, ModuleId(0)).unwrap();

    std::thread::scope(|scope| {
        for (tid, block) in [(0, &x), (1, &y)] {
            let profiler = &profiler;
            scope.spawn(move || {
                let mut thread = profiler.thread_start(ThreadId(tid)).unwrap();
                for _ in 0..1000 {
                    thread.execute_block(block).unwrap();
                }
                thread.finish().unwrap()
            });
        }
    });

    for (tid, block, total) in [(0, &x, 4000), (1, &y, 7000)] {
        let records = read_records(&vector_path(dir.path(), tid, "bb"));
        let all: Vec<_> = vectors(&records).into_iter().flatten().collect();
        assert!(all.iter().all(|entry| entry.index == block.id().0), "T{tid} saw a foreign block");
        assert_eq!(all.iter().map(|entry| entry.count).sum::<u64>(), 1000);
        assert_eq!(markers(&records).last().map(|m| m.2), Some(total));
    }
    assert_eq!(x.cumulative_count(ThreadId(1)), 0);
    assert_eq!(y.cumulative_count(ThreadId(0)), 0);
}

#[test]
fn test_uninteresting_thread_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate_with(
        ProfilerConfig { emit_last_slice: true, ..config(dir.path(), 10) },
        Arc::new(ThreadFilter::new([ThreadId(0)])),
    );
    let block = profiler.register_block(Address(0x10), Address(0x18), 12, 3, ModuleId(0)).unwrap();

    let mut skipped = profiler.thread_start(ThreadId(1)).unwrap();
    assert!(!skipped.is_active());
    for _ in 0..20 {
        skipped.execute_block(&block).unwrap();
    }
    assert!(skipped.finish().unwrap().is_none());

    assert!(!vector_path(dir.path(), 1, "bb").exists());
    assert_eq!(block.cumulative_count(ThreadId(1)), 0);
}

#[test]
fn test_thread_beyond_capacity_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(ProfilerConfig { max_threads: 2, ..config(dir.path(), 10) });
    let err = profiler.thread_start(ThreadId(2)).err().expect("capacity not enforced");
    assert!(matches!(err, ProfilerError::ThreadCapacityExceeded { capacity: 2, .. }));
}

fn block(tid: u32, start: u64, instructions: u64) -> TraceEvent {
    TraceEvent::Thread(
        ThreadId(tid),
        ThreadEvent::Block(BlockEvent {
            start: Address(start),
            end: Address(start + 8),
            size: 12,
            instructions,
            module: ModuleId(1),
        }),
    )
}

#[test]
fn test_replay_filters_and_joins_threads() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate_with(
        ProfilerConfig { emit_last_slice: true, ..config(dir.path(), 50) },
        Arc::new(ThreadFilter::new([ThreadId(0), ThreadId(1)])),
    );

    let mut events = vec![
        TraceEvent::ModuleLoad { id: ModuleId(1), base: Address(0x1000), name: "app".into() },
        TraceEvent::ThreadStart(ThreadId(0)),
        TraceEvent::ThreadStart(ThreadId(1)),
        TraceEvent::ThreadStart(ThreadId(2)),
    ];
    for _ in 0..100 {
        events.push(block(0, 0x1000, 3));
        events.push(block(1, 0x2000, 5));
        events.push(block(2, 0x3000, 7));
    }
    // Thread 1 has no finish event and is closed when the trace ends
    events.push(TraceEvent::Thread(ThreadId(0), ThreadEvent::Finish));
    events.push(TraceEvent::Thread(ThreadId(2), ThreadEvent::Finish));

    // A tiny channel makes the dispatcher wait on the workers
    let summaries = replay(&profiler, events, 4).unwrap();

    let tids: Vec<u32> = summaries.iter().map(|summary| summary.tid).collect();
    assert_eq!(tids, vec![0, 1]);
    assert_eq!(summaries[0].instructions, 300);
    assert_eq!(summaries[1].instructions, 500);
    assert!(!vector_path(dir.path(), 2, "bb").exists());

    let records = read_records(&vector_path(dir.path(), 1, "bb"));
    assert!(records.contains(&Record::Module { id: 1, base: 0x1000, name: Some("app".into()) }));
}

#[test]
fn test_replay_rejects_events_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(config(dir.path(), 50));
    let events = parse_trace("start 0\nblock 1 0x10 0x18 12 3 0\n").unwrap();
    let err = replay(&profiler, events, 4).unwrap_err();
    assert!(err.to_string().contains("T1"));
}

#[test]
fn test_replay_rejects_restart_after_finish() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(ProfilerConfig { emit_last_slice: true, ..config(dir.path(), 50) });
    let mut trace = String::from("start 0\n");
    trace.push_str(&"block 0 0x10 0x18 12 3 0\n".repeat(10));
    trace.push_str("finish 0\nstart 0\n");
    trace.push_str(&"block 0 0x10 0x18 12 3 0\n".repeat(4));
    trace.push_str("finish 0\n");

    let err = replay(&profiler, parse_trace(&trace).unwrap(), 4).unwrap_err();
    assert!(err.to_string().contains("T0 started twice"), "{err:#}");

    // The first incarnation was joined and its file is complete
    let records = read_records(&vector_path(dir.path(), 0, "bb"));
    assert_eq!(records.last(), Some(&Record::End { cumulative: 30, slices: 1 }));
    assert!(records.iter().any(|record| matches!(record, Record::Block { count: 10, .. })));
}

#[test]
fn test_replay_external_emission() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = activate(ProfilerConfig { emit_vectors: false, ..config(dir.path(), 10) });
    let trace = "\
start 0
block 0 0x100 0x108 12 6 0
block 0 0x100 0x108 12 6 0
block 0 0x200 0x204 8 2 0
finish 0
";
    let summaries = replay(&profiler, parse_trace(trace).unwrap(), 8).unwrap();
    assert_eq!(summaries[0].slices, 1);

    let records = read_records(&vector_path(dir.path(), 0, "bb"));
    // The driver emits the pending vector at the next region's start
    assert_eq!(markers(&records), vec![(0x200, 1, 12)]);
}
