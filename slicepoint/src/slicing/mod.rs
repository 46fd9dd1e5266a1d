//! Slice boundary detection
//!
//! One [`SliceController`] per thread counts instructions down to the next
//! boundary. [`EmissionPolicy`] decides what the thread profiler does when a
//! boundary is reached.

pub mod controller;

pub use controller::{EmissionPolicy, FirstMarker, SliceController, SlicePhase};
