#![allow(unused)]

//! A render dependency graph: passes declare the resources they touch, the graph culls
//! what doesn't contribute to an output, schedules async compute and state transitions,
//! and runs the pass bodies against a [`graph::CommandSink`].

pub mod arena;
pub mod graph;
pub mod pool;
pub mod tracing;
pub mod util;
