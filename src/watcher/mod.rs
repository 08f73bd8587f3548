//! Change-detection pipeline: per-root locks, the scan/catalog delta, and
//! the batched change queue.

pub mod delta;
pub mod locks;
pub mod queue;
