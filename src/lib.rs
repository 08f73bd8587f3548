#![forbid(unsafe_code)]

//! source_index_watcher (siw) — indexing substrate for a code-analysis
//! service.
//!
//! A long-running worker that observes configured watch directories,
//! discovers the projects declared inside them (`projectid` markers),
//! detects added, modified, and deleted source files by periodic scanning,
//! and enqueues the changes in a shared catalog for downstream analyzers:
//! 1. **Discover** — enumerate projects per watched root, enforcing the
//!    one-marker-per-branch and unique-id invariants
//! 2. **Scan** — walk the tree through the ignore policy, attributing every
//!    surviving file to its owning project
//! 3. **Delta & queue** — compare against catalog state per project and
//!    batch the resulting new/changed/deleted work into the catalog

pub mod catalog;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod project;
pub mod scanner;
pub mod watcher;

pub mod prelude;
