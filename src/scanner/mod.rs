//! Directory scanner: ignore policy and the per-root file walk.

pub mod ignore;
pub mod walk;
