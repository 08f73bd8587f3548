//! Project model: identity markers and discovery within watched directories.

pub mod discovery;
pub mod identity;
