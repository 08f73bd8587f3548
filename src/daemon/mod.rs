//! Worker process: signal handling and the scan-cycle runner.

#[cfg(all(feature = "daemon", feature = "sqlite"))]
pub mod runner;
#[cfg(feature = "daemon")]
pub mod signals;
