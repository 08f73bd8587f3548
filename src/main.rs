//! siw — source index watcher CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    // Worker policy: this process never spawns a catalog helper; it only
    // opens a client handle. The flag must be in place before any adapter
    // is constructed, and main() is still single-threaded here.
    // SAFETY: no other threads exist yet, so mutating the environment
    // cannot race a concurrent getenv.
    unsafe {
        std::env::set_var(source_index_watcher::catalog::NO_SPAWN_ENV, "1");
    }

    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("siw: {e}");
        std::process::exit(1);
    }
}
