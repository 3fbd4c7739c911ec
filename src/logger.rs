//! Diagnostics output for the solver.
//!
//! The crate logs through `tracing`; this module installs a subscriber
//! wired to the solver's own configuration record. The `print_level` of a
//! [`SchurOptions`](crate::linalg::SchurOptions) is the default directive
//! (`RUST_LOG` still overrides per module), timestamps are omitted so runs
//! diff cleanly, and worker threads are named in the output because the
//! factorization phases of interest happen inside parallel regions.

use tracing::Level;

use crate::linalg::SchurOptions;

/// Install a subscriber honoring the solver configuration.
///
/// # Example
/// ```no_run
/// use strata_solver::{init_logging, SchurOptions};
///
/// let options = SchurOptions::with_partition(vec![1, 2, 0]);
/// init_logging(&options);
/// tracing::info!("solver configured");
/// ```
pub fn init_logging(options: &SchurOptions) {
    init_logging_with_level(options.print_level)
}

/// Install a subscriber with an explicit default level.
///
/// `RUST_LOG` overrides the default, e.g. `RUST_LOG=strata_solver=trace`
/// to watch the factorization phases of this crate alone.
pub fn init_logging_with_level(default_level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .compact()
        .without_time()
        .with_target(true)
        .with_thread_names(true)
        .init();
}
