/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Install the global subscriber for the disksum binary.
///
/// Events go to `stdout`, next to the tool's own console diagnostics. Worker
/// threads are named (`hasher-0`, `hasher-1`, ...), so thread names are
/// included to attribute per-worker lines; module targets are dropped —
/// everything comes from this one binary. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_subscriber() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stdout);

    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

/// Subscriber for tests: same shape as [`init_subscriber`], but captured by
/// the test harness and installed only for the current thread so concurrent
/// tests do not fight over the global dispatcher.
pub fn init_test_subscriber() -> tracing::subscriber::DefaultGuard {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_test_writer();

    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn worker_style_events_render() {
        let _guard = init_test_subscriber();
        info!(blocks = 16u64, "worker complete");
        warn!("Desired thread count greater than available cores.");
    }
}
