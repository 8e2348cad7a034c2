// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Console reporting via tracing.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives for the console subscriber, e.g. `debug` or `robust_ipc=trace`.
pub const LOG_ENV: &str = "ROBUST_IPC_LOG";

/// Install the stderr subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
