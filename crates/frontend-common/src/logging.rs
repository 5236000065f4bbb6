//! Browser console logging

use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_web::MakeWebConsoleWriter;

/// Route `tracing` output to the browser console and install the panic hook
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(level: LevelFilter) {
    console_error_panic_hook::set_once();

    // No clock in the browser sandbox, so no timestamps
    let console = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .without_time()
        .with_writer(MakeWebConsoleWriter::new());

    if tracing_subscriber::registry()
        .with(level)
        .with(console)
        .try_init()
        .is_err()
    {
        tracing::debug!("Logging already initialized");
    }
}
