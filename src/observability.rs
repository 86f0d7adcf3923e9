//! Logging for the bridge and the archive engine.
//!
//! Everything goes through the `log` facade. [`init_logging`] installs an
//! `env_logger` backend once per process; callers that already run a logger
//! simply never call it.
//!
//! `log_metric!` emits a structured key-value line at debug level. It is
//! compiled out of release builds.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Once;

use log::LevelFilter;

use crate::error::Result;

/// Logs a structured key-value metric line, only in debug builds.
///
/// # Example
/// ```
/// use zim_bridge::log_metric;
/// let call = 4;
/// log_metric!("event"="bridge_submit", "bridge"="feed", "call"=&call);
/// ```
#[macro_export]
macro_rules! log_metric {
    ($($key:literal = $value:expr),+ $(,)?) => {
        #[cfg(debug_assertions)]
        {
            let mut parts = Vec::new();
            $(
                parts.push(format!("\"{}\": \"{}\"", $key, $value));
            )+

            log::debug!("ZIM_BRIDGE_METRIC: {{ {} }}", parts.join(", "));
        }
    };
}

static INIT_LOGGER: Once = Once::new();

/// Installs a `[LEVEL] message` logger at `level`, optionally appending to `log_file`.
///
/// Only the first call in a process has any effect.
pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(|| {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(level);

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}
