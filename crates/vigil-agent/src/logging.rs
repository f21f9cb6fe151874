//! Tracing setup from the `log` config section.

use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LogSection;

/// Initialize the global subscriber. `RUST_LOG` wins over the config level;
/// `--verbose` forces debug.
pub fn init(log: &LogSection, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let writer = match log.output.as_str() {
        "" | "stdout" => BoxMakeWriter::new(std::io::stdout),
        "stderr" => BoxMakeWriter::new(std::io::stderr),
        path => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("failed to open log file {path}: {e}"))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
