//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use vox_relay_core::config::LoggingConfig;

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the config.
fn build_filter(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let mut filter = EnvFilter::new(level);
    for directive in &logging.filters {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid log filter '{directive}': {e}"))?,
        );
    }
    Ok(filter)
}

pub fn init(logging: Option<&LoggingConfig>, verbose: bool) -> anyhow::Result<()> {
    let defaults = LoggingConfig::default();
    let logging = logging.unwrap_or(&defaults);
    let filter = build_filter(logging, verbose)?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = logging.format == "json";
    let stdout = logging.output == "stdout";

    let result = match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).try_init(),
        (true, false) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, true) => builder.with_writer(std::io::stdout).try_init(),
        (false, false) => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
