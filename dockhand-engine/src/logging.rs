use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Overrides the verbosity-derived filter, e.g. `DOCKHAND_LOG=dockhand_engine=trace`.
pub const LOG_ENV: &str = "DOCKHAND_LOG";

/// Default filter directive for a `-v` count.
#[must_use]
pub const fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs the stderr fmt subscriber. Does nothing if one is already set.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0), "info");
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(4), "trace");
    }

    #[test]
    fn init_is_idempotent() {
        init(0);
        init(2);
        tracing::info!("logging initialised twice");
    }
}
