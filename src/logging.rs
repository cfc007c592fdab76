use tracing_subscriber::EnvFilter;

const FALLBACK_FILTER: &str = "warn";

/// Installs the global `tracing` subscriber, writing to stderr. `RUST_LOG` wins over
/// `default_filter`; an unparsable filter falls back to `warn`. Returns false when a
/// subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::init_logging;

    #[test]
    fn second_init_is_harmless() {
        init_logging("not a [valid filter");
        assert!(!init_logging("debug"));
    }
}
