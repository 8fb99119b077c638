//! Tracing setup for the command-line front end.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "INKLING_LOG";

/// The filter used when `INKLING_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "inkling=debug,warn"
    } else {
        "inkling=warn"
    }
}

/// Install a stderr subscriber. Does nothing if one is already set.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);
    let installed = tracing_subscriber::registry().with(filter).with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(verbose, "tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert!(default_directive(true).contains("debug"));
        assert_eq!(default_directive(false), "inkling=warn");
        // A second call must not panic.
        init(false);
        init(true);
    }
}
