//! Diagnostic tracing for the bridge.
//!
//! Stdout carries child output, so diagnostics always go to stderr.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the stderr subscriber.
///
/// `RUST_LOG` selects the filter, e.g.
/// `RUST_LOG=pipebridge=debug pipebridge exec -- cat`. A second call is a
/// no-op, so embedding programs that already installed a subscriber keep it.
pub fn init() {
    let installed = tracing_subscriber::registry()
        .with(filter_from(std::env::var("RUST_LOG").ok().as_deref()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_bad_directives_fall_back_to_default() {
        assert_eq!(filter_from(None).to_string(), DEFAULT_FILTER);
        assert_eq!(filter_from(Some("pipebridge=loud")).to_string(), DEFAULT_FILTER);
    }

    #[test]
    fn explicit_directives_are_used() {
        assert_eq!(
            filter_from(Some("pipebridge=debug")).to_string(),
            "pipebridge=debug"
        );
    }

    #[test]
    fn init_twice_is_harmless() {
        init();
        init();
    }
}
