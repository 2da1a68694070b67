//! Logging initialization for the CLI.
//!
//! Library crates only emit `tracing` events; the subscriber lives here.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose events `-v` raises.
const OWN_TARGETS: &[&str] = &["vela_core", "vela_cli"];

/// Filter for `verbosity`: 0 = warnings only, 1 = INFO for vela, 2+ = DEBUG for vela.
///
/// `RUST_LOG` replaces the `warn` base; the verbosity directives still apply on top.
fn filter(verbosity: u8) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let level = match verbosity {
        0 => return filter,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    for target in OWN_TARGETS {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize the global subscriber, writing to stderr.
///
/// `json` switches to one JSON object per line:
/// ```json
/// {"timestamp":"...","level":"INFO","fields":{"message":"pre-bundle finished","bundled":3},"target":"vela_core::dev::prebundle"}
/// ```
pub fn init(verbosity: u8, json: bool) {
    let subscriber = tracing_subscriber::registry().with(filter(verbosity));

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_filter_is_warn() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter(0).to_string(), "warn");
    }

    #[test]
    #[serial]
    fn test_verbosity_raises_own_crates() {
        std::env::remove_var("RUST_LOG");
        let rendered = filter(2).to_string().to_lowercase();
        assert!(rendered.contains("vela_core=debug"));
        assert!(rendered.contains("vela_cli=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    #[serial]
    fn test_rust_log_overrides_base() {
        std::env::set_var("RUST_LOG", "error");
        let rendered = filter(1).to_string().to_lowercase();
        std::env::remove_var("RUST_LOG");
        assert!(rendered.contains("error"));
        assert!(rendered.contains("vela_core=info"));
    }
}
