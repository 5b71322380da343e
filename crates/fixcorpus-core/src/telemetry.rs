//! Log subscriber setup for the `fixcorpus` binary.
//!
//! `-v` raises the level of the fixcorpus crates only; HTTP and runtime
//! crates stay at `warn` unless `RUST_LOG` names them. Output goes to
//! stderr so `export` can stream records on stdout.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Layer};

const OWN_TARGETS: &[&str] = &["fixcorpus", "fixcorpus_core", "fixcorpus_oracle", "fixcorpus_store"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, with the span stack
    Json,
}

/// Map a `-v` count to the level of the fixcorpus crates.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(format: LogFormat, level: Level) -> Result<(), TryInitError> {
    let layer = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer.with_filter(filter(level)))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for_verbosity(0), Level::WARN);
        assert_eq!(level_for_verbosity(1), Level::INFO);
        assert_eq!(level_for_verbosity(7), Level::TRACE);
    }

    #[test]
    fn verbosity_only_raises_own_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,fixcorpus=debug,fixcorpus_core=debug,fixcorpus_oracle=debug,fixcorpus_store=debug"
        );
        assert!(EnvFilter::try_new(default_directives(Level::TRACE)).is_ok());
    }

    #[test]
    fn second_init_is_an_error() {
        let _ = init_tracing(LogFormat::Text, Level::WARN);
        assert!(init_tracing(LogFormat::Json, Level::INFO).is_err());
    }
}
