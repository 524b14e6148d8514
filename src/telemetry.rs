//! Telemetry setup (SPEC_FULL.md C9), a `tracing-subscriber`-based stand-in for the teacher's own
//! `astria-telemetry` crate: a builder gathered from [`crate::config::Config`] that installs a
//! global `tracing` subscriber exactly once, either as pretty-printed text (for a human at a
//! terminal) or structured JSON (the default, for log aggregation).

use tracing_subscriber::{
    fmt,
    util::SubscriberInitExt as _,
    EnvFilter,
};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to parse log filter directives {directives:?}")]
    BadFilterDirectives {
        directives: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled(String),
}

/// Builder for the process-wide subscriber, mirroring the teacher's
/// `telemetry::configure().set_force_stdout(..).set_pretty_print(..).filter_directives(..)`
/// chain.
#[derive(Debug, Default)]
pub struct Builder {
    filter_directives: String,
    pretty_print: bool,
    force_stdout: bool,
}

#[must_use]
pub fn configure() -> Builder {
    Builder::default()
}

impl Builder {
    #[must_use]
    pub fn filter_directives(mut self, directives: &str) -> Self {
        self.filter_directives = directives.to_string();
        self
    }

    #[must_use]
    pub fn set_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    #[must_use]
    pub fn set_force_stdout(mut self, force_stdout: bool) -> Self {
        self.force_stdout = force_stdout;
        self
    }

    /// Installs the global subscriber. Returns a guard; dropping it is inert, kept only so call
    /// sites can hold it for the lifetime of `main` the same way the teacher's `_telemetry_guard`
    /// does for its flushable exporters.
    pub fn try_init(self) -> Result<TelemetryGuard, TelemetryError> {
        let filter = EnvFilter::try_new(&self.filter_directives).map_err(|source| {
            TelemetryError::BadFilterDirectives {
                directives: self.filter_directives.clone(),
                source,
            }
        })?;

        if self.pretty_print {
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .pretty()
                .with_writer(std::io::stdout)
                .finish()
                .try_init()
        } else if self.force_stdout {
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .with_writer(std::io::stdout)
                .finish()
                .try_init()
        } else {
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .finish()
                .try_init()
        }
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

        Ok(TelemetryGuard)
    }
}

/// Held for the lifetime of `main` so the subscriber stays installed.
#[must_use]
pub struct TelemetryGuard;
