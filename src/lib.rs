//! # Rollup Sequencer
//! The world-state synchronizer and rollup-construction pipeline coordinator for a zero-knowledge
//! rollup sequencer. Four append-only Merkle trees (DATA, NULL, ROOT, DEFI) track rollup state;
//! a pipeline assembles pending transactions into rollups and publishes them, while the
//! synchronizer reconciles each settled block against the sequencer's own staged state, replays
//! history after a restart, and serves clients a cache of settled blocks to catch up from.
pub mod block_cache;
pub mod block_queue;
pub mod chain_source;
pub mod config;
pub mod init_state;
pub mod metrics;
pub mod note_algorithms;
pub mod operator;
pub mod pipeline;
pub mod relational_store;
pub mod service;
pub mod synchronizer;
pub mod telemetry;
pub mod tree_store;
pub mod types;

use std::fmt::Write as _;

pub use config::Config;
pub use operator::SynchronizerHandle;
pub use service::{
    Handle,
    Service,
};
pub use synchronizer::Synchronizer;

/// Installs an eyre error handler to print display-formatted errors.
///
/// # Errors
/// Returns an error if the error handler could not be installed. See [`eyre::set_hook`] for more
/// information.
pub fn install_error_handler() -> Result<(), eyre::InstallError> {
    eyre::set_hook(Box::new(|_| Box::new(ErrorHandler)))?;
    Ok(())
}

struct ErrorHandler;

impl eyre::EyreHandler for ErrorHandler {
    fn debug(
        &self,
        mut error: &(dyn std::error::Error + 'static),
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        f.write_char('{')?;
        f.write_fmt(format_args!("\"0\": \"{error}\""))?;
        let mut level: u32 = 1;
        while let Some(source) = error.source() {
            f.write_fmt(format_args!(", \"{level}\": \"{source}\""))?;
            level += 1;
            error = source;
        }
        f.write_char('}')?;
        Ok(())
    }

    fn display(
        &self,
        mut error: &(dyn std::error::Error + 'static),
        f: &mut core::fmt::Formatter<'_>,
    ) -> core::fmt::Result {
        f.write_char('{')?;
        f.write_fmt(format_args!("\"0\": \"{error}\""))?;
        let mut level: u32 = 1;
        while let Some(source) = error.source() {
            f.write_fmt(format_args!(", \"{level}\": \"{source}\""))?;
            level += 1;
            error = source;
        }
        f.write_char('}')?;
        Ok(())
    }
}
