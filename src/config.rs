//! Process configuration (spec.md §4.8 / SPEC_FULL.md C8), loaded the same way the teacher's
//! `config.rs` loads its own: environment variables merged through [`figment`] into a
//! `deny_unknown_fields` struct, so a typo'd or stale env var fails startup instead of being
//! silently ignored.

use figment::{
    providers::Env,
    Figment,
};
use serde::{
    Deserialize,
    Serialize,
};

pub fn get() -> Result<Config, figment::Error> {
    Config::from_environment("ROLLUP_SEQUENCER_")
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Chain id reported by the configured chain source; cross-checked at startup (spec.md
    /// §4.5.1, §8 property).
    pub chain_id: u64,

    /// Number of bridge-call slots per rollup (`K` / `NUM_BRIDGE_CALLS_PER_BLOCK`), fixed for the
    /// lifetime of a deployment (spec.md §3, §9).
    pub bridge_calls_per_block: u32,

    /// Path to the bundled account-data snapshot used on a from-scratch deployment, or empty to
    /// start from a fully empty state (spec.md §4.5.1).
    pub init_account_data_file: String,

    /// Minimum number of pending txs the pipeline accumulates before it is willing to publish a
    /// rollup early (spec.md §4.4).
    pub min_txs_per_rollup: usize,

    /// Upper bound on pending txs included in one rollup (spec.md §4.4, §3 "rollup size").
    pub max_txs_per_rollup: usize,

    /// log directive passed to the `tracing` env filter.
    pub log: String,

    /// Disables the metrics exporter entirely; useful for local development and tests.
    pub no_metrics: bool,

    /// Address the metrics exporter listens on, when enabled.
    pub metrics_http_listener_addr: String,

    /// Forces log output to stdout even when a terminal is not attached.
    pub force_stdout: bool,

    /// Pretty-prints log output instead of emitting structured JSON.
    pub pretty_print: bool,
}

impl Config {
    fn from_environment(envar_prefix: &str) -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Env::prefixed("RUST_").split("_").only(&["log"]))
            .merge(Env::prefixed(envar_prefix))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::Config;

    fn populate_minimal_environment(jail: &mut Jail, prefix: &str) {
        jail.set_env(format!("{prefix}CHAIN_ID"), "1");
        jail.set_env(format!("{prefix}BRIDGE_CALLS_PER_BLOCK"), "4");
        jail.set_env(format!("{prefix}INIT_ACCOUNT_DATA_FILE"), "");
        jail.set_env(format!("{prefix}MIN_TXS_PER_ROLLUP"), "1");
        jail.set_env(format!("{prefix}MAX_TXS_PER_ROLLUP"), "32");
        jail.set_env(format!("{prefix}LOG"), "info");
        jail.set_env(format!("{prefix}NO_METRICS"), "false");
        jail.set_env(format!("{prefix}METRICS_HTTP_LISTENER_ADDR"), "127.0.0.1:9000");
        jail.set_env(format!("{prefix}FORCE_STDOUT"), "false");
        jail.set_env(format!("{prefix}PRETTY_PRINT"), "false");
    }

    #[test]
    fn minimal_environment_is_accepted() {
        Jail::expect_with(|jail| {
            populate_minimal_environment(jail, "TESTTEST_");
            Config::from_environment("TESTTEST_").unwrap();
            Ok(())
        });
    }

    #[test]
    #[should_panic]
    fn extra_env_vars_are_rejected() {
        Jail::expect_with(|jail| {
            populate_minimal_environment(jail, "TESTTEST_");
            jail.set_env("TESTTEST_FOOBAR", "baz");
            Config::from_environment("TESTTEST_").unwrap();
            Ok(())
        });
    }
}
