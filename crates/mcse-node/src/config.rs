//! Node configuration.

use crate::error::{NodeError, Result};
use mcse_consensus::EngineConfig;
use mcse_core::{Address, WitnessSet, COUNT_WITNESSES, MAJORITY_OF_WITNESSES};
use mcse_graph::TraversalBudget;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for a [`Node`](crate::Node).
///
/// Every field has a default, so a JSON document only needs the keys it
/// overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Witness addresses.
    pub witnesses: Vec<String>,
    /// Distinct witnesses needed for a witnessed level.
    pub majority_of_witnesses: usize,
    /// First MCI evaluated under the current stability era.
    pub era_upgrade_mci: u64,
    /// Budget for acquiring the write lock plus one write (in milliseconds).
    pub write_timeout_ms: u64,
    /// Total budget for archiving one unit and its descendants (in milliseconds).
    pub archive_timeout_ms: u64,
    /// Units removed per write lock acquisition while archiving.
    pub archive_batch_size: usize,
    /// Visit cap for a single DAG traversal.
    pub traversal_max_visits: usize,
    /// Visits between deadline checks and cooperative yields.
    pub traversal_check_every: usize,
    /// Run a stability pass after every accepted unit.
    pub stabilize_on_ingest: bool,
    /// Compare mirror and storage before every commit.
    pub verify_mirror_on_commit: bool,
    /// Delay before retrying a payout calculator that failed (in milliseconds).
    pub payout_retry_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            witnesses: (0..COUNT_WITNESSES)
                .map(|i| format!("witness-{}", i))
                .collect(),
            majority_of_witnesses: MAJORITY_OF_WITNESSES,
            era_upgrade_mci: 0,
            write_timeout_ms: 3000,
            archive_timeout_ms: 30_000,
            archive_batch_size: 32,
            traversal_max_visits: 1_000_000,
            traversal_check_every: 100,
            stabilize_on_ingest: true,
            verify_mirror_on_commit: true,
            payout_retry_ms: 500,
        }
    }
}

impl NodeConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.witnesses.is_empty() {
            return Err(NodeError::Config("witness list is empty".to_string()));
        }
        let distinct: HashSet<&String> = self.witnesses.iter().collect();
        if distinct.len() != self.witnesses.len() {
            return Err(NodeError::Config("witness list has duplicates".to_string()));
        }
        let count = self.witnesses.len();
        if self.majority_of_witnesses > count || self.majority_of_witnesses * 2 <= count {
            return Err(NodeError::Config(format!(
                "majority {} is not a strict majority of {} witnesses",
                self.majority_of_witnesses, count
            )));
        }
        if self.write_timeout_ms == 0 || self.archive_timeout_ms == 0 || self.payout_retry_ms == 0 {
            return Err(NodeError::Config("timeouts must be positive".to_string()));
        }
        if self.archive_batch_size == 0 {
            return Err(NodeError::Config("archive batch size must be positive".to_string()));
        }
        if self.traversal_max_visits == 0 || self.traversal_check_every == 0 {
            return Err(NodeError::Config("traversal limits must be positive".to_string()));
        }
        Ok(())
    }

    pub fn witness_set(&self) -> WitnessSet {
        WitnessSet::new(self.witnesses.iter().map(Address::new))
            .with_majority(self.majority_of_witnesses)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_millis(self.archive_timeout_ms)
    }

    pub fn payout_retry(&self) -> Duration {
        Duration::from_millis(self.payout_retry_ms)
    }

    /// The engine settings derived from this configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        self.validate()?;
        let mut engine = EngineConfig::default()
            .with_witnesses(self.witness_set())
            .with_era_upgrade_mci(self.era_upgrade_mci)
            .with_traversal(TraversalBudget::new(
                self.traversal_max_visits,
                self.traversal_check_every,
            ))
            .with_stabilize_on_ingest(self.stabilize_on_ingest);
        engine.archive_batch_size = self.archive_batch_size;
        engine.verify_mirror_on_commit = self.verify_mirror_on_commit;
        Ok(engine)
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn witnesses<I, A>(mut self, witnesses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.config.witnesses = witnesses.into_iter().map(Into::into).collect();
        self
    }

    pub fn majority_of_witnesses(mut self, majority: usize) -> Self {
        self.config.majority_of_witnesses = majority;
        self
    }

    pub fn era_upgrade_mci(mut self, mci: u64) -> Self {
        self.config.era_upgrade_mci = mci;
        self
    }

    pub fn write_timeout(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn archive_timeout(mut self, ms: u64) -> Self {
        self.config.archive_timeout_ms = ms;
        self
    }

    pub fn archive_batch_size(mut self, size: usize) -> Self {
        self.config.archive_batch_size = size;
        self
    }

    pub fn traversal_limits(mut self, max_visits: usize, check_every: usize) -> Self {
        self.config.traversal_max_visits = max_visits;
        self.config.traversal_check_every = check_every;
        self
    }

    pub fn stabilize_on_ingest(mut self, enabled: bool) -> Self {
        self.config.stabilize_on_ingest = enabled;
        self
    }

    pub fn verify_mirror_on_commit(mut self, enabled: bool) -> Self {
        self.config.verify_mirror_on_commit = enabled;
        self
    }

    pub fn payout_retry(mut self, ms: u64) -> Self {
        self.config.payout_retry_ms = ms;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
