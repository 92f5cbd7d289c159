//! Drives a network through its blocks and records what happened.
//!
//! Blocks run in ascending order from 0. Each block applies its scheduled
//! actions, then (after block 0) advances the network one step. Progress and
//! snapshots are written on the log-interval cadence plus the first and last
//! block. Cancellation is honoured between blocks, never inside one.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::invariants::{check_network, check_participants};
use crate::logging::{
    log, log_invariant_violation, log_run_metrics, log_run_status, log_snapshot, obj, v_str, Domain,
    Level, ProfileScope,
};
use crate::network::{Network, NetworkParams};
use crate::scenario;
use crate::storage::{RunStatus, SnapshotSink};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sim_id: String,
    pub status: RunStatus,
    pub blocks_processed: u64,
    pub snapshots_written: u64,
    pub actions_applied: u64,
    pub actions_rejected: u64,
    pub actions_skipped: u64,
    pub invariant_violations: u64,
    /// Hash of the last snapshot written, if any
    pub final_state_hash: Option<String>,
}

impl RunSummary {
    fn new(sim_id: &str) -> Self {
        Self {
            sim_id: sim_id.to_string(),
            status: RunStatus::Running,
            blocks_processed: 0,
            snapshots_written: 0,
            actions_applied: 0,
            actions_rejected: 0,
            actions_skipped: 0,
            invariant_violations: 0,
            final_state_hash: None,
        }
    }
}

/// Whether `block` gets a snapshot.
pub fn is_snapshot_block(block: u64, blocks: u64, log_interval: u64) -> bool {
    block % log_interval == 0 || block + 1 == blocks
}

/// Whether progress is recorded after `block`.
pub fn is_progress_block(block: u64, blocks: u64, log_interval: u64) -> bool {
    block == 0 || is_snapshot_block(block, blocks, log_interval)
}

/// Raise the cancel flag. Returns true when it was already raised, i.e. the
/// caller is seeing a repeated request.
pub fn request_cancel(cancel: &AtomicBool) -> bool {
    cancel.swap(true, Ordering::SeqCst)
}

pub struct Runner<S: SnapshotSink> {
    store: S,
    check_invariants: bool,
}

impl<S: SnapshotSink> Runner<S> {
    pub fn new(store: S, check_invariants: bool) -> Self {
        Self { store, check_invariants }
    }

    pub fn from_config(store: S, config: &Config) -> Self {
        Self::new(store, config.check_invariants)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run a registered scenario under an existing simulation id.
    pub fn run(&mut self, scenario_name: &str, sim_id: &str, cancel: &AtomicBool) -> Result<RunSummary> {
        let Some(entry) = scenario::find(scenario_name) else {
            self.fail(sim_id, &format!("unknown scenario '{}'", scenario_name));
            return Err(anyhow!(
                "unknown scenario '{}' (available: {})",
                scenario_name,
                scenario::names().join(", ")
            ));
        };
        self.run_params(entry.params(), sim_id, cancel)
    }

    pub fn run_params(
        &mut self,
        params: NetworkParams,
        sim_id: &str,
        cancel: &AtomicBool,
    ) -> Result<RunSummary> {
        let network = match Network::initialize(params) {
            Ok(network) => network,
            Err(err) => {
                self.fail(sim_id, &err.to_string());
                return Err(anyhow!("invalid network configuration: {}", err));
            }
        };
        match self.drive(network, sim_id, cancel) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                self.fail(sim_id, &err.to_string());
                Err(err)
            }
        }
    }

    fn fail(&mut self, sim_id: &str, msg: &str) {
        if let Err(err) = self.store.update_status(sim_id, RunStatus::Failed) {
            log(
                Level::Error,
                Domain::Storage,
                "status_write_failed",
                obj(&[("sim_id", v_str(sim_id)), ("msg", v_str(&err.to_string()))]),
            );
        }
        log_run_status(sim_id, RunStatus::Failed.as_str(), None, msg);
    }

    fn drive(&mut self, mut network: Network, sim_id: &str, cancel: &AtomicBool) -> Result<RunSummary> {
        let _profile = ProfileScope::with_context("run", &[("sim_id", v_str(sim_id))]);
        let blocks = network.blocks();
        let interval = network.log_interval();

        self.store.update_config(sim_id, blocks, network.tao_supply())?;
        self.store.update_status(sim_id, RunStatus::Running)?;
        log_run_status(sim_id, RunStatus::Running.as_str(), Some(0), "");

        let mut summary = RunSummary::new(sim_id);
        for block in 0..blocks {
            if cancel.load(Ordering::SeqCst) {
                self.store.update_status(sim_id, RunStatus::Interrupted)?;
                log_run_status(sim_id, RunStatus::Interrupted.as_str(), Some(block), "cancelled");
                summary.status = RunStatus::Interrupted;
                self.finish_metrics(&summary);
                return Ok(summary);
            }

            for outcome in network.apply_actions_for_block(block) {
                match outcome.result {
                    Ok(_) => summary.actions_applied += 1,
                    Err(err) if err.is_skip() => summary.actions_skipped += 1,
                    Err(_) => summary.actions_rejected += 1,
                }
            }
            if block != 0 {
                network.advance_block(block);
            }
            summary.blocks_processed += 1;

            if self.check_invariants {
                summary.invariant_violations += audit_invariants(&network, block);
            }
            if is_progress_block(block, blocks, interval) {
                self.store.update_progress(sim_id, block)?;
            }
            if is_snapshot_block(block, blocks, interval) {
                let snapshot = network.snapshot(block);
                self.store.store_snapshot(sim_id, &snapshot)?;
                let hash = snapshot.state_hash();
                log_snapshot(sim_id, block, &hash);
                summary.snapshots_written += 1;
                summary.final_state_hash = Some(hash);
            }
        }

        self.store.update_progress(sim_id, blocks - 1)?;
        self.store.update_status(sim_id, RunStatus::Completed)?;
        log_run_status(sim_id, RunStatus::Completed.as_str(), Some(blocks - 1), "");
        summary.status = RunStatus::Completed;
        self.finish_metrics(&summary);
        Ok(summary)
    }

    fn finish_metrics(&self, summary: &RunSummary) {
        log_run_metrics(
            &summary.sim_id,
            summary.blocks_processed,
            summary.snapshots_written,
            summary.actions_applied,
            summary.actions_rejected,
        );
    }
}

fn audit_invariants(network: &Network, block: u64) -> u64 {
    let mut count = 0;
    for (pool_id, violation) in check_network(network) {
        log_invariant_violation(block, pool_id, &violation.msg);
        count += 1;
    }
    for (participant_id, violation) in check_participants(network) {
        log(
            Level::Warn,
            Domain::Audit,
            "invariant_violation",
            obj(&[
                ("block", json!(block)),
                ("participant_id", json!(participant_id)),
                ("msg", v_str(&violation.msg)),
            ]),
        );
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use crate::storage::Progress;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// In-memory sink recording every write.
    #[derive(Default)]
    struct RecordingSink {
        statuses: Vec<RunStatus>,
        progress: Vec<u64>,
        snapshots: BTreeMap<u64, Snapshot>,
        config: Option<(u64, f64)>,
        cancel_after_progress: Option<(usize, Arc<AtomicBool>)>,
    }

    impl SnapshotSink for RecordingSink {
        fn create_simulation(&mut self, _name: &str) -> Result<String> {
            Ok("sim-test".to_string())
        }

        fn update_status(&mut self, _sim_id: &str, status: RunStatus) -> Result<()> {
            self.statuses.push(status);
            Ok(())
        }

        fn update_config(&mut self, _sim_id: &str, blocks: u64, tao_supply: f64) -> Result<()> {
            self.config = Some((blocks, tao_supply));
            Ok(())
        }

        fn update_progress(&mut self, _sim_id: &str, block: u64) -> Result<()> {
            self.progress.push(block);
            if let Some((after, flag)) = &self.cancel_after_progress {
                if self.progress.len() >= *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        }

        fn store_snapshot(&mut self, _sim_id: &str, snapshot: &Snapshot) -> Result<()> {
            self.snapshots.insert(snapshot.block, snapshot.clone());
            Ok(())
        }

        fn progress(&self, _sim_id: &str) -> Result<Option<Progress>> {
            Ok(None)
        }
    }

    #[test]
    fn test_cadence_predicates() {
        assert!(is_snapshot_block(0, 100, 10));
        assert!(is_snapshot_block(90, 100, 10));
        assert!(is_snapshot_block(99, 100, 10));
        assert!(!is_snapshot_block(95, 100, 10));
        assert!(is_progress_block(0, 100, 7));
        assert!(!is_progress_block(1, 100, 7));
    }

    #[test]
    fn test_repeated_cancel_detected() {
        let cancel = AtomicBool::new(false);
        assert!(!request_cancel(&cancel));
        assert!(cancel.load(Ordering::SeqCst));
        assert!(request_cancel(&cancel));
    }

    #[test]
    fn test_template_run_cadence() {
        let mut runner = Runner::new(RecordingSink::default(), true);
        let cancel = AtomicBool::new(false);
        let summary = runner.run("template", "sim-test", &cancel).unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.blocks_processed, 100);
        assert_eq!(summary.actions_applied, 1);
        assert_eq!(summary.invariant_violations, 0);
        // blocks 0, 10, ..., 90 and the last block 99
        assert_eq!(summary.snapshots_written, 11);

        let sink = runner.into_store();
        assert_eq!(sink.config, Some((100, 10_000.0)));
        assert_eq!(sink.statuses, vec![RunStatus::Running, RunStatus::Completed]);
        let blocks: Vec<u64> = sink.snapshots.keys().copied().collect();
        assert_eq!(blocks, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 99]);
        assert_eq!(sink.progress.last(), Some(&99));
    }

    #[test]
    fn test_unknown_scenario_fails() {
        let mut runner = Runner::new(RecordingSink::default(), false);
        let cancel = AtomicBool::new(false);
        assert!(runner.run("missing", "sim-test", &cancel).is_err());
        assert_eq!(runner.store().statuses, vec![RunStatus::Failed]);
    }

    #[test]
    fn test_bad_params_fail_before_any_block() {
        let mut params = scenario::template();
        params.n_steps = 0;
        let mut runner = Runner::new(RecordingSink::default(), false);
        let cancel = AtomicBool::new(false);
        assert!(runner.run_params(params, "sim-test", &cancel).is_err());
        let sink = runner.into_store();
        assert_eq!(sink.statuses, vec![RunStatus::Failed]);
        assert!(sink.snapshots.is_empty());
        assert!(sink.config.is_none());
    }

    #[test]
    fn test_cancel_between_blocks() {
        let cancel = Arc::new(AtomicBool::new(false));
        let sink = RecordingSink {
            cancel_after_progress: Some((3, cancel.clone())),
            ..Default::default()
        };
        let mut runner = Runner::new(sink, false);
        let summary = runner.run("template", "sim-test", &cancel).unwrap();

        assert_eq!(summary.status, RunStatus::Interrupted);
        // progress after blocks 0, 10, 20; the flag is seen before block 21
        assert_eq!(summary.blocks_processed, 21);
        let sink = runner.into_store();
        assert_eq!(sink.statuses.last(), Some(&RunStatus::Interrupted));
        assert_eq!(sink.snapshots.len(), 3);
    }
}
