//! One pass of scheduled maintenance: statuses, settlements, analytics.

use crate::analytics::rollup;
use crate::config::EngineConfig;
use crate::distribution::{DistributionEngine, DistributionOutcome, WinnerPredicate};
use crate::error::EngineResult;
use crate::lifecycle::{advance_statuses, StatusTransition};
use crate::parser::community::CommunityStatus;
use crate::parser::ledger::DistributionStatus;
use crate::progress::{ProgressScorer, ProgressWeights};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub transitions: Vec<StatusTransition>,
    pub distributions: Vec<DistributionOutcome>,
    pub snapshots: usize,
    /// `community_id: error` for communities skipped this pass
    pub failures: Vec<String>,
}

pub struct Sweeper<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    config: &'a EngineConfig,
    predicate: &'a dyn WinnerPredicate,
}

impl<'a, S: LedgerStore + ?Sized> Sweeper<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig, predicate: &'a dyn WinnerPredicate) -> Self {
        Self {
            store,
            config,
            predicate,
        }
    }

    /// Failures on one community are logged and reported but do not stop
    /// the pass; only a failure to list communities aborts it.
    pub fn run_once(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let mut report = SweepReport {
            transitions: advance_statuses(self.store, now, self.config.max_cas_retries)?,
            ..SweepReport::default()
        };

        let engine = DistributionEngine::new(self.store, self.config, self.predicate);
        let scorer = ProgressScorer::new(self.store, ProgressWeights::from(self.config));

        for community in self.store.list_communities()? {
            match community.status {
                CommunityStatus::Ended => {
                    let settled = match self.store.get_distribution(&community.id) {
                        Ok(record) => record.map_or(false, |r| r.status == DistributionStatus::Distributed),
                        Err(err) => {
                            warn!(community_id = %community.id, error = %err, "Distribution lookup failed");
                            report.failures.push(format!("{}: {}", community.id, err));
                            continue;
                        }
                    };
                    if settled {
                        continue;
                    }
                    match engine.distribute(&community.id, now) {
                        Ok(outcome) => report.distributions.push(outcome),
                        Err(err) => {
                            warn!(community_id = %community.id, error = %err, retryable = err.is_retryable(), "Distribution failed");
                            report.failures.push(format!("{}: {}", community.id, err));
                        }
                    }
                }
                CommunityStatus::Active => {
                    let refreshed = scorer
                        .score_all(&community, now)
                        .and_then(|_| rollup(self.store, &community, now));
                    match refreshed {
                        Ok(_) => report.snapshots += 1,
                        Err(err) => {
                            warn!(community_id = %community.id, error = %err, "Analytics rollup failed");
                            report.failures.push(format!("{}: {}", community.id, err));
                        }
                    }
                }
                CommunityStatus::Waiting => {}
            }
        }

        info!(
            transitions = report.transitions.len(),
            distributions = report.distributions.len(),
            snapshots = report.snapshots,
            failures = report.failures.len(),
            "Sweep finished"
        );
        Ok(report)
    }
}
