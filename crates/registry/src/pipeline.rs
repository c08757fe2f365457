//! Sequential projection loop.
//!
//! The only place events are applied: one at a time, in delivery order, from a single task.
//! What happens on a consistency fault is decided by [FaultPolicy]; store errors always stop the
//! loop so the caller can retry delivery.

use crate::abi::ObservedEvent;
use crate::config::{FaultPolicy, ProjectorConfig};
use crate::projector::{Applied, ProjectionError, Projector};
use crate::store::Store;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub applied: u64,
    pub duplicates: u64,
    pub faults: u64,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("block {block} log {log_index}: {source}")]
    Projection {
        block: u64,
        log_index: u64,
        #[source]
        source: ProjectionError,
    },

    /// The receiver fell behind the broadcast buffer; events were lost.
    #[error("projection lagged behind the indexer, {0} events dropped")]
    Lagged(u64),
}

/// Apply one event under `policy`, updating `stats`.
pub fn apply_one<S: Store>(
    projector: &mut Projector<S>,
    observed: &ObservedEvent,
    policy: FaultPolicy,
    stats: &mut ProjectionStats,
) -> Result<(), PipelineError> {
    let provenance = &observed.provenance;
    match projector.apply(observed) {
        Ok(Applied::Projected { .. }) => stats.applied += 1,
        Ok(Applied::Duplicate) => stats.duplicates += 1,
        Err(e) if e.is_consistency_fault() && policy == FaultPolicy::Skip => {
            stats.faults += 1;
            tracing::warn!(
                event = observed.event.name(),
                block = provenance.block_number,
                log_index = provenance.log_index,
                reason = %e,
                "consistency fault, event skipped"
            );
        }
        Err(source) => {
            if source.is_consistency_fault() {
                stats.faults += 1;
            }
            return Err(PipelineError::Projection {
                block: provenance.block_number,
                log_index: provenance.log_index,
                source,
            });
        }
    }
    Ok(())
}

/// Apply events from `receiver` until the sender side closes.
pub async fn run_projection<S: Store>(
    mut receiver: broadcast::Receiver<ObservedEvent>,
    projector: &mut Projector<S>,
    config: &ProjectorConfig,
) -> Result<ProjectionStats, PipelineError> {
    let mut stats = ProjectionStats::default();
    loop {
        match receiver.recv().await {
            Ok(observed) => apply_one(projector, &observed, config.fault_policy, &mut stats)?,
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(dropped = n, "projection lagged behind indexer");
                return Err(PipelineError::Lagged(n));
            }
        }
    }
    tracing::info!(
        applied = stats.applied,
        duplicates = stats.duplicates,
        faults = stats.faults,
        "projection loop finished"
    );
    Ok(stats)
}
