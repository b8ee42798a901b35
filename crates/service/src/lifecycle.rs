//! Community status state machine: `waiting -> active -> ended`.

use crate::error::{EngineError, EngineResult};
use crate::parser::community::{Community, CommunityStatus};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub community_id: String,
    pub from: CommunityStatus,
    pub to: CommunityStatus,
}

/// Status the clock says the community should be in.
pub fn target_status(community: &Community, now: DateTime<Utc>) -> CommunityStatus {
    if now >= community.end_date {
        CommunityStatus::Ended
    } else if now >= community.start_date {
        CommunityStatus::Active
    } else {
        CommunityStatus::Waiting
    }
}

/// Moves one community forward until it matches the clock.
///
/// Each step is a compare-and-set on the current status. Losing a race is
/// not an error: the row is re-read and whatever step remains is retried,
/// up to `max_retries` lost races.
pub fn advance_community<S: LedgerStore + ?Sized>(
    store: &S,
    community_id: &str,
    now: DateTime<Utc>,
    max_retries: u32,
) -> EngineResult<Vec<StatusTransition>> {
    let mut transitions = Vec::new();
    let mut conflicts = 0;

    loop {
        let community = store.get_community_required(community_id)?;
        let target = target_status(&community, now);
        if community.status >= target {
            return Ok(transitions);
        }

        let Some(next) = community.status.next() else {
            return Ok(transitions);
        };

        if store.compare_and_set_status(community_id, community.status, next)? {
            info!(community_id, from = %community.status, to = %next, "Community status advanced");
            transitions.push(StatusTransition {
                community_id: community_id.to_string(),
                from: community.status,
                to: next,
            });
            continue;
        }

        conflicts += 1;
        debug!(community_id, conflicts, "Status compare-and-set lost, re-reading");
        if conflicts >= max_retries {
            warn!(community_id, conflicts, "Giving up on status transition");
            return Err(EngineError::conflict(format!("community {} status", community_id), conflicts));
        }
    }
}

/// Sweeps every community that has not ended. Returns the transitions this
/// call performed; communities another caller already advanced are skipped.
pub fn advance_statuses<S: LedgerStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
    max_retries: u32,
) -> EngineResult<Vec<StatusTransition>> {
    let mut transitions = Vec::new();

    for community in store.list_communities()? {
        if community.status == CommunityStatus::Ended {
            continue;
        }
        transitions.extend(advance_community(store, &community.id, now, max_retries)?);
    }

    Ok(transitions)
}
