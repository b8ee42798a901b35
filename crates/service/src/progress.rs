//! Member progress scoring.
//!
//! Progress blends logged meeting hours against the community's requirement
//! with the share of the run that has elapsed. The hours term dominates so
//! that idle members cannot reach completion on time alone.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::parser::community::{Community, MeetingAttendance, Membership};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressWeights {
    pub hours: f64,
    pub time: f64,
}

impl Default for ProgressWeights {
    fn default() -> Self {
        Self {
            hours: 0.7,
            time: 0.3,
        }
    }
}

impl From<&EngineConfig> for ProgressWeights {
    fn from(config: &EngineConfig) -> Self {
        Self {
            hours: config.hours_weight,
            time: config.time_weight,
        }
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Elapsed share of the community window in percent, frozen at `end_date`.
pub fn time_progress(community: &Community, now: DateTime<Utc>) -> f64 {
    if now < community.start_date {
        return 0.0;
    }
    let calculation_date = now.min(community.end_date);
    let elapsed = (calculation_date - community.start_date).num_milliseconds() as f64;
    let window = (community.end_date - community.start_date).num_milliseconds() as f64;
    if window <= 0.0 {
        return 100.0;
    }
    clamp01(elapsed / window) * 100.0
}

/// Logged hours against the whole-run requirement in percent.
pub fn hours_progress(total_minimum_hours: f64, total_meeting_seconds: u64) -> f64 {
    let hours_logged = total_meeting_seconds as f64 / 3600.0;
    if total_minimum_hours <= 0.0 {
        return if hours_logged > 0.0 { 100.0 } else { 0.0 };
    }
    clamp01(hours_logged / total_minimum_hours) * 100.0
}

/// Completion percentage in `[0, 100]`.
pub fn compute_progress(
    community: &Community,
    total_meeting_seconds: u64,
    now: DateTime<Utc>,
    weights: ProgressWeights,
) -> f64 {
    if now < community.start_date {
        return 0.0;
    }

    let blended = weights.hours * hours_progress(community.total_minimum_hours, total_meeting_seconds)
        + weights.time * time_progress(community, now);
    if blended.is_nan() {
        return 0.0;
    }
    // six decimals, so 0.7 * 100 + 0.3 * 100 lands exactly on 100
    ((blended * 1e6).round() / 1e6).clamp(0.0, 100.0)
}

pub fn total_seconds(attendance: &[MeetingAttendance]) -> u64 {
    attendance
        .iter()
        .fold(0u64, |acc, a| acc.saturating_add(a.duration_seconds))
}

pub struct ProgressScorer<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    weights: ProgressWeights,
}

impl<'a, S: LedgerStore + ?Sized> ProgressScorer<'a, S> {
    pub fn new(store: &'a S, weights: ProgressWeights) -> Self {
        Self { store, weights }
    }

    /// Recomputes one member from their attendance and persists the result.
    ///
    /// Only the two scored fields are written, so concurrent scorers are
    /// last-writer-wins on progress and never touch `is_disqualified`.
    pub fn score_member(
        &self,
        community: &Community,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Membership> {
        let attendance = self.store.list_attendance(&community.id, Some(user_id))?;
        let seconds = total_seconds(&attendance);
        let percentage = compute_progress(community, seconds, now, self.weights);

        let membership = self
            .store
            .update_membership_progress(&community.id, user_id, seconds, percentage)?
            .ok_or_else(|| EngineError::not_found("Membership", format!("{}/{}", community.id, user_id)))?;

        debug!(
            community_id = %community.id,
            user_id,
            seconds,
            progress = percentage,
            "Member progress scored"
        );
        Ok(membership)
    }

    /// Scores every member of the community.
    pub fn score_all(&self, community: &Community, now: DateTime<Utc>) -> EngineResult<Vec<Membership>> {
        let attendance = self.store.list_attendance(&community.id, None)?;
        let mut scored = Vec::new();

        for membership in self.store.list_memberships(&community.id)? {
            let seconds = attendance
                .iter()
                .filter(|a| a.user_id == membership.user_id)
                .fold(0u64, |acc, a| acc.saturating_add(a.duration_seconds));
            let percentage = compute_progress(community, seconds, now, self.weights);

            if let Some(stored) =
                self.store
                    .update_membership_progress(&community.id, &membership.user_id, seconds, percentage)?
            {
                scored.push(stored);
            }
        }

        debug!(community_id = %community.id, members = scored.len(), "Community progress scored");
        Ok(scored)
    }
}
