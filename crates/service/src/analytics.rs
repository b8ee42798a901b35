//! Daily community analytics.
//!
//! Snapshots are always rebuilt from memberships and attendance, never
//! patched, so concurrent attendance writes cannot make them drift.

use crate::error::EngineResult;
use crate::parser::community::{Community, CommunityAnalyticsSnapshot, MeetingAttendance, Membership};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::info;

pub fn build_snapshot(
    community: &Community,
    memberships: &[Membership],
    attendance: &[MeetingAttendance],
    now: DateTime<Utc>,
) -> CommunityAnalyticsSnapshot {
    let total_members = memberships.len() as u32;
    let disqualified = memberships.iter().filter(|m| m.is_disqualified).count() as u32;

    let held_sessions: HashSet<&str> = attendance
        .iter()
        .filter(|a| a.completed)
        .map(|a| a.session_id.as_str())
        .collect();
    let total_meetings_held = held_sessions.len() as u32;

    let members: HashSet<&str> = memberships.iter().map(|m| m.user_id.as_str()).collect();
    let distinct_attendees = attendance
        .iter()
        .map(|a| a.user_id.as_str())
        .filter(|user| members.contains(user))
        .collect::<HashSet<_>>()
        .len();

    let average_attendance_rate = if total_members > 0 && total_meetings_held > 0 {
        distinct_attendees as f64 / total_members as f64
    } else {
        0.0
    };

    let total_seconds = attendance
        .iter()
        .fold(0u64, |acc, a| acc.saturating_add(a.duration_seconds));

    let completion_rate = if total_members > 0 {
        memberships.iter().map(|m| m.progress_percentage).sum::<f64>() / total_members as f64
    } else {
        0.0
    };

    CommunityAnalyticsSnapshot {
        community_id: community.id.clone(),
        date: now.date_naive(),
        total_members,
        active_members: total_members - disqualified,
        total_meetings_held,
        average_attendance_rate,
        total_hours_logged: total_seconds as f64 / 3600.0,
        completion_rate,
        generated_at: now,
    }
}

/// Recomputes today's snapshot for `community` and stores it.
pub fn rollup<S: LedgerStore + ?Sized>(
    store: &S,
    community: &Community,
    now: DateTime<Utc>,
) -> EngineResult<CommunityAnalyticsSnapshot> {
    let memberships = store.list_memberships(&community.id)?;
    let attendance = store.list_attendance(&community.id, None)?;

    let snapshot = build_snapshot(community, &memberships, &attendance, now);
    store.upsert_analytics_snapshot(&snapshot)?;

    info!(
        community_id = %community.id,
        date = %snapshot.date,
        members = snapshot.total_members,
        meetings = snapshot.total_meetings_held,
        completion_rate = snapshot.completion_rate,
        "Analytics snapshot rolled up"
    );
    Ok(snapshot)
}

/// Stored snapshots for one community, oldest day first.
pub fn analytics_history<S: LedgerStore + ?Sized>(
    store: &S,
    community_id: &str,
) -> EngineResult<Vec<CommunityAnalyticsSnapshot>> {
    store.get_community_required(community_id)?;
    store.list_analytics_snapshots(community_id)
}
