//! Community creation, joining, attendance and daily progress.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::parser::community::{
    Community, CommunityStatus, MeetingAttendance, MemberProgressDaily, Membership, NewCommunity,
};
use crate::parser::ledger::{EarningEntry, EarningKind, MetadataValue, PLATFORM_ACCOUNT};
use crate::progress::{ProgressScorer, ProgressWeights};
use crate::store::LedgerStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttendanceInput {
    pub user_id: String,
    pub session_id: String,
    /// Signed so a negative duration is reported instead of failing to parse
    pub duration_seconds: i64,
    #[serde(default)]
    pub screen_shared: bool,
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DailyProgressInput {
    pub user_id: String,
    pub date: NaiveDate,
    pub hours: f64,
    #[serde(default)]
    pub goals_completed: u32,
}

fn validate_new_community(input: &NewCommunity) -> EngineResult<()> {
    if input.title.trim().is_empty() {
        return Err(EngineError::validation("title is required"));
    }
    validate_user_id(&input.creator_id, "creator_id")?;
    if input.end_date <= input.start_date {
        return Err(EngineError::validation("end_date must be after start_date"));
    }
    if input.stake_amount == 0 {
        return Err(EngineError::validation("stake_amount must be positive"));
    }
    if i64::try_from(input.stake_amount).is_err() {
        return Err(EngineError::validation("stake_amount is too large"));
    }
    if input.max_members == 0 {
        return Err(EngineError::validation("max_members must be at least 1"));
    }
    if !input.total_minimum_hours.is_finite() || input.total_minimum_hours < 0.0 {
        return Err(EngineError::validation("total_minimum_hours must be a non-negative number"));
    }
    Ok(())
}

/// Creates a `waiting` community; the creator joins as its first member.
pub fn create_community<S: LedgerStore + ?Sized>(
    store: &S,
    input: NewCommunity,
    now: DateTime<Utc>,
) -> EngineResult<Community> {
    validate_new_community(&input)?;

    let community = Community {
        id: Uuid::new_v4().to_string(),
        title: input.title,
        goal: input.goal,
        category: input.category,
        creator_id: input.creator_id,
        stake_amount: input.stake_amount,
        max_members: input.max_members,
        total_minimum_hours: input.total_minimum_hours,
        start_date: input.start_date,
        end_date: input.end_date,
        status: CommunityStatus::Waiting,
        weekly_meeting_days: input.weekly_meeting_days,
        created_at: now,
    };
    store.insert_community(&community)?;
    info!(community_id = %community.id, stake = community.stake_amount, "Community created");

    join_as(store, &community, &community.creator_id, true, now)?;
    Ok(community)
}

pub fn join_community<S: LedgerStore + ?Sized>(
    store: &S,
    community_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Membership> {
    let community = store.get_community_required(community_id)?;
    join_as(store, &community, user_id, false, now)
}

fn join_as<S: LedgerStore + ?Sized>(
    store: &S,
    community: &Community,
    user_id: &str,
    is_creator: bool,
    now: DateTime<Utc>,
) -> EngineResult<Membership> {
    validate_user_id(user_id, "user_id")?;
    if community.status == CommunityStatus::Ended || now >= community.end_date {
        return Err(EngineError::validation(format!("community {} has ended", community.id)));
    }

    let members = store.list_memberships(&community.id)?;
    if let Some(existing) = members.iter().find(|m| m.user_id == user_id) {
        return Err(already_joined(store, community, existing)?);
    }
    if members.len() >= community.max_members as usize {
        return Err(EngineError::validation(format!("community {} is full", community.id)));
    }

    let membership = Membership {
        community_id: community.id.clone(),
        user_id: user_id.to_string(),
        is_creator,
        stake_paid: true,
        is_disqualified: false,
        progress_percentage: 0.0,
        total_meeting_seconds: 0,
        joined_at: now,
    };
    if !store.insert_membership(&membership)? {
        let existing = store
            .get_membership(&community.id, user_id)?
            .ok_or_else(|| EngineError::Consistency(format!("membership {}/{} vanished", community.id, user_id)))?;
        return Err(already_joined(store, community, &existing)?);
    }

    let entry = stake_entry(community, &membership)?;
    store.append_earning_entry(&entry)?;

    info!(community_id = %community.id, user_id, stake = entry.amount, "Member joined");
    Ok(membership)
}

/// The debit booked for a paid membership. The id is fixed per member, so
/// booking it again is a no-op.
fn stake_entry(community: &Community, membership: &Membership) -> EngineResult<EarningEntry> {
    let stake = i64::try_from(community.stake_amount)
        .map_err(|_| EngineError::Overflow(format!("stake {} exceeds i64", community.stake_amount)))?;
    Ok(EarningEntry::new(
        format!("stake_{}_{}", community.id, membership.user_id),
        membership.user_id.as_str(),
        community.id.as_str(),
        -stake,
        EarningKind::StakePayment,
        format!("Stake for {}", community.title),
        membership.joined_at,
    )
    .with_metadata("creator", MetadataValue::Flag(membership.is_creator)))
}

/// Rejection for a repeated join. A membership whose stake debit was never
/// booked (the join stopped between the two writes) gets it booked first.
fn already_joined<S: LedgerStore + ?Sized>(
    store: &S,
    community: &Community,
    existing: &Membership,
) -> EngineResult<EngineError> {
    if existing.stake_paid && store.append_earning_entry(&stake_entry(community, existing)?)? {
        warn!(
            community_id = %community.id,
            user_id = %existing.user_id,
            "Booked missing stake debit for existing member"
        );
    }
    Ok(EngineError::validation(format!(
        "{} already joined {}",
        existing.user_id, community.id
    )))
}

fn validate_user_id(user_id: &str, field: &str) -> EngineResult<()> {
    if user_id.trim().is_empty() {
        return Err(EngineError::validation(format!("{} is required", field)));
    }
    if user_id == PLATFORM_ACCOUNT {
        return Err(EngineError::validation(format!("{} '{}' is reserved", field, PLATFORM_ACCOUNT)));
    }
    Ok(())
}

/// Records one session join, adds it to today's progress row and re-scores
/// the member before returning.
pub fn record_attendance<S: LedgerStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    community_id: &str,
    input: AttendanceInput,
    now: DateTime<Utc>,
) -> EngineResult<Membership> {
    if input.duration_seconds < 0 {
        return Err(EngineError::validation("duration_seconds must not be negative"));
    }
    if input.session_id.trim().is_empty() {
        return Err(EngineError::validation("session_id is required"));
    }

    let community = store.get_community_required(community_id)?;
    if now < community.start_date || now > community.end_date || community.status == CommunityStatus::Ended {
        return Err(EngineError::validation(format!(
            "community {} is not running at {}",
            community_id, now
        )));
    }
    if store.get_membership(community_id, &input.user_id)?.is_none() {
        return Err(EngineError::not_found("Membership", format!("{}/{}", community_id, input.user_id)));
    }

    let attendance = MeetingAttendance {
        id: Uuid::new_v4().to_string(),
        community_id: community_id.to_string(),
        session_id: input.session_id,
        user_id: input.user_id.clone(),
        duration_seconds: input.duration_seconds as u64,
        screen_shared: input.screen_shared,
        completed: input.completed,
        joined_at: now,
    };
    store.append_attendance(&attendance)?;

    add_daily_progress(
        store,
        &community,
        &input.user_id,
        now.date_naive(),
        attendance.duration_seconds as f64 / 3600.0,
        0,
    )?;

    ProgressScorer::new(store, ProgressWeights::from(config)).score_member(&community, &input.user_id, now)
}

/// Adds self-reported hours to the member's row for `date`.
pub fn log_daily_progress<S: LedgerStore + ?Sized>(
    store: &S,
    community_id: &str,
    input: DailyProgressInput,
) -> EngineResult<MemberProgressDaily> {
    if !input.hours.is_finite() || input.hours < 0.0 {
        return Err(EngineError::validation("hours must be a non-negative number"));
    }

    let community = store.get_community_required(community_id)?;
    if store.get_membership(community_id, &input.user_id)?.is_none() {
        return Err(EngineError::not_found("Membership", format!("{}/{}", community_id, input.user_id)));
    }

    add_daily_progress(
        store,
        &community,
        &input.user_id,
        input.date,
        input.hours,
        input.goals_completed,
    )
}

fn add_daily_progress<S: LedgerStore + ?Sized>(
    store: &S,
    community: &Community,
    user_id: &str,
    date: NaiveDate,
    hours: f64,
    goals: u32,
) -> EngineResult<MemberProgressDaily> {
    let mut row = store
        .get_daily_progress(&community.id, user_id, date)?
        .unwrap_or_else(|| MemberProgressDaily {
            community_id: community.id.clone(),
            user_id: user_id.to_string(),
            date,
            hours_logged: 0.0,
            goals_completed: 0,
            daily_goal_met: false,
        });

    row.hours_logged += hours;
    row.goals_completed = row.goals_completed.saturating_add(goals);
    row.daily_goal_met = row.hours_logged >= community.daily_hours_target();

    store.upsert_daily_progress(&row)?;
    Ok(row)
}

/// Marks a member disqualified; the membership itself is kept.
pub fn disqualify_member<S: LedgerStore + ?Sized>(
    store: &S,
    community_id: &str,
    user_id: &str,
) -> EngineResult<Membership> {
    let membership = store
        .set_membership_disqualified(community_id, user_id)?
        .ok_or_else(|| EngineError::not_found("Membership", format!("{}/{}", community_id, user_id)))?;

    info!(community_id, user_id, "Member disqualified");
    Ok(membership)
}

/// Fresh progress for one member, persisted as a side effect.
pub fn get_member_progress<S: LedgerStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    community_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Membership> {
    let community = store.get_community_required(community_id)?;
    ProgressScorer::new(store, ProgressWeights::from(config)).score_member(&community, user_id, now)
}
