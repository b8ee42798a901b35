use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityStatus {
    Waiting,
    Active,
    Ended,
}

impl CommunityStatus {
    /// The only status this one may move to, if any.
    pub fn next(self) -> Option<CommunityStatus> {
        match self {
            CommunityStatus::Waiting => Some(CommunityStatus::Active),
            CommunityStatus::Active => Some(CommunityStatus::Ended),
            CommunityStatus::Ended => None,
        }
    }
}

impl fmt::Display for CommunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommunityStatus::Waiting => write!(f, "waiting"),
            CommunityStatus::Active => write!(f, "active"),
            CommunityStatus::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub category: String,
    pub creator_id: String,
    pub stake_amount: u64,              // minor units (cents)
    pub max_members: u32,
    pub total_minimum_hours: f64,       // hours required over the whole run
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: CommunityStatus,
    pub weekly_meeting_days: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn duration_days(&self) -> f64 {
        (self.end_date - self.start_date).num_seconds() as f64 / 86_400.0
    }

    /// Hours a member should log per day to stay on pace.
    pub fn daily_hours_target(&self) -> f64 {
        let days = self.duration_days();
        if days <= 0.0 {
            return 0.0;
        }
        self.total_minimum_hours / days
    }
}

/// Caller-supplied fields for a new community.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewCommunity {
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub category: String,
    pub creator_id: String,
    pub stake_amount: u64,
    pub max_members: u32,
    pub total_minimum_hours: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub weekly_meeting_days: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub community_id: String,
    pub user_id: String,
    pub is_creator: bool,
    pub stake_paid: bool,
    pub is_disqualified: bool,
    pub progress_percentage: f64,       // 0 ~ 100
    pub total_meeting_seconds: u64,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeetingAttendance {
    pub id: String,
    pub community_id: String,
    pub session_id: String,
    pub user_id: String,
    pub duration_seconds: u64,
    pub screen_shared: bool,
    pub completed: bool,                // left the session normally
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberProgressDaily {
    pub community_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub hours_logged: f64,
    pub goals_completed: u32,
    pub daily_goal_met: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunityAnalyticsSnapshot {
    pub community_id: String,
    pub date: NaiveDate,
    pub total_members: u32,
    pub active_members: u32,
    pub total_meetings_held: u32,
    pub average_attendance_rate: f64,   // 0 ~ 1
    pub total_hours_logged: f64,
    pub completion_rate: f64,           // mean progress, 0 ~ 100
    pub generated_at: DateTime<Utc>,
}
