//! Ledger store contract and its libmdbx implementation.
//!
//! Rows are JSON documents. Keys follow the `{community}_{...}` layout so
//! everything belonging to one community can be prefix scanned.

use crate::error::{EngineError, EngineResult};
use crate::parser::community::{
    Community, CommunityAnalyticsSnapshot, CommunityStatus, MeetingAttendance, MemberProgressDaily,
    Membership,
};
use crate::parser::ledger::{DistributionRecord, DistributionStatus, EarningEntry};
use chrono::NaiveDate;
use pledge_database::basic_db::SafeDatabase;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const COMMUNITY_TABLE: &str = "community";
const MEMBERSHIP_TABLE: &str = "membership";
const ATTENDANCE_TABLE: &str = "attendance";
const DAILY_PROGRESS_TABLE: &str = "progress_daily";
const ANALYTICS_TABLE: &str = "analytics";
const DISTRIBUTION_TABLE: &str = "distribution";
const EARNING_TABLE: &str = "earning";

/// Lost compare-and-swaps tolerated by a single-row patch.
const ROW_PATCH_ATTEMPTS: u32 = 16;

pub trait LedgerStore: Send + Sync {
    fn get_community(&self, id: &str) -> EngineResult<Option<Community>>;

    fn get_community_required(&self, id: &str) -> EngineResult<Community> {
        self.get_community(id)?
            .ok_or_else(|| EngineError::not_found("Community", id))
    }

    fn list_communities(&self) -> EngineResult<Vec<Community>>;

    /// Fails with `Validation` when the id is already taken.
    fn insert_community(&self, community: &Community) -> EngineResult<()>;

    /// Moves `status` from `expected` to `next` only if nobody changed it
    /// in between.
    fn compare_and_set_status(
        &self,
        community_id: &str,
        expected: CommunityStatus,
        next: CommunityStatus,
    ) -> EngineResult<bool>;

    fn get_membership(&self, community_id: &str, user_id: &str) -> EngineResult<Option<Membership>>;

    fn list_memberships(&self, community_id: &str) -> EngineResult<Vec<Membership>>;

    /// Returns false when the user is already a member.
    fn insert_membership(&self, membership: &Membership) -> EngineResult<bool>;

    /// Sets only the scorer-owned fields of an existing membership and
    /// returns the row as stored. `None` when the member does not exist.
    fn update_membership_progress(
        &self,
        community_id: &str,
        user_id: &str,
        total_meeting_seconds: u64,
        progress_percentage: f64,
    ) -> EngineResult<Option<Membership>>;

    /// Sets `is_disqualified` and leaves every other field as stored.
    fn set_membership_disqualified(&self, community_id: &str, user_id: &str) -> EngineResult<Option<Membership>>;

    fn append_attendance(&self, attendance: &MeetingAttendance) -> EngineResult<()>;

    fn list_attendance(
        &self,
        community_id: &str,
        user_id: Option<&str>,
    ) -> EngineResult<Vec<MeetingAttendance>>;

    fn get_daily_progress(
        &self,
        community_id: &str,
        user_id: &str,
        date: NaiveDate,
    ) -> EngineResult<Option<MemberProgressDaily>>;

    fn upsert_daily_progress(&self, progress: &MemberProgressDaily) -> EngineResult<()>;

    fn upsert_analytics_snapshot(&self, snapshot: &CommunityAnalyticsSnapshot) -> EngineResult<()>;

    /// Oldest first.
    fn list_analytics_snapshots(&self, community_id: &str) -> EngineResult<Vec<CommunityAnalyticsSnapshot>>;

    fn get_distribution(&self, community_id: &str) -> EngineResult<Option<DistributionRecord>>;

    /// Returns false when a record already exists for the community.
    fn insert_distribution_if_absent(&self, record: &DistributionRecord) -> EngineResult<bool>;

    fn compare_and_set_distribution_status(
        &self,
        community_id: &str,
        expected: DistributionStatus,
        next: DistributionStatus,
    ) -> EngineResult<bool>;

    /// Append-only. Returns false when an entry with the same id exists.
    fn append_earning_entry(&self, entry: &EarningEntry) -> EngineResult<bool>;

    fn list_earnings_for_user(&self, user_id: &str) -> EngineResult<Vec<EarningEntry>>;

    fn list_earnings_for_community(&self, community_id: &str) -> EngineResult<Vec<EarningEntry>>;
}

pub struct MdbxLedgerStore<T: SafeDatabase> {
    database: T,
}

impl<T: SafeDatabase> MdbxLedgerStore<T> {
    pub fn new(database: T) -> Self {
        Self { database }
    }

    fn read_row<V: DeserializeOwned>(&self, key: &str, table: &str) -> EngineResult<Option<V>> {
        match self.database.read(key, table)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_rows<V: DeserializeOwned>(&self, prefix: &str, table: &str) -> EngineResult<Vec<V>> {
        self.database
            .read_prefix(prefix, table)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    fn read_every_row<V: DeserializeOwned>(&self, table: &str) -> EngineResult<Vec<V>> {
        self.database
            .read_all(table)?
            .values()
            .map(|bytes| decode(bytes))
            .collect()
    }

    fn write_row<V: Serialize>(&self, key: &str, value: &V, table: &str) -> EngineResult<()> {
        let json = serde_json::to_string(value)?;
        self.database.write(key, &json, table)?;
        Ok(())
    }

    fn write_row_if_absent<V: Serialize>(&self, key: &str, value: &V, table: &str) -> EngineResult<bool> {
        let json = serde_json::to_string(value)?;
        Ok(self.database.write_if_absent(key, &json, table)?)
    }

    /// Reads the raw row, lets `update` decide the replacement, and swaps it
    /// in only if the row is still byte-identical.
    fn swap_row<V, F>(&self, key: &str, table: &str, update: F) -> EngineResult<bool>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(V) -> Option<V>,
    {
        let raw = match self.database.read(key, table)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|e| EngineError::Serialization(format!("Invalid UTF-8: {}", e)))?,
            None => return Ok(false),
        };

        let current: V = serde_json::from_str(&raw)?;
        let Some(next) = update(current) else {
            return Ok(false);
        };

        let next_json = serde_json::to_string(&next)?;
        Ok(self.database.compare_and_swap(key, Some(&raw), &next_json, table)?)
    }

    /// Applies `patch` to the freshest copy of the row, retrying when another
    /// writer replaced it between read and swap. Fields `patch` does not
    /// touch keep whatever the winning writer stored.
    fn patch_row<V, F>(&self, key: &str, table: &str, patch: F) -> EngineResult<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: Fn(&mut V),
    {
        for attempt in 1..=ROW_PATCH_ATTEMPTS {
            let raw = match self.database.read(key, table)? {
                Some(bytes) => String::from_utf8(bytes)
                    .map_err(|e| EngineError::Serialization(format!("Invalid UTF-8: {}", e)))?,
                None => return Ok(None),
            };

            let mut row: V = serde_json::from_str(&raw)?;
            patch(&mut row);
            let next_json = serde_json::to_string(&row)?;
            if self.database.compare_and_swap(key, Some(&raw), &next_json, table)? {
                return Ok(Some(row));
            }
            debug!(key, table, attempt, "Row changed under patch, re-reading");
        }

        Err(EngineError::conflict(format!("{} row {}", table, key), ROW_PATCH_ATTEMPTS))
    }
}

impl<T: SafeDatabase> Clone for MdbxLedgerStore<T> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
        }
    }
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> EngineResult<V> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EngineError::Serialization(format!("Invalid UTF-8: {}", e)))?;
    Ok(serde_json::from_str(text)?)
}

fn membership_key(community_id: &str, user_id: &str) -> String {
    format!("{}_{}", community_id, user_id)
}

fn daily_progress_key(community_id: &str, user_id: &str, date: NaiveDate) -> String {
    format!("{}_{}_{}", community_id, user_id, date)
}

impl<T: SafeDatabase> LedgerStore for MdbxLedgerStore<T> {
    fn get_community(&self, id: &str) -> EngineResult<Option<Community>> {
        self.read_row(id, COMMUNITY_TABLE)
    }

    fn list_communities(&self) -> EngineResult<Vec<Community>> {
        let mut communities: Vec<Community> = self.read_every_row(COMMUNITY_TABLE)?;
        communities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(communities)
    }

    fn insert_community(&self, community: &Community) -> EngineResult<()> {
        if !self.write_row_if_absent(&community.id, community, COMMUNITY_TABLE)? {
            return Err(EngineError::validation(format!(
                "Community {} already exists",
                community.id
            )));
        }
        Ok(())
    }

    fn compare_and_set_status(
        &self,
        community_id: &str,
        expected: CommunityStatus,
        next: CommunityStatus,
    ) -> EngineResult<bool> {
        self.swap_row(community_id, COMMUNITY_TABLE, |mut community: Community| {
            if community.status != expected {
                return None;
            }
            community.status = next;
            Some(community)
        })
    }

    fn get_membership(&self, community_id: &str, user_id: &str) -> EngineResult<Option<Membership>> {
        self.read_row(&membership_key(community_id, user_id), MEMBERSHIP_TABLE)
    }

    fn list_memberships(&self, community_id: &str) -> EngineResult<Vec<Membership>> {
        let rows: Vec<Membership> = self.read_rows(&format!("{}_", community_id), MEMBERSHIP_TABLE)?;
        // 접두사가 겹치는 다른 커뮤니티 id 방지
        Ok(rows
            .into_iter()
            .filter(|m| m.community_id == community_id)
            .collect())
    }

    fn insert_membership(&self, membership: &Membership) -> EngineResult<bool> {
        self.write_row_if_absent(
            &membership_key(&membership.community_id, &membership.user_id),
            membership,
            MEMBERSHIP_TABLE,
        )
    }

    fn update_membership_progress(
        &self,
        community_id: &str,
        user_id: &str,
        total_meeting_seconds: u64,
        progress_percentage: f64,
    ) -> EngineResult<Option<Membership>> {
        self.patch_row(&membership_key(community_id, user_id), MEMBERSHIP_TABLE, |m: &mut Membership| {
            m.total_meeting_seconds = total_meeting_seconds;
            m.progress_percentage = progress_percentage;
        })
    }

    fn set_membership_disqualified(&self, community_id: &str, user_id: &str) -> EngineResult<Option<Membership>> {
        self.patch_row(&membership_key(community_id, user_id), MEMBERSHIP_TABLE, |m: &mut Membership| {
            m.is_disqualified = true;
        })
    }

    fn append_attendance(&self, attendance: &MeetingAttendance) -> EngineResult<()> {
        let key = format!(
            "{}_{}_{}",
            attendance.community_id, attendance.user_id, attendance.id
        );
        if !self.write_row_if_absent(&key, attendance, ATTENDANCE_TABLE)? {
            return Err(EngineError::validation(format!(
                "Attendance {} already recorded",
                attendance.id
            )));
        }
        Ok(())
    }

    fn list_attendance(
        &self,
        community_id: &str,
        user_id: Option<&str>,
    ) -> EngineResult<Vec<MeetingAttendance>> {
        let prefix = match user_id {
            Some(user) => format!("{}_{}_", community_id, user),
            None => format!("{}_", community_id),
        };

        let rows: Vec<MeetingAttendance> = self.read_rows(&prefix, ATTENDANCE_TABLE)?;
        Ok(rows
            .into_iter()
            .filter(|a| a.community_id == community_id)
            .filter(|a| user_id.map_or(true, |user| a.user_id == user))
            .collect())
    }

    fn get_daily_progress(
        &self,
        community_id: &str,
        user_id: &str,
        date: NaiveDate,
    ) -> EngineResult<Option<MemberProgressDaily>> {
        self.read_row(&daily_progress_key(community_id, user_id, date), DAILY_PROGRESS_TABLE)
    }

    fn upsert_daily_progress(&self, progress: &MemberProgressDaily) -> EngineResult<()> {
        self.write_row(
            &daily_progress_key(&progress.community_id, &progress.user_id, progress.date),
            progress,
            DAILY_PROGRESS_TABLE,
        )
    }

    fn upsert_analytics_snapshot(&self, snapshot: &CommunityAnalyticsSnapshot) -> EngineResult<()> {
        self.write_row(
            &format!("{}_{}", snapshot.community_id, snapshot.date),
            snapshot,
            ANALYTICS_TABLE,
        )
    }

    fn list_analytics_snapshots(&self, community_id: &str) -> EngineResult<Vec<CommunityAnalyticsSnapshot>> {
        let mut rows: Vec<CommunityAnalyticsSnapshot> =
            self.read_rows(&format!("{}_", community_id), ANALYTICS_TABLE)?;
        rows.retain(|s| s.community_id == community_id);
        rows.sort_by_key(|s| s.date);
        Ok(rows)
    }

    fn get_distribution(&self, community_id: &str) -> EngineResult<Option<DistributionRecord>> {
        self.read_row(community_id, DISTRIBUTION_TABLE)
    }

    fn insert_distribution_if_absent(&self, record: &DistributionRecord) -> EngineResult<bool> {
        self.write_row_if_absent(&record.community_id, record, DISTRIBUTION_TABLE)
    }

    fn compare_and_set_distribution_status(
        &self,
        community_id: &str,
        expected: DistributionStatus,
        next: DistributionStatus,
    ) -> EngineResult<bool> {
        self.swap_row(community_id, DISTRIBUTION_TABLE, |mut record: DistributionRecord| {
            if record.status != expected {
                return None;
            }
            record.status = next;
            Some(record)
        })
    }

    fn append_earning_entry(&self, entry: &EarningEntry) -> EngineResult<bool> {
        self.write_row_if_absent(&entry.id, entry, EARNING_TABLE)
    }

    fn list_earnings_for_user(&self, user_id: &str) -> EngineResult<Vec<EarningEntry>> {
        let mut entries: Vec<EarningEntry> = self.read_every_row(EARNING_TABLE)?;
        entries.retain(|e| e.user_id == user_id);
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    fn list_earnings_for_community(&self, community_id: &str) -> EngineResult<Vec<EarningEntry>> {
        let mut entries: Vec<EarningEntry> = self.read_every_row(EARNING_TABLE)?;
        entries.retain(|e| e.community_id == community_id);
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}
