//! Stake-pool settlement.
//!
//! All money is `u64`/`i64` minor units. The plan (pool, fee, winners,
//! remainder routing) is computed once and frozen inside the
//! [`DistributionRecord`]; ledger entries are derived from the frozen record
//! with deterministic ids, so re-running or repairing a settlement appends
//! exactly the entries that are missing and nothing else.
//!
//! Record status only moves `pending -> calculated -> distributed`, each step
//! a compare-and-set against the stored status.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::parser::community::{Community, CommunityStatus, Membership};
use crate::parser::ledger::{
    DistributionRecord, DistributionStatus, EarningEntry, EarningKind, MetadataValue, NoWinnerPolicy,
    RemainderPolicy, PLATFORM_ACCOUNT,
};
use crate::progress::{ProgressScorer, ProgressWeights};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const BPS_DENOMINATOR: u128 = 10_000;

/// Decides whether a member met the completion criteria.
pub trait WinnerPredicate: Send + Sync {
    fn is_winner(&self, membership: &Membership) -> bool;
}

impl<F> WinnerPredicate for F
where
    F: Fn(&Membership) -> bool + Send + Sync,
{
    fn is_winner(&self, membership: &Membership) -> bool {
        self(membership)
    }
}

/// Default criteria: not disqualified, and either progress at or above the
/// threshold or (when configured) enough meeting hours.
#[derive(Clone, Debug)]
pub struct CompletionCriteria {
    pub winning_threshold: f64,
    pub minimum_meeting_hours: Option<f64>,
}

impl From<&EngineConfig> for CompletionCriteria {
    fn from(config: &EngineConfig) -> Self {
        Self {
            winning_threshold: config.winning_threshold,
            minimum_meeting_hours: config.minimum_meeting_hours,
        }
    }
}

impl WinnerPredicate for CompletionCriteria {
    fn is_winner(&self, membership: &Membership) -> bool {
        if membership.is_disqualified {
            return false;
        }
        let by_progress = membership.progress_percentage >= self.winning_threshold;
        let by_hours = self
            .minimum_meeting_hours
            .map_or(false, |hours| membership.total_meeting_seconds as f64 / 3600.0 >= hours);
        by_progress || by_hours
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolSplit {
    pub member_count: u32,
    pub total_stake_pool: u64,
    pub platform_fee: u64,
    pub distributable: u64,
}

/// `round_half_up(total * bps / 10000)`, computed once for the whole pool.
pub fn platform_fee(total_stake_pool: u64, fee_bps: u32) -> EngineResult<u64> {
    if fee_bps as u128 > BPS_DENOMINATOR {
        return Err(EngineError::validation(format!("fee of {} bps exceeds the pool", fee_bps)));
    }
    let scaled = total_stake_pool as u128 * fee_bps as u128;
    let fee = (scaled + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR;
    // fee <= total because bps <= 10000
    Ok(fee as u64)
}

pub fn split_pool(stake_amount: u64, member_count: u32, fee_bps: u32) -> EngineResult<PoolSplit> {
    let total_stake_pool = stake_amount
        .checked_mul(member_count as u64)
        .ok_or_else(|| EngineError::Overflow(format!("{} x {} stake pool", stake_amount, member_count)))?;
    let fee = platform_fee(total_stake_pool, fee_bps)?;

    Ok(PoolSplit {
        member_count,
        total_stake_pool,
        platform_fee: fee,
        distributable: total_stake_pool - fee,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct SettlementPolicy {
    pub fee_bps: u32,
    pub no_winner_policy: NoWinnerPolicy,
    pub remainder_policy: RemainderPolicy,
}

impl From<&EngineConfig> for SettlementPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            fee_bps: config.platform_fee_bps,
            no_winner_policy: config.no_winner_policy,
            remainder_policy: config.remainder_policy,
        }
    }
}

/// Computes the frozen settlement plan as a `pending` record.
///
/// Only paid memberships take part; winners are sorted by user id so the
/// plan does not depend on store iteration order.
pub fn plan_distribution(
    community: &Community,
    memberships: &[Membership],
    predicate: &dyn WinnerPredicate,
    policy: SettlementPolicy,
    now: DateTime<Utc>,
) -> EngineResult<DistributionRecord> {
    let mut paid: Vec<&Membership> = memberships.iter().filter(|m| m.stake_paid).collect();
    paid.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    let split = split_pool(community.stake_amount, paid.len() as u32, policy.fee_bps)?;

    let (winners, losers): (Vec<&Membership>, Vec<&Membership>) =
        paid.into_iter().partition(|m| predicate.is_winner(m));
    let winners: Vec<String> = winners.into_iter().map(|m| m.user_id.clone()).collect();
    let losers: Vec<String> = losers.into_iter().map(|m| m.user_id.clone()).collect();
    let winner_count = winners.len() as u32;

    let mut record = DistributionRecord {
        community_id: community.id.clone(),
        stake_amount: community.stake_amount,
        member_count: split.member_count,
        total_stake_pool: split.total_stake_pool,
        platform_fee_amount: split.platform_fee,
        distributable_amount: split.distributable,
        winner_count,
        reward_per_winner: 0,
        remainder_amount: 0,
        remainder_recipient: None,
        refund_per_member: 0,
        winners,
        losers,
        no_winner_policy: None,
        status: DistributionStatus::Pending,
        distribution_date: now,
    };

    if winner_count == 0 {
        record.no_winner_policy = Some(policy.no_winner_policy);
        match policy.no_winner_policy {
            NoWinnerPolicy::RefundMembers if split.member_count > 0 => {
                record.refund_per_member = split.distributable / split.member_count as u64;
                record.remainder_amount =
                    split.distributable - record.refund_per_member * split.member_count as u64;
            }
            NoWinnerPolicy::RefundMembers => {}
            NoWinnerPolicy::RetainAsPlatformRevenue => {
                // 전액 플랫폼 적립, 별도의 나머지 없음
            }
        }
        if record.remainder_amount > 0 {
            record.remainder_recipient = Some(PLATFORM_ACCOUNT.to_string());
        }
        return Ok(record);
    }

    record.reward_per_winner = split.distributable / winner_count as u64;
    record.remainder_amount = split.distributable - record.reward_per_winner * winner_count as u64;
    if record.remainder_amount > 0 {
        record.remainder_recipient = Some(match policy.remainder_policy {
            RemainderPolicy::Platform => PLATFORM_ACCOUNT.to_string(),
            RemainderPolicy::FirstWinner => record.winners[0].clone(),
        });
    }

    Ok(record)
}

fn to_signed(amount: u64) -> EngineResult<i64> {
    i64::try_from(amount).map_err(|_| EngineError::Overflow(format!("amount {} exceeds i64", amount)))
}

fn entry_id(community_id: &str, kind: &str, account: &str) -> String {
    format!("dist_{}_{}_{}", community_id, kind, account)
}

/// Every ledger entry a settled record implies. Ids and timestamps come from
/// the record alone, so this is stable across calls.
pub fn settlement_entries(record: &DistributionRecord) -> EngineResult<Vec<EarningEntry>> {
    let community_id = record.community_id.as_str();
    let at = record.distribution_date;
    let mut entries = Vec::new();

    if record.platform_fee_amount > 0 {
        entries.push(EarningEntry::new(
            entry_id(community_id, "fee", PLATFORM_ACCOUNT),
            PLATFORM_ACCOUNT,
            community_id,
            to_signed(record.platform_fee_amount)?,
            EarningKind::PlatformFee,
            "Platform fee",
            at,
        ));
    }

    let refunding = record.no_winner_policy == Some(NoWinnerPolicy::RefundMembers);

    for winner in &record.winners {
        entries.push(
            EarningEntry::new(
                entry_id(community_id, "reward", winner),
                winner.as_str(),
                community_id,
                to_signed(record.reward_per_winner)?,
                EarningKind::Reward,
                "Community completion reward",
                at,
            )
            .with_metadata("winner_count", MetadataValue::Amount(record.winner_count as i64)),
        );
    }

    if refunding {
        for member in &record.losers {
            entries.push(EarningEntry::new(
                entry_id(community_id, "refund", member),
                member.as_str(),
                community_id,
                to_signed(record.refund_per_member)?,
                EarningKind::Refund,
                "Stake refund, no member completed",
                at,
            ));
        }
    } else {
        for member in &record.losers {
            entries.push(
                EarningEntry::new(
                    entry_id(community_id, "forfeit", member),
                    member.as_str(),
                    community_id,
                    0,
                    EarningKind::Forfeit,
                    "Stake forfeited to the pool",
                    at,
                )
                .with_metadata("forfeited_stake", MetadataValue::Amount(to_signed(record.stake_amount)?)),
            );
        }
    }

    if record.no_winner_policy == Some(NoWinnerPolicy::RetainAsPlatformRevenue)
        && record.distributable_amount > 0
    {
        entries.push(EarningEntry::new(
            entry_id(community_id, "unclaimed", PLATFORM_ACCOUNT),
            PLATFORM_ACCOUNT,
            community_id,
            to_signed(record.distributable_amount)?,
            EarningKind::PlatformReserve,
            "Unclaimed pool retained, no member completed",
            at,
        ));
    }

    if let (Some(recipient), true) = (&record.remainder_recipient, record.remainder_amount > 0) {
        let kind = if recipient == PLATFORM_ACCOUNT {
            EarningKind::PlatformReserve
        } else {
            EarningKind::Reward
        };
        entries.push(
            EarningEntry::new(
                entry_id(community_id, "remainder", recipient),
                recipient.as_str(),
                community_id,
                to_signed(record.remainder_amount)?,
                kind,
                "Division remainder",
                at,
            )
            .with_metadata("remainder", MetadataValue::Flag(true)),
        );
    }

    Ok(entries)
}

/// Total booked by `entries`; must equal the pool.
pub fn settled_total(entries: &[EarningEntry]) -> i128 {
    entries.iter().map(|e| e.amount as i128).sum()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum DistributionOutcome {
    /// This call settled the community.
    Distributed(DistributionRecord),
    /// Already settled earlier; nothing written.
    AlreadyDistributed(DistributionRecord),
    /// A half-applied settlement was completed.
    Repaired(DistributionRecord),
    /// Another caller holds the settlement; shown as "distribution pending".
    Pending(DistributionRecord),
}

impl DistributionOutcome {
    pub fn record(&self) -> &DistributionRecord {
        match self {
            DistributionOutcome::Distributed(r)
            | DistributionOutcome::AlreadyDistributed(r)
            | DistributionOutcome::Repaired(r)
            | DistributionOutcome::Pending(r) => r,
        }
    }
}

/// Projection for a community that has not been settled.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistributionPreview {
    pub community_id: String,
    pub assumed_success_rate: f64,
    pub member_count: u32,
    pub total_stake_pool: u64,
    pub platform_fee_amount: u64,
    pub distributable_amount: u64,
    pub projected_winner_count: u32,
    pub projected_reward_per_winner: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionView {
    Committed(DistributionRecord),
    Preview(DistributionPreview),
}

pub fn preview_distribution(
    community: &Community,
    memberships: &[Membership],
    assumed_success_rate: f64,
    fee_bps: u32,
) -> EngineResult<DistributionPreview> {
    if !(0.0..=1.0).contains(&assumed_success_rate) {
        return Err(EngineError::validation("assumed success rate must be within 0..=1"));
    }

    let member_count = memberships.iter().filter(|m| m.stake_paid).count() as u32;
    let split = split_pool(community.stake_amount, member_count, fee_bps)?;

    let projected_winner_count = if member_count == 0 || assumed_success_rate == 0.0 {
        0
    } else {
        ((member_count as f64 * assumed_success_rate).ceil() as u32).clamp(1, member_count)
    };
    let projected_reward_per_winner = if projected_winner_count == 0 {
        0
    } else {
        split.distributable / projected_winner_count as u64
    };

    Ok(DistributionPreview {
        community_id: community.id.clone(),
        assumed_success_rate,
        member_count,
        total_stake_pool: split.total_stake_pool,
        platform_fee_amount: split.platform_fee,
        distributable_amount: split.distributable,
        projected_winner_count,
        projected_reward_per_winner,
    })
}

pub struct DistributionEngine<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    config: &'a EngineConfig,
    predicate: &'a dyn WinnerPredicate,
}

impl<'a, S: LedgerStore + ?Sized> DistributionEngine<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig, predicate: &'a dyn WinnerPredicate) -> Self {
        Self {
            store,
            config,
            predicate,
        }
    }

    /// Settles an ended community. Safe to call any number of times from any
    /// number of callers.
    pub fn distribute(&self, community_id: &str, now: DateTime<Utc>) -> EngineResult<DistributionOutcome> {
        let community = self.store.get_community_required(community_id)?;
        if community.status != CommunityStatus::Ended {
            return Err(EngineError::NotEnded {
                community_id: community_id.to_string(),
                status: community.status.to_string(),
            });
        }

        for attempt in 1..=self.config.max_cas_retries {
            let Some(record) = self.store.get_distribution(community_id)? else {
                let record = self.plan(&community, now)?;
                if self.store.insert_distribution_if_absent(&record)? {
                    info!(
                        community_id,
                        pool = record.total_stake_pool,
                        fee = record.platform_fee_amount,
                        winners = record.winner_count,
                        reward = record.reward_per_winner,
                        "Distribution planned"
                    );
                } else {
                    debug!(community_id, attempt, "Distribution already planned by another caller");
                }
                continue;
            };

            match record.status {
                DistributionStatus::Distributed => {
                    debug!(community_id, "Distribution already settled");
                    return Ok(DistributionOutcome::AlreadyDistributed(record));
                }
                DistributionStatus::Calculated => {
                    warn!(community_id, status = %record.status, "Distribution stopped after calculation, repairing");
                    let settled = self.apply(&record)?;
                    return Ok(DistributionOutcome::Repaired(settled));
                }
                DistributionStatus::Pending => {
                    if self.store.compare_and_set_distribution_status(
                        community_id,
                        DistributionStatus::Pending,
                        DistributionStatus::Calculated,
                    )? {
                        let settled = self.apply(&record)?;
                        return Ok(DistributionOutcome::Distributed(settled));
                    }

                    let current = self
                        .store
                        .get_distribution(community_id)?
                        .ok_or_else(|| EngineError::Consistency(format!("distribution for {} vanished", community_id)))?;
                    return Ok(match current.status {
                        DistributionStatus::Distributed => DistributionOutcome::AlreadyDistributed(current),
                        _ => DistributionOutcome::Pending(current),
                    });
                }
            }
        }

        Err(EngineError::conflict(
            format!("community {} distribution", community_id),
            self.config.max_cas_retries,
        ))
    }

    fn plan(&self, community: &Community, now: DateTime<Utc>) -> EngineResult<DistributionRecord> {
        if self.config.rescore_before_distribution {
            ProgressScorer::new(self.store, ProgressWeights::from(self.config)).score_all(community, now)?;
        }
        // 재계산 도중 반영된 실격까지 포함한 최신 행으로 계획
        let memberships = self.store.list_memberships(&community.id)?;
        plan_distribution(
            community,
            &memberships,
            self.predicate,
            SettlementPolicy::from(self.config),
            now,
        )
    }

    /// Appends whatever entries of a `calculated` record are missing, then
    /// flips it to `distributed`.
    fn apply(&self, record: &DistributionRecord) -> EngineResult<DistributionRecord> {
        let community_id = record.community_id.as_str();
        let planned = settlement_entries(record)?;

        let booked = settled_total(&planned);
        if booked != record.total_stake_pool as i128 {
            return Err(EngineError::Consistency(format!(
                "settlement for {} books {} of a {} pool",
                community_id, booked, record.total_stake_pool
            )));
        }

        let existing: HashSet<String> = self
            .store
            .list_earnings_for_community(community_id)?
            .into_iter()
            .map(|e| e.id)
            .collect();
        let already_rewarded = record
            .winners
            .iter()
            .filter(|w| existing.contains(&entry_id(community_id, "reward", w)))
            .count();
        if already_rewarded > 0 {
            warn!(
                community_id,
                already_rewarded,
                winners = record.winner_count,
                "Reward entries already present, appending only the missing ones"
            );
        }

        let mut appended = 0usize;
        for entry in planned.iter().filter(|e| !existing.contains(&e.id)) {
            if self.store.append_earning_entry(entry)? {
                appended += 1;
            }
        }

        if !self.store.compare_and_set_distribution_status(
            community_id,
            DistributionStatus::Calculated,
            DistributionStatus::Distributed,
        )? {
            debug!(community_id, "Another caller finished the settlement first");
        }

        let settled = self
            .store
            .get_distribution(community_id)?
            .ok_or_else(|| EngineError::Consistency(format!("distribution for {} vanished", community_id)))?;
        if settled.status != DistributionStatus::Distributed {
            return Err(EngineError::Consistency(format!(
                "distribution for {} is {} after settlement",
                community_id, settled.status
            )));
        }

        info!(
            community_id,
            appended,
            winners = settled.winner_count,
            reward = settled.reward_per_winner,
            remainder = settled.remainder_amount,
            "Distribution settled"
        );
        Ok(settled)
    }
}

/// Committed record when one exists (in any status), otherwise a preview at
/// `assumed_success_rate`.
pub fn get_community_distribution<S: LedgerStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    community_id: &str,
    assumed_success_rate: f64,
) -> EngineResult<DistributionView> {
    let community = store.get_community_required(community_id)?;
    if let Some(record) = store.get_distribution(community_id)? {
        return Ok(DistributionView::Committed(record));
    }

    let memberships = store.list_memberships(community_id)?;
    let preview = preview_distribution(&community, &memberships, assumed_success_rate, config.platform_fee_bps)?;
    Ok(DistributionView::Preview(preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{community_fixture, membership_fixture, temp_store, HookedStore, InnerStore};

    fn members(community_id: &str, winners: usize, losers: usize) -> Vec<Membership> {
        let mut all = Vec::new();
        for i in 0..winners {
            let mut m = membership_fixture(community_id, &format!("w{}", i));
            m.progress_percentage = 100.0;
            all.push(m);
        }
        for i in 0..losers {
            let mut m = membership_fixture(community_id, &format!("l{}", i));
            m.progress_percentage = 40.0;
            all.push(m);
        }
        all
    }

    fn criteria() -> CompletionCriteria {
        CompletionCriteria {
            winning_threshold: 100.0,
            minimum_meeting_hours: None,
        }
    }

    fn policy() -> SettlementPolicy {
        SettlementPolicy::from(&EngineConfig::default())
    }

    #[test]
    fn test_four_members_two_winners() {
        let community = community_fixture("c1", 10_000);
        let record = plan_distribution(&community, &members("c1", 2, 2), &criteria(), policy(), community.end_date).unwrap();

        assert_eq!(record.total_stake_pool, 40_000);
        assert_eq!(record.platform_fee_amount, 4_000);
        assert_eq!(record.distributable_amount, 36_000);
        assert_eq!(record.reward_per_winner, 18_000);
        assert_eq!(record.remainder_amount, 0);
        assert_eq!(record.remainder_recipient, None);
    }

    #[test]
    fn test_three_members_two_winners() {
        let community = community_fixture("c1", 10_000);
        let record = plan_distribution(&community, &members("c1", 2, 1), &criteria(), policy(), community.end_date).unwrap();

        assert_eq!(record.total_stake_pool, 30_000);
        assert_eq!(record.platform_fee_amount, 3_000);
        assert_eq!(record.distributable_amount, 27_000);
        assert_eq!(record.reward_per_winner, 13_500);
        assert_eq!(record.remainder_amount, 0);
    }

    #[test]
    fn test_remainder_goes_to_platform_by_default() {
        let community = community_fixture("c1", 1_001);
        let record = plan_distribution(&community, &members("c1", 3, 0), &criteria(), policy(), community.end_date).unwrap();

        // 3003 pool, fee round(300.3) = 300, 2703 / 3 = 901
        assert_eq!(record.platform_fee_amount, 300);
        assert_eq!(record.reward_per_winner, 901);
        assert_eq!(record.remainder_amount, 0);

        let community = community_fixture("c2", 1_000);
        let record = plan_distribution(&community, &members("c2", 7, 0), &criteria(), policy(), community.end_date).unwrap();
        // 7000 pool, 700 fee, 6300 / 7 = 900
        assert_eq!(record.remainder_amount, 0);

        let community = community_fixture("c3", 1_000);
        let record = plan_distribution(&community, &members("c3", 3, 1), &criteria(), policy(), community.end_date).unwrap();
        // 4000 pool, 400 fee, 3600 / 3 = 1200
        assert_eq!(record.reward_per_winner, 1_200);

        let community = community_fixture("c4", 1_000);
        let record = plan_distribution(&community, &members("c4", 7, 3), &criteria(), policy(), community.end_date).unwrap();
        // 10000 pool, 1000 fee, 9000 / 7 = 1285 r 5
        assert_eq!(record.reward_per_winner, 1_285);
        assert_eq!(record.remainder_amount, 5);
        assert_eq!(record.remainder_recipient.as_deref(), Some(PLATFORM_ACCOUNT));
        assert!(record.reward_per_winner * record.winner_count as u64 <= record.distributable_amount);
    }

    #[test]
    fn test_remainder_to_first_winner() {
        let community = community_fixture("c1", 1_000);
        let policy = SettlementPolicy {
            remainder_policy: RemainderPolicy::FirstWinner,
            ..policy()
        };
        let record = plan_distribution(&community, &members("c1", 7, 3), &criteria(), policy, community.end_date).unwrap();
        assert_eq!(record.remainder_recipient.as_deref(), Some("w0"));

        let entries = settlement_entries(&record).unwrap();
        let w0_total: i64 = entries.iter().filter(|e| e.user_id == "w0").map(|e| e.amount).sum();
        assert_eq!(w0_total, 1_290);

        let rewards: i64 = entries.iter().filter(|e| e.kind == EarningKind::Reward).map(|e| e.amount).sum();
        assert_eq!(rewards as u64 + record.platform_fee_amount, record.total_stake_pool);
    }

    #[test]
    fn test_fee_rounds_half_up() {
        assert_eq!(platform_fee(5, 1_000).unwrap(), 1);      // 0.5 -> 1
        assert_eq!(platform_fee(4, 1_000).unwrap(), 0);      // 0.4 -> 0
        assert_eq!(platform_fee(15, 1_000).unwrap(), 2);     // 1.5 -> 2
        assert_eq!(platform_fee(40_000, 1_000).unwrap(), 4_000);
        assert_eq!(platform_fee(u64::MAX, 10_000).unwrap(), u64::MAX);
        assert!(platform_fee(100, 10_001).is_err());
    }

    #[test]
    fn test_pool_overflow_is_an_error() {
        assert!(matches!(split_pool(u64::MAX, 2, 1_000), Err(EngineError::Overflow(_))));
    }

    #[test]
    fn test_no_winners_refund_policy() {
        let community = community_fixture("c1", 10_000);
        let record = plan_distribution(&community, &members("c1", 0, 5), &criteria(), policy(), community.end_date).unwrap();

        assert_eq!(record.winner_count, 0);
        assert_eq!(record.reward_per_winner, 0);
        assert_eq!(record.refund_per_member, 9_000);

        let entries = settlement_entries(&record).unwrap();
        assert!(entries.iter().all(|e| e.kind != EarningKind::Reward));
        let routed: i64 = entries
            .iter()
            .filter(|e| e.kind != EarningKind::PlatformFee)
            .map(|e| e.amount)
            .sum();
        assert_eq!(routed as u64, record.distributable_amount);
        assert_eq!(settled_total(&entries), record.total_stake_pool as i128);
    }

    #[test]
    fn test_no_winners_retain_policy() {
        let community = community_fixture("c1", 10_000);
        let policy = SettlementPolicy {
            no_winner_policy: NoWinnerPolicy::RetainAsPlatformRevenue,
            ..policy()
        };
        let record = plan_distribution(&community, &members("c1", 0, 5), &criteria(), policy, community.end_date).unwrap();
        let entries = settlement_entries(&record).unwrap();

        assert!(entries.iter().all(|e| e.kind != EarningKind::Reward));
        let reserve: i64 = entries
            .iter()
            .filter(|e| e.kind == EarningKind::PlatformReserve)
            .map(|e| e.amount)
            .sum();
        assert_eq!(reserve, 45_000);
        assert_eq!(entries.iter().filter(|e| e.kind == EarningKind::Forfeit).count(), 5);
        assert_eq!(settled_total(&entries), 50_000);
    }

    #[test]
    fn test_money_is_conserved_across_shapes() {
        for stake in [1u64, 99, 1_000, 10_000, 12_345] {
            for total in 0..12usize {
                for winners in 0..=total {
                    for remainder_policy in [RemainderPolicy::Platform, RemainderPolicy::FirstWinner] {
                        for no_winner_policy in [NoWinnerPolicy::RefundMembers, NoWinnerPolicy::RetainAsPlatformRevenue] {
                            let community = community_fixture("c", stake);
                            let policy = SettlementPolicy { fee_bps: 1_000, no_winner_policy, remainder_policy };
                            let record = plan_distribution(
                                &community,
                                &members("c", winners, total - winners),
                                &criteria(),
                                policy,
                                community.end_date,
                            )
                            .unwrap();
                            let entries = settlement_entries(&record).unwrap();

                            assert_eq!(settled_total(&entries), record.total_stake_pool as i128);
                            assert!(record.reward_per_winner * record.winner_count as u64 <= record.distributable_amount);
                            let ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
                            assert_eq!(ids.len(), entries.len(), "duplicate entry ids");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_disqualified_and_unpaid_members_never_win() {
        let community = community_fixture("c1", 10_000);
        let mut all = members("c1", 3, 0);
        all[0].is_disqualified = true;
        all[1].stake_paid = false;

        let record = plan_distribution(&community, &all, &criteria(), policy(), community.end_date).unwrap();
        assert_eq!(record.member_count, 2);
        assert_eq!(record.winners, vec!["w2".to_string()]);
        assert_eq!(record.losers, vec!["w0".to_string()]);
    }

    #[test]
    fn test_meeting_hours_path_wins() {
        let criteria = CompletionCriteria {
            winning_threshold: 100.0,
            minimum_meeting_hours: Some(5.0),
        };
        let mut member = membership_fixture("c1", "alice");
        member.progress_percentage = 10.0;
        member.total_meeting_seconds = 5 * 3600;
        assert!(criteria.is_winner(&member));

        member.total_meeting_seconds = 5 * 3600 - 1;
        assert!(!criteria.is_winner(&member));
    }

    #[test]
    fn test_closure_predicate() {
        let community = community_fixture("c1", 10_000);
        let only_l0 = |m: &Membership| m.user_id == "l0";
        let record = plan_distribution(&community, &members("c1", 1, 2), &only_l0, policy(), community.end_date).unwrap();
        assert_eq!(record.winners, vec!["l0".to_string()]);
    }

    #[test]
    fn test_preview_projects_winners() {
        let community = community_fixture("c1", 10_000);
        let preview = preview_distribution(&community, &members("c1", 0, 4), 0.5, 1_000).unwrap();

        assert_eq!(preview.total_stake_pool, 40_000);
        assert_eq!(preview.projected_winner_count, 2);
        assert_eq!(preview.projected_reward_per_winner, 18_000);

        let none = preview_distribution(&community, &members("c1", 0, 4), 0.0, 1_000).unwrap();
        assert_eq!(none.projected_winner_count, 0);
        assert_eq!(none.projected_reward_per_winner, 0);

        assert!(preview_distribution(&community, &[], 1.5, 1_000).is_err());
    }

    fn ended_store(user_ids: &[&str]) -> Result<(tempfile::TempDir, HookedStore), Box<dyn std::error::Error>> {
        let (dir, inner) = temp_store()?;
        inner.insert_community(&Community {
            status: CommunityStatus::Ended,
            ..community_fixture("c1", 10_000)
        })?;
        for user_id in user_ids {
            inner.insert_membership(&membership_fixture("c1", user_id))?;
        }
        Ok((dir, HookedStore::new(inner)))
    }

    #[test]
    fn test_disqualification_during_rescore_is_not_paid() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, mut store) = ended_store(&["alice", "cheater"])?;
        // 점수 재계산 중간에 실격 처리가 끼어드는 상황
        store.before_progress_patch = Some(Box::new(|inner: &InnerStore, community_id: &str, user_id: &str| {
            if user_id == "cheater" {
                let _ = inner.set_membership_disqualified(community_id, user_id);
            }
        }));
        let config = EngineConfig::default();
        let everyone = |_: &Membership| true;
        let community = store.get_community_required("c1")?;

        let outcome = DistributionEngine::new(&store, &config, &everyone).distribute("c1", community.end_date)?;

        let record = outcome.record();
        assert_eq!(record.winners, vec!["alice".to_string()]);
        assert_eq!(record.losers, vec!["cheater".to_string()]);
        let entries = store.list_earnings_for_community("c1")?;
        assert!(!entries.iter().any(|e| e.user_id == "cheater" && e.kind == EarningKind::Reward));
        assert!(store.get_membership("c1", "cheater")?.map_or(false, |m| m.is_disqualified));
        Ok(())
    }

    #[test]
    fn test_distribution_gives_up_after_retries() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, mut store) = ended_store(&["alice"])?;
        // 계획은 저장되지만 매번 보이지 않음
        store.hide_distribution = true;
        let config = EngineConfig::default();
        let community = store.get_community_required("c1")?;

        let result = DistributionEngine::new(&store, &config, &criteria()).distribute("c1", community.end_date);

        match result {
            Err(err @ EngineError::Conflict { .. }) => {
                assert!(err.is_retryable());
                assert!(matches!(err, EngineError::Conflict { attempts, .. } if attempts == config.max_cas_retries));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(store.inner.list_earnings_for_community("c1")?.is_empty());
        Ok(())
    }
}
