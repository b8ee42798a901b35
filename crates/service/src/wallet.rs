//! Read paths over the earnings ledger.
//!
//! Nothing here is cached or stored separately; every figure is summed from
//! the entries on each call.

use crate::error::EngineResult;
use crate::parser::ledger::{DistributionStatus, EarningEntry, EarningKind};
use crate::store::LedgerStore;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WalletSummary {
    pub user_id: String,
    pub total_staked: u64,
    pub total_rewards: u64,
    pub total_refunds: u64,
    /// Σ of every entry for the user
    pub net_balance: i64,
    /// Stake in communities whose distribution has not settled
    pub active_stake: u64,
    pub communities_joined: u32,
    pub communities_won: u32,
    pub roi_percentage: f64,
}

pub fn summarize(
    user_id: &str,
    entries: &[EarningEntry],
    settled_communities: &HashSet<String>,
) -> WalletSummary {
    let mut total_staked = 0u64;
    let mut total_rewards = 0u64;
    let mut total_refunds = 0u64;
    let mut net_balance = 0i64;
    let mut active_stake = 0u64;
    let mut joined = HashSet::new();
    let mut won = HashSet::new();

    for entry in entries.iter().filter(|e| e.user_id == user_id) {
        net_balance = net_balance.saturating_add(entry.amount);
        match entry.kind {
            EarningKind::StakePayment => {
                let stake = entry.amount.unsigned_abs();
                total_staked = total_staked.saturating_add(stake);
                if !settled_communities.contains(&entry.community_id) {
                    active_stake = active_stake.saturating_add(stake);
                }
                joined.insert(entry.community_id.as_str());
            }
            EarningKind::Reward => {
                total_rewards = total_rewards.saturating_add(entry.amount.unsigned_abs());
                won.insert(entry.community_id.as_str());
            }
            EarningKind::Refund => {
                total_refunds = total_refunds.saturating_add(entry.amount.unsigned_abs());
            }
            EarningKind::Forfeit | EarningKind::PlatformFee | EarningKind::PlatformReserve => {}
        }
    }

    // 정산이 끝난 스테이크만 수익률 계산에 포함
    let settled_stake = total_staked - active_stake;
    let roi_percentage = if settled_stake == 0 {
        0.0
    } else {
        (total_rewards as f64 + total_refunds as f64 - settled_stake as f64) / settled_stake as f64 * 100.0
    };

    WalletSummary {
        user_id: user_id.to_string(),
        total_staked,
        total_rewards,
        total_refunds,
        net_balance,
        active_stake,
        communities_joined: joined.len() as u32,
        communities_won: won.len() as u32,
        roi_percentage,
    }
}

pub fn wallet_summary<S: LedgerStore + ?Sized>(store: &S, user_id: &str) -> EngineResult<WalletSummary> {
    let entries = store.list_earnings_for_user(user_id)?;

    let mut settled = HashSet::new();
    let communities: HashSet<&str> = entries.iter().map(|e| e.community_id.as_str()).collect();
    for community_id in communities {
        if let Some(record) = store.get_distribution(community_id)? {
            if record.status == DistributionStatus::Distributed {
                settled.insert(community_id.to_string());
            }
        }
    }

    Ok(summarize(user_id, &entries, &settled))
}

/// Newest first, at most `limit` entries.
pub fn transaction_history<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: &str,
    limit: usize,
) -> EngineResult<Vec<EarningEntry>> {
    let mut entries = store.list_earnings_for_user(user_id)?;
    entries.reverse();
    entries.truncate(limit);
    Ok(entries)
}

/// Every entry booked against one community, with the net per account.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommunityLedger {
    pub community_id: String,
    pub entries: Vec<EarningEntry>,
    pub balances: BTreeMap<String, i64>,
    /// Σ of all entries; zero once the community is settled
    pub net: i64,
}

pub fn community_ledger<S: LedgerStore + ?Sized>(store: &S, community_id: &str) -> EngineResult<CommunityLedger> {
    store.get_community_required(community_id)?;
    let entries = store.list_earnings_for_community(community_id)?;

    let mut balances = BTreeMap::new();
    let mut net = 0i64;
    for entry in &entries {
        *balances.entry(entry.user_id.clone()).or_insert(0i64) += entry.amount;
        net = net.saturating_add(entry.amount);
    }

    Ok(CommunityLedger {
        community_id: community_id.to_string(),
        entries,
        balances,
        net,
    })
}
