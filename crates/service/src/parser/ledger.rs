use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved ledger account that receives the platform fee and reserves.
pub const PLATFORM_ACCOUNT: &str = "platform";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Pending,
    Calculated,
    Distributed,
}

impl fmt::Display for DistributionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionStatus::Pending => write!(f, "pending"),
            DistributionStatus::Calculated => write!(f, "calculated"),
            DistributionStatus::Distributed => write!(f, "distributed"),
        }
    }
}

/// What happens to the distributable amount when nobody wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoWinnerPolicy {
    /// Split back across paid members; division remainder goes to the platform.
    RefundMembers,
    /// Booked as a platform reserve entry.
    RetainAsPlatformRevenue,
}

/// Who receives the cents left over by integer division of the reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    Platform,
    /// The first winner in user-id order.
    FirstWinner,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub community_id: String,
    pub stake_amount: u64,
    pub member_count: u32,
    pub total_stake_pool: u64,
    pub platform_fee_amount: u64,
    pub distributable_amount: u64,
    pub winner_count: u32,
    pub reward_per_winner: u64,
    pub remainder_amount: u64,
    pub remainder_recipient: Option<String>,
    pub refund_per_member: u64,
    pub winners: Vec<String>,
    pub losers: Vec<String>,
    pub no_winner_policy: Option<NoWinnerPolicy>,
    pub status: DistributionStatus,
    pub distribution_date: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningKind {
    StakePayment,
    Reward,
    Forfeit,
    Refund,
    PlatformFee,
    PlatformReserve,
}

impl fmt::Display for EarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EarningKind::StakePayment => "stake_payment",
            EarningKind::Reward => "reward",
            EarningKind::Forfeit => "forfeit",
            EarningKind::Refund => "refund",
            EarningKind::PlatformFee => "platform_fee",
            EarningKind::PlatformReserve => "platform_reserve",
        };
        write!(f, "{}", name)
    }
}

/// Typed value for the ledger entry extension map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Amount(i64),
    Percentage(f64),
    Flag(bool),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EarningEntry {
    pub id: String,                     // deterministic, appending twice is a no-op
    pub user_id: String,
    pub community_id: String,
    pub amount: i64,                    // signed minor units
    pub kind: EarningKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl EarningEntry {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        community_id: impl Into<String>,
        amount: i64,
        kind: EarningKind,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            community_id: community_id.into(),
            amount,
            kind,
            description: description.into(),
            created_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: MetadataValue) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}
