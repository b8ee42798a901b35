use chrono::{DateTime, Duration, TimeZone, Utc};
use pledge_database::basic_db::{InnerDatabase, SafeDatabase};
use pledge_service::config::EngineConfig;
use pledge_service::distribution::{
    get_community_distribution, CompletionCriteria, DistributionEngine, DistributionOutcome,
    DistributionView, plan_distribution, settlement_entries, SettlementPolicy,
};
use pledge_service::lifecycle::advance_statuses;
use pledge_service::membership::{create_community, join_community, record_attendance, AttendanceInput};
use pledge_service::parser::community::{Community, NewCommunity};
use pledge_service::progress::{ProgressScorer, ProgressWeights};
use pledge_service::parser::ledger::{DistributionStatus, EarningKind, PLATFORM_ACCOUNT};
use pledge_service::sweeper::Sweeper;
use pledge_service::wallet::wallet_summary;
use pledge_service::{EngineError, LedgerStore, MdbxLedgerStore};
use tempfile::{tempdir, TempDir};

type Store = MdbxLedgerStore<InnerDatabase>;

fn open_store() -> Result<(TempDir, Store), Box<dyn std::error::Error>> {
    let temp_dir = tempdir()?;
    let db = InnerDatabase::new(temp_dir.path().join("test_db"))?;
    Ok((temp_dir, MdbxLedgerStore::new(db)))
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 29, 0, 0, 0).unwrap()
}

/// Community with `members` members (creator included); the first
/// `finishers` of them log the full 10 required hours.
fn seeded_community(
    store: &Store,
    config: &EngineConfig,
    members: usize,
    finishers: usize,
) -> Result<Community, Box<dyn std::error::Error>> {
    let community = create_community(
        store,
        NewCommunity {
            title: "Ship a side project".to_string(),
            goal: "Demo day".to_string(),
            category: "coding".to_string(),
            creator_id: "user0".to_string(),
            stake_amount: 10_000,
            max_members: 10,
            total_minimum_hours: 10.0,
            start_date: start(),
            end_date: end(),
            weekly_meeting_days: vec!["tuesday".to_string()],
        },
        start() - Duration::days(3),
    )?;

    for i in 1..members {
        join_community(store, &community.id, &format!("user{}", i), start() - Duration::days(1))?;
    }

    for i in 0..finishers {
        record_attendance(
            store,
            config,
            &community.id,
            AttendanceInput {
                user_id: format!("user{}", i),
                session_id: format!("session{}", i),
                duration_seconds: 10 * 3600,
                screen_shared: true,
                completed: true,
            },
            start() + Duration::days(2),
        )?;
    }

    Ok(community)
}

// 정산은 하지 않고 상태만 ended로
fn end_community(store: &Store, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    advance_statuses(store, end(), config.max_cas_retries)?;
    Ok(())
}

#[test]
fn test_sweep_settles_ended_community() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 4, 2)?;
    let criteria = CompletionCriteria::from(&config);

    let report = Sweeper::new(&store, &config, &criteria).run_once(end() + Duration::hours(1))?;
    assert_eq!(report.distributions.len(), 1);
    assert!(report.failures.is_empty());

    let record = report.distributions[0].record().clone();
    assert_eq!(record.status, DistributionStatus::Distributed);
    assert_eq!(record.total_stake_pool, 40_000);
    assert_eq!(record.platform_fee_amount, 4_000);
    assert_eq!(record.reward_per_winner, 18_000);
    assert_eq!(record.winners, vec!["user0".to_string(), "user1".to_string()]);

    let entries = store.list_earnings_for_community(&community.id)?;
    let rewards: i64 = entries.iter().filter(|e| e.kind == EarningKind::Reward).map(|e| e.amount).sum();
    assert_eq!(rewards as u64 + record.platform_fee_amount, record.total_stake_pool);

    // 스테이크 납부 + 정산 항목의 합은 0 (돈이 생기거나 사라지지 않음)
    let net: i64 = entries.iter().map(|e| e.amount).sum();
    assert_eq!(net, 0);

    let winner = wallet_summary(&store, "user0")?;
    assert_eq!(winner.net_balance, 8_000);
    assert_eq!(winner.active_stake, 0);
    let loser = wallet_summary(&store, "user3")?;
    assert_eq!(loser.net_balance, -10_000);
    assert!((loser.roi_percentage + 100.0).abs() < 1e-9);

    // 두 번째 스윕은 아무것도 하지 않음
    let again = Sweeper::new(&store, &config, &criteria).run_once(end() + Duration::hours(2))?;
    assert!(again.distributions.is_empty());
    Ok(())
}

#[test]
fn test_distribution_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 3, 2)?;
    end_community(&store, &config)?;
    let criteria = CompletionCriteria::from(&config);
    let engine = DistributionEngine::new(&store, &config, &criteria);

    let first = engine.distribute(&community.id, end())?;
    let second = engine.distribute(&community.id, end() + Duration::days(10))?;

    assert!(matches!(first, DistributionOutcome::Distributed(_)));
    assert!(matches!(second, DistributionOutcome::AlreadyDistributed(_)));
    assert_eq!(first.record(), second.record());
    assert_eq!(first.record().reward_per_winner, 13_500);

    let rewards = store
        .list_earnings_for_community(&community.id)?
        .into_iter()
        .filter(|e| e.kind == EarningKind::Reward)
        .count();
    assert_eq!(rewards, 2);
    Ok(())
}

#[test]
fn test_distribution_rejects_running_and_missing_communities() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 2, 1)?;
    let criteria = CompletionCriteria::from(&config);
    let engine = DistributionEngine::new(&store, &config, &criteria);

    assert!(matches!(
        engine.distribute(&community.id, start()),
        Err(EngineError::NotEnded { .. })
    ));
    assert!(matches!(
        engine.distribute("missing", end()),
        Err(EngineError::NotFound { .. })
    ));
    assert!(store.get_distribution(&community.id)?.is_none());
    Ok(())
}

#[test]
fn test_partial_settlement_is_repaired() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 4, 2)?;
    end_community(&store, &config)?;
    let criteria = CompletionCriteria::from(&config);

    // 크래시 재현: calculated 상태로 기록하고 보상 항목 하나만 반영
    let ended = store.get_community_required(&community.id)?;
    let memberships = ProgressScorer::new(&store, ProgressWeights::from(&config)).score_all(&ended, end())?;
    let mut record = plan_distribution(&ended, &memberships, &criteria, SettlementPolicy::from(&config), end())?;
    record.status = DistributionStatus::Calculated;
    assert!(store.insert_distribution_if_absent(&record)?);
    let planned = settlement_entries(&record)?;
    let first_reward = planned
        .iter()
        .find(|e| e.kind == EarningKind::Reward)
        .ok_or("no reward planned")?;
    assert!(store.append_earning_entry(first_reward)?);

    let engine = DistributionEngine::new(&store, &config, &criteria);
    let outcome = engine.distribute(&community.id, end() + Duration::days(1))?;
    assert!(matches!(outcome, DistributionOutcome::Repaired(_)));
    assert_eq!(outcome.record().status, DistributionStatus::Distributed);

    let entries = store.list_earnings_for_community(&community.id)?;
    let rewards: Vec<_> = entries.iter().filter(|e| e.kind == EarningKind::Reward).collect();
    assert_eq!(rewards.len(), record.winner_count as usize);
    let net: i64 = entries.iter().map(|e| e.amount).sum();
    assert_eq!(net, 0);
    Ok(())
}

#[test]
fn test_concurrent_triggers_settle_once() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 5, 3)?;
    end_community(&store, &config)?;
    let criteria = CompletionCriteria::from(&config);

    let outcomes: Vec<Result<DistributionOutcome, EngineError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let config = &config;
                let criteria = &criteria;
                let community_id = community.id.clone();
                scope.spawn(move || {
                    DistributionEngine::new(&store, config, criteria).distribute(&community_id, end())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut distributed = 0;
    for outcome in outcomes {
        if let DistributionOutcome::Distributed(_) = outcome? {
            distributed += 1;
        }
    }
    assert_eq!(distributed, 1);

    let record = store.get_distribution(&community.id)?.ok_or("no record")?;
    assert_eq!(record.status, DistributionStatus::Distributed);
    let entries = store.list_earnings_for_community(&community.id)?;
    assert_eq!(
        entries.iter().filter(|e| e.kind == EarningKind::Reward).count(),
        record.winner_count as usize
    );
    assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 0);
    Ok(())
}

#[test]
fn test_no_winners_are_refunded() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 5, 0)?;
    end_community(&store, &config)?;
    let criteria = CompletionCriteria::from(&config);

    let outcome = DistributionEngine::new(&store, &config, &criteria).distribute(&community.id, end())?;
    let record = outcome.record();
    assert_eq!(record.winner_count, 0);

    let entries = store.list_earnings_for_community(&community.id)?;
    assert!(entries.iter().all(|e| e.kind != EarningKind::Reward));
    let routed: i64 = entries
        .iter()
        .filter(|e| matches!(e.kind, EarningKind::Refund | EarningKind::PlatformReserve))
        .map(|e| e.amount)
        .sum();
    assert_eq!(routed as u64, record.distributable_amount);

    let platform: i64 = entries
        .iter()
        .filter(|e| e.user_id == PLATFORM_ACCOUNT)
        .map(|e| e.amount)
        .sum();
    assert_eq!(platform, 5_000);
    Ok(())
}

#[test]
fn test_view_switches_from_preview_to_committed() -> Result<(), Box<dyn std::error::Error>> {
    let (_dir, store) = open_store()?;
    let config = EngineConfig::default();
    let community = seeded_community(&store, &config, 4, 2)?;

    match get_community_distribution(&store, &config, &community.id, 0.5)? {
        DistributionView::Preview(preview) => {
            assert_eq!(preview.projected_winner_count, 2);
            assert_eq!(preview.projected_reward_per_winner, 18_000);
        }
        other => panic!("expected preview, got {:?}", other),
    }

    end_community(&store, &config)?;
    let criteria = CompletionCriteria::from(&config);
    DistributionEngine::new(&store, &config, &criteria).distribute(&community.id, end())?;

    assert!(matches!(
        get_community_distribution(&store, &config, &community.id, 0.5)?,
        DistributionView::Committed(_)
    ));
    Ok(())
}
