#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//! End-to-end run of the built-in fork/reorg scenario on the simulated
//! network, plus the failure classification of deliberately broken nodes.

use minerid_testing_framework::prelude::*;
use minerid_testing_framework::cycle::CycleOutcome;
use std::collections::HashMap;

struct Run {
    _root: TempDataDir,
    network: SimNetwork,
    executor: ScenarioExecutor,
}

fn setup(sim: SimConfig, config: HarnessConfig) -> Run {
    let _ = env_logger::builder().is_test(true).try_init();
    let root = create_temp_datadir().unwrap();
    let network = SimNetwork::builder()
        .with_config(sim)
        .with_datadir_root(root.path())
        .build()
        .unwrap();
    let executor =
        ScenarioExecutor::from_sim(config, Arc::new(PausedClock::new()), &network).unwrap();
    Run {
        _root: root,
        network,
        executor,
    }
}

/// Active-chain txids of `node`, keyed by txid with the count of blocks
/// holding each
async fn chain_tx_counts(node: &dyn NodeRpc) -> HashMap<minerid_common::crypto::Hash, usize> {
    let height = node.get_block_count().await.unwrap();
    let mut counts = HashMap::new();
    for h in 1..=height {
        let hash = node.get_block_hash(h).await.unwrap();
        let block = node.get_block(&hash).await.unwrap();
        for txid in block.txids {
            *counts.entry(txid).or_insert(0) += 1;
        }
    }
    counts
}

#[tokio::test(start_paused = true)]
async fn test_default_scenario_passes() {
    let mut run = setup(SimConfig::default(), HarnessConfig::default());
    let scenario = default_scenario().unwrap();

    let report = run.executor.execute(&scenario).await.unwrap();
    assert!(report.success);
    assert_eq!(report.steps_executed, scenario.steps.len());

    // fork point marks
    assert_eq!(run.executor.marks().get("h"), Some(&105));
    assert_eq!(run.executor.marks().get("fork"), Some(&106));

    // 1 shared + 3 fork (2 pending) + 5 competing + 2 re-mined + 5 after rollback
    assert_eq!(report.cycles.len(), 16);
    let pending: Vec<usize> = report
        .cycles
        .iter()
        .enumerate()
        .filter(|(_, c)| c.outcome == CycleOutcome::LeftPending)
        .map(|(i, _)| i + 1)
        .collect();
    assert_eq!(pending, vec![2, 3]);

    // both participants end on the same tip: fork + 1, then 3 + 2 blocks
    let final_views = &report.final_views;
    assert_eq!(final_views.len(), 2);
    assert!(final_views[0].same_tip(&final_views[1]));
    assert_eq!(final_views[0].tip_height, 112);
    assert!(final_views.iter().all(|v| v.mempool.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn test_every_identity_tx_mined_exactly_once_in_final_chain() {
    let mut run = setup(SimConfig::default(), HarnessConfig::default());
    let report = run
        .executor
        .execute(&default_scenario().unwrap())
        .await
        .unwrap();

    let node = run.network.node(0).unwrap();
    let counts = chain_tx_counts(&node).await;
    for cycle in &report.cycles {
        assert_eq!(
            counts.get(&cycle.txid),
            Some(&1),
            "identity tx for height {} not mined exactly once",
            cycle.height
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_funding_records_persisted() {
    let mut run = setup(SimConfig::default(), HarnessConfig::default());
    run.executor
        .execute(&default_scenario().unwrap())
        .await
        .unwrap();

    for participant in run.executor.participants() {
        let expected = participant.funding.as_ref().unwrap();
        let stored = FundingStore::new(&participant.datadir).load().await.unwrap();
        assert_eq!(&stored, expected);
    }

    let a = &run.executor.participants()[0].funding.as_ref().unwrap().destination;
    let b = &run.executor.participants()[1].funding.as_ref().unwrap().destination;
    assert_ne!(a, b);
}

#[tokio::test(start_paused = true)]
async fn test_append_mode_writes_one_record_per_funding() {
    let config = HarnessConfig {
        funding_write_mode: FundingWriteMode::Append,
        ..HarnessConfig::default()
    };
    let mut run = setup(SimConfig::default(), config);
    run.executor
        .execute(&default_scenario().unwrap())
        .await
        .unwrap();

    for participant in run.executor.participants() {
        let store = FundingStore::new(&participant.datadir).with_mode(FundingWriteMode::Append);
        assert_eq!(store.record_count().await.unwrap(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_tx_left_in_mempool_after_mining_is_a_violation() {
    let sim = SimConfig {
        faults: SimFaults {
            keep_mined_in_mempool: true,
            ..SimFaults::default()
        },
        ..SimConfig::default()
    };
    let mut run = setup(sim, HarnessConfig::default());

    let failure = run
        .executor
        .execute(&default_scenario().unwrap())
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::InvariantViolation);
    assert_eq!(
        failure.phase,
        Phase::Cycle {
            number: 1,
            participant: 0
        }
    );
    match &failure.error {
        HarnessError::InvariantViolation(v) => assert_eq!(v.check, "mined_exactly_once"),
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(failure.views.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lost_blocks_time_out_during_setup() {
    let artifacts = create_temp_datadir().unwrap();
    let sim = SimConfig {
        faults: SimFaults {
            drop_relayed_blocks: true,
            ..SimFaults::default()
        },
        ..SimConfig::default()
    };
    let config = HarnessConfig {
        artifacts_dir: Some(artifacts.path_buf()),
        ..HarnessConfig::default()
    };
    let mut run = setup(sim, config);

    let failure = run
        .executor
        .execute(&default_scenario().unwrap())
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Timeout);
    assert_eq!(failure.phase, Phase::Setup);
    assert!(matches!(failure.error, HarnessError::ConvergenceTimeout { .. }));

    let path = std::fs::read_dir(artifacts.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let artifact = ArtifactCollector::load(&path).await.unwrap();
    assert_eq!(artifact.metadata.failure_kind, Some(ErrorKind::Timeout));
    assert_eq!(artifact.metadata.phase, Some(Phase::Setup));
    assert!(artifact.metadata.failure_reason.unwrap().contains("all tips equal"));
}
