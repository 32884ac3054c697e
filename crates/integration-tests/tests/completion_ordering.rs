//! Completion ordering under startup jitter
//!
//! Workers of very different durations, each started up to 2ms late, must
//! still finish in their planned order.

use std::sync::Arc;
use std::time::Duration;

use volley_core::application::cost_model::JobCostModel;
use volley_core::application::{
    shutdown_channel, BatchExecutor, Campaign, ChannelBroker, ExecutorConfig, ExtractionPlanner,
    PlannerConfig,
};
use volley_core::domain::{Job, JobKind, JobSpec, ProcessId, StageSpacing};
use volley_core::port::id_provider::SequentialIdProvider;
use volley_core::port::time_provider::MonotonicTimeProvider;
use volley_core::port::{JobLauncher, TimeProvider};
use volley_infra_system::{SimulatedWorld, TaskLauncher};

const TARGET: &str = "joesguns";
const TRIALS: usize = 200;
const MAX_JITTER: Duration = Duration::from_millis(2);
const LAUNCH_BUFFER_MS: u64 = 10;

/// (stage, work duration in ms), finishing at offsets 0, +1, +2
const STAGES: [(JobKind, f64); 3] = [
    (JobKind::Primary, 10.0),
    (JobKind::Secondary, 40.0),
    (JobKind::Restore1, 50.0),
];

const WORLD: &str = r#"{
    "nodes": [{"id": "home", "capacity": 4096}],
    "targets": [{
        "name": "joesguns",
        "value": 1000,
        "maxValue": 1000,
        "instability": 1,
        "minInstability": 1,
        "growthRate": 0.25,
        "stealPerThread": 0.002,
        "baseDurationMs": 10
    }]
}"#;

struct Fleet {
    world: Arc<SimulatedWorld>,
    broker: Arc<ChannelBroker>,
    clock: Arc<dyn TimeProvider>,
    launcher: Arc<TaskLauncher>,
}

fn fleet() -> Fleet {
    let model = JobCostModel::default();
    let world = Arc::new(SimulatedWorld::from_json(model, WORLD).unwrap());
    let broker = Arc::new(ChannelBroker::new());
    broker.start().unwrap();
    let clock: Arc<dyn TimeProvider> = Arc::new(MonotonicTimeProvider::new());
    let launcher = Arc::new(
        TaskLauncher::new(world.clone(), broker.clone(), clock.clone(), model)
            .with_startup_jitter(MAX_JITTER),
    );
    Fleet {
        world,
        broker,
        clock,
        launcher,
    }
}

/// Launch the three stages, broadcast, and return (planned, observed) order
async fn run_trial(fleet: &Fleet, trial: usize) -> (Vec<ProcessId>, Vec<ProcessId>) {
    let channel_id = fleet.broker.acquire("ordering-test", None).unwrap();
    let channel = fleet.broker.channel(channel_id).unwrap();

    let mut planned = Vec::new();
    for (job_index, (kind, work_duration)) in STAGES.iter().enumerate() {
        let job = Job::new(*kind, 1, "home");
        let spec = JobSpec {
            node_id: "home".to_string(),
            kind: *kind,
            target: TARGET.to_string(),
            work_duration: *work_duration,
            channel_id: Some(channel_id),
            batch_index: 0,
            job_index,
            spacing: StageSpacing::default(),
        };
        planned.push(fleet.launcher.launch(&job, &spec).await.unwrap());
    }

    tokio::time::sleep(Duration::from_millis(LAUNCH_BUFFER_MS)).await;
    let longest = STAGES.iter().map(|(_, d)| *d).fold(0.0, f64::max);
    let end_time = fleet.clock.now_millis() + longest + LAUNCH_BUFFER_MS as f64;
    channel.broadcast_start(end_time).unwrap();

    let mut observed = Vec::new();
    for _ in 0..STAGES.len() {
        let owner = channel
            .recv_done(Duration::from_secs(1))
            .await
            .unwrap_or_else(|e| panic!("trial {}: {}", trial, e));
        observed.push(owner);
    }

    fleet.broker.retire(channel_id, None).unwrap();
    (planned, observed)
}

#[tokio::test(start_paused = true)]
async fn test_jittered_workers_complete_in_order() {
    let fleet = fleet();

    let mut in_order = 0;
    for trial in 0..TRIALS {
        let (planned, observed) = run_trial(&fleet, trial).await;
        let mut sorted = observed.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, planned, "trial {} lost a completion", trial);
        if observed == planned {
            in_order += 1;
        }
    }

    assert!(
        in_order * 100 >= TRIALS * 99,
        "only {} of {} trials completed in order",
        in_order,
        TRIALS
    );
    assert_eq!(fleet.launcher.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_extraction_passes_stay_in_order_with_jitter() {
    let fleet = fleet();
    let mut executor = BatchExecutor::new(
        fleet.launcher.clone(),
        fleet.broker.clone(),
        fleet.clock.clone(),
        ExecutorConfig::default(),
    );
    executor.bind_channel("ordering-test", Some(TARGET)).unwrap();

    let mut campaign = Campaign::new(
        Arc::new(ExtractionPlanner::new(PlannerConfig::default())),
        fleet.world.clone(),
        fleet.world.clone(),
        executor,
        Arc::new(SequentialIdProvider::default()),
    );
    let (_sender, token) = shutdown_channel();

    let reports = campaign
        .run_extraction(TARGET, Some(5), &token)
        .await
        .unwrap();

    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.batches > 0 && r.launched == r.jobs));
    assert!(reports.iter().all(|r| r.in_order));
    assert!(fleet.world.target_state(TARGET).unwrap().is_prepped());
    assert!(fleet.world.total_extracted() > 0.0);
}
