//! Campaign end to end: prep, then extract, against the simulated world

use std::sync::{Arc, Mutex};
use std::time::Duration;

use volley_core::application::cost_model::JobCostModel;
use volley_core::application::{
    shutdown_channel, BatchExecutor, BatchPlanner, Campaign, ChannelBroker, ExecutorConfig,
    ExtractionPlanner, PassReport, PlannerConfig, SaturationPlanner, ShutdownToken,
};
use volley_core::port::id_provider::SequentialIdProvider;
use volley_core::port::time_provider::MonotonicTimeProvider;
use volley_core::port::{FleetProbe, TimeProvider};
use volley_core::AppError;
use volley_infra_system::{SimulatedWorld, TaskLauncher};

const TARGET: &str = "joesguns";

const WORLD: &str = r#"{
    "nodes": [
        {"id": "home", "capacity": 512},
        {"id": "n00dles", "capacity": 4},
        {"id": "foodnstuff", "capacity": 16}
    ],
    "targets": [{
        "name": "joesguns",
        "value": 500,
        "maxValue": 1000,
        "instability": 5,
        "minInstability": 1,
        "growthRate": 0.25,
        "stealPerThread": 0.004,
        "baseDurationMs": 10
    }]
}"#;

struct Setup {
    campaign: Campaign,
    world: Arc<SimulatedWorld>,
    broker: Arc<ChannelBroker>,
    launcher: Arc<TaskLauncher>,
}

fn setup(config: ExecutorConfig, worker_shutdown: Option<ShutdownToken>) -> Setup {
    let model = JobCostModel::default();
    let world = Arc::new(SimulatedWorld::from_json(model, WORLD).unwrap());
    let broker = Arc::new(ChannelBroker::new());
    broker.start().unwrap();
    let clock: Arc<dyn TimeProvider> = Arc::new(MonotonicTimeProvider::new());

    let mut launcher = TaskLauncher::new(world.clone(), broker.clone(), clock.clone(), model);
    if let Some(token) = worker_shutdown {
        launcher = launcher.with_shutdown(token);
    }
    let launcher = Arc::new(launcher);

    let mut executor = BatchExecutor::new(launcher.clone(), broker.clone(), clock, config);
    executor.bind_channel("campaign-test", Some(TARGET)).unwrap();

    let campaign = Campaign::new(
        Arc::new(SaturationPlanner::new(PlannerConfig::default())),
        world.clone(),
        world.clone(),
        executor,
        Arc::new(SequentialIdProvider::default()),
    );
    Setup {
        campaign,
        world,
        broker,
        launcher,
    }
}

async fn assert_fleet_idle(setup: &Setup) {
    assert_eq!(setup.launcher.running_count(), 0);
    let nodes = setup.world.nodes().await;
    assert!(nodes.iter().all(|n| n.free_capacity == n.total_capacity));
}

#[tokio::test(start_paused = true)]
async fn test_prep_then_extract() {
    let mut setup = setup(ExecutorConfig::default(), None);
    let (_sender, token) = shutdown_channel();

    let prep = setup
        .campaign
        .run_until_prepped(TARGET, &token)
        .await
        .unwrap();
    assert!(!prep.is_empty());
    assert!(setup.world.target_state(TARGET).unwrap().is_prepped());
    assert_eq!(setup.world.total_extracted(), 0.0);

    let extraction: Arc<dyn BatchPlanner> =
        Arc::new(ExtractionPlanner::new(PlannerConfig::default()));
    setup.campaign.set_planner(extraction);
    assert_eq!(setup.campaign.planner().name(), "extraction");

    let passes = setup
        .campaign
        .run_extraction(TARGET, Some(3), &token)
        .await
        .unwrap();
    assert_eq!(passes.len(), 3);
    for pass in &passes {
        assert_eq!(pass.strategy, "extraction");
        assert!(pass.in_order);
        assert_eq!(pass.launched, pass.jobs);
        assert!(pass.projection > 0.0);
    }

    // Every pass id is distinct and reports serialize for the CLI
    let mut ids: Vec<&str> = prep
        .iter()
        .chain(passes.iter())
        .map(|r| r.pass_id.as_str())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), prep.len() + passes.len());
    let json = serde_json::to_value(&passes[0]).unwrap();
    assert_eq!(json["strategy"], "extraction");
    assert!(json.get("passId").is_some());

    let state = setup.world.target_state(TARGET).unwrap();
    assert!(state.is_prepped());
    assert!(setup.world.total_extracted() > 0.0);
    assert_fleet_idle(&setup).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_between_passes() {
    let mut setup = setup(ExecutorConfig::default(), None);
    let (_sender, token) = shutdown_channel();
    setup
        .campaign
        .run_until_prepped(TARGET, &token)
        .await
        .unwrap();
    setup
        .campaign
        .set_planner(Arc::new(ExtractionPlanner::new(PlannerConfig::default())));

    let (sender, token) = shutdown_channel();
    sender.shutdown();
    let passes = setup
        .campaign
        .run_extraction(TARGET, None, &token)
        .await
        .unwrap();
    assert!(passes.is_empty());
    assert_eq!(setup.world.total_extracted(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_workers_desync_and_free_capacity() {
    let config = ExecutorConfig {
        completion_grace_ms: 100,
        ..ExecutorConfig::default()
    };
    let (abort_sender, abort) = shutdown_channel();
    let mut setup = setup(config, Some(abort));
    let before = setup.world.target_state(TARGET).unwrap();

    // Fires after the start broadcast, before the first stage begins
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        abort_sender.shutdown();
    });

    let err = setup.campaign.run_pass(TARGET).await.unwrap_err();
    match err {
        AppError::DesyncDetected { outstanding, .. } => assert!(outstanding > 0),
        other => panic!("expected desync, got {:?}", other),
    }

    assert_eq!(setup.world.target_state(TARGET).unwrap(), before);
    assert_fleet_idle(&setup).await;

    // The channel stays usable for the next pass
    assert!(setup.broker.find(TARGET).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_finished_passes_are_published_before_a_failure() {
    let config = ExecutorConfig {
        completion_grace_ms: 100,
        ..ExecutorConfig::default()
    };
    let (abort_sender, abort) = shutdown_channel();
    let setup = setup(config, Some(abort));
    let published: Arc<Mutex<Vec<PassReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();
    let mut campaign = setup
        .campaign
        .with_report_sink(Arc::new(move |report: &PassReport| {
            sink.lock().unwrap().push(report.clone());
        }));

    let (_sender, token) = shutdown_channel();
    let prep = campaign.run_until_prepped(TARGET, &token).await.unwrap();
    assert_eq!(*published.lock().unwrap(), prep);

    // Workers of the next pass are aborted after the start broadcast
    campaign.set_planner(Arc::new(ExtractionPlanner::new(PlannerConfig::default())));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        abort_sender.shutdown();
    });
    let err = campaign
        .run_extraction(TARGET, Some(3), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DesyncDetected { .. }));
    assert_eq!(*published.lock().unwrap(), prep);
}
