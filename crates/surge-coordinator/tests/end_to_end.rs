//! End-to-end tests: coordinator over real TCP with simulated workers

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use surge_coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, MetricsView, RampPlan, SchedulerState,
};
use surge_test::{Directive, FleetBuilder, QoeProfile, SimulatedWorker};

fn config(steps: Vec<u64>, interval: Duration, start_delay: Duration) -> CoordinatorConfig {
    CoordinatorConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ramp: RampPlan::new(steps, interval),
        empty_backoff: Duration::from_millis(50),
        start_delay,
        aggregate_interval: Duration::from_millis(100),
        label: "e2e".to_string(),
        ..CoordinatorConfig::default()
    }
}

async fn start(config: CoordinatorConfig) -> CoordinatorHandle {
    Coordinator::new(config).start().await.unwrap()
}

async fn eventually<F: Fn(&MetricsView) -> bool>(view: &MetricsView, check: F) -> bool {
    for _ in 0..100 {
        if check(view) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn directive(clients: u64, step: u64) -> Option<Directive> {
    Some(Directive { clients, step })
}

#[tokio::test]
async fn test_three_nodes_receive_partitioned_targets() {
    let coordinator = start(config(
        vec![8, 5],
        Duration::from_millis(300),
        Duration::from_millis(500),
    ))
    .await;

    let mut fleet = FleetBuilder::new()
        .with_nodes(3)
        .connect(coordinator.local_addr())
        .await
        .unwrap();
    assert_eq!(
        fleet.ids().iter().map(ToString::to_string).collect::<Vec<_>>(),
        vec!["node-1", "node-2", "node-3"]
    );

    assert_eq!(
        fleet.next_directives().await.unwrap(),
        vec![directive(3, 0), directive(3, 0), directive(2, 0)]
    );
    assert_eq!(
        fleet.next_directives().await.unwrap(),
        vec![directive(2, 1), directive(2, 1), directive(1, 1)]
    );

    let view = coordinator.view();
    assert!(eventually(&view, |v| v.scheduler().state == SchedulerState::Done).await);

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.steps_shipped, 2);
    assert_eq!(stats.admitted, 3);
}

#[tokio::test]
async fn test_reports_fold_into_cluster_snapshot() {
    let (records_tx, mut records_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(config(
        vec![15],
        Duration::from_secs(60),
        Duration::ZERO,
    ))
    .with_records(records_tx)
    .start()
    .await
    .unwrap();
    let view = coordinator.view();

    let mut a = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    let mut b = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();

    a.report(json!({"connected": 10, "avgStartup": 800, "avgBitrate": 3000, "cpu": 0.4}))
        .await
        .unwrap();
    b.report(json!({"connected": 5, "avgStartup": 400, "avgBitrate": 1000, "mem": 0.7}))
        .await
        .unwrap();

    assert!(eventually(&view, |v| v.cluster().total_clients == 15).await);
    let cluster = view.cluster();
    assert_eq!(cluster.avg_startup, 600.0);
    assert_eq!(cluster.avg_bitrate, 2000.0);
    assert_eq!(cluster.active_nodes, 2);

    let nodes = view.nodes();
    assert_eq!(nodes[&a.node_id()].cpu, Some(0.4));
    assert_eq!(nodes[&b.node_id()].mem, Some(0.7));

    // a and b report over separate connections; arrival order is free
    let mut reporters = Vec::new();
    for _ in 0..2 {
        let record = records_rx.recv().await.unwrap();
        assert_eq!(record.label, "e2e");
        reporters.push(record.node_id);
    }
    reporters.sort();
    assert_eq!(reporters, vec![a.node_id(), b.node_id()]);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_lines_keep_worker_connected() {
    let coordinator = start(config(vec![1], Duration::from_secs(60), Duration::ZERO)).await;
    let view = coordinator.view();

    let mut worker = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    worker.send_raw("this is not json").await.unwrap();
    worker.send_raw(r#"{"type":"hello"}"#).await.unwrap();
    worker.send_raw(r#"{"type":"report"}"#).await.unwrap();
    worker.report(json!({"connected": 7})).await.unwrap();

    assert!(eventually(&view, |v| v.cluster().total_clients == 7).await);
    assert_eq!(view.scheduler().connected_nodes, 1);

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.reports_accepted, 1);
}

#[tokio::test]
async fn test_invalid_utf8_discarded_without_disconnect() {
    let coordinator = start(config(vec![1], Duration::from_secs(60), Duration::ZERO)).await;
    let view = coordinator.view();

    let mut worker = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    worker.send_bytes(b"\xff\xfe\n").await.unwrap();
    worker.report(json!({"connected": 3})).await.unwrap();

    assert!(eventually(&view, |v| v.cluster().total_clients == 3).await);
    assert_eq!(view.scheduler().connected_nodes, 1);

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.reports_accepted, 1);
    assert_eq!(stats.disconnected, 0);
}

#[tokio::test]
async fn test_oversized_line_discarded_without_disconnect() {
    let coordinator = start(CoordinatorConfig {
        max_line_length: 256,
        ..config(vec![1], Duration::from_secs(60), Duration::ZERO)
    })
    .await;
    let view = coordinator.view();

    let mut worker = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    let flood = vec![b'x'; 10_000];
    worker.send_bytes(&flood).await.unwrap();
    worker.send_bytes(b"\n").await.unwrap();
    worker.report(json!({"connected": 4})).await.unwrap();

    assert!(eventually(&view, |v| v.cluster().total_clients == 4).await);
    assert_eq!(view.scheduler().connected_nodes, 1);

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.reports_accepted, 1);
}

#[tokio::test]
async fn test_step_waits_for_first_node() {
    let coordinator = start(config(vec![2], Duration::from_secs(60), Duration::ZERO)).await;
    let view = coordinator.view();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = view.scheduler();
    assert_eq!(status.state, SchedulerState::WaitingForNodes);
    assert_eq!(status.current_step, None);

    let mut worker = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    assert_eq!(worker.next_directive().await.unwrap(), directive(2, 0));
    assert_eq!(worker.target(), 2);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_removes_node_and_ids_are_not_reused() {
    let coordinator =
        start(config(vec![4], Duration::from_secs(60), Duration::from_secs(60))).await;
    let view = coordinator.view();

    let mut fleet = FleetBuilder::new()
        .with_nodes(2)
        .with_profile(QoeProfile::good())
        .with_seed(11)
        .connect(coordinator.local_addr())
        .await
        .unwrap();
    fleet.report_all().await.unwrap();
    assert!(eventually(&view, |v| v.nodes().len() == 2).await);

    let gone = fleet.disconnect(0).await.unwrap();
    assert!(eventually(&view, |v| v.scheduler().connected_nodes == 1).await);
    assert!(!view.nodes().contains_key(&gone));

    let late = SimulatedWorker::connect(coordinator.local_addr()).await.unwrap();
    assert_eq!(late.node_id().to_string(), "node-3");

    let stats = coordinator.shutdown().await.unwrap();
    assert_eq!(stats.disconnected, 1);
}
