//! Task-set reconciliation invariants of the item scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use vigil_agent::scheduler::ItemScheduler;
use vigil_agent::services::metrics_sender::MetricsSender;
use vigil_client::identity::IdentityStore;
use vigil_client::PlatformClient;
use vigil_collector::builtin::BuiltinKeyRegistry;
use vigil_collector::command::CommandMapper;
use vigil_collector::dispatch::ValueDispatcher;
use vigil_collector::snapshot::SystemProber;
use vigil_common::types::MonitorItem;

fn item(id: i64, key: &str, interval_secs: u32) -> MonitorItem {
    MonitorItem {
        item_id: id,
        item_name: format!("item-{id}"),
        item_key: key.to_string(),
        info_type: 0,
        interval_secs,
        timeout_secs: 5,
        intervals: Vec::new(),
    }
}

fn scheduler(root: &CancellationToken) -> ItemScheduler {
    // Nothing here ever reaches the network: item intervals are long enough
    // that no task fires during the test.
    let client = Arc::new(
        PlatformClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            Arc::new(IdentityStore::default()),
        )
        .unwrap(),
    );
    let sender = Arc::new(MetricsSender::new(client, 16, Duration::from_secs(60)));
    let dispatcher = Arc::new(ValueDispatcher::new(
        Arc::new(CommandMapper::disabled()),
        Arc::new(BuiltinKeyRegistry::new()),
        SystemProber::default(),
    ));
    ItemScheduler::new(dispatcher, sender, root.clone())
}

#[tokio::test]
async fn task_set_follows_the_published_plan() {
    let root = CancellationToken::new();
    let scheduler = scheduler(&root);

    let first = vec![item(1, "system.uname", 3600), item(2, "system.hostname", 3600)];
    let summary = scheduler.reshape(&first);
    assert_eq!(summary.started, vec![1, 2]);
    assert_eq!(scheduler.task_ids(), vec![1, 2]);

    // {1, 2} -> {2, 3}: 1 cancelled, 2 untouched, 3 started.
    let second = vec![item(2, "system.hostname", 3600), item(3, "system.uptime", 3600)];
    let summary = scheduler.reshape(&second);
    assert_eq!(summary.removed, vec![1]);
    assert_eq!(summary.kept, vec![2]);
    assert_eq!(summary.started, vec![3]);
    assert!(summary.restarted.is_empty());
    assert_eq!(scheduler.task_ids(), vec![2, 3]);

    root.cancel();
    scheduler.shutdown().await;
    assert!(scheduler.task_ids().is_empty());
}

#[tokio::test]
async fn changed_item_definition_restarts_its_task() {
    let root = CancellationToken::new();
    let scheduler = scheduler(&root);

    scheduler.reshape(&[item(1, "system.uname", 3600)]);

    // Same id, different cadence.
    let summary = scheduler.reshape(&[item(1, "system.uname", 1800)]);
    assert_eq!(summary.restarted, vec![1]);
    assert!(summary.kept.is_empty());
    assert_eq!(scheduler.task_ids(), vec![1]);

    root.cancel();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn unschedulable_items_get_no_task() {
    let root = CancellationToken::new();
    let scheduler = scheduler(&root);

    // No default interval, no windows: never runnable.
    let summary = scheduler.reshape(&[item(1, "system.uname", 0), item(2, "system.uname", 60)]);
    assert_eq!(summary.started, vec![2]);
    assert_eq!(scheduler.task_ids(), vec![2]);

    root.cancel();
    scheduler.shutdown().await;
}

#[tokio::test]
async fn identical_plan_is_a_no_op() {
    let root = CancellationToken::new();
    let scheduler = scheduler(&root);

    let plan = vec![item(1, "system.uname", 3600)];
    scheduler.reshape(&plan);
    let summary = scheduler.reshape(&plan);
    assert_eq!(summary.kept, vec![1]);
    assert!(summary.started.is_empty());
    assert!(summary.removed.is_empty());
    assert!(summary.restarted.is_empty());

    root.cancel();
    scheduler.shutdown().await;
}
