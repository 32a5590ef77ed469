//! Workload manager lifecycle against the mock deployer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mcp_gateway::deployer::WorkloadSpec;
use mcp_gateway::transport::{ProxyMode, TransportConfig};
use mcp_gateway::workloads::{WorkloadError, WorkloadStatus};
use mcp_gateway::{GroupManager, WorkloadManager};

mod common;
use common::{eventually, MockDeployer};

fn stdio_config(deployer: &Arc<MockDeployer>) -> TransportConfig {
    let mut config = TransportConfig::new("stdio", deployer.clone());
    config.proxy_mode = ProxyMode::StreamableHttp;
    config.timeouts.drain = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn run_stop_and_delete() {
    let deployer = MockDeployer::new();
    let manager = WorkloadManager::new(GroupManager::new());
    let cancel = CancellationToken::new();

    let workload = manager
        .run(WorkloadSpec::new("alpha", "srv"), stdio_config(&deployer), &cancel)
        .await
        .unwrap();
    assert_eq!(workload.status, WorkloadStatus::Running);
    let proxy_url = workload.proxy_url.clone().unwrap();
    assert!(workload.handle.is_some());

    let health = reqwest::get(format!("{proxy_url}/health")).await.unwrap();
    assert!(health.status().is_success());

    let err = manager
        .run(WorkloadSpec::new("alpha", "srv"), stdio_config(&deployer), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::AlreadyExists(_)));
    assert_eq!(deployer.started("alpha"), 1);

    let stopped = manager.stop("alpha", &cancel).await.unwrap();
    assert_eq!(stopped.status, WorkloadStatus::Stopped);
    assert_eq!(manager.get("alpha").unwrap().status, WorkloadStatus::Stopped);
    assert!(deployer.stopped("alpha"));
    assert!(reqwest::get(format!("{proxy_url}/health")).await.is_err());

    manager.delete_workload("alpha", &cancel).await.unwrap();
    assert!(manager.get("alpha").is_none());
    manager.delete_workload("alpha", &cancel).await.unwrap();
}

#[tokio::test]
async fn missing_group_never_deploys() {
    let deployer = MockDeployer::new();
    let manager = WorkloadManager::new(GroupManager::new());

    let err = manager
        .run(
            WorkloadSpec::new("orphan", "srv").with_group("nowhere"),
            stdio_config(&deployer),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::GroupNotFound { .. }));
    assert!(deployer.starts().is_empty());
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn failed_start_leaves_nothing_behind() {
    let deployer = MockDeployer::new();
    deployer.fail_start("bad");
    let groups = GroupManager::new();
    groups.create("team").unwrap();
    let manager = WorkloadManager::new(groups.clone());

    let err = manager
        .run(
            WorkloadSpec::new("bad", "srv").with_group("team"),
            stdio_config(&deployer),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::Transport { .. }));
    assert!(manager.get("bad").is_none());
    assert!(groups.list_workloads_in_group("team").is_empty());
}

#[tokio::test]
async fn bulk_delete_reports_every_failure() {
    let deployer = MockDeployer::new();
    let manager = WorkloadManager::new(GroupManager::new());
    let cancel = CancellationToken::new();

    for name in ["a", "b", "c", "d"] {
        manager
            .run(WorkloadSpec::new(name, "srv"), stdio_config(&deployer), &cancel)
            .await
            .unwrap();
    }
    deployer.fail_stop("b");
    deployer.fail_stop("d");

    let names: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let err = manager.delete_workloads(&names, &cancel).wait().await.unwrap_err();

    let mut failed: Vec<&str> = err.names().collect();
    failed.sort();
    assert_eq!(failed, vec!["b", "d"]);
    assert!(err.failures.iter().all(|f| matches!(f.error, WorkloadError::Transport { .. })));

    // Records go away even when the backend refused to stop.
    assert!(manager.list().is_empty());
    assert!(deployer.stopped("a"));
    assert!(deployer.stopped("c"));
}

#[tokio::test]
async fn crashed_backend_is_listed_as_error() {
    let deployer = MockDeployer::new();
    let manager = WorkloadManager::new(GroupManager::new());
    let cancel = CancellationToken::new();

    let workload = manager
        .run(WorkloadSpec::new("fragile", "srv"), stdio_config(&deployer), &cancel)
        .await
        .unwrap();
    deployer.crash(&workload.handle.unwrap());

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.get("fragile").unwrap().status != WorkloadStatus::Error {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    manager.stop_all(&cancel).await.unwrap();
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn abandoned_run_is_rolled_back() {
    let deployer = MockDeployer::new();
    let groups = GroupManager::new();
    groups.create("team").unwrap();
    let manager = WorkloadManager::new(groups.clone());
    let starts = deployer.hold_starts();

    let run = tokio::spawn({
        let manager = manager.clone();
        let config = stdio_config(&deployer);
        async move {
            manager
                .run(WorkloadSpec::new("alpha", "srv").with_group("team"), config, &CancellationToken::new())
                .await
        }
    });
    eventually("deploy to begin", || deployer.started("alpha") == 1).await;
    assert_eq!(manager.get("alpha").unwrap().status, WorkloadStatus::Starting);

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    assert!(manager.list().is_empty());
    assert!(groups.list_workloads_in_group("team").is_empty());
    manager.delete_workload("alpha", &CancellationToken::new()).await.unwrap();

    starts.add_permits(1);
    let workload = manager
        .run(
            WorkloadSpec::new("alpha", "srv").with_group("team"),
            stdio_config(&deployer),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(workload.status, WorkloadStatus::Running);
    assert_eq!(groups.list_workloads_in_group("team"), vec!["alpha"]);
}
