//! Table creation, pull, and drop.

mod common;

use std::time::Instant;

use common::{register_storage_nodes, storage_node, TestCluster, WAIT_TIMEOUT};
use meridian_meta::proto::PartitionState;
use meridian_meta::MetaError;

#[tokio::test(flavor = "multi_thread")]
async fn init_creates_rotated_placement_and_pull_sees_it() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client(0).await;

    let nodes = [storage_node(1), storage_node(2), storage_node(3)];
    register_storage_nodes(&mut client, &nodes).await;
    let epoch_before = client
        .ping(storage_node(1), Vec::new())
        .await
        .expect("ping");

    client
        .init_table("orders", 3, nodes.to_vec())
        .await
        .expect("init");

    let deadline = Instant::now() + WAIT_TIMEOUT;
    let pulled = loop {
        match client.pull_table("orders").await {
            Ok(pulled) => break pulled,
            Err(MetaError::NotFound(_)) => {
                assert!(Instant::now() < deadline, "table never appeared");
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            Err(err) => panic!("pull failed: {err}"),
        }
    };

    assert!(pulled.epoch > epoch_before);
    assert_eq!(pulled.tables.len(), 1);
    let table = &pulled.tables[0];
    assert_eq!(table.partitions.len(), 3);
    let part0 = &table.partitions[0];
    assert_eq!(part0.master().unwrap().addr(), "10.0.0.1:8001");
    let slaves: Vec<String> = part0.replicas[1..].iter().map(|r| r.addr()).collect();
    assert_eq!(slaves, vec!["10.0.0.2:8001", "10.0.0.3:8001"]);
    assert!(table
        .partitions
        .iter()
        .all(|p| p.state() == PartitionState::Active));

    // Pull by node returns every table the node serves, same epoch rules.
    let by_node = client.pull_node("10.0.0.2:8001").await.expect("pull node");
    assert_eq!(by_node.tables.len(), 1);
    assert_eq!(by_node.tables[0].name, "orders");

    assert_eq!(
        client.list_table().await.expect("list"),
        vec!["orders".to_string()]
    );

    // A second init of the same table is a duplicate.
    let err = client
        .init_table("orders", 3, nodes.to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::AlreadyExists(_)));

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_of_unknown_table_is_not_found() {
    let cluster = TestCluster::start(1).await;
    let mut client = cluster.client(0).await;
    let err = client.pull_table("nope").await.unwrap_err();
    assert!(err.is_not_found());
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn init_rejects_unregistered_placement() {
    let cluster = TestCluster::start(1).await;
    let mut client = cluster.client(0).await;

    let err = client
        .init_table("t", 1, vec![storage_node(9)])
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::InvalidArgument(_)));

    let err = client.init_table("t", 0, vec![]).await.unwrap_err();
    assert!(matches!(err, MetaError::InvalidArgument(_)));

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn drop_table_is_idempotent_with_not_found_second() {
    let cluster = TestCluster::start(1).await;
    let mut client = cluster.client(0).await;

    let nodes = [storage_node(1), storage_node(2)];
    register_storage_nodes(&mut client, &nodes).await;
    client
        .init_table("t", 2, nodes.to_vec())
        .await
        .expect("init");

    let deadline = Instant::now() + WAIT_TIMEOUT;
    while client.pull_table("t").await.is_err() {
        assert!(Instant::now() < deadline, "table never appeared");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    client.drop_table("t").await.expect("drop");
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while client.pull_table("t").await.is_ok() {
        assert!(Instant::now() < deadline, "table never dropped");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let err = client.drop_table("t").await.unwrap_err();
    assert!(err.is_not_found());

    cluster.stop().await;
}
