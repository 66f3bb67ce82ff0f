//! Leadership hand-off mid-migration: pending offset conditions die with the
//! old leader, but the persisted register lets the new leader resume.

mod common;

use std::time::Instant;

use common::{offset_report, register_storage_nodes, storage_node, TestCluster, WAIT_TIMEOUT};
use meridian_meta::proto::{self, PartitionState, RelocationItem};

#[tokio::test(flavor = "multi_thread")]
async fn migration_survives_a_leader_change() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client(0).await;

    let a = storage_node(1);
    let b = storage_node(2);
    let c = storage_node(3);
    register_storage_nodes(&mut client, &[a.clone(), b.clone(), c.clone()]).await;
    client
        .init_table("t", 1, vec![a.clone(), b.clone()])
        .await
        .expect("init");

    let deadline = Instant::now() + WAIT_TIMEOUT;
    let epoch = loop {
        if let Ok(pulled) = client.pull_table("t").await {
            break pulled.epoch;
        }
        assert!(Instant::now() < deadline, "table never appeared");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };

    client
        .migrate(
            epoch,
            vec![RelocationItem {
                table: "t".to_string(),
                partition: 0,
                left: Some(a.clone()),
                right: Some(c.clone()),
            }],
        )
        .await
        .expect("migrate");

    // Wait until AddSlave(C) committed, with the cut-over still pending.
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let pulled = client.pull_table("t").await.expect("pull");
        let part = &pulled.tables[0].partitions[0];
        if part.replicas.iter().any(|r| r.addr() == c.addr()) {
            break;
        }
        assert!(Instant::now() < deadline, "target never staged");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // Leadership moves; the old leader's condition entries are lost, the
    // register is not.
    cluster.elect(1).await;
    assert!(cluster.mem.raw_get(proto::KEY_MIGRATE).is_some());

    let deadline = Instant::now() + WAIT_TIMEOUT;
    while cluster.servers[0].is_leader() {
        assert!(Instant::now() < deadline, "old leader never stepped down");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // Catch-up pings now go to the new leader; the resumed plan finishes.
    let mut new_leader = cluster.client(1).await;
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        new_leader
            .ping(a.clone(), vec![offset_report("t", 0, 5, 500)])
            .await
            .expect("ping a");
        new_leader
            .ping(c.clone(), vec![offset_report("t", 0, 5, 500)])
            .await
            .expect("ping c");

        let pulled = new_leader.pull_table("t").await.expect("pull");
        let part = &pulled.tables[0].partitions[0];
        let addrs: Vec<String> = part.replicas.iter().map(|r| r.addr()).collect();
        if !addrs.contains(&a.addr()) {
            assert_eq!(part.state(), PartitionState::Active);
            assert_eq!(part.master().unwrap().addr(), b.addr());
            assert_eq!(addrs, vec![b.addr(), c.addr()]);
            break;
        }
        assert!(Instant::now() < deadline, "migration never resumed");
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }

    let deadline = Instant::now() + WAIT_TIMEOUT;
    while cluster.mem.raw_get(proto::KEY_MIGRATE).is_some() {
        assert!(Instant::now() < deadline, "register never drained");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn new_leader_serves_writes_and_old_leader_redirects() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client(0).await;
    let a = storage_node(1);
    let b = storage_node(2);
    register_storage_nodes(&mut client, &[a.clone(), b.clone()]).await;

    cluster.elect(2).await;
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while cluster.servers[0].is_leader() {
        assert!(Instant::now() < deadline, "old leader never stepped down");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // The demoted node now forwards writes to the new leader.
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let mut old_leader = cluster.client(0).await;
        if old_leader.init_table("t", 1, vec![a.clone(), b.clone()]).await.is_ok() {
            break;
        }
        assert!(Instant::now() < deadline, "old leader never redirected");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let mut new_leader = cluster.client(2).await;
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while new_leader.pull_table("t").await.is_err() {
        assert!(Instant::now() < deadline, "table never appeared");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    cluster.stop().await;
}
