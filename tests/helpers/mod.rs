#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kateway::config::AdminConfig;
use kateway::coordination::MemoryCoordinator;
use kateway::lag::{LagComputer, MemoryOffsets};
use kateway::server::{GatewayOptions, GatewayServer};
use kateway::topology::{ClusterTopology, Clusters, MemoryTopicAdmin};
use kateway::KatewayEngine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const CHROOT: &str = "/kafka/local";

pub fn broker_json(host: &str, port: u16) -> String {
    format!(
        r#"{{"jmx_port":-1,"timestamp":"1447157138058","host":"{}","version":1,"port":{}}}"#,
        host, port
    )
}

pub fn partition_state_json(leader: i32, isr: &[i32]) -> String {
    format!(
        r#"{{"controller_epoch":1,"leader":{},"version":1,"leader_epoch":0,"isr":{:?}}}"#,
        leader, isr
    )
}

/// Three brokers (ids 0, 1, 2), topic `orders` with two partitions and
/// one online consumer group `billing`.
pub fn seed_cluster(store: &MemoryCoordinator, chroot: &str) {
    store.set(&format!("{}/brokers/ids/0", chroot), broker_json("10.0.0.1", 9092));
    store.set(&format!("{}/brokers/ids/1", chroot), broker_json("10.0.0.2", 9092));
    store.set(&format!("{}/brokers/ids/2", chroot), broker_json("10.0.0.3", 9092));

    store.set(
        &format!("{}/brokers/topics/orders/partitions/0/state", chroot),
        partition_state_json(0, &[0, 1]),
    );
    store.set(
        &format!("{}/brokers/topics/orders/partitions/1/state", chroot),
        partition_state_json(1, &[1, 2]),
    );

    store.set(&format!("{}/consumers/billing/ids/billing-1", chroot), "");
    store.set(&format!("{}/consumers/billing/offsets/orders/0", chroot), "100");
    store.set(&format!("{}/consumers/billing/offsets/orders/1", chroot), "100");
}

pub fn setup_cluster() -> (Arc<MemoryCoordinator>, ClusterTopology) {
    let store = Arc::new(MemoryCoordinator::new());
    seed_cluster(&store, CHROOT);
    let cluster = ClusterTopology::new("local", CHROOT, store.clone());
    (store, cluster)
}

pub fn admin_config() -> AdminConfig {
    AdminConfig {
        appid: "_psubAdmin_".to_string(),
        pubkey: "secret".to_string(),
        default_partitions: 1,
        default_replicas: 2,
    }
}

pub fn setup_engine() -> (KatewayEngine, Arc<MemoryCoordinator>, MemoryOffsets) {
    let store = Arc::new(MemoryCoordinator::new());
    seed_cluster(&store, CHROOT);
    let offsets = MemoryOffsets::new();
    offsets.set_offset("orders", 0, 130);
    offsets.set_offset("orders", 1, 90);

    let clusters = Clusters::new(store.clone(), &[("local".to_string(), CHROOT.to_string())]);
    let gateway = GatewayServer::new(GatewayOptions::http("test", "127.0.0.1:0", 16)).unwrap();
    let engine = KatewayEngine::new(
        Arc::new(gateway),
        clusters,
        LagComputer::new(Arc::new(offsets.clone())),
        Arc::new(MemoryTopicAdmin::new(store.clone())),
        admin_config(),
    );
    (engine, store, offsets)
}

/// Minimal HTTP/1.1 exchange; returns status code and body.
pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        method, path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw).to_string();

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

/// Poll `condition` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
