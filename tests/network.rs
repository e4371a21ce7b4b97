//! End-to-end tests of the TCP transport: bootstrap, framing, ordering,
//! loopback and shutdown behavior.

use std::time::Duration;

use rondo::net::config::NetworkConfig;
use rondo::net::tcp::TcpNetwork;
use rondo::net::{Error, Network, recv_from, recv_vec_from, send_to};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Reserves `n` distinct ports on localhost by briefly binding them.
fn free_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<_> = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0").expect("bind"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().expect("local addr").port())
        .collect()
}

/// A single party has no peers; its transport is pure loopback.
async fn solo_network() -> TcpNetwork {
    let config = NetworkConfig::localhost(1, &free_ports(1));
    TcpNetwork::connect(&config).await.expect("solo bootstrap")
}

#[tokio::test]
async fn loopback_returns_payloads_unchanged() {
    let net = solo_network().await;
    for payload in [vec![], vec![0u8], vec![1, 2, 3], vec![0xff; 4096]] {
        net.send(1, payload.clone()).expect("send to self");
        assert_eq!(net.receive(1).await.expect("receive from self"), payload);
    }
    net.close().await;
}

#[tokio::test]
async fn party_ids_are_validated_before_any_io() {
    let net = solo_network().await;
    assert!(matches!(
        net.send(0, vec![1]),
        Err(Error::InvalidParty { party: 0, parties: 1 })
    ));
    assert!(matches!(
        net.send(2, vec![1]),
        Err(Error::InvalidParty { party: 2, parties: 1 })
    ));
    assert!(matches!(
        net.receive(99).await,
        Err(Error::InvalidParty { party: 99, .. })
    ));
    net.close().await;
}

#[tokio::test]
async fn fifo_order_is_preserved_per_channel() {
    let ports = free_ports(2);
    let config1 = NetworkConfig::localhost(1, &ports);
    let config2 = NetworkConfig::localhost(2, &ports);
    let (first, second) = tokio::try_join!(
        TcpNetwork::connect(&config1),
        TcpNetwork::connect(&config2),
    )
    .expect("bootstrap");

    for i in 0..200u32 {
        first.send(2, i.to_be_bytes().to_vec()).expect("send");
    }
    for i in 0..200u32 {
        assert_eq!(second.receive(1).await.expect("receive"), i.to_be_bytes());
    }
    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn empty_and_single_byte_frames_round_trip() {
    let ports = free_ports(2);
    let config1 = NetworkConfig::localhost(1, &ports);
    let config2 = NetworkConfig::localhost(2, &ports);
    let (first, second) = tokio::try_join!(
        TcpNetwork::connect(&config1),
        TcpNetwork::connect(&config2),
    )
    .expect("bootstrap");

    first.send(2, vec![]).expect("send empty");
    first.send(2, vec![42]).expect("send single");
    assert_eq!(second.receive(1).await.expect("receive"), Vec::<u8>::new());
    assert_eq!(second.receive(1).await.expect("receive"), vec![42]);
    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn three_party_bootstrap_yields_exactly_one_channel_per_pair() {
    let _guard = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default();
    let ports = free_ports(3);
    let config1 = NetworkConfig::localhost(1, &ports);
    let config2 = NetworkConfig::localhost(2, &ports);
    let config3 = NetworkConfig::localhost(3, &ports);
    let (one, two, three) = tokio::try_join!(
        TcpNetwork::connect(&config1),
        TcpNetwork::connect(&config2),
        TcpNetwork::connect(&config3),
    )
    .expect("bootstrap");
    let nets = [&one, &two, &three];

    // Every ordered pair exchanges a tagged message over its channel; party
    // 2 in particular talks to 1 (which accepted its connection) and to 3
    // (which it accepted a connection from).
    for from in 1..=3usize {
        for to in 1..=3usize {
            let tag = vec![from as u8, to as u8];
            nets[from - 1].send(to, tag).expect("send");
        }
    }
    for to in 1..=3usize {
        for from in 1..=3usize {
            let msg = nets[to - 1].receive(from).await.expect("receive");
            assert_eq!(msg, vec![from as u8, to as u8]);
        }
    }

    for net in nets {
        assert_eq!(net.parties(), 3);
        net.close().await;
    }
}

#[tokio::test]
async fn close_is_idempotent_and_fails_later_traffic() {
    let ports = free_ports(2);
    let config1 = NetworkConfig::localhost(1, &ports);
    let config2 = NetworkConfig::localhost(2, &ports);
    let (first, second) = tokio::try_join!(
        TcpNetwork::connect(&config1),
        TcpNetwork::connect(&config2),
    )
    .expect("bootstrap");

    first.close().await;
    first.close().await;
    assert!(matches!(first.send(2, vec![1]), Err(Error::Closed(2))));
    assert!(matches!(first.receive(2).await, Err(Error::Closed(2))));
    second.close().await;
}

#[tokio::test]
async fn queued_messages_are_flushed_on_close() {
    let ports = free_ports(2);
    let config1 = NetworkConfig::localhost(1, &ports);
    let config2 = NetworkConfig::localhost(2, &ports);
    let (first, second) = tokio::try_join!(
        TcpNetwork::connect(&config1),
        TcpNetwork::connect(&config2),
    )
    .expect("bootstrap");

    for i in 0..50u8 {
        first.send(2, vec![i]).expect("send");
    }
    first.close().await;
    for i in 0..50u8 {
        assert_eq!(second.receive(1).await.expect("receive"), vec![i]);
    }
    second.close().await;
}

#[tokio::test]
async fn bootstrap_times_out_without_all_parties() {
    let ports = free_ports(2);
    let mut config = NetworkConfig::localhost(2, &ports);
    config.timeout = Duration::from_millis(200);
    // Party 1 never shows up, so party 2's accept phase cannot finish.
    assert!(matches!(
        TcpNetwork::connect(&config).await,
        Err(Error::BootstrapTimeout)
    ));
}

#[tokio::test]
async fn malformed_configs_are_rejected_synchronously() {
    let mut config = NetworkConfig::localhost(1, &[9101, 9102]);
    config.parties[1].id = 1;
    assert!(matches!(
        TcpNetwork::connect(&config).await,
        Err(Error::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn typed_messages_round_trip_over_loopback() {
    let net = solo_network().await;
    let msg = (7u32, "shares".to_string(), vec![1u64, 2, 3]);
    send_to(&net, 1, "test phase", &msg).expect("send");
    let received: (u32, String, Vec<u64>) =
        recv_from(&net, 1, "test phase").await.expect("receive");
    assert_eq!(received, msg);

    send_to(&net, 1, "vec phase", &vec![1u8, 2, 3]).expect("send");
    let err = recv_vec_from::<u8, _>(&net, 1, "vec phase", 5)
        .await
        .expect_err("length mismatch");
    assert!(matches!(err, Error::InvalidLength { expected: 5, actual: 3, .. }));
    net.close().await;
}
