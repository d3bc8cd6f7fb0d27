//! Client Tests
//!
//! End-to-end key-value operations against an in-process simulator.

mod common;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::bounded;
use kinetic::protocol::{Peer, PeerToPeerOperation, StatusCode};
use kinetic::{Algorithm, ClientConfig, Entry, KineticClient, KineticError, SimulatorConfig};

use common::{client_config, connect, start_simulator, start_simulator_with};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_then_get_returns_value_and_version() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let entry = Entry::new(b"bar".to_vec(), Bytes::from_static(b"bar")).with_version(b"1234".to_vec());
    let stored = client.put(&entry, None).unwrap();
    assert_eq!(stored.version(), b"1234");

    let fetched = client.get(b"bar").unwrap().expect("entry should exist");
    assert_eq!(fetched.key, b"bar");
    assert_eq!(fetched.value.as_ref(), b"bar");
    assert_eq!(fetched.version(), b"1234");
}

#[test]
fn test_get_missing_key_is_none() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    assert!(client.get(b"nope").unwrap().is_none());
    assert!(client.get_metadata(b"nope").unwrap().is_none());
    assert!(client.get_version(b"nope").unwrap().is_none());
}

#[test]
fn test_round_trip_large_key_and_value() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let key = vec![0xabu8; 4096];
    let value = Bytes::from(vec![0x5au8; 1024 * 1024]);
    let entry = Entry::new(key.clone(), value.clone()).with_version(b"v".to_vec());
    client.put_forced(&entry).unwrap();

    let fetched = client.get(&key).unwrap().unwrap();
    assert_eq!(fetched.value, value);
    assert_eq!(fetched.version(), b"v");
}

#[test]
fn test_metadata_and_version_without_value() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let entry = Entry::new(b"meta".to_vec(), Bytes::from_static(b"payload"))
        .with_version(b"7".to_vec())
        .with_computed_tag(Algorithm::Sha1)
        .unwrap();
    client.put_forced(&entry).unwrap();

    let metadata = client.get_metadata(b"meta").unwrap().unwrap();
    assert_eq!(metadata.version, b"7");
    assert_eq!(metadata.algorithm, Some(Algorithm::Sha1));
    assert_eq!(metadata.tag, entry.metadata.tag);

    assert_eq!(client.get_version(b"meta").unwrap().unwrap(), b"7");
}

// =============================================================================
// Version Gating
// =============================================================================

#[test]
fn test_put_with_wrong_db_version_fails() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let v1 = Entry::new(b"k".to_vec(), Bytes::from_static(b"v1")).with_version(b"1".to_vec());
    client.put(&v1, None).unwrap();

    let v2 = Entry::new(b"k".to_vec(), Bytes::from_static(b"v2")).with_version(b"2".to_vec());
    let result = client.put(&v2, Some(b"wrong"));
    assert!(matches!(result, Err(KineticError::VersionMismatch)));
    assert_eq!(client.get(b"k").unwrap().unwrap().value.as_ref(), b"v1");

    client.put(&v2, Some(b"1")).unwrap();
    let fetched = client.get(b"k").unwrap().unwrap();
    assert_eq!(fetched.value.as_ref(), b"v2");
    assert_eq!(fetched.version(), b"2");
}

#[test]
fn test_put_without_db_version_on_versioned_key_fails() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let entry = Entry::new(b"k".to_vec(), Bytes::from_static(b"v")).with_version(b"1".to_vec());
    client.put(&entry, None).unwrap();
    assert!(matches!(client.put(&entry, None), Err(KineticError::VersionMismatch)));
    client.put_forced(&entry).unwrap();
}

#[test]
fn test_delete_semantics() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let absent = Entry::new(b"absent".to_vec(), Bytes::new()).with_version(b"1".to_vec());
    assert!(matches!(client.delete(&absent), Err(KineticError::NotFound)));
    assert!(!client.delete_forced(b"absent").unwrap());

    let entry = Entry::new(b"present".to_vec(), Bytes::from_static(b"x")).with_version(b"1".to_vec());
    client.put_forced(&entry).unwrap();

    let stale = entry.clone().with_version(b"0".to_vec());
    assert!(matches!(client.delete(&stale), Err(KineticError::VersionMismatch)));
    assert!(client.delete(&entry).unwrap());
    assert!(client.get(b"present").unwrap().is_none());
}

#[test]
fn test_invalid_arguments_fail_locally() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let empty_key = Entry::new(Vec::<u8>::new(), Bytes::from_static(b"v"));
    assert!(matches!(client.put_forced(&empty_key), Err(KineticError::InvalidRequest(_))));

    let long_key = Entry::new(vec![1u8; 4097], Bytes::new());
    assert!(matches!(client.put_forced(&long_key), Err(KineticError::InvalidRequest(_))));

    let long_version = Entry::new(b"k".to_vec(), Bytes::new()).with_version(vec![0u8; 129]);
    assert!(matches!(client.put_forced(&long_version), Err(KineticError::InvalidRequest(_))));

    let big_value = Entry::new(b"k".to_vec(), Bytes::from(vec![0u8; 1024 * 1024 + 1]));
    assert!(matches!(client.put_forced(&big_value), Err(KineticError::InvalidRequest(_))));

    // Nothing reached the drive
    assert_eq!(simulator.drive().counter().get(kinetic::protocol::OpKind::Put), 0);
}

// =============================================================================
// Ordered Iteration
// =============================================================================

#[test]
fn test_get_next_enumerates_keys_in_order() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let keys: Vec<Vec<u8>> = vec![
        b"b".to_vec(),
        b"a".to_vec(),
        vec![0x00],
        b"ab".to_vec(),
        vec![0xff, 0x01],
        b"aa".to_vec(),
    ];
    for key in &keys {
        client.put_forced(&Entry::new(key.clone(), Bytes::from_static(b"v"))).unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor = Vec::new();
    while let Some(entry) = client.get_next(&cursor).unwrap() {
        cursor = entry.key.clone();
        seen.push(entry.key);
    }

    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn test_get_previous_is_strict() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    for key in [b"k1", b"k2", b"k3"] {
        client.put_forced(&Entry::new(key.to_vec(), Bytes::from_static(b"v"))).unwrap();
    }

    assert_eq!(client.get_previous(b"k3").unwrap().unwrap().key, b"k2");
    assert_eq!(client.get_previous(b"k2x").unwrap().unwrap().key, b"k2");
    assert!(client.get_previous(b"k1").unwrap().is_none());
    assert!(client.get_next(b"k3").unwrap().is_none());
}

#[test]
fn test_key_range_closure_and_bounds() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    for i in 0..20u8 {
        let key = format!("key{:02}", i).into_bytes();
        client.put_forced(&Entry::new(key, Bytes::from_static(b"v"))).unwrap();
    }

    let keys = client.get_key_range(b"key05", true, b"key10", true, u32::MAX, false).unwrap();
    let expected: Vec<Vec<u8>> = (5..=10).map(|i| format!("key{:02}", i).into_bytes()).collect();
    assert_eq!(keys, expected);

    let exclusive = client.get_key_range(b"key05", false, b"key10", false, 100, false).unwrap();
    assert_eq!(exclusive.len(), 4);
    assert_eq!(exclusive[0], b"key06");

    let reversed = client.get_key_range(b"key05", true, b"key10", true, 2, true).unwrap();
    assert_eq!(reversed, vec![b"key10".to_vec(), b"key09".to_vec()]);

    let empty = client.get_key_range(b"key10", true, b"key05", true, 100, false).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_key_range_capped_at_drive_limit() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    for i in 0..1100u32 {
        let key = format!("r{:05}", i).into_bytes();
        client.put_forced(&Entry::new(key, Bytes::new())).unwrap();
    }

    let keys = client.get_key_range(b"r", true, b"s", false, u32::MAX, false).unwrap();
    assert_eq!(keys.len(), 1024);
}

// =============================================================================
// Async Operations
// =============================================================================

#[test]
fn test_async_put_get_delete() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let entry = Entry::new(b"async".to_vec(), Bytes::from_static(b"value")).with_version(b"1".to_vec());

    let (tx, rx) = bounded(1);
    client.put_async(&entry, None, move |result| tx.send(result).unwrap()).unwrap();
    let stored = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert_eq!(stored.version(), b"1");

    let (tx, rx) = bounded(1);
    client.get_async(b"async", move |result| tx.send(result).unwrap()).unwrap();
    let fetched = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap().unwrap();
    assert_eq!(fetched.value.as_ref(), b"value");

    let (tx, rx) = bounded(1);
    client.delete_async(&entry, move |result| tx.send(result).unwrap()).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap());

    let (tx, rx) = bounded(1);
    client.get_async(b"async", move |result| tx.send(result).unwrap()).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap().is_none());
}

#[test]
fn test_async_failure_reaches_callback() {
    let simulator = start_simulator();
    let client = connect(&simulator);

    let entry = Entry::new(b"missing".to_vec(), Bytes::new()).with_version(b"1".to_vec());
    let (tx, rx) = bounded(1);
    client.delete_async(&entry, move |result| tx.send(result).unwrap()).unwrap();
    assert!(matches!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        Err(KineticError::NotFound)
    ));
}

// =============================================================================
// Connection State
// =============================================================================

#[test]
fn test_drive_assigns_connection_id() {
    let simulator = start_simulator();
    let config = ClientConfig::builder()
        .host("127.0.0.1")
        .port(simulator.port())
        .connection_id(-77)
        .build();
    let client = KineticClient::connect(config).unwrap();

    assert!(client.connection_id() > 0);
    client.noop().unwrap();
}

#[test]
fn test_cluster_version_failure_reports_drive_version() {
    let simulator = start_simulator_with(SimulatorConfig::builder().cluster_version(9));
    let config = ClientConfig::builder()
        .host("127.0.0.1")
        .port(simulator.port())
        .cluster_version(3)
        .build();
    let client = KineticClient::connect(config).unwrap();

    let observed = Arc::new(AtomicI64::new(-1));
    let sink = Arc::clone(&observed);
    client.set_cluster_version_listener(move |version| sink.store(version, Ordering::SeqCst));

    match client.noop() {
        Err(KineticError::ClusterVersionFailure { drive_version }) => assert_eq!(drive_version, 9),
        other => panic!("expected cluster version failure, got {:?}", other),
    }
    assert_eq!(observed.load(Ordering::SeqCst), 9);
    assert_eq!(client.drive_cluster_version(), 9);
}

#[test]
fn test_busy_drive_refuses_connection() {
    let simulator = start_simulator_with(SimulatorConfig::builder().max_connections(1));
    let first = connect(&simulator);
    first.noop().unwrap();

    let second = KineticClient::connect(client_config(&simulator));
    assert!(matches!(second, Err(KineticError::ServiceBusy(_))));
}

#[test]
fn test_unknown_identity_is_rejected() {
    let simulator = start_simulator();
    let config = ClientConfig::builder()
        .host("127.0.0.1")
        .port(simulator.port())
        .user_id(99)
        .hmac_key(b"whatever".to_vec())
        .build();
    let client = KineticClient::connect(config).unwrap();
    assert!(matches!(client.noop(), Err(KineticError::HmacFailure)));
}

#[test]
fn test_wrong_key_is_rejected_without_closing() {
    let simulator = start_simulator();
    let config = ClientConfig::builder()
        .host("127.0.0.1")
        .port(simulator.port())
        .hmac_key(b"not-the-key".to_vec())
        .build();
    let client = KineticClient::connect(config).unwrap();

    assert!(matches!(client.noop(), Err(KineticError::HmacFailure)));
    assert!(matches!(client.noop(), Err(KineticError::HmacFailure)));
    assert!(!client.is_closed());
}

// =============================================================================
// Peer-to-peer
// =============================================================================

#[test]
fn test_peer_to_peer_push_copies_entries() {
    let source = start_simulator();
    let target = start_simulator();
    let client = connect(&source);

    let entry = Entry::new(b"p2p".to_vec(), Bytes::from_static(b"payload")).with_version(b"3".to_vec());
    client.put_forced(&entry).unwrap();

    let peer = Peer {
        host: "127.0.0.1".to_string(),
        port: target.port(),
        tls: false,
    };
    let operations = vec![
        PeerToPeerOperation {
            key: b"p2p".to_vec(),
            new_key: Some(b"copied".to_vec()),
            force: true,
            ..PeerToPeerOperation::default()
        },
        PeerToPeerOperation {
            key: b"not-here".to_vec(),
            force: true,
            ..PeerToPeerOperation::default()
        },
    ];
    let outcomes = client.peer_to_peer_push(peer, operations).unwrap();
    assert_eq!(outcomes[0].status.code, StatusCode::Success);
    assert_eq!(outcomes[1].status.code, StatusCode::NotFound);

    let copied = connect(&target).get(b"copied").unwrap().unwrap();
    assert_eq!(copied.value.as_ref(), b"payload");
    assert_eq!(copied.version(), b"3");
}

#[test]
fn test_peer_to_peer_unreachable_peer() {
    let source = start_simulator();
    let client = connect(&source);
    client.put_forced(&Entry::new(b"k".to_vec(), Bytes::new())).unwrap();

    // Bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let peer = Peer {
        host: "127.0.0.1".to_string(),
        port,
        tls: false,
    };
    let operations = vec![PeerToPeerOperation {
        key: b"k".to_vec(),
        force: true,
        ..PeerToPeerOperation::default()
    }];

    assert!(matches!(
        client.peer_to_peer_push(peer, operations),
        Err(KineticError::RemoteConnection(_))
    ));
}
