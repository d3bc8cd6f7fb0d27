//! Simulator Tests
//!
//! Server lifecycle and connection bookkeeping.

mod common;

use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use kinetic::protocol::{read_frame, Message, MessageType, StatusCode};
use kinetic::KineticError;

use common::{connect, start_simulator};

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_ephemeral_port() {
    let simulator = start_simulator();
    assert_ne!(simulator.port(), 0);
    assert!(simulator.is_running());
}

#[test]
fn test_connection_open_status() {
    let simulator = start_simulator();
    let mut stream = TcpStream::connect(simulator.local_addr()).unwrap();

    let message = Message::from_frame(&read_frame(&mut stream).unwrap()).unwrap();
    let command = message.command().unwrap();
    assert_eq!(command.header.message_type, MessageType::UnsolicitedStatus);
    assert_eq!(command.status.code, StatusCode::Success);
    assert!(command.header.connection_id > 0);
    assert_eq!(command.header.ack_sequence, None);
}

#[test]
fn test_connections_are_tracked() {
    let simulator = start_simulator();
    let first = connect(&simulator);
    let second = connect(&simulator);
    assert!(wait_until(|| simulator.connection_count() == 2));
    assert_ne!(first.connection_id(), second.connection_id());

    first.close();
    assert!(wait_until(|| simulator.connection_count() == 1));
    second.noop().unwrap();
}

#[test]
fn test_shutdown_closes_clients() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    client.noop().unwrap();

    simulator.shutdown();
    assert!(!simulator.is_running());
    assert!(wait_until(|| client.is_closed()));
    assert!(matches!(client.noop(), Err(KineticError::ConnectionClosed)));
}
