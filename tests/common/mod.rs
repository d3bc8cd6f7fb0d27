//! Shared helpers for integration tests

#![allow(dead_code)]

use std::io::Write;
use std::net::{TcpListener, TcpStream};

use bytes::Bytes;
use kinetic::protocol::{write_frame, Body, Command, Message, MessageType};
use kinetic::{ClientConfig, KineticClient, Simulator, SimulatorConfig};

/// Simulator on an ephemeral port with default settings
pub fn start_simulator() -> Simulator {
    start_simulator_with(SimulatorConfig::builder())
}

pub fn start_simulator_with(builder: kinetic::config::SimulatorConfigBuilder) -> Simulator {
    let config = builder.listen_addr("127.0.0.1:0").build();
    Simulator::start(config).expect("simulator should start")
}

pub fn client_config(simulator: &Simulator) -> ClientConfig {
    ClientConfig::builder()
        .host("127.0.0.1")
        .port(simulator.port())
        .request_timeout_ms(30_000)
        .build()
}

pub fn connect(simulator: &Simulator) -> KineticClient {
    KineticClient::connect(client_config(simulator)).expect("client should connect")
}

/// Accept one connection on `listener` and greet it with a connection-open
/// status, as a drive does
pub fn accept_with_greeting(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().expect("accept");
    let mut greeting = Command::new(MessageType::UnsolicitedStatus, Body::Empty);
    greeting.header.connection_id = 42;
    let frame = Message::unsolicited(&greeting)
        .and_then(|m| m.into_frame(Bytes::new()))
        .expect("greeting frame");
    write_frame(&mut stream, &frame).expect("write greeting");
    stream.flush().expect("flush greeting");
    stream
}
