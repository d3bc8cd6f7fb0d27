//! TCP Server
//!
//! Accepts connections and runs each on its own thread against a shared
//! [`Drive`].

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SimulatorConfig;
use crate::error::Result;
use crate::storage::{KvStore, MemoryStore};
use super::connection::{refuse, Connection};
use super::engine::Drive;

/// How often the accept loop checks for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(10);

type Registry = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// An in-process drive listening on TCP
pub struct Simulator {
    drive: Arc<Drive>,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    /// Open connections, kept so shutdown can close them
    connections: Registry,
}

impl Simulator {
    /// Bind and start serving with an in-memory store
    ///
    /// A listen port of 0 picks a free port; see [`Simulator::local_addr`].
    pub fn start(config: SimulatorConfig) -> Result<Self> {
        Self::start_with_store(config, Box::new(MemoryStore::new()))
    }

    pub fn start_with_store(config: SimulatorConfig, store: Box<dyn KvStore>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let max_connections = config.max_connections;
        let drive = Arc::new(Drive::new(config, store, local_addr.port())?);
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections: Registry = Arc::new(Mutex::new(HashMap::new()));

        let accept_thread = {
            let drive = Arc::clone(&drive);
            let shutdown = Arc::clone(&shutdown);
            let connections = Arc::clone(&connections);
            thread::Builder::new()
                .name("kinetic-accept".to_string())
                .spawn(move || accept_loop(listener, drive, shutdown, connections, max_connections))?
        };

        tracing::info!("Simulator listening on {}", local_addr);

        Ok(Self {
            drive,
            local_addr,
            shutdown,
            accept_thread: Mutex::new(Some(accept_thread)),
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn drive(&self) -> &Arc<Drive> {
        &self.drive
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting and close every open connection
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }

        let open: Vec<TcpStream> = self.connections.lock().drain().map(|(_, s)| s).collect();
        for stream in open {
            let _ = stream.shutdown(Shutdown::Both);
        }
        tracing::info!("Simulator on {} stopped", self.local_addr);
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    drive: Arc<Drive>,
    shutdown: Arc<AtomicBool>,
    connections: Registry,
    max_connections: usize,
) {
    let next_id = AtomicU64::new(0);

    while !shutdown.load(Ordering::Acquire) {
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };

        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Dropping connection from {}: {}", addr, e);
            continue;
        }

        if connections.lock().len() >= max_connections {
            tracing::warn!("Refusing {}: {} connections open", addr, max_connections);
            if let Err(e) = refuse(stream, &drive, "too many connections") {
                tracing::debug!("Refusal to {} not delivered: {}", addr, e);
            }
            continue;
        }

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(handle) => {
                connections.lock().insert(id, handle);
            }
            Err(e) => {
                tracing::warn!("Dropping connection from {}: {}", addr, e);
                continue;
            }
        }

        let drive = Arc::clone(&drive);
        let registry = Arc::clone(&connections);
        let spawned = thread::Builder::new()
            .name(format!("kinetic-conn-{}", id))
            .spawn(move || {
                match Connection::new(stream, drive) {
                    Ok(mut connection) => {
                        if let Err(e) = connection.handle() {
                            tracing::debug!("Connection from {} ended: {}", addr, e);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to set up connection from {}: {}", addr, e),
                }
                registry.lock().remove(&id);
            });

        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn handler for {}: {}", addr, e);
            connections.lock().remove(&id);
        }
    }
}
