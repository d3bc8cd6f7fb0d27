//! Request multiplexer
//!
//! Many requests share one connection. Each gets the next sequence number,
//! is stamped with the connection identity, sealed with the HMAC and parked
//! in the pending table until its response (matched by ack sequence), its
//! deadline, a cancel or the connection close completes it.
//!
//! ## Concurrency
//! - `pending`: one mutex, taken by submitters (insert), the reader thread
//!   (remove on response) and the timer thread (remove on expiry); never
//!   held while completing a request
//! - `submit_lock`: sequence allocation and hand-off to the transport happen
//!   under it, so wire order equals sequence order
//! - async submissions hold a permit from a bounded channel; a full channel
//!   blocks the submitter until a response or timeout returns a permit

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{bounded, select, tick, Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{KineticError, Result};
use crate::network::{DuplexStream, InboundHandler, Transport};
use crate::protocol::{seal, Auth, Command, Frame, Message, MessageType, StatusCode};
use super::workers::CallbackPool;

/// Granularity of the deadline scan
const TIMER_TICK: Duration = Duration::from_millis(10);

/// How often a blocked async submitter rechecks for close
const PERMIT_POLL: Duration = Duration::from_millis(50);

/// A drive response: the decoded command and the frame's value bytes
#[derive(Debug, Clone)]
pub struct Response {
    pub command: Command,
    pub value: Bytes,
}

impl Response {
    pub fn status_code(&self) -> StatusCode {
        self.command.status.code
    }

    /// Turn a non-success status into the matching error
    pub fn check(self) -> Result<Response> {
        if self.command.status.is_success() {
            return Ok(self);
        }
        let drive_version = self.command.header.cluster_version;
        self.command.status.clone().into_result(drive_version)?;
        Ok(self)
    }
}

/// A submitted synchronous request that has not been waited on yet
pub struct PendingCall {
    rx: Receiver<Result<Response>>,
}

impl PendingCall {
    /// Block until response, timeout, cancel or close
    pub fn wait(self) -> Result<Response> {
        self.rx.recv().map_err(|_| KineticError::ConnectionClosed)?
    }
}

/// Async completion callback
pub type Callback = Box<dyn FnOnce(Result<Response>) + Send + 'static>;

enum Completion {
    Waiter(Sender<Result<Response>>),
    Callback(Callback),
}

struct Pending {
    deadline: Instant,
    completion: Completion,
    holds_permit: bool,
}

type ClusterListener = Arc<dyn Fn(i64) + Send + Sync>;

struct Shared {
    transport: Transport,

    user_id: i64,
    hmac_key: Vec<u8>,
    cluster_version: i64,
    request_timeout: Duration,
    await_timeout: Duration,

    /// Configured id until the drive assigns one
    connection_id: AtomicI64,
    drive_cluster_version: AtomicI64,

    next_sequence: Mutex<u64>,
    submit_lock: Mutex<()>,
    pending: Mutex<HashMap<u64, Pending>>,

    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,

    workers: CallbackPool,
    cluster_listener: Mutex<Option<ClusterListener>>,
    /// Outcome of the drive's connection-open status
    handshake_tx: Sender<Result<()>>,
    handshake_rx: Receiver<Result<()>>,
    timer_stop: Mutex<Option<Sender<()>>>,
    closed: AtomicBool,
}

/// Owns the pending-request table of one connection
pub struct Multiplexer {
    shared: Arc<Shared>,
}

/// Removes one in-flight async request
#[derive(Clone)]
pub struct CancelHandle {
    sequence: u64,
    shared: Weak<Shared>,
}

impl CancelHandle {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Complete the request with `Cancelled`; a later response is dropped.
    /// Works for async callbacks and for blocked synchronous waiters.
    /// Returns false when the request already completed.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let removed = shared.pending.lock().remove(&self.sequence);
        match removed {
            Some(pending) => {
                tracing::debug!("Cancelled request {}", self.sequence);
                shared.complete(pending, Err(KineticError::Cancelled));
                true
            }
            None => false,
        }
    }
}

impl Multiplexer {
    /// Take ownership of a connected stream and start routing
    pub fn start(stream: Box<dyn DuplexStream>, config: &ClientConfig) -> Result<Self> {
        let transport = Transport::new(stream)?;
        let (permits_tx, permits_rx) = bounded(config.async_queue_size.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (handshake_tx, handshake_rx) = bounded(1);

        let shared = Arc::new(Shared {
            transport,
            user_id: config.user_id,
            hmac_key: config.hmac_key.clone(),
            cluster_version: config.cluster_version,
            request_timeout: config.request_timeout(),
            await_timeout: Duration::from_millis(config.thread_pool_await_timeout_ms),
            connection_id: AtomicI64::new(config.connection_id),
            drive_cluster_version: AtomicI64::new(config.cluster_version),
            next_sequence: Mutex::new(1),
            submit_lock: Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
            permits_tx,
            permits_rx,
            workers: CallbackPool::new(config.nio_service_threads)?,
            cluster_listener: Mutex::new(None),
            handshake_tx,
            handshake_rx,
            timer_stop: Mutex::new(Some(stop_tx)),
            closed: AtomicBool::new(false),
        });

        shared.transport.set_inbound_handler(Router {
            shared: Arc::downgrade(&shared),
        })?;

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("kinetic-timer".to_string())
            .spawn(move || timer_loop(weak, stop_rx))?;

        tracing::debug!("Multiplexer started for {}", shared.transport.peer());
        Ok(Self { shared })
    }

    /// Wait for the drive's connection-open status
    ///
    /// A busy drive refuses the connection here with `ServiceBusy`. A drive
    /// that sends no status within `timeout` is assumed to be ready.
    pub fn await_handshake(&self, timeout: Duration) -> Result<()> {
        match self.shared.handshake_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    "No connection status from {} after {:?}",
                    self.shared.transport.peer(),
                    timeout
                );
                Ok(())
            }
        }
    }

    /// Submit and block until response, timeout, cancel or close
    pub fn call(&self, command: Command, value: Bytes) -> Result<Response> {
        let (_, pending) = self.call_cancellable(command, value)?;
        pending.wait()
    }

    /// Submit a synchronous request whose waiter another thread can wake
    /// through the returned handle
    pub fn call_cancellable(&self, command: Command, value: Bytes) -> Result<(CancelHandle, PendingCall)> {
        let (tx, rx) = bounded(1);
        let sequence = self.shared.submit(command, value, Completion::Waiter(tx), false)?;
        let handle = CancelHandle {
            sequence,
            shared: Arc::downgrade(&self.shared),
        };
        Ok((handle, PendingCall { rx }))
    }

    /// Submit with a completion callback
    ///
    /// Blocks while `async_queue_size` async requests are outstanding.
    pub fn submit_async(&self, command: Command, value: Bytes, callback: Callback) -> Result<CancelHandle> {
        self.shared.acquire_permit()?;
        let sequence = self
            .shared
            .submit(command, value, Completion::Callback(callback), true)?;
        Ok(CancelHandle {
            sequence,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Called with the drive's cluster version whenever it differs from the
    /// configured one
    pub fn set_cluster_version_listener(&self, listener: impl Fn(i64) + Send + Sync + 'static) {
        *self.shared.cluster_listener.lock() = Some(Arc::new(listener));
    }

    /// Connection id stamped on requests
    pub fn connection_id(&self) -> i64 {
        self.shared.connection_id.load(Ordering::Acquire)
    }

    /// Last cluster version the drive reported
    pub fn drive_cluster_version(&self) -> i64 {
        self.shared.drive_cluster_version.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the connection; every pending request fails with
    /// `ConnectionClosed`
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.transport.close();
        self.shared.fail_all();
        drop(self.shared.timer_stop.lock().take());
        self.shared.workers.shutdown(self.shared.await_timeout);
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn submit(&self, mut command: Command, value: Bytes, completion: Completion, holds_permit: bool) -> Result<u64> {
        let result = self.register(&mut command, value, completion, holds_permit);
        if result.is_err() && holds_permit {
            self.release_permit();
        }
        result
    }

    fn register(&self, command: &mut Command, value: Bytes, completion: Completion, holds_permit: bool) -> Result<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KineticError::ConnectionClosed);
        }

        let _order = self.submit_lock.lock();

        let sequence = {
            let mut next = self.next_sequence.lock();
            let sequence = *next;
            *next += 1;
            sequence
        };

        let header = &mut command.header;
        header.sequence = sequence;
        header.connection_id = self.connection_id.load(Ordering::Acquire);
        header.cluster_version = self.cluster_version;
        header.timeout_ms = self.request_timeout.as_millis() as u64;

        let frame = seal(command, self.user_id, &self.hmac_key, value)?;

        self.pending.lock().insert(
            sequence,
            Pending {
                deadline: Instant::now() + self.request_timeout,
                completion,
                holds_permit,
            },
        );

        if let Err(e) = self.transport.send(&frame) {
            self.pending.lock().remove(&sequence);
            return Err(e);
        }

        tracing::trace!("Sent {:?} seq={}", command.header.message_type, sequence);
        Ok(sequence)
    }

    fn acquire_permit(&self) -> Result<()> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(KineticError::ConnectionClosed);
            }
            match self.permits_tx.send_timeout((), PERMIT_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(())) => continue,
                Err(SendTimeoutError::Disconnected(())) => return Err(KineticError::ConnectionClosed),
            }
        }
    }

    fn release_permit(&self) {
        let _ = self.permits_rx.try_recv();
    }

    fn complete(&self, pending: Pending, result: Result<Response>) {
        if pending.holds_permit {
            self.release_permit();
        }
        match pending.completion {
            Completion::Waiter(tx) => {
                let _ = tx.send(result);
            }
            Completion::Callback(callback) => {
                self.workers.execute(Box::new(move || callback(result)));
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        let message = match Message::from_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };
        let command = match message.command() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Dropping frame with undecodable command: {}", e);
                return;
            }
        };

        let authentic = match message.auth {
            Auth::Hmac { .. } => message.verify(&self.hmac_key).is_ok(),
            // Unsigned frames may only carry drive status, never data
            Auth::Unsolicited => {
                command.header.message_type == MessageType::UnsolicitedStatus
                    || !command.status.is_success()
            }
        };

        let Some(ack) = command.header.ack_sequence else {
            if authentic {
                self.on_unsolicited(&command);
            } else {
                tracing::warn!("Dropping unauthenticated unsolicited frame");
            }
            return;
        };

        let pending = self.pending.lock().remove(&ack);
        let Some(pending) = pending else {
            tracing::warn!("Dropping response for unknown sequence {}", ack);
            return;
        };

        if !authentic {
            tracing::warn!("HMAC verification failed for response to {}", ack);
            self.complete(pending, Err(KineticError::HmacFailure));
            return;
        }

        if command.status.code == StatusCode::VersionFailure {
            self.observe_cluster_version(command.header.cluster_version);
        }

        let value = match message.auth {
            Auth::Hmac { .. } => frame.value,
            Auth::Unsolicited => Bytes::new(),
        };
        self.complete(pending, Ok(Response { command, value }));
    }

    fn on_unsolicited(&self, command: &Command) {
        let header = &command.header;
        let outcome = command.status.clone().into_result(header.cluster_version);
        let _ = self.handshake_tx.try_send(outcome);
        if command.status.is_success() {
            self.connection_id.store(header.connection_id, Ordering::Release);
            tracing::debug!(
                "Drive assigned connection id {} (cluster version {})",
                header.connection_id,
                header.cluster_version
            );
        } else {
            tracing::warn!(
                "Drive reported {:?}: {}",
                command.status.code,
                command.status.message
            );
        }
        self.observe_cluster_version(header.cluster_version);
    }

    fn observe_cluster_version(&self, drive_version: i64) {
        self.drive_cluster_version.store(drive_version, Ordering::Release);
        if drive_version == self.cluster_version {
            return;
        }
        let listener = self.cluster_listener.lock().clone();
        if let Some(listener) = listener {
            listener(drive_version);
        }
    }

    fn expire(&self, now: Instant) {
        let expired: Vec<(u64, Pending)> = {
            let mut pending = self.pending.lock();
            let due: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(seq, _)| *seq)
                .collect();
            due.into_iter()
                .filter_map(|seq| pending.remove(&seq).map(|p| (seq, p)))
                .collect()
        };

        for (sequence, pending) in expired {
            tracing::debug!("Request {} timed out", sequence);
            self.complete(pending, Err(KineticError::Timeout));
        }
    }

    fn fail_all(&self) {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            tracing::debug!("Failing {} pending requests on close", drained.len());
        }
        for pending in drained {
            self.complete(pending, Err(KineticError::ConnectionClosed));
        }
    }
}

/// Inbound handler installed on the transport
struct Router {
    shared: Weak<Shared>,
}

impl InboundHandler for Router {
    fn on_frame(&mut self, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.dispatch(frame);
        }
    }

    fn on_closed(&mut self, _cause: KineticError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.closed.store(true, Ordering::Release);
            let _ = shared.handshake_tx.try_send(Err(KineticError::ConnectionClosed));
            shared.fail_all();
        }
    }
}

fn timer_loop(shared: Weak<Shared>, stop: Receiver<()>) {
    let ticker = tick(TIMER_TICK);
    loop {
        select! {
            recv(stop) -> _ => return,
            recv(ticker) -> _ => match shared.upgrade() {
                Some(shared) => shared.expire(Instant::now()),
                None => return,
            },
        }
    }
}
