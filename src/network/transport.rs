//! Transport
//!
//! Owns one connection. A writer thread drains an outbound queue so frames
//! from any producer hit the wire one at a time; a reader thread decodes
//! inbound frames and hands them to the [`InboundHandler`] in receive order.

use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{KineticError, Result};
use crate::protocol::{encode_frame, read_frame, Frame};
use super::DuplexStream;

/// Receives what the reader thread decodes
pub trait InboundHandler: Send + 'static {
    fn on_frame(&mut self, frame: Frame);

    /// Called once when the connection ends, for any reason
    fn on_closed(&mut self, cause: KineticError);
}

/// One framed, full-duplex connection
pub struct Transport {
    stream: Arc<dyn DuplexStream>,

    /// Outbound queue; `None` once closed
    outbound: Mutex<Option<Sender<Bytes>>>,

    /// Read half, taken when the inbound handler is installed
    reader: Mutex<Option<Box<dyn Read + Send>>>,

    writer_thread: Mutex<Option<JoinHandle<()>>>,

    closed: Arc<AtomicBool>,

    peer: String,
}

impl Transport {
    /// Wrap a connected stream and start the writer thread
    pub fn new(stream: Box<dyn DuplexStream>) -> Result<Self> {
        let stream: Arc<dyn DuplexStream> = Arc::from(stream);
        let peer = stream.peer();
        let reader = stream.reader()?;
        let writer = BufWriter::new(stream.writer()?);
        let closed = Arc::new(AtomicBool::new(false));

        let (tx, rx) = unbounded();
        let writer_thread = {
            let stream = Arc::clone(&stream);
            let closed = Arc::clone(&closed);
            let peer = peer.clone();
            thread::Builder::new()
                .name("kinetic-writer".to_string())
                .spawn(move || write_loop(rx, writer, stream, closed, peer))?
        };

        Ok(Self {
            stream,
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(reader)),
            writer_thread: Mutex::new(Some(writer_thread)),
            closed,
            peer,
        })
    }

    /// Install the inbound handler and start the reader thread
    ///
    /// May be called once.
    pub fn set_inbound_handler<H: InboundHandler>(&self, handler: H) -> Result<()> {
        let reader = self.reader.lock().take().ok_or_else(|| {
            KineticError::Config("inbound handler already installed".to_string())
        })?;

        let stream = Arc::clone(&self.stream);
        let closed = Arc::clone(&self.closed);
        let peer = self.peer.clone();
        thread::Builder::new()
            .name("kinetic-reader".to_string())
            .spawn(move || read_loop(BufReader::new(reader), handler, stream, closed, peer))?;
        Ok(())
    }

    /// Queue a frame for the writer thread; never blocks on the socket
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        match &*self.outbound.lock() {
            Some(tx) if !self.closed.load(Ordering::Acquire) => {
                tx.send(bytes).map_err(|_| KineticError::ConnectionClosed)
            }
            _ => Err(KineticError::ConnectionClosed),
        }
    }

    /// Stop both threads and shut the stream down
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Closing transport to {}", self.peer);

        drop(self.outbound.lock().take());
        let _ = self.stream.shutdown();
        if let Some(handle) = self.writer_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_loop(
    rx: Receiver<Bytes>,
    mut writer: BufWriter<Box<dyn Write + Send>>,
    stream: Arc<dyn DuplexStream>,
    closed: Arc<AtomicBool>,
    peer: String,
) {
    for bytes in rx.iter() {
        if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
            if !closed.swap(true, Ordering::AcqRel) {
                tracing::warn!("Error writing to {}: {}", peer, e);
            }
            // Unblocks the reader, which reports the close
            let _ = stream.shutdown();
            return;
        }
    }
}

fn read_loop<H: InboundHandler>(
    mut reader: BufReader<Box<dyn Read + Send>>,
    mut handler: H,
    stream: Arc<dyn DuplexStream>,
    closed: Arc<AtomicBool>,
    peer: String,
) {
    loop {
        match read_frame(&mut reader) {
            Ok(frame) => handler.on_frame(frame),
            Err(e) => {
                let already_closed = closed.swap(true, Ordering::AcqRel);
                match &e {
                    KineticError::ConnectionClosed => {
                        tracing::debug!("Connection to {} closed", peer)
                    }
                    _ if already_closed => tracing::debug!("Reader for {} stopped: {}", peer, e),
                    _ => tracing::warn!("Error reading from {}: {}", peer, e),
                }
                let _ = stream.shutdown();
                handler.on_closed(e);
                return;
            }
        }
    }
}
