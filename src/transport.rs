/*!
Message-oriented sockets over TCP.

The pipeline talks to its neighbours through four socket shapes: `push`
(connect, send), `pull` (bind, fan-in receive), `pub` (bind, fan-out send)
and `sub` (connect, filtered receive). Every message travels as one frame: a
4-byte little-endian length followed by that many bytes. Receivers take a
timeout so their owning loops stay responsive to shutdown.

Each socket is owned by exactly one thread; the internal acceptor and reader
threads only ever touch their own stream and hand completed frames over a
channel. Addresses are written `tcp://host:port` and taken verbatim from
configuration.
*/

use log::{debug, warn};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Poll granularity for blocking reads and accept loops.
const POLL_TICK: Duration = Duration::from_millis(10);
/// Back-off between reconnect attempts of a `sub` socket.
const RECONNECT_DELAY: Duration = Duration::from_millis(100);
/// Upper bound on a single frame; anything larger is a protocol error.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket address `{0}`: expected tcp://host:port")]
    Address(String),
    /// No message arrived within the timeout. Expected; loops just iterate.
    #[error("receive timed out")]
    Timeout,
    /// The receive was interrupted by a signal.
    #[error("receive interrupted")]
    Interrupted,
    /// The socket's worker threads have gone away.
    #[error("socket closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Strip the `tcp://` scheme and hand back a host:port pair.
pub fn tcp_endpoint(uri: &str) -> Result<&str, TransportError> {
    uri.strip_prefix("tcp://")
        .filter(|rest| rest.contains(':'))
        .ok_or_else(|| TransportError::Address(uri.to_owned()))
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

/// Frames travel to the owning thread as results, so an interrupted or
/// failed read reaches the receiver instead of dying in a worker thread.
type FrameResult = io::Result<Vec<u8>>;

/// Fill `buf` from the stream, riding out read timeouts until `shutdown`.
///
/// Returns false on clean EOF or shutdown. Partial progress is kept across
/// timeouts so a frame split by the poll tick is never corrupted. An
/// interrupted read (EINTR) is an error here: the owner's loop must get the
/// chance to exit.
fn read_full(stream: &mut TcpStream, buf: &mut [u8], shutdown: &AtomicBool) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn read_frame(stream: &mut TcpStream, shutdown: &AtomicBool) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !read_full(stream, &mut len_buf, shutdown)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap"),
        ));
    }
    let mut payload = vec![0u8; len];
    if !read_full(stream, &mut payload, shutdown)? {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Run one connection's read loop, forwarding frames into `tx`.
///
/// A connection that goes away is a normal event, logged and dropped; the
/// peer reconnects if it wants to. A signal interrupt is forwarded so the
/// socket owner's receive loop can exit.
fn pump_frames(mut stream: TcpStream, tx: mpsc::Sender<FrameResult>, shutdown: Arc<AtomicBool>) {
    let _ = stream.set_read_timeout(Some(POLL_TICK));
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match read_frame(&mut stream, &shutdown) {
            Ok(Some(frame)) => {
                if tx.send(Ok(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                let _ = tx.send(Err(e));
                break;
            }
            Err(e) => {
                debug!("transport: connection dropped: {e}");
                break;
            }
        }
    }
}

/// A connecting, sending socket.
///
/// `connect` fails immediately when the peer is absent; `connect_lazy`
/// defers the attempt to the first `send`, which matches how result and
/// monitoring channels come up before their consumers do.
pub struct PushSocket {
    endpoint: String,
    stream: Option<TcpStream>,
}

impl PushSocket {
    pub fn connect(uri: &str) -> Result<PushSocket, TransportError> {
        let endpoint = tcp_endpoint(uri)?.to_owned();
        let stream = TcpStream::connect(&endpoint)?;
        stream.set_nodelay(true).ok();
        Ok(PushSocket {
            endpoint,
            stream: Some(stream),
        })
    }

    pub fn connect_lazy(uri: &str) -> Result<PushSocket, TransportError> {
        let endpoint = tcp_endpoint(uri)?.to_owned();
        Ok(PushSocket {
            endpoint,
            stream: None,
        })
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.endpoint)?;
            stream.set_nodelay(true).ok();
            self.stream = Some(stream);
        }
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        if let Err(e) = write_frame(stream, payload) {
            // Drop the broken stream so the next send reconnects.
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Map a frame delivery into the receiver-facing error vocabulary.
fn map_frame(
    delivery: Result<FrameResult, RecvTimeoutError>,
) -> Result<Vec<u8>, TransportError> {
    match delivery {
        Ok(Ok(frame)) => Ok(frame),
        Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => Err(TransportError::Interrupted),
        Ok(Err(e)) => Err(TransportError::Io(e)),
        Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
        Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
    }
}

/// A binding, receiving socket. Accepts any number of pushers and fans their
/// frames into one receive queue.
pub struct PullSocket {
    rx: mpsc::Receiver<FrameResult>,
    _tx: mpsc::Sender<FrameResult>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl PullSocket {
    pub fn bind(uri: &str) -> Result<PullSocket, TransportError> {
        let listener = TcpListener::bind(tcp_endpoint(uri)?)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_tx = tx.clone();
        let accept_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            while !accept_shutdown.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, _peer)) => {
                        let tx = accept_tx.clone();
                        let shutdown = Arc::clone(&accept_shutdown);
                        thread::spawn(move || pump_frames(stream, tx, shutdown));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_TICK);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        let _ = accept_tx.send(Err(e));
                    }
                    Err(e) => {
                        warn!("transport: accept failed: {e}");
                        thread::sleep(POLL_TICK);
                    }
                }
            }
        });
        Ok(PullSocket {
            rx,
            _tx: tx,
            shutdown,
            local_addr,
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        map_frame(self.rx.recv_timeout(timeout))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// A binding, broadcasting socket. Frames go to every connected subscriber;
/// subscribers that went away are pruned on the next send.
pub struct PubSocket {
    peers: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl PubSocket {
    pub fn bind(uri: &str) -> Result<PubSocket, TransportError> {
        let listener = TcpListener::bind(tcp_endpoint(uri)?)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let peers: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_peers = Arc::clone(&peers);
        let accept_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            while !accept_shutdown.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, _peer)) => {
                        stream.set_nodelay(true).ok();
                        accept_peers.lock().unwrap().push(stream);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_TICK);
                    }
                    // Send-only socket: there is no receive path to carry
                    // the interrupt, and the owner observes shutdown on its
                    // own loop.
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        warn!("transport: accept failed: {e}");
                        thread::sleep(POLL_TICK);
                    }
                }
            }
        });
        Ok(PubSocket {
            peers,
            shutdown,
            local_addr,
        })
    }

    /// Broadcast to every live subscriber. Subscribers joining later miss
    /// earlier messages, as pub/sub always works.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut peers = self.peers.lock().unwrap();
        peers.retain_mut(|stream| match write_frame(stream, payload) {
            Ok(()) => true,
            Err(e) => {
                debug!("transport: dropping subscriber: {e}");
                false
            }
        });
        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// A connecting, receiving socket with prefix subscriptions.
///
/// The connection is kept up in the background: if the publisher is not
/// there yet, or goes away, the socket retries until it is dropped. A fresh
/// socket delivers nothing until [`SubSocket::subscribe`] is called; the
/// empty prefix subscribes to everything.
pub struct SubSocket {
    rx: mpsc::Receiver<FrameResult>,
    _tx: mpsc::Sender<FrameResult>,
    filters: Arc<Mutex<Vec<Vec<u8>>>>,
    shutdown: Arc<AtomicBool>,
}

impl SubSocket {
    pub fn connect(uri: &str) -> Result<SubSocket, TransportError> {
        let endpoint = tcp_endpoint(uri)?.to_owned();
        let (tx, rx) = mpsc::channel();
        let filters: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let pump_tx = tx.clone();
        let pump_filters = Arc::clone(&filters);
        let pump_shutdown = Arc::clone(&shutdown);
        thread::spawn(move || {
            while !pump_shutdown.load(Ordering::Relaxed) {
                let mut stream = match TcpStream::connect(&endpoint) {
                    Ok(s) => s,
                    Err(_) => {
                        thread::sleep(RECONNECT_DELAY);
                        continue;
                    }
                };
                let _ = stream.set_read_timeout(Some(POLL_TICK));
                loop {
                    if pump_shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    match read_frame(&mut stream, &pump_shutdown) {
                        Ok(Some(frame)) => {
                            let keep = {
                                let filters = pump_filters.lock().unwrap();
                                filters.iter().any(|f| frame.starts_with(f))
                            };
                            if keep && pump_tx.send(Ok(frame)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                            let _ = pump_tx.send(Err(e));
                            return;
                        }
                        Err(e) => {
                            debug!("transport: subscriber stream lost: {e}");
                            break;
                        }
                    }
                }
                thread::sleep(RECONNECT_DELAY);
            }
        });
        Ok(SubSocket {
            rx,
            _tx: tx,
            filters,
            shutdown,
        })
    }

    /// Deliver frames starting with `prefix`. An empty prefix matches all.
    pub fn subscribe(&self, prefix: &[u8]) {
        self.filters.lock().unwrap().push(prefix.to_vec());
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        map_frame(self.rx.recv_timeout(timeout))
    }
}

impl Drop for SubSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
