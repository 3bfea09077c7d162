/*!
The top-level process: state machine, I/O perimeter and command loop.

A supervisor owns the transport sockets, a set of worker managers, and four
service threads: the low- and high-priority data listeners, the result
publisher, and (on the caller's thread) the command loop. External commands
arrive as JSON envelopes on a subscribed socket and drive the status
machine:

```text
Initialised -> Waiting -> (Processing <-> Waiting)* -> [EndingProcessing ->] Shutdown
```

`Shutdown` is terminal. Cancellation is global: dropping `continue_all`
makes every loop exit after its next sleep or receive timeout, and the
queues' stop notification unblocks any waiting worker, so joins complete in
bounded time.
*/

use crate::config::{DataflowType, ProcessConfig, SocketMode};
use crate::ctrl::CtrlClient;
use crate::manager::{ManagerShared, WorkerManager};
use crate::message::{self, Envelope};
use crate::monitor::MonitoringEmitter;
use crate::packet::{self, PacketKind};
use crate::queue::Priority;
use crate::transform::TransformFactory;
use crate::transport::{PubSocket, PullSocket, PushSocket, SubSocket, TransportError};
use log::{debug, error, info, warn};
use nix::sys::signal::Signal;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Receive timeout of every listener and of the command loop.
const RECV_TIMEOUT: Duration = Duration::from_millis(10);
/// Pause of a listener while data intake is gated off.
const LISTEN_TICK: Duration = Duration::from_millis(10);
/// Pass interval of the result publisher.
const PUBLISH_TICK: Duration = Duration::from_millis(10);
/// Poll interval of the cleaned-shutdown drain wait.
const DRAIN_TICK: Duration = Duration::from_millis(200);
/// Confirmation pause of the drain wait, covering items in flight between
/// a worker and the result publisher.
const DRAIN_SETTLE: Duration = Duration::from_millis(50);
/// Settling pause between gating the pool off and joining it.
const STOP_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("signal handlers: {0}")]
    Signals(&'static str),
}

/// The textual process status observed by monitors and shutdown logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initialised,
    Waiting,
    Processing,
    EndingProcessing,
    Shutdown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Initialised => "Initialised",
            Status::Waiting => "Waiting",
            Status::Processing => "Processing",
            Status::EndingProcessing => "EndingProcessing",
            Status::Shutdown => "Shutdown",
        })
    }
}

/// How a data listener turns one received message into queue items.
///
/// The three stock strategies mirror the configured dataflow types; tests
/// and embedders can inject their own (for instance to override how a
/// filename is opened).
pub trait DataDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Vec<Vec<u8>>;
}

/// Production path: length-prefixed telemetry frames. Waveforms pass
/// through whole (still framed); housekeeping and unknown types are logged
/// and dropped; malformed messages are logged and dropped.
pub struct BinaryDecoder {
    name: String,
}

impl BinaryDecoder {
    pub fn new(name: &str) -> BinaryDecoder {
        BinaryDecoder {
            name: name.to_owned(),
        }
    }
}

impl DataDecoder for BinaryDecoder {
    fn decode(&self, raw: &[u8]) -> Vec<Vec<u8>> {
        let payload = match packet::parse_envelope(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}: dropping message: {e}", self.name);
                return Vec::new();
            }
        };
        match packet::classify(payload) {
            Ok(PacketKind::Waveform) | Ok(PacketKind::WaveformHeader) => vec![raw.to_vec()],
            Ok(PacketKind::Housekeeping) => {
                // Accepted but not forwarded; a downstream contract for
                // housekeeping fan-out does not exist yet.
                info!("{}: housekeeping packet received", self.name);
                Vec::new()
            }
            Ok(kind) => {
                warn!("{}: dropping unexpected packet {kind:?}", self.name);
                Vec::new()
            }
            Err(e) => {
                warn!("{}: dropping unclassifiable payload: {e}", self.name);
                Vec::new()
            }
        }
    }
}

/// Replay path: the message is a UTF-8 path naming a file of self-contained
/// records, one per line by default.
pub struct FilenameDecoder {
    name: String,
    opener: Box<dyn Fn(&str) -> io::Result<Vec<Vec<u8>>> + Send + Sync>,
}

impl FilenameDecoder {
    pub fn new(name: &str) -> FilenameDecoder {
        FilenameDecoder::with_opener(name, Box::new(read_line_records))
    }

    pub fn with_opener(
        name: &str,
        opener: Box<dyn Fn(&str) -> io::Result<Vec<Vec<u8>>> + Send + Sync>,
    ) -> FilenameDecoder {
        FilenameDecoder {
            name: name.to_owned(),
            opener,
        }
    }
}

fn read_line_records(path: &str) -> io::Result<Vec<Vec<u8>>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.as_bytes().to_vec())
        .collect())
}

impl DataDecoder for FilenameDecoder {
    fn decode(&self, raw: &[u8]) -> Vec<Vec<u8>> {
        let path = match std::str::from_utf8(raw) {
            Ok(p) => p.trim(),
            Err(_) => {
                warn!("{}: filename message is not UTF-8", self.name);
                return Vec::new();
            }
        };
        match (self.opener)(path) {
            Ok(items) => {
                info!("{}: loaded {} records from {path}", self.name, items.len());
                items
            }
            Err(e) => {
                error!("{}: unable to open {path}: {e}", self.name);
                Vec::new()
            }
        }
    }
}

/// Test path: the message body is pushed verbatim.
pub struct StringDecoder;

impl DataDecoder for StringDecoder {
    fn decode(&self, raw: &[u8]) -> Vec<Vec<u8>> {
        vec![raw.to_vec()]
    }
}

enum DataSocket {
    Pull(PullSocket),
    Sub(SubSocket),
}

impl DataSocket {
    fn recv_timeout(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self {
            DataSocket::Pull(s) => s.recv_timeout(timeout),
            DataSocket::Sub(s) => s.recv_timeout(timeout),
        }
    }
}

enum ResultSocket {
    Push(PushSocket),
    Pub(PubSocket),
}

impl ResultSocket {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match self {
            ResultSocket::Push(s) => s.send(payload),
            ResultSocket::Pub(s) => s.send(payload),
        }
    }
}

struct ResultChannel {
    shared: Arc<ManagerShared>,
    lp: Option<ResultSocket>,
    hp: Option<ResultSocket>,
}

pub struct Supervisor {
    name: String,
    fullname: String,
    globalname: String,
    cfg: ProcessConfig,
    factory: TransformFactory,
    decoder: Arc<dyn DataDecoder>,
    status: Arc<Mutex<Status>>,
    continue_all: Arc<AtomicBool>,
    stop_data: Arc<AtomicBool>,
    managers: Vec<WorkerManager>,
    monitor: MonitoringEmitter,
    ctrl: Option<CtrlClient>,
    command_socket: SubSocket,
    monitoring_socket: PushSocket,
    lp_data: Option<DataSocket>,
    hp_data: Option<DataSocket>,
    service_threads: Vec<JoinHandle<()>>,
    signals_registered: bool,
}

impl Supervisor {
    /// Build a supervisor with the stock decoder for the configured
    /// dataflow type.
    pub fn new(cfg: ProcessConfig, factory: TransformFactory) -> Result<Supervisor, StartupError> {
        let globalname = format!("Supervisor-{}", cfg.name);
        let decoder: Arc<dyn DataDecoder> = match cfg.dataflow_type {
            DataflowType::Binary => Arc::new(BinaryDecoder::new(&globalname)),
            DataflowType::Filename => Arc::new(FilenameDecoder::new(&globalname)),
            DataflowType::String => Arc::new(StringDecoder),
        };
        Supervisor::with_decoder(cfg, factory, decoder)
    }

    /// Build a supervisor with an injected listener strategy.
    pub fn with_decoder(
        cfg: ProcessConfig,
        factory: TransformFactory,
        decoder: Arc<dyn DataDecoder>,
    ) -> Result<Supervisor, StartupError> {
        let name = cfg.name.clone();
        let fullname = name.clone();
        let globalname = format!("Supervisor-{name}");
        info!(
            "Supervisor: {globalname} / {:?} / {} / {:?}",
            cfg.dataflow_type, cfg.processing_type, cfg.datasocket_type
        );

        let (lp_data, hp_data) = match cfg.datasocket_type {
            SocketMode::PushPull => (
                Some(DataSocket::Pull(PullSocket::bind(&cfg.data_lp_socket)?)),
                Some(DataSocket::Pull(PullSocket::bind(&cfg.data_hp_socket)?)),
            ),
            SocketMode::PubSub => {
                let lp = SubSocket::connect(&cfg.data_lp_socket)?;
                lp.subscribe(b"");
                let hp = SubSocket::connect(&cfg.data_hp_socket)?;
                hp.subscribe(b"");
                (Some(DataSocket::Sub(lp)), Some(DataSocket::Sub(hp)))
            }
            SocketMode::Custom => {
                info!("{globalname} started with custom data receiver");
                (None, None)
            }
        };

        let command_socket = SubSocket::connect(&cfg.command_socket)?;
        command_socket.subscribe(b"");
        let monitoring_socket = PushSocket::connect_lazy(&cfg.monitoring_socket)?;

        let ctrl = match &cfg.ctrl_socket {
            Some(uri) => Some(CtrlClient::connect(uri)?),
            None => None,
        };

        let monitor = MonitoringEmitter::new(&fullname);
        let mut sup = Supervisor {
            name,
            fullname,
            globalname: globalname.clone(),
            cfg,
            factory,
            decoder,
            status: Arc::new(Mutex::new(Status::Initialised)),
            continue_all: Arc::new(AtomicBool::new(true)),
            stop_data: Arc::new(AtomicBool::new(true)),
            managers: Vec::new(),
            monitor,
            ctrl,
            command_socket,
            monitoring_socket,
            lp_data,
            hp_data,
            service_threads: Vec::new(),
            signals_registered: false,
        };
        sup.send_info(1, "Initialised", 1, "Low");
        info!("{globalname} started");
        Ok(sup)
    }

    pub fn status(&self) -> Status {
        *self.status.lock().unwrap()
    }

    /// A handle tests and monitors can read the status through after the
    /// supervisor has been moved into its run thread.
    pub fn status_watch(&self) -> Arc<Mutex<Status>> {
        Arc::clone(&self.status)
    }

    /// Install SIGINT/SIGTERM handlers routed to this supervisor's command
    /// loop. At most one supervisor per process may be registered.
    pub fn register_signal_handlers(&mut self) -> Result<(), StartupError> {
        signal_cell::register().map_err(StartupError::Signals)?;
        self.signals_registered = true;
        Ok(())
    }

    /// Bring up managers, workers and service threads, then run the
    /// command loop until shutdown. Blocks the calling thread.
    pub fn start(&mut self) {
        info!("{}: starting managers and workers", self.globalname);
        self.start_managers();
        self.start_service_threads();

        self.set_status(Status::Waiting);
        self.listen_for_commands();

        for handle in self.service_threads.drain(..) {
            let _ = handle.join();
        }
        info!("{}: all service threads joined", self.globalname);
    }

    fn start_managers(&mut self) {
        let policy = self.cfg.overflow_policy();
        for m_cfg in self.cfg.workers.clone() {
            let n = m_cfg.num_workers;
            let mut manager = WorkerManager::new(&self.name, m_cfg, policy);
            manager.start_worker_threads(n, &self.factory);
            self.managers.push(manager);
        }
    }

    fn start_service_threads(&mut self) {
        let shareds: Vec<Arc<ManagerShared>> =
            self.managers.iter().map(|m| m.shared()).collect();

        if let Some(socket) = self.lp_data.take() {
            self.service_threads.push(spawn_data_listener(
                socket,
                Priority::Low,
                Arc::clone(&self.decoder),
                shareds.clone(),
                Arc::clone(&self.continue_all),
                Arc::clone(&self.stop_data),
                self.globalname.clone(),
            ));
        }
        if let Some(socket) = self.hp_data.take() {
            self.service_threads.push(spawn_data_listener(
                socket,
                Priority::High,
                Arc::clone(&self.decoder),
                shareds,
                Arc::clone(&self.continue_all),
                Arc::clone(&self.stop_data),
                self.globalname.clone(),
            ));
        }

        match self.build_result_channels() {
            Ok(channels) => {
                let continue_all = Arc::clone(&self.continue_all);
                let globalname = self.globalname.clone();
                self.service_threads.push(thread::spawn(move || {
                    run_result_publisher(channels, continue_all, globalname)
                }));
            }
            Err(e) => {
                error!("{}: result channels unavailable: {e}", self.globalname);
            }
        }
    }

    fn build_result_channels(&mut self) -> Result<Vec<ResultChannel>, TransportError> {
        let mut channels = Vec::new();
        for manager in &self.managers {
            let cfg = &manager.cfg;
            let lp = open_result_socket(cfg.result_socket_type, &cfg.result_lp_socket)?;
            let hp = open_result_socket(cfg.result_socket_type, &cfg.result_hp_socket)?;
            if lp.is_some() {
                info!(
                    "{}: result lp socket {} {}",
                    manager.globalname(),
                    socket_mode_name(cfg.result_socket_type),
                    cfg.result_lp_socket
                );
            }
            if hp.is_some() {
                info!(
                    "{}: result hp socket {} {}",
                    manager.globalname(),
                    socket_mode_name(cfg.result_socket_type),
                    cfg.result_hp_socket
                );
            }
            channels.push(ResultChannel {
                shared: manager.shared(),
                lp,
                hp,
            });
        }
        Ok(channels)
    }

    fn listen_for_commands(&mut self) {
        info!("{}: waiting for commands", self.globalname);
        while self.continue_all.load(Ordering::Relaxed) {
            if let Some(sig) = signal_cell::take_pending() {
                self.handle_signal(sig);
                continue;
            }
            match self.command_socket.recv_timeout(RECV_TIMEOUT) {
                Ok(raw) => match serde_json::from_slice::<Envelope>(&raw) {
                    Ok(env) => self.process_command(&env),
                    Err(e) => error!("{}: JSON parse error: {e}", self.globalname),
                },
                Err(TransportError::Timeout) => {}
                Err(TransportError::Interrupted) => break,
                Err(e) => {
                    error!("{}: command socket failed: {e}", self.globalname);
                    break;
                }
            }
        }
        // A loop that ended any other way than through the shutdown
        // commands still tears the process down.
        if self.status() != Status::Shutdown {
            self.command_shutdown();
        }
        info!("{}: end listen_for_commands", self.globalname);
    }

    fn process_command(&mut self, env: &Envelope) {
        match env.header.msg_type {
            message::TYPE_COMMAND if env.is_for(&self.name) => {
                info!(
                    "{}: received command `{}` from {}",
                    self.globalname, env.header.subtype, env.header.pidsource
                );
                match env.header.subtype.as_str() {
                    "shutdown" => self.command_shutdown(),
                    "cleanedshutdown" => self.command_cleanedshutdown(),
                    "getstatus" => self.command_getstatus(&env.header.pidsource),
                    "start" => self.command_start(),
                    "stop" => self.command_stop(),
                    "startprocessing" => self.command_startprocessing(),
                    "stopprocessing" => self.command_stopprocessing(),
                    "reset" => self.command_reset(),
                    "startdata" => self.command_startdata(),
                    "stopdata" => self.command_stopdata(),
                    other => warn!("{}: unknown command subtype `{other}`", self.globalname),
                }
            }
            message::TYPE_CONFIG => {
                if let Ok(value) = serde_json::to_value(env) {
                    for manager in &self.managers {
                        manager.configure(&value);
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_signal(&mut self, sig: Signal) {
        match sig {
            Signal::SIGINT => {
                warn!("{}: SIGINT received, terminating with shutdown", self.globalname);
                self.command_shutdown();
            }
            Signal::SIGTERM => {
                warn!(
                    "{}: SIGTERM received, terminating with cleaned shutdown",
                    self.globalname
                );
                self.command_cleanedshutdown();
            }
            other => {
                warn!("{}: received signal {other}, terminating", self.globalname);
                self.command_shutdown();
            }
        }
    }

    fn set_status(&mut self, status: Status) {
        {
            let mut cur = self.status.lock().unwrap();
            if *cur == Status::Shutdown && status != Status::Shutdown {
                warn!(
                    "{}: ignoring status change to {status}, already shut down",
                    self.globalname
                );
                return;
            }
            *cur = status;
        }
        self.send_info(1, &status.to_string(), 1, "Low");
    }

    fn command_start(&mut self) {
        self.start_custom();
        self.command_startprocessing();
        self.command_startdata();
    }

    fn command_stop(&mut self) {
        self.command_stopdata();
        self.command_stopprocessing();
    }

    fn command_startprocessing(&mut self) {
        self.set_status(Status::Processing);
        for manager in &self.managers {
            manager.set_processing(true);
        }
    }

    fn command_stopprocessing(&mut self) {
        self.set_status(Status::Waiting);
        for manager in &self.managers {
            manager.set_processing(false);
        }
    }

    fn command_startdata(&mut self) {
        self.stop_data.store(false, Ordering::Relaxed);
        for manager in &self.managers {
            manager.set_stop_data(false);
        }
    }

    fn command_stopdata(&mut self) {
        self.stop_data.store(true, Ordering::Relaxed);
        for manager in &self.managers {
            manager.set_stop_data(true);
        }
    }

    fn command_reset(&mut self) {
        let status = self.status();
        if status != Status::Processing && status != Status::Waiting {
            return;
        }
        self.command_stop();
        for manager in &self.managers {
            info!("{}: trying to reset {}", self.globalname, manager.globalname());
            manager.clean_queues();
        }
        self.set_status(Status::Waiting);
    }

    fn command_getstatus(&mut self, pidtarget: &str) {
        let snapshots: Vec<Envelope> = self
            .managers
            .iter()
            .map(|m| self.monitor.snapshot(m, pidtarget))
            .collect();
        for env in snapshots {
            self.send_monitoring(&env);
        }
    }

    fn command_shutdown(&mut self) {
        self.set_status(Status::Shutdown);
        self.stop_all(false);
    }

    fn command_cleanedshutdown(&mut self) {
        if self.status() == Status::Processing {
            self.set_status(Status::EndingProcessing);
            self.command_stopdata();
            let shareds: Vec<Arc<ManagerShared>> =
                self.managers.iter().map(|m| m.shared()).collect();
            for shared in shareds {
                info!("{}: trying to stop {}", self.globalname, shared.globalname);
                loop {
                    if !shared.all_queues_empty() {
                        info!(
                            "{}: queues of {} have size {} {} {} {}",
                            self.globalname,
                            shared.globalname,
                            shared.lp_in.len(),
                            shared.hp_in.len(),
                            shared.lp_out.len(),
                            shared.hp_out.len()
                        );
                        thread::sleep(DRAIN_TICK);
                        continue;
                    }
                    // Empty queues can hide an item in flight between a
                    // worker and the result publisher. Confirm once more
                    // after a short pause before declaring the drain done.
                    thread::sleep(DRAIN_SETTLE);
                    if shared.all_queues_empty() {
                        break;
                    }
                }
            }
        } else {
            warn!(
                "{}: not in Processing state for a clean shutdown, forcing the shutdown",
                self.globalname
            );
        }
        self.set_status(Status::Shutdown);
        self.stop_all(false);
    }

    fn start_custom(&mut self) {
        let run_id = self.cfg.run_id;
        if let Some(ctrl) = self.ctrl.as_mut() {
            if let Err(e) = ctrl.send_start(run_id) {
                error!("{}: start frames not sent: {e}", self.globalname);
            }
        }
    }

    fn stop_custom(&mut self) {
        let run_id = self.cfg.run_id;
        if let Some(ctrl) = self.ctrl.as_mut() {
            if let Err(e) = ctrl.send_stop(run_id) {
                error!("{}: stop frame not sent: {e}", self.globalname);
            }
        }
    }

    fn stop_all(&mut self, fast: bool) {
        self.continue_all.store(false, Ordering::Relaxed);
        info!("{}: stopping all workers and managers", self.globalname);
        self.stop_custom();
        self.command_stop();
        thread::sleep(STOP_SETTLE);
        for manager in &mut self.managers {
            manager.stop(fast);
        }
        info!("{}: all workers and managers terminated", self.globalname);
    }

    fn send_monitoring(&mut self, env: &Envelope) {
        if let Err(e) = self.monitoring_socket.send(&env.to_bytes()) {
            debug!("{}: monitoring message not sent: {e}", self.globalname);
        }
    }

    fn send_info(&mut self, level: i64, message: &str, code: i64, priority: &str) {
        let env = Envelope::info(level, message, &self.fullname, code, priority);
        self.send_monitoring(&env);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.continue_all.store(false, Ordering::Relaxed);
        for handle in self.service_threads.drain(..) {
            let _ = handle.join();
        }
        if self.signals_registered {
            signal_cell::unregister();
        }
    }
}

fn socket_mode_name(mode: SocketMode) -> &'static str {
    match mode {
        SocketMode::PushPull => "pushpull",
        SocketMode::PubSub => "pubsub",
        SocketMode::Custom => "custom",
    }
}

fn open_result_socket(
    mode: SocketMode,
    uri: &str,
) -> Result<Option<ResultSocket>, TransportError> {
    if uri == "none" {
        return Ok(None);
    }
    Ok(Some(match mode {
        SocketMode::PushPull => ResultSocket::Push(PushSocket::connect_lazy(uri)?),
        SocketMode::PubSub => ResultSocket::Pub(PubSocket::bind(uri)?),
        SocketMode::Custom => return Ok(None),
    }))
}

fn spawn_data_listener(
    socket: DataSocket,
    priority: Priority,
    decoder: Arc<dyn DataDecoder>,
    shareds: Vec<Arc<ManagerShared>>,
    continue_all: Arc<AtomicBool>,
    stop_data: Arc<AtomicBool>,
    globalname: String,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let lane = match priority {
            Priority::High => "hp",
            Priority::Low => "lp",
        };
        while continue_all.load(Ordering::Relaxed) {
            if stop_data.load(Ordering::Relaxed) {
                thread::sleep(LISTEN_TICK);
                continue;
            }
            match socket.recv_timeout(RECV_TIMEOUT) {
                Ok(raw) => {
                    for item in decoder.decode(&raw) {
                        for shared in &shareds {
                            match priority {
                                Priority::High => shared.hp_in.push(item.clone()),
                                Priority::Low => shared.lp_in.push(item.clone()),
                            }
                        }
                    }
                }
                Err(TransportError::Timeout) => {}
                Err(TransportError::Interrupted) => break,
                Err(e) => {
                    error!("{globalname}: {lane} data listener failed: {e}");
                    break;
                }
            }
        }
        info!("{globalname}: end listen_for_{lane}_data");
    })
}

fn run_result_publisher(
    mut channels: Vec<ResultChannel>,
    continue_all: Arc<AtomicBool>,
    globalname: String,
) {
    while continue_all.load(Ordering::Relaxed) {
        thread::sleep(PUBLISH_TICK);
        for channel in channels.iter_mut() {
            // One item per manager per pass, high priority first. A lane
            // without a configured socket is drained and discarded so
            // nothing accumulates behind it.
            if let Some(item) = channel.shared.hp_out.try_get() {
                match channel.hp.as_mut() {
                    Some(socket) => {
                        if let Err(e) = socket.send(&item) {
                            error!("{}: hp result not sent: {e}", channel.shared.globalname);
                        }
                    }
                    None => debug!(
                        "{}: hp result discarded, socket is none",
                        channel.shared.globalname
                    ),
                }
            } else if let Some(item) = channel.shared.lp_out.try_get() {
                match channel.lp.as_mut() {
                    Some(socket) => {
                        if let Err(e) = socket.send(&item) {
                            error!("{}: lp result not sent: {e}", channel.shared.globalname);
                        }
                    }
                    None => debug!(
                        "{}: lp result discarded, socket is none",
                        channel.shared.globalname
                    ),
                }
            }
        }
    }
    info!("{globalname}: end result publisher");
}

/// Process-scoped signal cell.
///
/// Handlers only record the signal number; the registered supervisor's
/// command loop polls the cell and maps the signal to a command. Exactly
/// one supervisor may be registered at a time.
mod signal_cell {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    static PENDING: AtomicI32 = AtomicI32::new(0);
    static REGISTERED: AtomicBool = AtomicBool::new(false);

    extern "C" fn note_signal(signum: nix::libc::c_int) {
        PENDING.store(signum, Ordering::Relaxed);
    }

    pub fn register() -> Result<(), &'static str> {
        if REGISTERED.swap(true, Ordering::SeqCst) {
            return Err("a supervisor is already registered");
        }
        let action = SigAction::new(
            SigHandler::Handler(note_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let installed = unsafe {
            sigaction(Signal::SIGINT, &action)
                .and_then(|_| sigaction(Signal::SIGTERM, &action))
        };
        if installed.is_err() {
            REGISTERED.store(false, Ordering::SeqCst);
            return Err("failed to install handlers");
        }
        Ok(())
    }

    pub fn unregister() {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        unsafe {
            let _ = sigaction(Signal::SIGINT, &action);
            let _ = sigaction(Signal::SIGTERM, &action);
        }
        PENDING.store(0, Ordering::Relaxed);
        REGISTERED.store(false, Ordering::SeqCst);
    }

    pub fn take_pending() -> Option<Signal> {
        let signum = PENDING.swap(0, Ordering::Relaxed);
        if signum == 0 {
            None
        } else {
            Signal::try_from(signum).ok()
        }
    }
}
