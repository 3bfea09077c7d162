/*!
A priority-aware worker-pool pipeline for streaming waveform telemetry.

An acquisition frontend emits a continuous flow of length-prefixed binary
packets over TCP. This crate receives them, classifies them, fans waveforms
out through a pool of worker threads for numerical processing, and pushes
the derived results downstream, all while staying controllable at runtime
over an out-of-band command channel.

The intended deployment is pretty specific:

* Data arrives in two lanes, low and high priority, and any idle worker
  must always serve the high lane first.
* Throughput is bursty: long quiet stretches, then a run of thousands of
  packets per second that must drain without loss.
* An operator (or a scheduler) steers the process externally: start and
  stop acquisition, pause processing, ask for status, shut down cleanly.

The moving parts, bottom up: [`queue::WorkQueue`] is a blocking FIFO with a
one-way stop latch; [`worker::WorkerThread`] pulls from its manager's input
queues (high priority first), runs a [`transform::Transform`], and publishes
non-empty results; [`manager::WorkerManager`] owns the four queues and the
pool; [`supervisor::Supervisor`] owns the managers, the sockets, and the
command-driven state machine. The binary packet layout lives in [`packet`],
the JSON command envelope in [`message`], and the socket shapes in
[`transport`].

```no_run
use std::path::Path;
use std::sync::Arc;
use wavepool::config::ProcessConfig;
use wavepool::supervisor::Supervisor;
use wavepool::transform::{EchoTransform, Transform};

# fn main() -> Result<(), Box<dyn std::error::Error>> {
let cfg = ProcessConfig::from_file(Path::new("config.json"), "RTADP1")?;
let factory = Arc::new(|| Box::new(EchoTransform) as Box<dyn Transform>);
let mut supervisor = Supervisor::new(cfg, factory)?;
supervisor.register_signal_handlers()?;
supervisor.start(); // blocks until a shutdown command or signal
# Ok(())
# }
```
*/

pub mod config;
pub mod ctrl;
pub mod manager;
pub mod message;
pub mod monitor;
pub mod packet;
pub mod queue;
pub mod sink;
pub mod supervisor;
pub mod transform;
pub mod transport;
pub mod worker;

pub use queue::{Priority, QueueStopped, WorkQueue};
pub use supervisor::{Status, Supervisor};
pub use transform::{Transform, TransformFactory};
