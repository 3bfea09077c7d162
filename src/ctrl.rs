/*!
Client for the acquisition frontend's control port.

The frontend listens on a pull socket for fixed-size 128-byte command
buffers, each holding one encoded control frame. Starting an acquisition is
a two-step dance: an "undefined" DefaultA0 frame arms the trigger, then a
StartAcq frame after a short pause starts the run. Stopping takes a single
StopAcq frame.
*/

use crate::packet::{encode_control, ControlKind};
use crate::transport::{PushSocket, TransportError};
use log::info;
use std::thread;
use std::time::Duration;

/// The frontend reads fixed-size command buffers.
pub const CTRL_FRAME_LEN: usize = 128;
/// Pause between the arming frame and the start frame.
const ARM_DELAY: Duration = Duration::from_millis(100);

pub struct CtrlClient {
    socket: PushSocket,
    counter: u16,
}

impl CtrlClient {
    /// Connect to the frontend's control port. The connection is made
    /// eagerly; a frontend that is not there is a deployment error, not
    /// something to retry around.
    pub fn connect(uri: &str) -> Result<CtrlClient, TransportError> {
        let socket = PushSocket::connect(uri)?;
        info!("ctrl: connected to {uri}");
        Ok(CtrlClient { socket, counter: 0 })
    }

    fn send_frame(&mut self, kind: ControlKind, run_id: u16) -> Result<(), TransportError> {
        self.counter = self.counter.wrapping_add(1);
        let frame = encode_control(kind, run_id, self.counter);
        let mut buf = vec![0u8; CTRL_FRAME_LEN];
        buf[..frame.len()].copy_from_slice(&frame);
        self.socket.send(&buf)?;
        info!("ctrl: sent {kind:?} for run {run_id}");
        Ok(())
    }

    /// Arm the trigger, wait, then start the acquisition run.
    pub fn send_start(&mut self, run_id: u16) -> Result<(), TransportError> {
        self.send_frame(ControlKind::DefaultA0, run_id)?;
        thread::sleep(ARM_DELAY);
        self.send_frame(ControlKind::StartAcq, run_id)
    }

    pub fn send_stop(&mut self, run_id: u16) -> Result<(), TransportError> {
        self.send_frame(ControlKind::StopAcq, run_id)
    }
}
