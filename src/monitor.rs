/*!
Monitoring snapshots of a worker manager.

A `getstatus` command makes the supervisor ask each manager's emitter for a
snapshot addressed to the requester: queue depths, high-water marks, drop
counters and per-worker state, rate and lifetime count, wrapped in a type-5
info envelope. The supervisor does the actual send; the monitoring socket
never leaves its thread.
*/

use crate::manager::WorkerManager;
use crate::message::Envelope;
use serde_json::json;

pub struct MonitoringEmitter {
    pidsource: String,
}

impl MonitoringEmitter {
    pub fn new(pidsource: &str) -> MonitoringEmitter {
        MonitoringEmitter {
            pidsource: pidsource.to_owned(),
        }
    }

    /// Gather one manager's state into an envelope for `pidtarget`.
    pub fn snapshot(&self, manager: &WorkerManager, pidtarget: &str) -> Envelope {
        let shared = manager.shared();
        let workers: Vec<_> = manager
            .workers()
            .iter()
            .map(|w| {
                json!({
                    "id": w.id(),
                    "state": w.stats().state() as u8,
                    "rate": w.stats().rate(),
                    "total": w.stats().total_processed(),
                })
            })
            .collect();
        let body = json!({
            "manager": shared.name,
            "queues": {
                "lp_in": shared.lp_in.len(),
                "hp_in": shared.hp_in.len(),
                "lp_out": shared.lp_out.len(),
                "hp_out": shared.hp_out.len(),
                "lp_in_hwm": shared.lp_in.high_water_mark(),
                "hp_in_hwm": shared.hp_in.high_water_mark(),
                "lp_in_dropped": shared.lp_in.dropped(),
                "hp_in_dropped": shared.hp_in.dropped(),
            },
            "workers": workers,
        });
        Envelope::status(&self.pidsource, pidtarget, body)
    }
}
