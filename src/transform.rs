/*!
The pluggable per-thread processing step.

Each worker thread owns one [`Transform`] instance built by the manager's
[`TransformFactory`]. A transform turns an input packet into result bytes;
an empty result means "nothing to publish" and is perfectly normal (unknown
packet types, housekeeping, rejected frames). Transforms must not panic
across the boundary: failures become empty outputs plus a logged warning.
*/

use crate::packet::{self, PacketKind};
use crate::queue::Priority;
use crate::sink::BatchWriter;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub trait Transform: Send {
    /// Apply a broadcast configuration message. The default ignores it.
    fn configure(&mut self, _cfg: &Value) {}

    /// Turn one input packet into result bytes. Empty means no result.
    fn process(&mut self, data: &[u8], priority: Priority) -> Vec<u8>;
}

/// Builds one transform per worker thread.
pub type TransformFactory = Arc<dyn Fn() -> Box<dyn Transform> + Send + Sync>;

/// Passes well-formed frames through untouched.
///
/// Used for replay and loopback tests: the published result is byte-for-byte
/// the framed input.
pub struct EchoTransform;

impl Transform for EchoTransform {
    fn process(&mut self, data: &[u8], _priority: Priority) -> Vec<u8> {
        match packet::parse_envelope(data) {
            Ok(_) => data.to_vec(),
            Err(e) => {
                warn!("echo: rejecting frame: {e}");
                Vec::new()
            }
        }
    }
}

/// Numerical pulse-feature estimation over waveform packets.
///
/// Unpacks the 1020 packed words into 2040 samples, estimates the baseline
/// from the leading quiet region, finds the peak and integrates three
/// windows behind it, and publishes the estimated pulse area as four
/// little-endian f32 bytes. When a shared [`BatchWriter`] is attached, the
/// full feature row also goes to the on-disk record file.
pub struct PulseAnalyzer {
    writer: Option<Arc<Mutex<BatchWriter>>>,
    baseline_window: usize,
    windows: [usize; 3],
    wave_count: u64,
}

/// Order of the feature row written to the record sink.
pub const FEATURE_FIELDS: [&str; 9] = [
    "n_waveform",
    "mult",
    "tstart",
    "index_peak",
    "peak",
    "integral1",
    "integral2",
    "integral3",
    "halflife",
];

impl PulseAnalyzer {
    pub fn new(writer: Option<Arc<Mutex<BatchWriter>>>) -> PulseAnalyzer {
        PulseAnalyzer {
            writer,
            baseline_window: 64,
            windows: [16, 64, 256],
            wave_count: 0,
        }
    }

    fn analyze(&mut self, payload: &[u8]) -> Option<f32> {
        let body = &payload[packet::HEADER_LEN..];
        let header = match packet::WaveHeader::decode(body) {
            Ok(h) => h,
            Err(e) => {
                warn!("analyzer: bad wave header: {e}");
                return None;
            }
        };
        // Skip the wave-data type/subtype/spare bytes in front of the words.
        let words_at = packet::WAVE_HEADER_LEN + 4;
        if body.len() < words_at {
            warn!("analyzer: waveform body truncated at {} bytes", body.len());
            return None;
        }
        let words = &body[words_at..];
        let samples = packet::unpack_samples(&words[..words.len() - words.len() % 4]);
        if samples.is_empty() {
            warn!("analyzer: waveform carries no samples");
            return None;
        }

        let baseline_n = self.baseline_window.min(samples.len());
        let baseline = samples[..baseline_n]
            .iter()
            .map(|&s| f64::from(s))
            .sum::<f64>()
            / baseline_n as f64;

        let (index_peak, &peak_raw) = samples
            .iter()
            .enumerate()
            .max_by_key(|&(_, &s)| s)
            .unwrap();
        let peak = f64::from(peak_raw) - baseline;

        let mut integrals = [0.0f64; 3];
        for (slot, &win) in integrals.iter_mut().zip(self.windows.iter()) {
            let end = (index_peak + win).min(samples.len());
            *slot = samples[index_peak..end]
                .iter()
                .map(|&s| f64::from(s) - baseline)
                .sum();
        }

        // Samples past the peak until the pulse falls under half maximum.
        let half = baseline + peak / 2.0;
        let halflife = samples[index_peak..]
            .iter()
            .position(|&s| f64::from(s) < half)
            .unwrap_or(samples.len() - index_peak);

        // Upward crossings of the half maximum, a crude pile-up count.
        let mut mult = 0u32;
        let mut above = false;
        for &s in &samples {
            let now_above = f64::from(s) >= half;
            if now_above && !above {
                mult += 1;
            }
            above = now_above;
        }

        self.wave_count += 1;
        let tstart = header.ts_sec as f64 + header.ts_nsec as f64 * 1e-9;
        let area = integrals[2] as f32;

        debug!(
            "analyzer: wave {} session {} peak {:.1}@{} area {:.1}",
            self.wave_count, header.session_id, peak, index_peak, area
        );

        if let Some(writer) = &self.writer {
            let row = [
                self.wave_count as f32,
                mult as f32,
                tstart as f32,
                index_peak as f32,
                peak as f32,
                integrals[0] as f32,
                integrals[1] as f32,
                integrals[2] as f32,
                halflife as f32,
            ];
            if let Err(e) = writer.lock().unwrap().push_row(&row) {
                warn!("analyzer: record sink rejected row: {e}");
            }
        }

        Some(area)
    }
}

impl Transform for PulseAnalyzer {
    fn configure(&mut self, cfg: &Value) {
        if let Some(n) = cfg.pointer("/body/baseline_window").and_then(Value::as_u64) {
            self.baseline_window = (n as usize).max(1);
            info!("analyzer: baseline window set to {}", self.baseline_window);
        }
        if let Some(list) = cfg.pointer("/body/windows").and_then(Value::as_array) {
            for (slot, v) in self.windows.iter_mut().zip(list.iter()) {
                if let Some(n) = v.as_u64() {
                    *slot = (n as usize).max(1);
                }
            }
            info!("analyzer: integration windows set to {:?}", self.windows);
        }
    }

    fn process(&mut self, data: &[u8], _priority: Priority) -> Vec<u8> {
        let payload = match packet::parse_envelope(data) {
            Ok(p) => p,
            Err(e) => {
                warn!("analyzer: rejecting frame: {e}");
                return Vec::new();
            }
        };
        match packet::classify(payload) {
            Ok(PacketKind::Waveform) | Ok(PacketKind::WaveformHeader) => self
                .analyze(payload)
                .map(|area| area.to_le_bytes().to_vec())
                .unwrap_or_default(),
            Ok(PacketKind::Housekeeping) => {
                info!("analyzer: housekeeping packet received");
                Vec::new()
            }
            Ok(kind) => {
                warn!("analyzer: unexpected packet {kind:?}");
                Vec::new()
            }
            Err(e) => {
                warn!("analyzer: unclassifiable payload: {e}");
                Vec::new()
            }
        }
    }
}
