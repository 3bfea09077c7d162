//! Shared fixtures: wire-format builders and a free-port probe.

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};
use std::net::TcpListener;
use wavepool::packet::{
    self, crc32, FrameHeader, CLASS_TM, GROUP_STAND_ALONE, HEADER_LEN, SUBTYPE_HOUSEKEEPING,
    SUBTYPE_WAVE_DATA, SUBTYPE_WAVE_HEADER, TYPE_HOUSEKEEPING, TYPE_WAVE, WAVE_DATA_LEN,
    WAVE_HEADER_LEN, WAVE_SAMPLES, WAVE_WORDS,
};

/// Grab a port the OS considers free right now. The tiny race between
/// dropping the probe listener and the real bind is acceptable in tests.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn tcp_uri(port: u16) -> String {
    format!("tcp://127.0.0.1:{port}")
}

/// A complete framed waveform packet carrying the given samples (padded or
/// truncated to the wire sample count).
pub fn waveform_frame(run_id: u16, samples: &[u16]) -> Vec<u8> {
    let mut body = vec![0u8; WAVE_HEADER_LEN + WAVE_DATA_LEN];

    // Acquisition sub-header.
    body[0] = TYPE_WAVE;
    body[1] = SUBTYPE_WAVE_HEADER;
    LittleEndian::write_u16(&mut body[4..6], 1); // sessionID
    LittleEndian::write_u16(&mut body[6..8], 1); // configID
    LittleEndian::write_i32(&mut body[20..24], 1_700_000_000); // ts_sec
    LittleEndian::write_u32(&mut body[28..32], 1); // decimation
    LittleEndian::write_u32(&mut body[40..44], WAVE_SAMPLES as u32);

    // Sample words, two samples per word, high half first.
    let data = &mut body[WAVE_HEADER_LEN..];
    data[0] = TYPE_WAVE;
    data[1] = SUBTYPE_WAVE_DATA;
    for i in 0..WAVE_WORDS {
        let hi = *samples.get(2 * i).unwrap_or(&0) as u32;
        let lo = *samples.get(2 * i + 1).unwrap_or(&0) as u32;
        let word = (hi << 16) | lo;
        LittleEndian::write_u32(&mut data[4 + 4 * i..8 + 4 * i], word);
    }

    frame_with_header(run_id, &body)
}

/// A compact framed housekeeping packet.
pub fn housekeeping_frame(run_id: u16) -> Vec<u8> {
    let mut body = vec![0u8; 16];
    body[0] = TYPE_HOUSEKEEPING;
    body[1] = SUBTYPE_HOUSEKEEPING;
    LittleEndian::write_u32(&mut body[4..8], 42); // waveCount
    frame_with_header(run_id, &body)
}

fn frame_with_header(run_id: u16, body: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        apid: CLASS_TM | 0x01,
        sequence: GROUP_STAND_ALONE | 1,
        run_id,
        size: body.len() as u16,
        crc: crc32(body),
    };
    let mut payload = vec![0u8; HEADER_LEN + body.len()];
    header.encode_into(&mut payload[..HEADER_LEN]);
    payload[HEADER_LEN..].copy_from_slice(body);
    packet::frame(&payload)
}

/// A flat trace with one spike: baseline everywhere, `peak` at `at`.
pub fn spike_samples(baseline: u16, peak: u16, at: usize) -> Vec<u16> {
    let mut samples = vec![baseline; WAVE_SAMPLES];
    samples[at] = peak;
    samples
}
